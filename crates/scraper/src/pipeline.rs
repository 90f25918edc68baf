//! Checkout pipeline orchestration.
//!
//! Drives one invocation end to end: navigate to the donation profile,
//! fill the form, select the payment method, submit, resolve the checkout
//! surface, extract the QR artifact. The browsing context is disposed on
//! every exit path. Errors split into two classes: a dead or unlaunchable
//! browser process is `Err` (the shared process is unusable for everyone),
//! anything scoped to this invocation resolves to `Ok(None)` with the
//! failure recorded in the report.

use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use vipgate_core::{Config, Error, Paths, Result};

use crate::browser::Browser;
use crate::checkout::submit_and_resolve;
use crate::extract::{extract_qr, QrArtifact};
use crate::fill::fill_donation_form;
use crate::method::select_method_and_confirm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Navigate,
    Fill,
    SelectMethod,
    Submit,
    Extract,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Navigate => "navigate",
            Stage::Fill => "fill",
            Stage::SelectMethod => "select-method",
            Stage::Submit => "submit",
            Stage::Extract => "extract",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageEvent {
    pub stage: Stage,
    pub ok: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

/// Structured trace of one pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub invoice_id: String,
    pub stages: Vec<StageEvent>,
    /// Checkout surface label once resolved.
    pub surface: Option<String>,
    /// Artifact provenance label when extraction produced one.
    pub provenance: Option<String>,
}

impl PipelineReport {
    fn record(&mut self, stage: Stage, ok: bool, started: Instant, note: impl Into<String>) {
        self.stages.push(StageEvent {
            stage,
            ok,
            elapsed_ms: started.elapsed().as_millis() as u64,
            note: note.into(),
        });
    }

    /// Last stage that ran, for failure logs.
    pub fn last_stage(&self) -> Option<Stage> {
        self.stages.last().map(|e| e.stage)
    }
}

/// The checkout pipeline entry point, shared by the gateway and the CLI.
pub struct Scraper {
    config: Config,
    paths: Paths,
    gate: Semaphore,
}

impl Scraper {
    pub fn new(config: Config, paths: Paths) -> Self {
        let permits = config.scraper.max_concurrent.max(1);
        Self {
            config,
            paths,
            gate: Semaphore::new(permits),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch the payment QR for one invoice.
    ///
    /// `Ok(None)` means this invocation failed; `Err` means the shared
    /// browser is unusable and callers should surface an outage.
    pub async fn fetch_payment_qr(
        &self,
        invoice_id: &str,
        amount: i64,
    ) -> Result<Option<QrArtifact>> {
        let (artifact, _report) = self.fetch_payment_qr_with_report(invoice_id, amount).await?;
        Ok(artifact)
    }

    /// Same as `fetch_payment_qr`, returning the stage trace too.
    pub async fn fetch_payment_qr_with_report(
        &self,
        invoice_id: &str,
        amount: i64,
    ) -> Result<(Option<QrArtifact>, PipelineReport)> {
        if invoice_id.is_empty() {
            return Err(Error::Validation("Empty invoice id".into()));
        }
        if amount <= 0 {
            return Err(Error::Validation(format!("Non-positive amount {}", amount)));
        }
        let profile_url = self
            .config
            .profile_url()
            .ok_or_else(|| Error::Config("donation.username is not set".into()))?;

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::Browser("Concurrency gate closed".into()))?;

        let browser = Browser::shared(&self.config, &self.paths).await?;
        let mut ctx = browser.acquire_context().await?;

        let mut report = PipelineReport {
            invoice_id: invoice_id.to_string(),
            ..Default::default()
        };

        let outcome = self
            .run_stages(browser, &ctx, &profile_url, invoice_id, amount, &mut report)
            .await;

        // Context teardown happens before the outcome is interpreted, so a
        // failed invocation cannot leak tabs into the shared process.
        ctx.close().await;

        match outcome {
            Ok(artifact) => {
                info!(
                    invoice = invoice_id,
                    provenance = report.provenance.as_deref().unwrap_or("none"),
                    surface = report.surface.as_deref().unwrap_or("none"),
                    "Pipeline finished"
                );
                Ok((artifact, report))
            }
            Err(Error::Browser(e)) => {
                // The shared process is gone; every future invocation would
                // fail the same way.
                Err(Error::Browser(e))
            }
            Err(e) => {
                warn!(
                    invoice = invoice_id,
                    stage = report.last_stage().map(|s| s.as_str()).unwrap_or("init"),
                    "Pipeline invocation failed: {}",
                    e
                );
                Ok((None, report))
            }
        }
    }

    async fn run_stages(
        &self,
        browser: &'static Browser,
        ctx: &crate::browser::BrowsingContext,
        profile_url: &str,
        invoice_id: &str,
        amount: i64,
        report: &mut PipelineReport,
    ) -> Result<Option<QrArtifact>> {
        if !browser.is_alive().await {
            return Err(Error::Browser("Browser process exited".into()));
        }

        let nav_timeout = Duration::from_millis(self.config.scraper.nav_timeout_ms);

        let started = Instant::now();
        let page = ctx.new_page().await?;
        let nav = page.navigate(profile_url, nav_timeout).await;
        report.record(Stage::Navigate, nav.is_ok(), started, profile_url);
        nav?;

        let started = Instant::now();
        let fill =
            fill_donation_form(&page, amount, invoice_id, &self.config.donation.donor_name).await;
        match &fill {
            Ok(r) => report.record(
                Stage::Fill,
                true,
                started,
                format!(
                    "amount={} message={}",
                    r.amount.is_filled(),
                    r.message.is_filled()
                ),
            ),
            Err(e) => report.record(Stage::Fill, false, started, e.to_string()),
        }
        fill?;

        let started = Instant::now();
        let method = select_method_and_confirm(&page, &self.config.donation.method, amount).await;
        match &method {
            Ok(r) => report.record(
                Stage::SelectMethod,
                true,
                started,
                format!(
                    "clicked={} amount_ok={} total_ok={}",
                    r.clicked.is_some(),
                    r.amount_reflected,
                    r.total_positive
                ),
            ),
            Err(e) => report.record(Stage::SelectMethod, false, started, e.to_string()),
        }
        method?;

        let started = Instant::now();
        let target = match submit_and_resolve(page, ctx).await {
            Ok(t) => {
                report.surface = Some(t.surface.describe());
                report.record(Stage::Submit, true, started, t.surface.describe());
                t
            }
            Err(e) => {
                report.record(Stage::Submit, false, started, e.to_string());
                return Err(e);
            }
        };

        let started = Instant::now();
        let artifact = extract_qr(&target, self.config.scraper.extraction_policy).await?;
        match &artifact {
            Some(a) => {
                report.provenance = Some(a.provenance.as_str().to_string());
                report.record(Stage::Extract, true, started, a.provenance.as_str());
            }
            None => report.record(Stage::Extract, false, started, "no artifact"),
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_records_stages_in_order() {
        let mut report = PipelineReport::default();
        let t = Instant::now();
        report.record(Stage::Navigate, true, t, "https://saweria.co/acme");
        report.record(Stage::Fill, true, t, "amount=true message=true");
        report.record(Stage::Submit, false, t, "Submit control not found");
        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.last_stage(), Some(Stage::Submit));
        assert!(!report.stages[2].ok);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::SelectMethod.as_str(), "select-method");
        assert_eq!(Stage::Extract.as_str(), "extract");
    }

    #[tokio::test]
    async fn test_validation_errors_before_browser_launch() {
        let paths = Paths::with_base(std::env::temp_dir().join("vipgate-test"));
        let scraper = Scraper::new(Config::default(), paths);
        let err = scraper.fetch_payment_qr("", 25_000).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = scraper.fetch_payment_qr("inv-1", 0).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_username_is_config_error() {
        let paths = Paths::with_base(std::env::temp_dir().join("vipgate-test"));
        let scraper = Scraper::new(Config::default(), paths);
        let err = scraper.fetch_payment_qr("inv-1", 25_000).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
