use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// Donation-site settings: which creator profile the checkout pipeline
/// drives, and how the form is filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationConfig {
    /// Creator username on the donation site; the profile page is
    /// `<base_url>/<username>`.
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_donation_base_url")]
    pub base_url: String,
    /// Payment method control to click ("gopay" is the only one the target
    /// site family reliably exposes a QR for).
    #[serde(default = "default_payment_method")]
    pub method: String,
    /// Display name typed into the supporter field.
    #[serde(default = "default_donor_name")]
    pub donor_name: String,
    /// Shared secret for the payment confirmation webhook (HMAC-SHA256).
    /// Empty disables verification.
    #[serde(default)]
    pub webhook_secret: String,
}

fn default_donation_base_url() -> String {
    "https://saweria.co".to_string()
}

fn default_payment_method() -> String {
    "gopay".to_string()
}

fn default_donor_name() -> String {
    "Budi".to_string()
}

impl Default for DonationConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            base_url: default_donation_base_url(),
            method: default_payment_method(),
            donor_name: default_donor_name(),
            webhook_secret: String::new(),
        }
    }
}

/// How strict artifact extraction is about what counts as a QR.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionPolicy {
    /// Degrade through screenshot tiers when no real QR asset is found.
    #[default]
    Permissive,
    /// Only accept a genuine QR image (inline or re-fetched); screenshots
    /// are rejected.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Hard cap on in-flight pipeline invocations. Each invocation holds an
    /// isolated browsing context; Chrome memory grows with every live one.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_nav_timeout_ms")]
    pub nav_timeout_ms: u64,
    #[serde(default)]
    pub extraction_policy: ExtractionPolicy,
    /// Explicit browser binary; when empty, well-known locations are probed.
    #[serde(default)]
    pub browser_path: String,
}

fn default_headless() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

fn default_nav_timeout_ms() -> u64 {
    45_000
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            max_concurrent: default_max_concurrent(),
            nav_timeout_ms: default_nav_timeout_ms(),
            extraction_policy: ExtractionPolicy::default(),
            browser_path: String::new(),
        }
    }
}

/// Membership requirements checked before a buyer may open the storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub channel_ids: Vec<String>,
    /// Invite links shown for chats the buyer has not joined yet, index-
    /// aligned with the id lists.
    #[serde(default)]
    pub group_invites: Vec<String>,
    #[serde(default)]
    pub channel_invites: Vec<String>,
    /// "ALL" requires every chat; "ANY" requires `min_count`.
    #[serde(default = "default_gate_mode")]
    pub mode: String,
    #[serde(default = "default_min_count")]
    pub min_count: usize,
}

fn default_gate_mode() -> String {
    "ALL".to_string()
}

fn default_min_count() -> usize {
    1
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            group_ids: Vec::new(),
            channel_ids: Vec::new(),
            group_invites: Vec::new(),
            channel_invites: Vec::new(),
            mode: default_gate_mode(),
            min_count: default_min_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default)]
    pub token: String,
    /// Mini-app URL opened from the storefront keyboard button. Falls back
    /// to `<gateway.base_url>/webapp/index.html` when empty.
    #[serde(default)]
    pub webapp_url: String,
    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Public base URL, used to build QR links sent to buyers.
    #[serde(default)]
    pub base_url: String,
    /// "prod" disables the debug endpoints.
    #[serde(default = "default_env")]
    pub env: String,
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    8780
}

fn default_env() -> String {
    "dev".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            base_url: String::new(),
            env: default_env(),
        }
    }
}

/// One purchasable group in the storefront catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    #[serde(default = "default_price_idr")]
    pub price_idr: i64,
    #[serde(default = "default_min_price_idr")]
    pub min_price_idr: i64,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

fn default_price_idr() -> i64 {
    25_000
}

fn default_min_price_idr() -> i64 {
    1
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            price_idr: default_price_idr(),
            min_price_idr: default_min_price_idr(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub donation: DonationConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Secrets come from the environment when present, so the config file
    /// can be committed without them.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.bot.token = token.trim().to_string();
            }
        }
        if let Ok(secret) = std::env::var("DONATION_WEBHOOK_SECRET") {
            self.donation.webhook_secret = secret.trim().to_string();
        }
        if let Ok(username) = std::env::var("DONATION_USERNAME") {
            if !username.trim().is_empty() {
                self.donation.username = username.trim().to_string();
            }
        }
    }

    /// Donation profile page the pipeline navigates to.
    pub fn profile_url(&self) -> Option<String> {
        if self.donation.username.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}",
            self.donation.base_url.trim_end_matches('/'),
            self.donation.username
        ))
    }

    pub fn group_name(&self, group_id: &str) -> Option<&str> {
        self.catalog
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .map(|g| g.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_url() {
        let mut cfg = Config::default();
        assert!(cfg.profile_url().is_none());
        cfg.donation.username = "payments".to_string();
        assert_eq!(
            cfg.profile_url().as_deref(),
            Some("https://saweria.co/payments")
        );
    }

    #[test]
    fn test_camel_case_roundtrip() {
        let raw = r#"{
  "donation": { "username": "acme", "baseUrl": "https://saweria.co" },
  "scraper": { "maxConcurrent": 4, "extractionPolicy": "strict" },
  "catalog": { "priceIdr": 50000, "groups": [{"id": "-100123", "name": "VIP"}] }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.scraper.max_concurrent, 4);
        assert_eq!(cfg.scraper.extraction_policy, ExtractionPolicy::Strict);
        assert_eq!(cfg.catalog.price_idr, 50_000);
        assert_eq!(cfg.group_name("-100123"), Some("VIP"));
        assert_eq!(cfg.group_name("-100999"), None);
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(cfg.scraper.headless);
        assert_eq!(cfg.scraper.max_concurrent, 2);
        assert_eq!(cfg.bot.gate.mode, "ALL");
        assert_eq!(cfg.catalog.price_idr, 25_000);
        assert_eq!(cfg.scraper.extraction_policy, ExtractionPolicy::Permissive);
    }
}
