//! Payment method selection and pre-submit confirmation.
//!
//! Clicks the configured payment method control, nudges the page to
//! re-render, then runs two soft confirmation polls: the amount label and
//! a positive total. Both polls are advisory. A failed poll is logged and
//! the pipeline proceeds, since the label text shifts between site
//! revisions more often than the underlying form state.

use std::time::Duration;
use tracing::{debug, warn};

use vipgate_core::Result;

use crate::browser::{js_string, Page};
use crate::selector::{resolve_and_click, SelectorChain};

/// What method selection observed.
#[derive(Debug, Clone)]
pub struct MethodReport {
    /// Locator that was clicked, None when no method control matched.
    pub clicked: Option<String>,
    /// "Jumlah Dukungan: Rp<amount>" label seen.
    pub amount_reflected: bool,
    /// "Total: Rp<N>" parsed with N > 0.
    pub total_positive: bool,
}

fn method_chain(method: &str) -> SelectorChain {
    // The data-testid convention holds across the site family; the text
    // fallback catches redesigns.
    let mut chain = SelectorChain::new("payment method");
    let testid = format!(r#"[data-testid="{}-button"]"#, method);
    let testid_loose = format!(r#"[data-testid*="{}"]"#, method);
    chain = chain
        .css(&testid, 4_000)
        .css(&testid_loose, 1_500)
        .text(method, 1_500);
    chain
}

/// Format an IDR amount with `.` thousands separators (25000 -> "25.000").
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    if amount < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// JS that checks the amount label against the formatted rupiah value.
fn amount_label_js(amount: i64) -> String {
    format!(
        r#"(function() {{
            const wanted = 'jumlah dukungan: rp' + {formatted};
            return (document.body.innerText || '').toLowerCase().includes(wanted.toLowerCase());
        }})()"#,
        formatted = js_string(&format_rupiah(amount))
    )
}

/// JS that finds a "Total: Rp<N>" line and parses N from its digits.
const TOTAL_JS: &str = r#"(function() {
    const text = document.body.innerText || '';
    const m = text.match(/Total:\s*Rp\s*([0-9.,]+)/i);
    if (!m) return 0;
    const n = parseInt(m[1].replace(/[.,]/g, ''), 10);
    return isNaN(n) ? 0 : n;
})()"#;

/// Click the payment method and confirm the form reflects the amount.
pub async fn select_method_and_confirm(
    page: &Page,
    method: &str,
    amount: i64,
) -> Result<MethodReport> {
    let clicked = resolve_and_click(page, &method_chain(method)).await?;
    match &clicked {
        Some(locator) => debug!(method, locator = %locator.describe(), "Method selected"),
        None => warn!(method, "No payment method control matched; relying on site default"),
    }

    // A Tab press forces focus-driven re-render of the summary panel.
    page.press_key("Tab", "Tab").await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let amount_reflected = page
        .wait_for(&amount_label_js(amount), Duration::from_secs(4))
        .await?;
    if !amount_reflected {
        warn!(amount, "Amount label not observed; continuing");
    }

    let total_positive = wait_total_positive(page, Duration::from_secs(6)).await?;
    if !total_positive {
        warn!("Positive total not observed; continuing");
    }

    Ok(MethodReport {
        clicked: clicked.map(|l| l.describe()),
        amount_reflected,
        total_positive,
    })
}

async fn wait_total_positive(page: &Page, timeout: Duration) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let total = page.eval(TOTAL_JS).await?.as_i64().unwrap_or(0);
        if total > 0 {
            debug!(total, "Total confirmed");
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rupiah() {
        assert_eq!(format_rupiah(0), "0");
        assert_eq!(format_rupiah(999), "999");
        assert_eq!(format_rupiah(1_000), "1.000");
        assert_eq!(format_rupiah(25_000), "25.000");
        assert_eq!(format_rupiah(1_234_567), "1.234.567");
        assert_eq!(format_rupiah(-25_000), "-25.000");
    }

    #[test]
    fn test_amount_label_js_embeds_formatted_amount() {
        let js = amount_label_js(25_000);
        assert!(js.contains("25.000"));
        assert!(js.contains("jumlah dukungan"));
    }

    #[test]
    fn test_method_chain_prefers_testid() {
        let chain = method_chain("gopay");
        assert_eq!(chain.steps.len(), 3);
        assert!(matches!(
            &chain.steps[0].locator,
            crate::selector::Locator::Css(s) if s == r#"[data-testid="gopay-button"]"#
        ));
        assert!(matches!(
            &chain.steps[2].locator,
            crate::selector::Locator::Text(s) if s == "gopay"
        ));
    }
}
