//! Donation form filling.
//!
//! Fills amount, supporter name, email and the message carrying the
//! reconciliation marker, then ticks whatever consent checkboxes the page
//! shows. Every miss is recorded in the report and the pipeline keeps
//! going, because the site renders different subsets of fields depending
//! on campaign settings; the method-selection stage re-validates the
//! amount through the page's own confirmation labels.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use vipgate_core::{canonical_marker, Result};

use crate::browser::{js_string, Page};
use crate::selector::{DomProbe, Locator, SelectorChain};

/// Outcome of one field in the fill pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    Filled { locator: String },
    NotFound,
}

impl FieldOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FieldOutcome::Filled { .. })
    }
}

/// What the fill pass did, field by field.
#[derive(Debug, Clone)]
pub struct FillReport {
    pub amount: FieldOutcome,
    pub name: FieldOutcome,
    pub email: FieldOutcome,
    pub message: FieldOutcome,
    pub consents_checked: usize,
}

fn amount_chain() -> SelectorChain {
    SelectorChain::new("amount field")
        .css(r#"input[placeholder*="Ketik jumlah" i]"#, 4_000)
        .css(r#"input[aria-label*="Nominal" i]"#, 1_500)
        .css(r#"input[name="amount"]"#, 1_500)
        .css(r#"input[type="number"]"#, 1_500)
}

fn name_chain() -> SelectorChain {
    SelectorChain::new("supporter name field")
        .css(r#"input[name="name"]"#, 1_500)
        .css(r#"input[placeholder*="nama" i]"#, 1_000)
        .css(r#"input[data-testid="name-input"]"#, 1_000)
}

fn email_chain() -> SelectorChain {
    SelectorChain::new("email field")
        .css(r#"input[name="email"]"#, 1_500)
        .css(r#"input[type="email"]"#, 1_000)
        .css(r#"input[placeholder*="email" i]"#, 1_000)
}

fn message_chain() -> SelectorChain {
    SelectorChain::new("message field")
        .css(r#"input[name="message"]"#, 1_500)
        .css(r#"input[data-testid="message-input"]"#, 1_000)
        .css("#message", 1_000)
        .css(r#"input[placeholder*="pesan" i]"#, 1_000)
        .css(r#"textarea[name="message"]"#, 1_000)
        .css(r#"textarea[placeholder*="pesan" i]"#, 1_000)
        .css("textarea", 1_000)
}

/// Visible texts of consent checkboxes the site shows for some campaigns.
const CONSENT_TEXTS: &[&str] = &["17 tahun", "menyetujui", "kebijakan privasi", "ketentuan"];

/// Set a form control's value through the native setter and fire the
/// events a React-style form expects. Plain `el.value = x` is invisible to
/// controlled components.
fn set_value_js(selector: &str, value: &str) -> String {
    format!(
        r#"(function() {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.scrollIntoView({{block: 'center'}});
            el.focus();
            const proto = el.tagName === 'TEXTAREA'
                ? HTMLTextAreaElement.prototype
                : HTMLInputElement.prototype;
            const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
            setter.call(el, {val});
            el.dispatchEvent(new Event('input', {{bubbles: true}}));
            el.dispatchEvent(new Event('change', {{bubbles: true}}));
            el.blur();
            return true;
        }})()"#,
        sel = js_string(selector),
        val = js_string(value)
    )
}

/// Form controls the fill pass needs: chain resolution plus value
/// assignment. Split out so the field-by-field behavior is testable
/// without a browser.
#[async_trait]
pub(crate) trait FormDom: DomProbe {
    async fn set_value(&self, selector: &str, value: &str) -> Result<bool>;
}

#[async_trait]
impl FormDom for Page {
    async fn set_value(&self, selector: &str, value: &str) -> Result<bool> {
        self.eval_bool(&set_value_js(selector, value)).await
    }
}

async fn fill_field<D: FormDom + ?Sized>(
    dom: &D,
    chain: SelectorChain,
    value: &str,
) -> Result<FieldOutcome> {
    let target = chain.target;
    let Some(locator) = chain.resolve(dom).await? else {
        return Ok(FieldOutcome::NotFound);
    };
    let Locator::Css(selector) = &locator else {
        return Ok(FieldOutcome::NotFound);
    };
    if !dom.set_value(selector, value).await? {
        return Ok(FieldOutcome::NotFound);
    }
    debug!(target, locator = %locator.describe(), "Filled");
    // Brief settle so client-side validation runs before the next field.
    tokio::time::sleep(Duration::from_millis(180)).await;
    Ok(FieldOutcome::Filled {
        locator: locator.describe(),
    })
}

/// Random throwaway email so repeat checkouts do not collide on the
/// site's per-email donor identity.
fn donor_email() -> String {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    format!("donor{}@example.com", &tag[..8])
}

/// Fill the donation form for one invoice.
///
/// The message field always receives the canonical `INV:` marker; it is
/// the only correlation channel back from the payment webhook.
pub async fn fill_donation_form(
    page: &Page,
    amount: i64,
    invoice_id: &str,
    donor_name: &str,
) -> Result<FillReport> {
    let mut report = fill_fields(page, amount, invoice_id, donor_name).await?;
    report.consents_checked = check_consents(page).await?;
    Ok(report)
}

async fn fill_fields<D: FormDom + ?Sized>(
    dom: &D,
    amount: i64,
    invoice_id: &str,
    donor_name: &str,
) -> Result<FillReport> {
    let amount_outcome = fill_field(dom, amount_chain(), &amount.to_string()).await?;
    if !amount_outcome.is_filled() {
        warn!(invoice = invoice_id, "Amount field not found on donation page");
    }

    let name = fill_field(dom, name_chain(), donor_name).await?;
    let email = fill_field(dom, email_chain(), &donor_email()).await?;
    let message = fill_field(dom, message_chain(), &canonical_marker(invoice_id)).await?;
    if !message.is_filled() {
        warn!(invoice = invoice_id, "Message field not found; marker not written");
    }

    Ok(FillReport {
        amount: amount_outcome,
        name,
        email,
        message,
        consents_checked: 0,
    })
}

/// Tick consent checkboxes by their visible text, best effort. A checkbox
/// that is not present or already checked is not a failure.
async fn check_consents(page: &Page) -> Result<usize> {
    let mut checked = 0;
    for text in CONSENT_TEXTS {
        let expr = format!(
            r#"(function() {{
                const needle = {needle}.toLowerCase();
                const labels = document.querySelectorAll('label');
                for (const label of labels) {{
                    const t = (label.innerText || '').toLowerCase();
                    if (!t.includes(needle)) continue;
                    const box = label.querySelector('input[type="checkbox"]')
                        || document.getElementById(label.getAttribute('for') || '');
                    if (box && !box.checked) {{
                        label.scrollIntoView({{block: 'center'}});
                        box.click();
                        return true;
                    }}
                    return false;
                }}
                return false;
            }})()"#,
            needle = js_string(text)
        );
        if page.eval_bool(&expr).await? {
            checked += 1;
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
    }
    if checked > 0 {
        debug!(count = checked, "Checked consent boxes");
    }
    // Some renders use a bare checkbox without a label wrapper.
    if checked == 0 {
        let expr = r#"(function() {
            const boxes = document.querySelectorAll('input[type="checkbox"]');
            let n = 0;
            for (const box of boxes) {
                if (!box.checked) { box.click(); n++; }
            }
            return n;
        })()"#;
        let n = page.eval(expr).await?.as_i64().unwrap_or(0);
        checked = n.max(0) as usize;
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::click_js;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const INVOICE: &str = "a1b2c3d4-1111-2222-3333-444455556666";

    struct MockForm {
        present: HashSet<String>,
        sets: Mutex<Vec<(String, String)>>,
    }

    impl MockForm {
        fn with(present: &[&str]) -> Self {
            Self {
                present: present.iter().map(|s| s.to_string()).collect(),
                sets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DomProbe for MockForm {
        async fn exists(&self, locator: &Locator) -> Result<bool> {
            Ok(self.present.contains(&locator.describe()))
        }
    }

    #[async_trait]
    impl FormDom for MockForm {
        async fn set_value(&self, selector: &str, value: &str) -> Result<bool> {
            self.sets
                .lock()
                .unwrap()
                .push((selector.to_string(), value.to_string()));
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_amount_field_is_not_fatal() {
        let form = MockForm::with(&["css=textarea"]);
        let report = fill_fields(&form, 25_000, INVOICE, "Budi").await.unwrap();
        assert_eq!(report.amount, FieldOutcome::NotFound);
        assert!(report.message.is_filled());
        let sets = form.sets.lock().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].1, format!("INV:{}", INVOICE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_reports_each_field() {
        let form = MockForm::with(&[
            r#"css=input[name="amount"]"#,
            r#"css=input[name="name"]"#,
            r#"css=input[type="email"]"#,
            r#"css=input[name="message"]"#,
        ]);
        let report = fill_fields(&form, 50_000, INVOICE, "Budi").await.unwrap();
        assert!(report.amount.is_filled());
        assert!(report.name.is_filled());
        assert!(report.email.is_filled());
        assert!(report.message.is_filled());
        let sets = form.sets.lock().unwrap();
        assert_eq!(sets[0].1, "50000");
    }

    #[test]
    fn test_set_value_js_uses_native_setter() {
        let js = set_value_js(r#"input[name="amount"]"#, "25000");
        assert!(js.contains("getOwnPropertyDescriptor"));
        assert!(js.contains("dispatchEvent"));
        assert!(js.contains(r#"\"amount\""#));
        assert!(js.contains("\"25000\""));
    }

    #[test]
    fn test_donor_email_unique_and_wellformed() {
        let a = donor_email();
        let b = donor_email();
        assert!(a.starts_with("donor"));
        assert!(a.ends_with("@example.com"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_amount_chain_order() {
        let chain = amount_chain();
        assert_eq!(chain.target, "amount field");
        assert!(matches!(
            &chain.steps[0].locator,
            Locator::Css(s) if s.contains("Ketik jumlah")
        ));
        assert_eq!(chain.steps.len(), 4);
    }

    #[test]
    fn test_message_chain_covers_textarea_fallback() {
        let chain = message_chain();
        let last = chain.steps.last().unwrap();
        assert_eq!(last.locator, Locator::css("textarea"));
    }

    #[test]
    fn test_click_js_for_text_locator() {
        let js = click_js(&Locator::text("GoPay"));
        assert!(js.contains("scrollIntoView"));
        assert!(js.contains("el.click()"));
    }
}
