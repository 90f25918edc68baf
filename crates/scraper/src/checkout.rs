//! Submit and resolve where the checkout UI actually rendered.
//!
//! After submission the site family renders payment UI in one of three
//! places: a new tab, the same document, or a payment-provider iframe.
//! Resolution checks them in a fixed priority order (new tab first) so a
//! simultaneous new-tab-plus-navigation settles deterministically. A
//! missing submit control is the one fatal error in this stage: nothing
//! was submitted, so there is nothing to extract.

use std::time::Duration;
use tracing::{debug, info, warn};

use vipgate_core::{Error, Result};

use crate::browser::{BrowsingContext, Page};
use crate::selector::{resolve_and_click, SelectorChain};

/// URL keywords identifying payment-provider frames.
pub const PAYMENT_KEYWORDS: &[&str] = &[
    "gopay", "qris", "payment", "xendit", "midtrans", "snap", "checkout", "pay",
];

/// Where the checkout UI rendered.
#[derive(Debug, Clone)]
pub enum Surface {
    /// The site opened a dedicated payment tab.
    NewTab,
    /// The original document navigated or re-rendered in place.
    SamePage,
    /// A payment-provider iframe inside the original document.
    Frame { frame_id: String, frame_url: String },
    /// Nothing conclusive; extraction degrades to page-level capture.
    Fallback,
}

impl Surface {
    pub fn describe(&self) -> String {
        match self {
            Surface::NewTab => "new-tab".to_string(),
            Surface::SamePage => "same-page".to_string(),
            Surface::Frame { frame_url, .. } => format!("frame:{}", frame_url),
            Surface::Fallback => "fallback".to_string(),
        }
    }
}

/// The resolved surface plus the page to extract from. For `NewTab` this
/// is the payment tab; otherwise the original page.
pub struct CheckoutTarget {
    pub page: Page,
    pub surface: Surface,
}

fn submit_chain() -> SelectorChain {
    SelectorChain::new("submit button")
        .css(r#"button[data-testid="donate-button"]"#, 4_000)
        .css(r#"[data-testid="donate-button"]"#, 1_000)
        .text("kirim dukungan", 2_000)
        .text("kirim", 1_000)
}

/// True when a frame URL belongs to a payment provider.
pub fn is_payment_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    if lower.is_empty() || lower == "about:blank" {
        return false;
    }
    PAYMENT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Click submit and resolve the checkout surface.
pub async fn submit_and_resolve(page: Page, ctx: &BrowsingContext) -> Result<CheckoutTarget> {
    // Subscribe before clicking; the tab can open faster than a poll.
    let mut watcher = ctx.watch_new_pages().await;

    let clicked = resolve_and_click(&page, &submit_chain()).await?;
    if clicked.is_none() {
        return Err(Error::Scrape("Submit control not found; nothing submitted".into()));
    }
    info!("Submitted donation form");

    // New tab wins. Only when the window passes empty do we consider the
    // same-page and frame outcomes.
    if let Some(target_id) = watcher.next_page(Duration::from_millis(3_500)).await {
        debug!(target = %target_id, "Checkout opened a new tab");
        let new_page = ctx.attach_page(&target_id).await?;
        new_page.wait_quiescent(Duration::from_secs(8)).await?;
        return Ok(CheckoutTarget {
            page: new_page,
            surface: Surface::NewTab,
        });
    }

    let quiesced = page.wait_quiescent(Duration::from_secs(7)).await?;
    let frame = if quiesced {
        None
    } else {
        find_payment_frame(&page).await?
    };
    let surface = resolve_settled_surface(quiesced, frame);
    match &surface {
        Surface::SamePage => debug!("Checkout settled in the original document"),
        Surface::Frame { frame_url, .. } => {
            debug!(url = %frame_url, "Checkout rendered in a payment frame")
        }
        _ => warn!("Checkout surface unresolved; degrading to page-level extraction"),
    }
    Ok(CheckoutTarget { page, surface })
}

/// Surface for a checkout that stayed in the original tab. Quiescence
/// settles the same-page outcome; a provider frame only decides when the
/// page never went quiet. The extractor scans sibling frames in both
/// cases.
fn resolve_settled_surface(quiesced: bool, frame: Option<(String, String)>) -> Surface {
    if quiesced {
        return Surface::SamePage;
    }
    match frame {
        Some((frame_id, frame_url)) => Surface::Frame { frame_id, frame_url },
        None => Surface::Fallback,
    }
}

/// First non-main frame whose URL matches a payment keyword.
async fn find_payment_frame(page: &Page) -> Result<Option<(String, String)>> {
    for frame in page.frames().await? {
        if !frame.is_main && is_payment_url(&frame.url) {
            return Ok(Some((frame.frame_id, frame.url)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_payment_url() {
        assert!(is_payment_url("https://gopay.co.id/v2/checkout?id=1"));
        assert!(is_payment_url("https://app.midtrans.com/snap/v3/redirect"));
        assert!(is_payment_url("https://checkout.xendit.co/web/abc"));
        assert!(!is_payment_url("about:blank"));
        assert!(!is_payment_url(""));
        assert!(!is_payment_url("https://www.google-analytics.com/collect"));
    }

    #[test]
    fn test_surface_describe() {
        assert_eq!(Surface::NewTab.describe(), "new-tab");
        assert_eq!(
            Surface::Frame {
                frame_id: "f1".into(),
                frame_url: "https://gopay.co.id/x".into()
            }
            .describe(),
            "frame:https://gopay.co.id/x"
        );
    }

    #[test]
    fn test_quiescence_wins_over_payment_frame() {
        let frame = Some(("f1".to_string(), "https://gopay.co.id/x".to_string()));
        assert!(matches!(
            resolve_settled_surface(true, frame),
            Surface::SamePage
        ));
    }

    #[test]
    fn test_frame_only_without_quiescence() {
        let frame = Some(("f1".to_string(), "https://gopay.co.id/x".to_string()));
        assert!(matches!(
            resolve_settled_surface(false, frame),
            Surface::Frame { .. }
        ));
        assert!(matches!(
            resolve_settled_surface(false, None),
            Surface::Fallback
        ));
    }

    #[test]
    fn test_submit_chain_has_text_fallback() {
        let chain = submit_chain();
        assert!(chain
            .steps
            .iter()
            .any(|s| matches!(&s.locator, crate::selector::Locator::Text(t) if t == "kirim dukungan")));
    }
}
