//! Selector chains: ordered candidate locators with per-step budgets.
//!
//! Checkout pages in this site family restyle often. Every element the
//! pipeline touches is addressed through a chain of candidates tried in
//! order, first match wins; exhausting a chain is an outcome, not an
//! error. Resolution is written against a small probe trait so chain
//! ordering is testable without a browser.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use vipgate_core::Result;

use crate::browser::{js_string, Page};

/// How one candidate addresses an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    /// Plain CSS selector.
    Css(String),
    /// Case-insensitive substring over clickable elements' visible text.
    Text(String),
}

impl Locator {
    pub fn css(s: &str) -> Self {
        Locator::Css(s.to_string())
    }

    pub fn text(s: &str) -> Self {
        Locator::Text(s.to_string())
    }

    pub fn describe(&self) -> String {
        match self {
            Locator::Css(s) => format!("css={}", s),
            Locator::Text(s) => format!("text~={}", s),
        }
    }
}

/// One candidate plus the time budget spent polling for it.
#[derive(Debug, Clone)]
pub struct Step {
    pub locator: Locator,
    pub timeout: Duration,
}

/// Ordered list of candidates for one logical target.
#[derive(Debug, Clone)]
pub struct SelectorChain {
    /// Logical target name, used in logs ("amount field", "submit button").
    pub target: &'static str,
    pub steps: Vec<Step>,
}

impl SelectorChain {
    pub fn new(target: &'static str) -> Self {
        Self {
            target,
            steps: Vec::new(),
        }
    }

    pub fn css(mut self, selector: &str, timeout_ms: u64) -> Self {
        self.steps.push(Step {
            locator: Locator::css(selector),
            timeout: Duration::from_millis(timeout_ms),
        });
        self
    }

    pub fn text(mut self, needle: &str, timeout_ms: u64) -> Self {
        self.steps.push(Step {
            locator: Locator::text(needle),
            timeout: Duration::from_millis(timeout_ms),
        });
        self
    }

    /// Try candidates in order; each gets its own polling budget. Returns
    /// the first locator that matched, or None when the chain is exhausted.
    pub async fn resolve<D: DomProbe + ?Sized>(&self, dom: &D) -> Result<Option<Locator>> {
        for step in &self.steps {
            let deadline = tokio::time::Instant::now() + step.timeout;
            loop {
                if dom.exists(&step.locator).await? {
                    debug!(target = self.target, locator = %step.locator.describe(), "Resolved");
                    return Ok(Some(step.locator.clone()));
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        }
        debug!(target = self.target, "Chain exhausted");
        Ok(None)
    }
}

/// Minimal DOM surface the chains resolve against.
#[async_trait]
pub trait DomProbe: Send + Sync {
    async fn exists(&self, locator: &Locator) -> Result<bool>;
}

#[async_trait]
impl DomProbe for Page {
    async fn exists(&self, locator: &Locator) -> Result<bool> {
        self.eval_bool(&probe_js(locator)).await
    }
}

/// JS expression testing whether a locator matches anything.
pub fn probe_js(locator: &Locator) -> String {
    match locator {
        Locator::Css(sel) => format!("!!document.querySelector({})", js_string(sel)),
        Locator::Text(needle) => format!(
            r#"(function() {{
                const needle = {needle}.toLowerCase();
                const nodes = document.querySelectorAll(
                    'button, [role="button"], a, label, input[type="submit"]');
                for (const el of nodes) {{
                    const text = (el.innerText || el.value || '').toLowerCase();
                    if (text.includes(needle)) return true;
                }}
                return false;
            }})()"#,
            needle = js_string(needle)
        ),
    }
}

/// JS expression that scrolls the first match into view and clicks it,
/// returning whether anything was clicked.
pub fn click_js(locator: &Locator) -> String {
    match locator {
        Locator::Css(sel) => format!(
            r#"(function() {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.scrollIntoView({{block: 'center', inline: 'center'}});
                el.click();
                return true;
            }})()"#,
            sel = js_string(sel)
        ),
        Locator::Text(needle) => format!(
            r#"(function() {{
                const needle = {needle}.toLowerCase();
                const nodes = document.querySelectorAll(
                    'button, [role="button"], a, label, input[type="submit"]');
                for (const el of nodes) {{
                    const text = (el.innerText || el.value || '').toLowerCase();
                    if (text.includes(needle)) {{
                        el.scrollIntoView({{block: 'center', inline: 'center'}});
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            needle = js_string(needle)
        ),
    }
}

/// Resolve a chain and click the winner. Returns the locator that was
/// clicked, or None when nothing matched.
pub async fn resolve_and_click(page: &Page, chain: &SelectorChain) -> Result<Option<Locator>> {
    let Some(locator) = chain.resolve(page).await? else {
        return Ok(None);
    };
    if page.eval_bool(&click_js(&locator)).await? {
        Ok(Some(locator))
    } else {
        // Matched during resolve but gone by click time; treat as a miss.
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockDom {
        present: HashSet<String>,
        /// Locator that appears only after this many probes.
        late: Option<(String, u32)>,
        probes: AtomicU32,
    }

    impl MockDom {
        fn with(present: &[&str]) -> Self {
            Self {
                present: present.iter().map(|s| s.to_string()).collect(),
                late: None,
                probes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DomProbe for MockDom {
        async fn exists(&self, locator: &Locator) -> Result<bool> {
            let key = locator.describe();
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            if let Some((late_key, after)) = &self.late {
                if *late_key == key {
                    return Ok(n >= *after);
                }
            }
            Ok(self.present.contains(&key))
        }
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let dom = MockDom::with(&["css=input[name=\"amount\"]", "css=input[type=\"number\"]"]);
        let chain = SelectorChain::new("amount field")
            .css("input[name=\"amount\"]", 100)
            .css("input[type=\"number\"]", 100);
        let found = chain.resolve(&dom).await.unwrap();
        assert_eq!(found, Some(Locator::css("input[name=\"amount\"]")));
    }

    #[tokio::test]
    async fn test_falls_through_to_later_candidate() {
        let dom = MockDom::with(&["text~=kirim dukungan"]);
        let chain = SelectorChain::new("submit button")
            .css("button[data-testid=\"donate-button\"]", 50)
            .text("kirim dukungan", 50);
        let found = chain.resolve(&dom).await.unwrap();
        assert_eq!(found, Some(Locator::text("kirim dukungan")));
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_none() {
        let dom = MockDom::with(&[]);
        let chain = SelectorChain::new("qr image")
            .css("img.qr-image", 50)
            .css("canvas", 50);
        assert_eq!(chain.resolve(&dom).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_element_appearing_within_budget() {
        let mut dom = MockDom::with(&[]);
        dom.late = Some(("css=img.qr-image".to_string(), 2));
        let chain = SelectorChain::new("qr image").css("img.qr-image", 1_000);
        let found = chain.resolve(&dom).await.unwrap();
        assert_eq!(found, Some(Locator::css("img.qr-image")));
    }

    #[test]
    fn test_probe_js_escapes_quotes() {
        let js = probe_js(&Locator::css(r#"input[placeholder*="jumlah" i]"#));
        assert!(js.contains(r#"\"jumlah\""#));
        let js = probe_js(&Locator::text("Kirim Dukungan"));
        assert!(js.contains("toLowerCase"));
    }
}
