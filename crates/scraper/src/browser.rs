//! Shared browser process, isolated browsing contexts, and the page wrapper.
//!
//! One Chrome process serves the whole gateway (daemon model). Every
//! pipeline invocation gets its own `BrowsingContext` — separate cookies,
//! storage and tabs — so concurrent checkouts cannot leak session state
//! into each other. Contexts are disposed unconditionally when the
//! invocation ends, success or not.

use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, info, warn};

use vipgate_core::{Config, Error, Paths, Result};

use crate::cdp::CdpClient;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const VIEWPORT_WIDTH: i32 = 1366;
const VIEWPORT_HEIGHT: i32 = 960;
const DEVICE_SCALE_FACTOR: f64 = 2.0;

/// Evaluated before any page script so the page sees a non-automated
/// browser profile.
const INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['id-ID', 'id', 'en-US', 'en'] });
"#;

static SHARED: OnceCell<Browser> = OnceCell::const_new();

/// The shared Chrome process plus its browser-level CDP connection.
pub struct Browser {
    debug_port: u16,
    cdp: CdpClient,
    child: Mutex<Child>,
}

impl Browser {
    /// Get the process-wide browser, launching it on first use. Launch is
    /// single-flight: concurrent callers all wait on the same init.
    pub async fn shared(config: &Config, paths: &Paths) -> Result<&'static Browser> {
        SHARED
            .get_or_try_init(|| Self::launch(config, paths))
            .await
    }

    async fn launch(config: &Config, paths: &Paths) -> Result<Browser> {
        let browser_path = if config.scraper.browser_path.is_empty() {
            find_browser_binary().ok_or_else(|| {
                Error::Browser("No Chrome/Chromium binary found; set scraper.browserPath".into())
            })?
        } else {
            config.scraper.browser_path.clone()
        };

        let user_data_dir = paths.browser_data_dir();
        std::fs::create_dir_all(&user_data_dir)?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, &user_data_dir, config.scraper.headless);

        info!(
            port = debug_port,
            headless = config.scraper.headless,
            binary = %browser_path,
            "Launching shared browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("Failed to launch {}: {}", browser_path, e)))?;

        let browser_ws_url = wait_for_cdp_ready(debug_port, 15).await?;
        let cdp = CdpClient::connect(&browser_ws_url)
            .await
            .map_err(Error::Browser)?;

        // Needed for the new-tab race in checkout resolution.
        cdp.set_discover_targets(true).await.map_err(Error::Browser)?;

        Ok(Browser {
            debug_port,
            cdp,
            child: Mutex::new(child),
        })
    }

    /// Create an isolated browsing context for one pipeline invocation.
    pub async fn acquire_context(self: &'static Self) -> Result<BrowsingContext> {
        let context_id = self
            .cdp
            .create_browser_context()
            .await
            .map_err(Error::Browser)?;
        debug!(context = %context_id, "Acquired browsing context");
        Ok(BrowsingContext {
            browser: self,
            context_id,
            closed: false,
        })
    }

    /// True when the Chrome process is still alive.
    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}

/// One isolated cookie/storage universe, owning all tabs opened inside it.
pub struct BrowsingContext {
    browser: &'static Browser,
    context_id: String,
    closed: bool,
}

impl BrowsingContext {
    pub fn id(&self) -> &str {
        &self.context_id
    }

    /// Open a fresh tab in this context and wire up its CDP connection.
    pub async fn new_page(&self) -> Result<Page> {
        let target_id = self
            .browser
            .cdp
            .create_target("about:blank", Some(&self.context_id))
            .await
            .map_err(Error::Browser)?;
        self.attach_page(&target_id).await
    }

    /// Attach to an existing target in this context (used for tabs the site
    /// itself opened).
    pub async fn attach_page(&self, target_id: &str) -> Result<Page> {
        let ws_url = get_target_ws_url(self.browser.debug_port, target_id).await?;
        let cdp = CdpClient::connect(&ws_url).await.map_err(Error::Browser)?;

        for domain in ["Page", "Runtime", "Network"] {
            cdp.enable_domain(domain).await.map_err(Error::Browser)?;
        }

        cdp.set_user_agent(USER_AGENT, "id-ID,id;q=0.9,en;q=0.8")
            .await
            .map_err(Error::Browser)?;
        cdp.set_viewport(VIEWPORT_WIDTH, VIEWPORT_HEIGHT, DEVICE_SCALE_FACTOR)
            .await
            .map_err(Error::Browser)?;
        cdp.set_timezone("Asia/Jakarta").await.map_err(Error::Browser)?;
        // Locale override is best-effort; headless shells without the ICU
        // data reject it.
        if let Err(e) = cdp.set_locale("id-ID").await {
            debug!("Locale override rejected: {}", e);
        }
        cdp.add_init_script(INIT_SCRIPT).await.map_err(Error::Browser)?;

        Ok(Page {
            cdp: Arc::new(cdp),
            target_id: target_id.to_string(),
        })
    }

    /// Stream of page-target ids created inside this context. Subscribe
    /// before the action that may spawn a tab.
    pub async fn watch_new_pages(&self) -> NewPageWatcher {
        let events = self.browser.cdp.subscribe_event("Target.targetCreated").await;
        NewPageWatcher {
            events,
            context_id: self.context_id.clone(),
        }
    }

    /// Dispose the context and everything in it. Safe to call more than
    /// once; failures are logged, not propagated, so teardown never masks
    /// the pipeline outcome.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self
            .browser
            .cdp
            .dispose_browser_context(&self.context_id)
            .await
        {
            warn!(context = %self.context_id, "Failed to dispose browsing context: {}", e);
        } else {
            debug!(context = %self.context_id, "Disposed browsing context");
        }
    }
}

/// Filters `Target.targetCreated` events down to page targets born in one
/// browsing context.
pub struct NewPageWatcher {
    events: mpsc::Receiver<Value>,
    context_id: String,
}

impl NewPageWatcher {
    /// Wait up to `timeout` for a new page target in the watched context.
    pub async fn next_page(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Ok(Some(params)) => {
                    let info = params.get("targetInfo").cloned().unwrap_or(Value::Null);
                    let is_page = info.get("type").and_then(|v| v.as_str()) == Some("page");
                    let in_context = info
                        .get("browserContextId")
                        .and_then(|v| v.as_str())
                        .map(|c| c == self.context_id)
                        .unwrap_or(false);
                    if is_page && in_context {
                        if let Some(id) = info.get("targetId").and_then(|v| v.as_str()) {
                            return Some(id.to_string());
                        }
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

/// A single tab, driven through its own CDP connection.
pub struct Page {
    cdp: Arc<CdpClient>,
    target_id: String,
}

impl Page {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Navigate and wait for the document to become interactive.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let mut load_events = self.cdp.subscribe_event("Page.loadEventFired").await;
        self.cdp.navigate(url).await.map_err(Error::Browser)?;

        let load = tokio::time::timeout(timeout, load_events.recv()).await;
        if load.is_err() {
            // Slow third-party assets can hold the load event hostage;
            // an interactive DOM is enough to start probing.
            let state = self
                .eval_string("document.readyState")
                .await
                .unwrap_or_default();
            if state != "interactive" && state != "complete" {
                return Err(Error::Timeout(format!(
                    "Navigation to {} not interactive after {:?}",
                    url, timeout
                )));
            }
        }
        Ok(())
    }

    /// Evaluate JS in the main world, returning the unwrapped value.
    pub async fn eval(&self, expression: &str) -> Result<Value> {
        let result = self
            .cdp
            .evaluate_js(expression)
            .await
            .map_err(Error::Browser)?;
        if let Some(exc) = result.get("exceptionDetails") {
            let text = exc
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("JS exception");
            return Err(Error::Scrape(format!("Script failed: {}", text)));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Evaluate JS in a subframe's isolated world.
    pub async fn eval_in_frame(&self, frame_id: &str, expression: &str) -> Result<Value> {
        let context_id = self
            .cdp
            .create_isolated_world(frame_id)
            .await
            .map_err(Error::Browser)?;
        let result = self
            .cdp
            .evaluate_js_in_context(context_id, expression)
            .await
            .map_err(Error::Browser)?;
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn eval_bool(&self, expression: &str) -> Result<bool> {
        Ok(self.eval(expression).await?.as_bool().unwrap_or(false))
    }

    pub async fn eval_string(&self, expression: &str) -> Result<String> {
        Ok(self
            .eval(expression)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    pub async fn current_url(&self) -> Result<String> {
        self.eval_string("window.location.href").await
    }

    /// Poll until `expression` evaluates truthy, every 150ms up to `timeout`.
    pub async fn wait_for(&self, expression: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval_bool(expression).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    /// Heuristic quiescence: readyState complete and the resource-timing
    /// entry count stable across a 500ms window.
    pub async fn wait_quiescent(&self, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_count: i64 = -1;
        loop {
            let snapshot = self
                .eval(
                    "JSON.stringify({ready: document.readyState, \
                     n: performance.getEntriesByType('resource').length})",
                )
                .await?;
            if let Some(s) = snapshot.as_str() {
                if let Ok(v) = serde_json::from_str::<Value>(s) {
                    let ready = v.get("ready").and_then(|r| r.as_str()) == Some("complete");
                    let count = v.get("n").and_then(|n| n.as_i64()).unwrap_or(0);
                    if ready && count == last_count {
                        return Ok(true);
                    }
                    last_count = count;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Press a single key (used to nudge client-side re-renders).
    pub async fn press_key(&self, key: &str, code: &str) -> Result<()> {
        self.cdp
            .dispatch_key_event("keyDown", key, code)
            .await
            .map_err(Error::Browser)?;
        self.cdp
            .dispatch_key_event("keyUp", key, code)
            .await
            .map_err(Error::Browser)?;
        Ok(())
    }

    /// Bounding rect of the first element matching `selector`, in CSS pixels.
    pub async fn element_rect(&self, selector: &str) -> Result<Option<Rect>> {
        let expr = format!(
            r#"(function() {{
                const el = document.querySelector({sel});
                if (!el) return null;
                el.scrollIntoView({{block: 'center', inline: 'center'}});
                const r = el.getBoundingClientRect();
                return JSON.stringify({{x: r.x + window.scrollX, y: r.y + window.scrollY,
                                        w: r.width, h: r.height}});
            }})()"#,
            sel = js_string(selector)
        );
        let value = self.eval(&expr).await?;
        let Some(s) = value.as_str() else {
            return Ok(None);
        };
        let v: Value = serde_json::from_str(s).map_err(|e| Error::Scrape(e.to_string()))?;
        let get = |k: &str| v.get(k).and_then(|n| n.as_f64()).unwrap_or(0.0);
        let rect = Rect {
            x: get("x"),
            y: get("y"),
            width: get("w"),
            height: get("h"),
        };
        if rect.width < 1.0 || rect.height < 1.0 {
            return Ok(None);
        }
        Ok(Some(rect))
    }

    /// Full-page screenshot as PNG bytes.
    pub async fn screenshot_page(&self) -> Result<Vec<u8>> {
        let b64 = self.cdp.screenshot(true).await.map_err(Error::Browser)?;
        decode_b64(&b64)
    }

    /// Screenshot of one rect as PNG bytes.
    pub async fn screenshot_rect(&self, rect: &Rect) -> Result<Vec<u8>> {
        let b64 = self
            .cdp
            .screenshot_clip(rect.x, rect.y, rect.width, rect.height)
            .await
            .map_err(Error::Browser)?;
        decode_b64(&b64)
    }

    /// Flattened frame tree: (frameId, url) for the main frame and all
    /// subframes.
    pub async fn frames(&self) -> Result<Vec<FrameInfo>> {
        let tree = self.cdp.get_frame_tree().await.map_err(Error::Browser)?;
        let mut out = Vec::new();
        if let Some(root) = tree.get("frameTree") {
            flatten_frames(root, true, &mut out);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub frame_id: String,
    pub url: String,
    pub is_main: bool,
}

fn flatten_frames(node: &Value, is_main: bool, out: &mut Vec<FrameInfo>) {
    if let Some(frame) = node.get("frame") {
        let frame_id = frame
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let url = frame
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        out.push(FrameInfo {
            frame_id,
            url,
            is_main,
        });
    }
    if let Some(children) = node.get("childFrames").and_then(|v| v.as_array()) {
        for child in children {
            flatten_frames(child, false, out);
        }
    }
}

/// Quote a Rust string as a JS string literal.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn decode_b64(b64: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Error::Scrape(format!("Invalid base64 screenshot: {}", e)))
}

/// Build Chrome arguments: the usual daemon flags plus automation
/// suppression, since donation checkouts refuse visibly-automated browsers.
fn build_browser_args(debug_port: u16, user_data_dir: &std::path::Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--lang=id-ID".to_string(),
        format!("--window-size={},{}", VIEWPORT_WIDTH, VIEWPORT_HEIGHT),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Find a Chrome/Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Find a free TCP port.
async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Browser(format!("Failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Browser(format!("Failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Wait for Chrome's CDP endpoint, returning the browser-level WebSocket URL.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Browser(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
/// Retries since fresh targets may not be listed immediately.
async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("targetId").and_then(|v| v.as_str()) == Some(target_id) {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(Error::Browser(format!(
        "No WebSocket URL found for targetId '{}' after retries",
        target_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_browser_args_headless() {
        let dir = std::path::PathBuf::from("/tmp/vipgate-profile");
        let args = build_browser_args(9333, &dir, true);
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.iter().any(|a| a == "--remote-debugging-port=9333"));
        assert_eq!(args.last().map(|s| s.as_str()), Some("about:blank"));
    }

    #[test]
    fn test_build_browser_args_headed() {
        let dir = std::path::PathBuf::from("/tmp/vipgate-profile");
        let args = build_browser_args(9333, &dir, false);
        assert!(!args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_flatten_frames() {
        let tree: Value = serde_json::json!({
            "frame": {"id": "main", "url": "https://saweria.co/acme"},
            "childFrames": [
                {"frame": {"id": "f1", "url": "https://gopay.co.id/checkout"}},
                {"frame": {"id": "f2", "url": "about:blank"}, "childFrames": [
                    {"frame": {"id": "f3", "url": "https://midtrans.com/snap"}}
                ]}
            ]
        });
        let mut out = Vec::new();
        flatten_frames(&tree, true, &mut out);
        assert_eq!(out.len(), 4);
        assert!(out[0].is_main);
        assert_eq!(out[1].frame_id, "f1");
        assert!(!out[3].is_main);
        assert_eq!(out[3].url, "https://midtrans.com/snap");
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("plain"), "\"plain\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }
}
