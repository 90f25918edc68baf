//! QR artifact extraction.
//!
//! Walks a fidelity-ordered fallback chain over the resolved checkout
//! surface: a decoded inline data URL beats a re-fetched download, which
//! beats an element screenshot, a checkout-panel screenshot, and finally
//! a full-page screenshot. Byte re-fetches run inside the page so the
//! checkout session's cookies ride along; an out-of-band HTTP GET would
//! get a different (usually empty) QR.
//!
//! The tier walk is written against `QrSurface` so ordering and policy
//! behavior are testable without a browser.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use vipgate_core::{Error, ExtractionPolicy, Result};

use crate::browser::{js_string, Page};
use crate::checkout::{is_payment_url, CheckoutTarget, Surface};

/// How the artifact was obtained, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Decoded straight out of a data URL (or canvas export).
    InlineDecoded,
    /// Re-fetched through the page session from the QR element's URL.
    Downloaded,
    /// Screenshot clipped to the QR element.
    ElementScreenshot,
    /// Screenshot clipped to the checkout panel.
    PanelScreenshot,
    /// Whole-page screenshot.
    PageScreenshot,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::InlineDecoded => "inline-decoded",
            Provenance::Downloaded => "downloaded",
            Provenance::ElementScreenshot => "element-screenshot",
            Provenance::PanelScreenshot => "panel-screenshot",
            Provenance::PageScreenshot => "page-screenshot",
        }
    }
}

/// The extracted payment artifact.
#[derive(Debug, Clone)]
pub struct QrArtifact {
    pub bytes: Bytes,
    pub mime: String,
    pub provenance: Provenance,
}

impl QrArtifact {
    /// Encode as a `data:` URL for storage and HTTP responses.
    pub fn to_data_url(&self) -> String {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.mime, b64)
    }
}

/// A QR candidate element found on a surface.
#[derive(Debug, Clone)]
pub struct QrElement {
    pub selector: String,
    pub kind: QrKind,
    /// `src` attribute for images; PNG data URL for exportable canvases.
    pub src: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrKind {
    Image,
    Canvas,
}

/// One document the extractor can probe: the checkout page's main
/// document, or a payment frame inside it.
#[async_trait]
pub trait QrSurface: Send + Sync {
    /// First QR candidate in chain order, if any.
    async fn find_qr(&self) -> Result<Option<QrElement>>;
    /// Re-fetch `url` with the surface's session; `(bytes, content_type)`.
    async fn fetch_bytes(&self, url: &str) -> Result<Option<(Vec<u8>, String)>>;
    /// Screenshot clipped to the candidate element.
    async fn screenshot_element(&self, element: &QrElement) -> Result<Option<Vec<u8>>>;
    /// Document URL, for resolving relative srcs.
    async fn document_url(&self) -> Result<String>;
}

/// QR candidate selectors, in priority order. The canvas entry is last:
/// plenty of pages carry decorative canvases.
const QR_SELECTORS: &[&str] = &[
    "img.qr-image",
    "img.qr-image--with-wrapper",
    r#"img[alt*="qr-code" i]"#,
    r#"img[src*="/qr-code"]"#,
    r#"[data-testid="qrcode"] img"#,
    r#"[class*="qrcode" i] img"#,
    r#"img[alt*="qris" i]"#,
    r#"img[src^="data:image"]"#,
    "canvas",
];

/// Panel selectors for the panel-screenshot tier.
const PANEL_SELECTORS: &[&str] = &[
    r#"[data-testid*="checkout" i]"#,
    r#"[class*="checkout" i]"#,
    r#"[data-testid*="payment" i]"#,
    r#"[class*="payment" i]"#,
    "form",
];

const MIN_QR_BYTES: usize = 1_000;
const STRICT_MIN_QR_BYTES: usize = 5_000;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// True when `bytes` plausibly decode as the claimed image type.
pub fn looks_like_image(bytes: &[u8], mime: &str) -> bool {
    if bytes.len() < 64 {
        return false;
    }
    if mime.contains("png") {
        return bytes.starts_with(PNG_MAGIC);
    }
    if mime.contains("jpeg") || mime.contains("jpg") {
        return bytes.starts_with(&[0xFF, 0xD8]);
    }
    if mime.contains("svg") {
        return bytes.starts_with(b"<") || bytes.starts_with(b"\xef\xbb\xbf<");
    }
    // Unknown image subtype: accept known magics.
    bytes.starts_with(PNG_MAGIC) || bytes.starts_with(&[0xFF, 0xD8]) || bytes.starts_with(b"GIF8")
}

/// Split a `data:<mime>;base64,<payload>` URL into mime and bytes.
pub fn parse_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    use base64::Engine;
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    let mime = header.trim_end_matches(";base64");
    let mime = if mime.is_empty() { "image/png" } else { mime };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some((mime.to_string(), bytes))
}

/// Whether a candidate looks like a genuine QR asset, required in strict
/// mode before any bytes are accepted.
fn is_qr_hinted(element: &QrElement) -> bool {
    let sel = element.selector.to_lowercase();
    if sel.contains("qr") {
        return true;
    }
    element
        .src
        .as_deref()
        .map(|s| s.to_lowercase().contains("qr"))
        .unwrap_or(false)
}

/// Run the element-level tiers (inline, download, element screenshot) on
/// one surface.
async fn element_tiers<S: QrSurface + ?Sized>(
    surface: &S,
    policy: ExtractionPolicy,
) -> Result<Option<QrArtifact>> {
    let Some(element) = surface.find_qr().await? else {
        return Ok(None);
    };
    debug!(selector = %element.selector, kind = ?element.kind, "QR candidate");

    let strict = policy == ExtractionPolicy::Strict;
    if strict && !is_qr_hinted(&element) {
        debug!("Candidate lacks a QR hint; rejected under strict policy");
        return Ok(None);
    }
    let min_len = if strict { STRICT_MIN_QR_BYTES } else { MIN_QR_BYTES };

    // Tier 1: inline data URL (canvas exports arrive here too).
    if let Some(src) = element.src.as_deref() {
        if src.starts_with("data:") {
            if let Some((mime, bytes)) = parse_data_url(src) {
                if bytes.len() >= min_len && looks_like_image(&bytes, &mime) {
                    return Ok(Some(QrArtifact {
                        bytes: Bytes::from(bytes),
                        mime,
                        provenance: Provenance::InlineDecoded,
                    }));
                }
                debug!("Inline payload failed validation; falling through");
            }
        } else if !src.is_empty() {
            // Tier 2: in-session re-fetch of the element URL.
            let absolute = absolutize(&surface.document_url().await?, src);
            match surface.fetch_bytes(&absolute).await {
                Ok(Some((bytes, content_type))) => {
                    let mime = if content_type.starts_with("image/") {
                        content_type
                    } else {
                        "image/png".to_string()
                    };
                    if bytes.len() >= min_len && looks_like_image(&bytes, &mime) {
                        return Ok(Some(QrArtifact {
                            bytes: Bytes::from(bytes),
                            mime,
                            provenance: Provenance::Downloaded,
                        }));
                    }
                    debug!(len = bytes.len(), "Fetched payload failed validation");
                }
                Ok(None) => debug!(url = %absolute, "In-session fetch returned nothing"),
                Err(e) => warn!(url = %absolute, "In-session fetch failed: {}", e),
            }
        }
    }

    if strict {
        return Ok(None);
    }

    // Tier 3: screenshot clipped to the element.
    if let Some(bytes) = surface.screenshot_element(&element).await? {
        return Ok(Some(QrArtifact {
            bytes: Bytes::from(bytes),
            mime: "image/png".to_string(),
            provenance: Provenance::ElementScreenshot,
        }));
    }
    Ok(None)
}

/// Walk surfaces in order (primary first, then sibling payment frames),
/// then degrade to panel and page screenshots of the primary page.
pub async fn run_extraction<S: QrSurface + ?Sized>(
    surfaces: &[&S],
    policy: ExtractionPolicy,
    panel_shot: impl std::future::Future<Output = Result<Option<Vec<u8>>>>,
    page_shot: impl std::future::Future<Output = Result<Vec<u8>>>,
) -> Result<Option<QrArtifact>> {
    for surface in surfaces {
        if let Some(artifact) = element_tiers(*surface, policy).await? {
            return Ok(Some(artifact));
        }
    }

    if policy == ExtractionPolicy::Strict {
        debug!("No genuine QR asset found; strict policy forbids screenshots");
        return Ok(None);
    }

    if let Some(bytes) = panel_shot.await? {
        return Ok(Some(QrArtifact {
            bytes: Bytes::from(bytes),
            mime: "image/png".to_string(),
            provenance: Provenance::PanelScreenshot,
        }));
    }

    let bytes = page_shot.await?;
    Ok(Some(QrArtifact {
        bytes: Bytes::from(bytes),
        mime: "image/png".to_string(),
        provenance: Provenance::PageScreenshot,
    }))
}

/// Extract the QR artifact from a resolved checkout target.
pub async fn extract_qr(
    target: &CheckoutTarget,
    policy: ExtractionPolicy,
) -> Result<Option<QrArtifact>> {
    // Primary surface first, then sibling payment frames the resolution
    // step did not pick.
    let mut surfaces: Vec<CdpSurface<'_>> = Vec::new();
    match &target.surface {
        Surface::Frame { frame_id, frame_url } => {
            surfaces.push(CdpSurface::frame(&target.page, frame_id, frame_url));
        }
        _ => surfaces.push(CdpSurface::main(&target.page)),
    }
    for frame in target.page.frames().await? {
        if frame.is_main || !is_payment_url(&frame.url) {
            continue;
        }
        let already = matches!(&target.surface,
            Surface::Frame { frame_id, .. } if *frame_id == frame.frame_id);
        if !already {
            surfaces.push(CdpSurface::frame(&target.page, &frame.frame_id, &frame.url));
        }
    }

    let refs: Vec<&CdpSurface<'_>> = surfaces.iter().collect();
    run_extraction(
        &refs,
        policy,
        screenshot_panel(&target.page),
        target.page.screenshot_page(),
    )
    .await
}

/// Panel-screenshot tier: clip to the first checkout-looking container.
async fn screenshot_panel(page: &Page) -> Result<Option<Vec<u8>>> {
    for selector in PANEL_SELECTORS {
        if let Some(rect) = page.element_rect(selector).await? {
            return page.screenshot_rect(&rect).await.map(Some);
        }
    }
    Ok(None)
}

/// `QrSurface` over a live page, optionally scoped to a subframe's
/// isolated world.
pub struct CdpSurface<'a> {
    page: &'a Page,
    frame: Option<(String, String)>,
}

impl<'a> CdpSurface<'a> {
    pub fn main(page: &'a Page) -> Self {
        Self { page, frame: None }
    }

    pub fn frame(page: &'a Page, frame_id: &str, frame_url: &str) -> Self {
        Self {
            page,
            frame: Some((frame_id.to_string(), frame_url.to_string())),
        }
    }

    async fn eval(&self, expression: &str) -> Result<Value> {
        match &self.frame {
            None => self.page.eval(expression).await,
            Some((frame_id, _)) => self.page.eval_in_frame(frame_id, expression).await,
        }
    }
}

/// One pass over the candidate list; polled by `find_qr`.
fn find_qr_js() -> String {
    let candidates: Vec<String> = QR_SELECTORS.iter().map(|s| js_string(s)).collect();
    format!(
        r#"(function() {{
            const candidates = [{list}];
            for (const sel of candidates) {{
                const el = document.querySelector(sel);
                if (!el) continue;
                const r = el.getBoundingClientRect();
                if (r.width < 10 || r.height < 10) continue;
                if (el.tagName === 'CANVAS') {{
                    let data = null;
                    try {{ data = el.toDataURL('image/png'); }} catch (e) {{}}
                    return JSON.stringify({{selector: sel, kind: 'canvas', src: data}});
                }}
                return JSON.stringify({{selector: sel, kind: 'image',
                                        src: el.getAttribute('src') || ''}});
            }}
            return null;
        }})()"#,
        list = candidates.join(", ")
    )
}

fn fetch_js(url: &str) -> String {
    format!(
        r#"(async () => {{
            try {{
                const resp = await fetch({url}, {{credentials: 'include'}});
                if (!resp.ok) return JSON.stringify({{ok: false, status: resp.status}});
                const ct = resp.headers.get('content-type') || '';
                const buf = new Uint8Array(await resp.arrayBuffer());
                let bin = '';
                const chunk = 0x8000;
                for (let i = 0; i < buf.length; i += chunk) {{
                    bin += String.fromCharCode.apply(null, buf.subarray(i, i + chunk));
                }}
                return JSON.stringify({{ok: true, contentType: ct, b64: btoa(bin)}});
            }} catch (e) {{
                return JSON.stringify({{ok: false, error: String(e)}});
            }}
        }})()"#,
        url = js_string(url)
    )
}

#[async_trait]
impl QrSurface for CdpSurface<'_> {
    async fn find_qr(&self) -> Result<Option<QrElement>> {
        // Primary surfaces get a longer budget; sibling frames are a
        // quick second look.
        let budget = if self.frame.is_some() { 2_000 } else { 8_000 };
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_millis(budget);
        let expr = find_qr_js();
        loop {
            let value = self.eval(&expr).await?;
            if let Some(s) = value.as_str() {
                let v: Value =
                    serde_json::from_str(s).map_err(|e| Error::Scrape(e.to_string()))?;
                let selector = v
                    .get("selector")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                let kind = if v.get("kind").and_then(|x| x.as_str()) == Some("canvas") {
                    QrKind::Canvas
                } else {
                    QrKind::Image
                };
                let src = v
                    .get("src")
                    .and_then(|x| x.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string());
                return Ok(Some(QrElement { selector, kind, src }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Option<(Vec<u8>, String)>> {
        use base64::Engine;
        let value = self.eval(&fetch_js(url)).await?;
        let Some(s) = value.as_str() else {
            return Ok(None);
        };
        let v: Value = serde_json::from_str(s).map_err(|e| Error::Scrape(e.to_string()))?;
        if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
            return Ok(None);
        }
        let b64 = v.get("b64").and_then(|x| x.as_str()).unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| Error::Scrape(format!("Invalid fetch payload: {}", e)))?;
        let content_type = v
            .get("contentType")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Some((bytes, content_type)))
    }

    async fn screenshot_element(&self, element: &QrElement) -> Result<Option<Vec<u8>>> {
        let rect = match &self.frame {
            // Element rects inside cross-origin frames are not addressable
            // from the top document; clip to the hosting iframe instead.
            Some((_, frame_url)) => self.hosting_iframe_rect(frame_url).await?,
            None => self.page.element_rect(&element.selector).await?,
        };
        match rect {
            Some(rect) => self.page.screenshot_rect(&rect).await.map(Some),
            None => Ok(None),
        }
    }

    async fn document_url(&self) -> Result<String> {
        match &self.frame {
            Some((_, frame_url)) => Ok(frame_url.clone()),
            None => self.page.current_url().await,
        }
    }
}

impl CdpSurface<'_> {
    /// Rect of the iframe element hosting `frame_url` in the top document.
    async fn hosting_iframe_rect(
        &self,
        frame_url: &str,
    ) -> Result<Option<crate::browser::Rect>> {
        let expr = format!(
            r#"(function() {{
                const wanted = {url};
                for (const el of document.querySelectorAll('iframe')) {{
                    const src = el.src || '';
                    if (src && (src === wanted || wanted.startsWith(src) || src.startsWith(wanted))) {{
                        el.scrollIntoView({{block: 'center'}});
                        const r = el.getBoundingClientRect();
                        return JSON.stringify({{x: r.x + window.scrollX, y: r.y + window.scrollY,
                                                w: r.width, h: r.height}});
                    }}
                }}
                return null;
            }})()"#,
            url = js_string(frame_url)
        );
        let value = self.page.eval(&expr).await?;
        let Some(s) = value.as_str() else {
            return Ok(None);
        };
        let v: Value = serde_json::from_str(s).map_err(|e| Error::Scrape(e.to_string()))?;
        let get = |k: &str| v.get(k).and_then(|n| n.as_f64()).unwrap_or(0.0);
        Ok(Some(crate::browser::Rect {
            x: get("x"),
            y: get("y"),
            width: get("w"),
            height: get("h"),
        }))
    }
}

fn absolutize(base: &str, src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(src)) {
        Ok(joined) => joined.to_string(),
        Err(_) => src.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::sync::Mutex;

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.resize(len, 0xAB);
        bytes
    }

    fn png_data_url(len: usize) -> String {
        let b64 = base64::engine::general_purpose::STANDARD.encode(png_bytes(len));
        format!("data:image/png;base64,{}", b64)
    }

    struct MockSurface {
        element: Option<QrElement>,
        fetched: Option<(Vec<u8>, String)>,
        element_shot: Option<Vec<u8>>,
        log: Mutex<Vec<&'static str>>,
    }

    impl MockSurface {
        fn new() -> Self {
            Self {
                element: None,
                fetched: None,
                element_shot: Some(png_bytes(2_000)),
                log: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QrSurface for MockSurface {
        async fn find_qr(&self) -> Result<Option<QrElement>> {
            self.log.lock().unwrap().push("find");
            Ok(self.element.clone())
        }

        async fn fetch_bytes(&self, _url: &str) -> Result<Option<(Vec<u8>, String)>> {
            self.log.lock().unwrap().push("fetch");
            Ok(self.fetched.clone())
        }

        async fn screenshot_element(&self, _element: &QrElement) -> Result<Option<Vec<u8>>> {
            self.log.lock().unwrap().push("shot");
            Ok(self.element_shot.clone())
        }

        async fn document_url(&self) -> Result<String> {
            Ok("https://saweria.co/acme".to_string())
        }
    }

    async fn run(
        surface: &MockSurface,
        policy: ExtractionPolicy,
        panel: Option<Vec<u8>>,
    ) -> Option<QrArtifact> {
        run_extraction(
            &[surface],
            policy,
            async move { Ok(panel) },
            async { Ok(png_bytes(9_000)) },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_inline_data_url_wins() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "img.qr-image".into(),
            kind: QrKind::Image,
            src: Some(png_data_url(6_000)),
        });
        let artifact = run(&surface, ExtractionPolicy::Permissive, None).await.unwrap();
        assert_eq!(artifact.provenance, Provenance::InlineDecoded);
        assert_eq!(artifact.mime, "image/png");
        // Never touched the network tier.
        assert!(!surface.log.lock().unwrap().contains(&"fetch"));
    }

    #[tokio::test]
    async fn test_url_src_downloads_in_session() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "img.qr-image".into(),
            kind: QrKind::Image,
            src: Some("/qr-code/abc.png".into()),
        });
        surface.fetched = Some((png_bytes(6_000), "image/png".into()));
        let artifact = run(&surface, ExtractionPolicy::Permissive, None).await.unwrap();
        assert_eq!(artifact.provenance, Provenance::Downloaded);
    }

    #[tokio::test]
    async fn test_failed_fetch_degrades_to_element_screenshot() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "img.qr-image".into(),
            kind: QrKind::Image,
            src: Some("/qr-code/abc.png".into()),
        });
        surface.fetched = None;
        let artifact = run(&surface, ExtractionPolicy::Permissive, None).await.unwrap();
        assert_eq!(artifact.provenance, Provenance::ElementScreenshot);
    }

    #[tokio::test]
    async fn test_no_element_degrades_to_panel_then_page() {
        let surface = MockSurface::new();
        let artifact = run(&surface, ExtractionPolicy::Permissive, Some(png_bytes(3_000)))
            .await
            .unwrap();
        assert_eq!(artifact.provenance, Provenance::PanelScreenshot);

        let artifact = run(&surface, ExtractionPolicy::Permissive, None).await.unwrap();
        assert_eq!(artifact.provenance, Provenance::PageScreenshot);
    }

    #[tokio::test]
    async fn test_strict_rejects_screenshots() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "img.qr-image".into(),
            kind: QrKind::Image,
            src: Some("/qr-code/abc.png".into()),
        });
        surface.fetched = None;
        let artifact = run(&surface, ExtractionPolicy::Strict, Some(png_bytes(3_000))).await;
        assert!(artifact.is_none());
    }

    #[tokio::test]
    async fn test_strict_rejects_unhinted_candidate() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "canvas".into(),
            kind: QrKind::Canvas,
            src: Some(png_data_url(9_000)),
        });
        assert!(run(&surface, ExtractionPolicy::Strict, None).await.is_none());
    }

    #[tokio::test]
    async fn test_strict_accepts_real_inline_qr() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "img.qr-image".into(),
            kind: QrKind::Image,
            src: Some(png_data_url(6_000)),
        });
        let artifact = run(&surface, ExtractionPolicy::Strict, None).await.unwrap();
        assert_eq!(artifact.provenance, Provenance::InlineDecoded);
    }

    #[tokio::test]
    async fn test_undersized_inline_falls_through() {
        let mut surface = MockSurface::new();
        surface.element = Some(QrElement {
            selector: "img.qr-image".into(),
            kind: QrKind::Image,
            src: Some(png_data_url(200)),
        });
        let artifact = run(&surface, ExtractionPolicy::Permissive, None).await.unwrap();
        assert_eq!(artifact.provenance, Provenance::ElementScreenshot);
    }

    #[test]
    fn test_parse_data_url() {
        let (mime, bytes) = parse_data_url(&png_data_url(1_500)).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes.len(), 1_500);
        assert!(parse_data_url("https://x.test/a.png").is_none());
        assert!(parse_data_url("data:text/plain,hello").is_none());
    }

    #[test]
    fn test_looks_like_image() {
        assert!(looks_like_image(&png_bytes(200), "image/png"));
        assert!(!looks_like_image(&[0u8; 200], "image/png"));
        assert!(!looks_like_image(PNG_MAGIC, "image/png"));
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.resize(300, 0);
        assert!(looks_like_image(&jpeg, "image/jpeg"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://saweria.co/acme", "/qr-code/x.png"),
            "https://saweria.co/qr-code/x.png"
        );
        assert_eq!(
            absolutize("https://saweria.co/acme", "https://cdn.test/a.png"),
            "https://cdn.test/a.png"
        );
    }

    #[test]
    fn test_provenance_labels() {
        assert_eq!(Provenance::InlineDecoded.as_str(), "inline-decoded");
        assert_eq!(Provenance::PageScreenshot.as_str(), "page-screenshot");
    }

    #[test]
    fn test_artifact_data_url_roundtrip() {
        let artifact = QrArtifact {
            bytes: Bytes::from(png_bytes(1_200)),
            mime: "image/png".into(),
            provenance: Provenance::Downloaded,
        };
        let url = artifact.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        let (mime, bytes) = parse_data_url(&url).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes.len(), 1_200);
    }
}
