//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One `CdpClient` speaks to a single WebSocket endpoint: either the
//! browser-level endpoint (target/context management) or a per-page
//! endpoint (navigation, script evaluation, screenshots). Errors at this
//! layer are plain strings; callers map them into the crate error type.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channel).
    event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>,
    /// Handle to the reader task so we can abort on close.
    _reader_handle: tokio::task::JoinHandle<()>,
    /// Handle to the writer task.
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, String> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        // Channel for outgoing messages
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: reads from WebSocket, dispatches responses and events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                // This is a command response
                                let mut pending = pending_clone.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            } else if let Some(method) = val.get("method").and_then(|v| v.as_str())
                            {
                                // This is an event
                                let mut listeners = events_clone.lock().await;
                                if let Some(senders) = listeners.get_mut(method) {
                                    let params =
                                        val.get("params").cloned().unwrap_or(Value::Null);
                                    dispatch_event(senders, &params);
                                    if senders.is_empty() {
                                        listeners.remove(method);
                                    }
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| format!("Failed to send CDP command: {}", e))?;

        let timeout = tokio::time::timeout(std::time::Duration::from_secs(30), rx);
        match timeout.await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(format!("CDP error: {}", error))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err("CDP response channel closed".to_string()),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(format!("CDP command '{}' timed out after 30s", method))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        let mut listeners = self.event_listeners.lock().await;
        listeners
            .entry(method.to_string())
            .or_insert_with(Vec::new)
            .push(tx);
        rx
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "Network").
    pub async fn enable_domain(&self, domain: &str) -> Result<(), String> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Start a navigation. Completion is observed separately (load event or
    /// readyState polling).
    pub async fn navigate(&self, url: &str) -> Result<Value, String> {
        self.send_command("Page.navigate", json!({"url": url}))
            .await
    }

    /// Evaluate JavaScript in the page's main world.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, String> {
        self.send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await
    }

    /// Evaluate JavaScript in a specific execution context (isolated world of
    /// a subframe).
    pub async fn evaluate_js_in_context(
        &self,
        context_id: i64,
        expression: &str,
    ) -> Result<Value, String> {
        self.send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "contextId": context_id,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await
    }

    /// Take a screenshot and return base64-encoded PNG data.
    pub async fn screenshot(&self, full_page: bool) -> Result<String, String> {
        let mut params = json!({"format": "png"});
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No screenshot data returned".to_string())
    }

    /// Screenshot a rectangular clip of the page (CSS pixels).
    pub async fn screenshot_clip(
        &self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Result<String, String> {
        let result = self
            .send_command(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "captureBeyondViewport": true,
                    "clip": {
                        "x": x,
                        "y": y,
                        "width": width,
                        "height": height,
                        "scale": 1,
                    },
                }),
            )
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No screenshot data returned".to_string())
    }

    /// Get the page's frame tree (main frame plus subframes).
    pub async fn get_frame_tree(&self) -> Result<Value, String> {
        self.send_command("Page.getFrameTree", json!({})).await
    }

    /// Create an isolated world in a subframe, returning its execution
    /// context id.
    pub async fn create_isolated_world(&self, frame_id: &str) -> Result<i64, String> {
        let result = self
            .send_command(
                "Page.createIsolatedWorld",
                json!({"frameId": frame_id, "worldName": "vipgate", "grantUniveralAccess": false}),
            )
            .await?;
        result
            .get("executionContextId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| "No executionContextId returned".to_string())
    }

    /// Dispatch a key event via Input domain.
    pub async fn dispatch_key_event(
        &self,
        event_type: &str,
        key: &str,
        code: &str,
    ) -> Result<(), String> {
        let mut params = json!({
            "type": event_type,
            "key": key,
            "code": code,
        });
        if event_type == "keyDown" && key.len() == 1 {
            params["text"] = json!(key);
        }
        self.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    /// Set viewport/device metrics.
    pub async fn set_viewport(
        &self,
        width: i32,
        height: i32,
        device_scale_factor: f64,
    ) -> Result<(), String> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": device_scale_factor,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    /// Override the user agent and Accept-Language.
    pub async fn set_user_agent(&self, user_agent: &str, accept_language: &str) -> Result<(), String> {
        self.send_command(
            "Network.setUserAgentOverride",
            json!({"userAgent": user_agent, "acceptLanguage": accept_language}),
        )
        .await?;
        Ok(())
    }

    /// Override the timezone (e.g. "Asia/Jakarta").
    pub async fn set_timezone(&self, timezone_id: &str) -> Result<(), String> {
        self.send_command(
            "Emulation.setTimezoneOverride",
            json!({"timezoneId": timezone_id}),
        )
        .await?;
        Ok(())
    }

    /// Override the locale (e.g. "id-ID").
    pub async fn set_locale(&self, locale: &str) -> Result<(), String> {
        self.send_command("Emulation.setLocaleOverride", json!({"locale": locale}))
            .await?;
        Ok(())
    }

    /// Register a script evaluated before any page script on every new
    /// document. Used for webdriver-flag masking.
    pub async fn add_init_script(&self, source: &str) -> Result<(), String> {
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": source}),
        )
        .await?;
        Ok(())
    }

    // ─── Target / context management (browser-level connection) ───────

    /// Get all browser targets (pages, iframes, workers, etc.).
    pub async fn get_targets(&self) -> Result<Vec<Value>, String> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Turn on `Target.targetCreated` / `targetDestroyed` events.
    pub async fn set_discover_targets(&self, discover: bool) -> Result<(), String> {
        self.send_command("Target.setDiscoverTargets", json!({"discover": discover}))
            .await?;
        Ok(())
    }

    /// Create an isolated browser context (separate cookies and storage).
    pub async fn create_browser_context(&self) -> Result<String, String> {
        let result = self
            .send_command(
                "Target.createBrowserContext",
                json!({"disposeOnDetach": false}),
            )
            .await?;
        result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No browserContextId returned".to_string())
    }

    /// Dispose a browser context, closing every target inside it.
    pub async fn dispose_browser_context(&self, context_id: &str) -> Result<(), String> {
        self.send_command(
            "Target.disposeBrowserContext",
            json!({"browserContextId": context_id}),
        )
        .await?;
        Ok(())
    }

    /// Create a new page target (tab) inside a browser context.
    pub async fn create_target(&self, url: &str, context_id: Option<&str>) -> Result<String, String> {
        let mut params = json!({"url": url});
        if let Some(ctx) = context_id {
            params["browserContextId"] = json!(ctx);
        }
        let result = self.send_command("Target.createTarget", params).await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No targetId returned from createTarget".to_string())
    }

    /// Close a target by its targetId.
    pub async fn close_target(&self, target_id: &str) -> Result<(), String> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }
}

/// Fan an event out to its subscribers, dropping channels whose receiver
/// is gone. Subscriptions are per-invocation on a long-lived client, so
/// dead channels must not accumulate.
fn dispatch_event(senders: &mut Vec<mpsc::Sender<Value>>, params: &Value) {
    senders.retain(|tx| match tx.try_send(params.clone()) {
        Ok(()) => true,
        // A full channel is a slow consumer, not a dead one.
        Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_prunes_dropped_subscribers() {
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let (dead_tx, dead_rx) = mpsc::channel::<Value>(4);
        drop(dead_rx);

        let mut senders = vec![dead_tx, live_tx];
        dispatch_event(&mut senders, &json!({"targetId": "t1"}));
        assert_eq!(senders.len(), 1);
        assert_eq!(live_rx.recv().await.unwrap()["targetId"], "t1");

        dispatch_event(&mut senders, &json!({"targetId": "t2"}));
        assert_eq!(senders.len(), 1);
        assert_eq!(live_rx.recv().await.unwrap()["targetId"], "t2");
    }
}
