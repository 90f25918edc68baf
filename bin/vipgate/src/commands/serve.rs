//! Long-running daemon: HTTP gateway plus the Telegram bot loop.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use vipgate_bot::{check_gate, deliver_invites, invites_allowed, BotService, TelegramApi};
use vipgate_core::{Config, Error, Invoice, InvoiceStatus, Paths};
use vipgate_scraper::{extract::parse_data_url, Scraper};
use vipgate_storage::Store;

use super::webhook;

/// How long GET /api/qr waits for a pending artifact before giving up.
const QR_WAIT: Duration = Duration::from_secs(8);
const QR_POLL: Duration = Duration::from_millis(500);

#[derive(Clone)]
struct AppState {
    config: Config,
    store: Arc<Store>,
    scraper: Arc<Scraper>,
    api: TelegramApi,
    /// Invoices with a pipeline invocation currently running, so repeated
    /// /api/qr polls don't stack checkouts.
    inflight: Arc<Mutex<HashSet<String>>>,
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let store = Arc::new(Store::open(&paths.db_file())?);
    let scraper = Arc::new(Scraper::new(config.clone(), paths.clone()));
    let api = TelegramApi::new(&config.bot.token);

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        scraper,
        api,
        inflight: Arc::new(Mutex::new(HashSet::new())),
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let bot = Arc::new(BotService::new(config.clone(), store));
    let bot_handle = tokio::spawn(bot.run_loop(shutdown_tx.subscribe()));

    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/config", get(handle_storefront_config))
        .route("/api/invoice", post(handle_create_invoice))
        .route("/api/invoice/:id/status", get(handle_invoice_status))
        .route("/api/qr/:id", get(handle_qr))
        .route("/api/payment/webhook", post(handle_webhook))
        .route("/api/gate/status", get(handle_gate_status));

    if config.gateway.env != "prod" {
        app = app
            .route("/api/debug/invoices", get(handle_debug_invoices))
            .route("/api/debug/invites", get(handle_debug_invites))
            .route("/api/debug/paid/:id", post(handle_debug_paid));
        info!("Debug endpoints enabled (gateway.env != \"prod\")");
    }

    let app = app.layer(CorsLayer::permissive()).with_state(state);

    let addr = format!("{}:{}", host, port);
    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            let _ = shutdown.send(());
        })
        .await?;

    let _ = bot_handle.await;
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Public storefront config for the mini-app: catalog and pricing only.
async fn handle_storefront_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "priceIdr": state.config.catalog.price_idr,
        "minPriceIdr": state.config.catalog.min_price_idr,
        "groups": state.config.catalog.groups,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInvoiceRequest {
    user_id: i64,
    groups: Vec<String>,
    amount: Option<i64>,
}

async fn handle_create_invoice(
    State(state): State<AppState>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Response {
    if req.user_id <= 0 || req.groups.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "userId and groups are required");
    }
    let known: Vec<String> = req
        .groups
        .iter()
        .filter(|g| state.config.group_name(g).is_some())
        .cloned()
        .collect();
    if known.len() != req.groups.len() {
        return error_response(StatusCode::BAD_REQUEST, "Unknown group in request");
    }

    let amount = req.amount.unwrap_or(state.config.catalog.price_idr);
    if amount < state.config.catalog.min_price_idr {
        return error_response(StatusCode::BAD_REQUEST, "Amount below minimum");
    }

    let invoice = Invoice::new(req.user_id, known, amount);
    if let Err(e) = state.store.create_invoice(&invoice) {
        error!("Failed to create invoice: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure");
    }

    // Prefetch the QR in the background so the first /api/qr poll usually
    // finds it cached.
    spawn_qr_fetch(&state, invoice.invoice_id.clone(), invoice.amount).await;

    (
        StatusCode::CREATED,
        Json(json!({
            "invoiceId": invoice.invoice_id,
            "amount": invoice.amount,
            "status": invoice.status.as_str(),
        })),
    )
        .into_response()
}

async fn handle_invoice_status(
    State(state): State<AppState>,
    AxumPath(invoice_id): AxumPath<String>,
) -> Response {
    match state.store.get_invoice(&invoice_id) {
        Ok(Some(invoice)) => {
            // Paid but some invites still undelivered (missed webhook fanout,
            // earlier DM failure): the status poll doubles as a retry hook.
            if invoice.status == InvoiceStatus::Paid && invites_allowed(&invoice).is_ok() {
                let pending = state
                    .store
                    .invited_groups(&invoice.invoice_id)
                    .map(|done| done.len() < invoice.groups.len())
                    .unwrap_or(false);
                if pending {
                    let api = state.api.clone();
                    let store = state.store.clone();
                    let config = state.config.clone();
                    let invoice = invoice.clone();
                    tokio::spawn(async move {
                        if let Err(e) = deliver_invites(&api, &store, &config, &invoice).await {
                            warn!(invoice = %invoice.invoice_id, "Invite retry failed: {}", e);
                        }
                    });
                }
            }
            Json(json!({
                "invoiceId": invoice.invoice_id,
                "status": invoice.status.as_str(),
                "paidAt": invoice.paid_at,
            }))
            .into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Invoice not found"),
        Err(e) => {
            error!("Invoice lookup failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
        }
    }
}

#[derive(Deserialize)]
struct QrQuery {
    /// Seconds to wait for an in-flight fetch, capped at `QR_WAIT`.
    wait: Option<u64>,
}

/// Serve the cached QR as image bytes, waiting a bounded time for an
/// in-flight fetch.
async fn handle_qr(
    State(state): State<AppState>,
    AxumPath(invoice_id): AxumPath<String>,
    Query(q): Query<QrQuery>,
) -> Response {
    // WebApp <img> tags request /api/qr/<id>.png.
    let invoice_id = invoice_id
        .trim_end_matches(".png")
        .trim_end_matches(".jpg")
        .to_string();
    let invoice = match state.store.get_invoice(&invoice_id) {
        Ok(Some(inv)) => inv,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Invoice not found"),
        Err(e) => {
            error!("Invoice lookup failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure");
        }
    };

    if invoice.qr_payload.is_none() {
        spawn_qr_fetch(&state, invoice.invoice_id.clone(), invoice.amount).await;
    }

    let wait = q.wait.unwrap_or(QR_WAIT.as_secs()).min(QR_WAIT.as_secs());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait);
    loop {
        match state.store.get_invoice(&invoice_id) {
            Ok(Some(inv)) => {
                if let Some(payload) = inv.qr_payload {
                    return qr_image_response(&payload);
                }
            }
            Ok(None) => return error_response(StatusCode::NOT_FOUND, "Invoice not found"),
            Err(e) => {
                error!("Invoice lookup failed: {}", e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure");
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(QR_POLL).await;
    }

    error_response(StatusCode::BAD_GATEWAY, "QR not available yet")
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let signature = headers
        .get("x-donation-signature")
        .or_else(|| headers.get("x-signature"))
        .and_then(|v| v.to_str().ok());

    if !webhook::verify_signature(&state.config.donation.webhook_secret, &body, signature) {
        warn!("Webhook signature rejected");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON"),
    };

    if !webhook::is_paid_event(&payload) {
        // Failure, pending and refund callbacks carry the marker too;
        // none of them settles anything.
        info!("Webhook event is not a settled payment; ignored");
        return Json(json!({"status": "ignored"})).into_response();
    }

    let Some(invoice_id) = webhook::extract_invoice_id(&payload) else {
        // Donations without our marker are organic traffic, not errors.
        info!("Webhook without invoice marker; ignored");
        return Json(json!({"status": "ignored"})).into_response();
    };

    let amount = webhook::extract_amount(&payload);
    info!(invoice = %invoice_id, amount = ?amount, "Payment webhook received");

    match settle_invoice(&state, &invoice_id).await {
        Ok(newly_paid) => Json(json!({"status": "ok", "paid": newly_paid})).into_response(),
        Err(Error::NotFound(_)) => {
            warn!(invoice = %invoice_id, "Webhook for unknown invoice");
            Json(json!({"status": "ignored"})).into_response()
        }
        Err(e) => {
            error!(invoice = %invoice_id, "Webhook settlement failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Settlement failure")
        }
    }
}

/// Mark the invoice paid and deliver invites. Replays are no-ops past
/// the `mark_paid` guard, and invite delivery has its own per-group
/// dedup, so the whole path is safe to hit repeatedly.
async fn settle_invoice(state: &AppState, invoice_id: &str) -> vipgate_core::Result<bool> {
    if state.store.get_invoice(invoice_id)?.is_none() {
        return Err(Error::NotFound(format!("Invoice {}", invoice_id)));
    }

    let newly_paid = state.store.mark_paid(invoice_id)?;
    let invoice = state
        .store
        .get_invoice(invoice_id)?
        .ok_or_else(|| Error::NotFound(format!("Invoice {}", invoice_id)))?;

    if invoice.status == InvoiceStatus::Paid {
        if let Err(e) = invites_allowed(&invoice) {
            warn!(invoice = %invoice_id, "Skipping invites: {}", e);
        } else {
            let api = state.api.clone();
            let store = state.store.clone();
            let config = state.config.clone();
            tokio::spawn(async move {
                if let Err(e) = deliver_invites(&api, &store, &config, &invoice).await {
                    error!(invoice = %invoice.invoice_id, "Invite delivery failed: {}", e);
                }
            });
        }
    }
    Ok(newly_paid)
}

#[derive(Deserialize)]
struct GateStatusQuery {
    uid: i64,
}

async fn handle_gate_status(
    State(state): State<AppState>,
    Query(q): Query<GateStatusQuery>,
) -> Response {
    match check_gate(&state.api, &state.config.bot.gate, q.uid).await {
        Ok(outcome) => Json(json!({
            "passed": outcome.passed,
            "joinedCount": outcome.joined_count,
            "total": outcome.total,
        }))
        .into_response(),
        Err(e) => {
            error!(user = q.uid, "Gate check failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, "Gate check failed")
        }
    }
}

// ── Debug endpoints (disabled in prod) ─────────────────────────────────

async fn handle_debug_invoices(State(state): State<AppState>) -> Response {
    match state.store.list_invoices(50) {
        Ok(invoices) => Json(json!({"invoices": invoices})).into_response(),
        Err(e) => {
            error!("List invoices failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
        }
    }
}

async fn handle_debug_invites(State(state): State<AppState>) -> Response {
    match state.store.list_invite_logs(50) {
        Ok(logs) => {
            let rows: Vec<Value> = logs
                .iter()
                .map(|l| {
                    json!({
                        "invoiceId": l.invoice_id,
                        "userId": l.user_id,
                        "groupId": l.group_id,
                        "inviteLink": l.invite_link,
                        "sentAt": l.sent_at,
                    })
                })
                .collect();
            Json(json!({"invites": rows})).into_response()
        }
        Err(e) => {
            error!("List invite logs failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
        }
    }
}

/// Simulate a paid webhook for an invoice.
async fn handle_debug_paid(
    State(state): State<AppState>,
    AxumPath(invoice_id): AxumPath<String>,
) -> Response {
    match settle_invoice(&state, &invoice_id).await {
        Ok(newly_paid) => Json(json!({"status": "ok", "paid": newly_paid})).into_response(),
        Err(Error::NotFound(_)) => error_response(StatusCode::NOT_FOUND, "Invoice not found"),
        Err(e) => {
            error!("Debug settle failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Settlement failure")
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

/// Decode the cached data URL into raw image bytes; WebApp `<img>` tags
/// consume this endpoint directly.
fn qr_image_response(payload: &str) -> Response {
    match parse_data_url(payload) {
        Some((mime, bytes)) => (
            [
                (header::CONTENT_TYPE, mime),
                (header::CACHE_CONTROL, "public, max-age=300".to_string()),
            ],
            bytes,
        )
            .into_response(),
        None => {
            error!("Cached QR payload is not a data URL");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Corrupt QR payload")
        }
    }
}

/// Run the checkout pipeline for an invoice in the background, once.
async fn spawn_qr_fetch(state: &AppState, invoice_id: String, amount: i64) {
    {
        let mut inflight = state.inflight.lock().await;
        if !inflight.insert(invoice_id.clone()) {
            return;
        }
    }

    let scraper = state.scraper.clone();
    let store = state.store.clone();
    let inflight = state.inflight.clone();
    tokio::spawn(async move {
        let result = scraper.fetch_payment_qr(&invoice_id, amount).await;
        match result {
            Ok(Some(artifact)) => {
                if let Err(e) = store.update_qr_payload(&invoice_id, &artifact.to_data_url()) {
                    error!(invoice = %invoice_id, "Failed to cache QR: {}", e);
                }
            }
            Ok(None) => warn!(invoice = %invoice_id, "Pipeline produced no QR artifact"),
            Err(e) => error!(invoice = %invoice_id, "Pipeline failed: {}", e),
        }
        inflight.lock().await.remove(&invoice_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn test_state() -> AppState {
        let config = Config::default();
        let paths = Paths::with_base(std::env::temp_dir().join("vipgate-gw-test"));
        let scraper = Arc::new(Scraper::new(config.clone(), paths));
        AppState {
            config,
            store: Arc::new(Store::open_in_memory().unwrap()),
            scraper,
            api: TelegramApi::new(""),
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn png_data_url() -> String {
        let mut bytes = vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
        bytes.resize(64, 0);
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        )
    }

    #[tokio::test]
    async fn test_qr_endpoint_serves_image_bytes() {
        let state = test_state();
        let inv = Invoice::new(42, vec!["-100123".into()], 25_000);
        state.store.create_invoice(&inv).unwrap();
        state
            .store
            .update_qr_payload(&inv.invoice_id, &png_data_url())
            .unwrap();

        let resp = handle_qr(
            State(state),
            AxumPath(format!("{}.png", inv.invoice_id)),
            Query(QrQuery { wait: Some(0) }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "public, max-age=300");
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        assert!(body.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[tokio::test]
    async fn test_qr_absent_is_bad_gateway() {
        let state = test_state();
        let inv = Invoice::new(42, vec!["-100123".into()], 25_000);
        state.store.create_invoice(&inv).unwrap();
        let resp = handle_qr(
            State(state),
            AxumPath(inv.invoice_id),
            Query(QrQuery { wait: Some(0) }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_webhook_ignores_unsettled_events() {
        let state = test_state();
        let inv = Invoice::new(42, vec!["-100123".into()], 25_000);
        state.store.create_invoice(&inv).unwrap();

        let body = serde_json::to_vec(&json!({
            "status": "failed",
            "invoice_id": inv.invoice_id,
        }))
        .unwrap();
        let resp = handle_webhook(State(state.clone()), HeaderMap::new(), body.into()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let loaded = state.store.get_invoice(&inv.invoice_id).unwrap().unwrap();
        assert_eq!(loaded.status, InvoiceStatus::Pending);
    }
}
