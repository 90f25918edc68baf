//! Payment webhook parsing and verification.
//!
//! The payment provider posts either its native donation payload (the
//! invoice marker buried in the free-text message, sometimes under a
//! `data` envelope) or a `{"status": "paid", "invoice_id": ...}` shape
//! from manual reconciliation tooling. Both resolve to one invoice id,
//! but only settled events (`status: paid` or `type: donation`) may mark
//! an invoice paid; refund and failure callbacks carry the marker too.
//! Signatures are HMAC-SHA256 over the raw body, hex-encoded, compared
//! in constant time.

use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Marker written into the donation message at checkout time.
static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"INV[:\s]*([0-9a-fA-F-]{36})").unwrap());

pub fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Verify the webhook signature. An empty secret disables verification
/// (local/dev deployments).
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(signature) = signature else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    let expected = hex_encode(&mac.finalize().into_bytes());
    secure_eq(&expected, signature.trim())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// True when the payload reports a settled payment: `status: "paid"`
/// (manual shape) or `type: "donation"` (provider shape, the provider
/// only emits it for completed donations), at the top level or under a
/// `data` envelope.
pub fn is_paid_event(payload: &Value) -> bool {
    for holder in [Some(payload), payload.get("data")].into_iter().flatten() {
        if let Some(status) = holder.get("status").and_then(|v| v.as_str()) {
            if status.eq_ignore_ascii_case("paid") {
                return true;
            }
        }
        if let Some(kind) = holder.get("type").and_then(|v| v.as_str()) {
            if kind.eq_ignore_ascii_case("donation") {
                return true;
            }
        }
    }
    false
}

/// Pull the invoice id out of a webhook payload, whatever shape it took.
pub fn extract_invoice_id(payload: &Value) -> Option<String> {
    // Manual/simple shape first.
    if let Some(id) = payload.get("invoice_id").and_then(|v| v.as_str()) {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    // Provider shape: the marker rides in the donation message, at the
    // top level or under a data envelope.
    for holder in [Some(payload), payload.get("data")].into_iter().flatten() {
        if let Some(message) = holder.get("message").and_then(|v| v.as_str()) {
            if let Some(caps) = MARKER_RE.captures(message) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}

/// Amount claimed by the webhook, when present (used for logging only;
/// the invoice row is the source of truth).
pub fn extract_amount(payload: &Value) -> Option<i64> {
    for holder in [Some(payload), payload.get("data")].into_iter().flatten() {
        for key in ["amount_raw", "amount"] {
            if let Some(n) = holder.get(key).and_then(|v| v.as_i64()) {
                return Some(n);
            }
            // Some payloads quote the amount.
            if let Some(s) = holder.get(key).and_then(|v| v.as_str()) {
                if let Ok(n) = s.parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "a1b2c3d4-1111-2222-3333-444455556666";

    #[test]
    fn test_extract_simple_shape() {
        let payload = json!({"invoice_id": ID});
        assert_eq!(extract_invoice_id(&payload).as_deref(), Some(ID));
    }

    #[test]
    fn test_extract_from_message_marker() {
        let payload = json!({
            "type": "donation",
            "amount_raw": 25000,
            "message": format!("makasih kak! INV:{}", ID),
        });
        assert_eq!(extract_invoice_id(&payload).as_deref(), Some(ID));
        assert_eq!(extract_amount(&payload), Some(25_000));
    }

    #[test]
    fn test_extract_from_data_envelope() {
        let payload = json!({
            "version": "2022.01",
            "data": {"message": format!("INV {}", ID), "amount": "50000"},
        });
        assert_eq!(extract_invoice_id(&payload).as_deref(), Some(ID));
        assert_eq!(extract_amount(&payload), Some(50_000));
    }

    #[test]
    fn test_extract_missing_marker() {
        let payload = json!({"message": "no marker here", "invoice_id": ""});
        assert_eq!(extract_invoice_id(&payload), None);
    }

    #[test]
    fn test_marker_requires_full_uuid() {
        let payload = json!({"message": "INV:deadbeef"});
        assert_eq!(extract_invoice_id(&payload), None);
    }

    #[test]
    fn test_paid_event_shapes() {
        assert!(is_paid_event(&json!({"status": "paid", "invoice_id": ID})));
        assert!(is_paid_event(&json!({"status": "PAID", "invoice_id": ID})));
        assert!(is_paid_event(&json!({
            "type": "donation",
            "message": format!("INV:{}", ID),
        })));
        assert!(is_paid_event(&json!({
            "version": "2022.01",
            "data": {"type": "donation", "message": format!("INV:{}", ID)},
        })));
    }

    #[test]
    fn test_unsettled_events_do_not_settle() {
        // Refunds and failure callbacks carry the marker; the id resolves
        // but the event must not count as paid.
        for payload in [
            json!({"status": "failed", "invoice_id": ID}),
            json!({"status": "pending", "invoice_id": ID}),
            json!({"type": "refund", "message": format!("refund INV:{}", ID)}),
        ] {
            assert!(extract_invoice_id(&payload).is_some());
            assert!(!is_paid_event(&payload));
        }
        assert!(!is_paid_event(&json!({"invoice_id": ID})));
    }

    #[test]
    fn test_verify_signature() {
        let secret = "topsecret";
        let body = br#"{"invoice_id":"x"}"#;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let good = hex_encode(&mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, Some(&good)));
        assert!(!verify_signature(secret, body, Some("deadbeef")));
        assert!(!verify_signature(secret, body, None));
        // Empty secret disables verification.
        assert!(verify_signature("", body, None));
    }

    #[test]
    fn test_secure_eq() {
        assert!(secure_eq("abc", "abc"));
        assert!(!secure_eq("abc", "abd"));
        assert!(!secure_eq("abc", "abcd"));
    }
}
