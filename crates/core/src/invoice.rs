use serde::{Deserialize, Serialize};

/// Payment state of an invoice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(InvoiceStatus::Pending),
            "PAID" => Some(InvoiceStatus::Paid),
            _ => None,
        }
    }
}

/// An invoice for one purchase of group access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub user_id: i64,
    pub amount: i64,
    /// Telegram chat ids of the purchased groups.
    pub groups: Vec<String>,
    pub status: InvoiceStatus,
    /// Cached QR artifact as a `data:image/png;base64,...` URL, filled by
    /// the background prefetch or the first on-demand fetch.
    pub qr_payload: Option<String>,
    pub created_at: String,
    pub paid_at: Option<String>,
}

impl Invoice {
    pub fn new(user_id: i64, groups: Vec<String>, amount: i64) -> Self {
        Self {
            invoice_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            amount,
            groups,
            status: InvoiceStatus::Pending,
            qr_payload: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            paid_at: None,
        }
    }
}

/// Canonical reconciliation marker written into the donation message field.
/// This is the only channel correlating an external payment confirmation
/// back to an invoice, so it is always produced, whatever the id looks like.
pub fn canonical_marker(invoice_id: &str) -> String {
    if invoice_id.is_empty() {
        return "INV:UNKNOWN".to_string();
    }
    format!("INV:{}", invoice_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_marker() {
        assert_eq!(
            canonical_marker("a1b2c3d4-0000-0000-0000-000000000000"),
            "INV:a1b2c3d4-0000-0000-0000-000000000000"
        );
        assert_eq!(canonical_marker("weird id!*"), "INV:weird id!*");
        assert_eq!(canonical_marker(""), "INV:UNKNOWN");
    }

    #[test]
    fn test_invoice_new() {
        let inv = Invoice::new(42, vec!["-100123".into()], 25_000);
        assert_eq!(inv.status, InvoiceStatus::Pending);
        assert_eq!(inv.amount, 25_000);
        assert!(inv.qr_payload.is_none());
        assert_eq!(inv.invoice_id.len(), 36);
    }

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(InvoiceStatus::from_str("PAID"), Some(InvoiceStatus::Paid));
        assert_eq!(InvoiceStatus::from_str("nope"), None);
        assert_eq!(InvoiceStatus::Paid.as_str(), "PAID");
    }
}
