//! Invoice and invite-log store backed by SQLite.
//!
//! A single `Connection` behind a mutex is plenty here: writes are rare
//! (one invoice per checkout, one log row per invite) and reads are
//! point lookups. Group lists are stored as JSON arrays in a TEXT column.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use vipgate_core::{Error, Invoice, InvoiceStatus, Result};

/// One delivered (or attempted) invite, kept for audit and idempotency.
#[derive(Debug, Clone)]
pub struct InviteLog {
    pub id: i64,
    pub invoice_id: String,
    pub user_id: i64,
    pub group_id: String,
    pub invite_link: String,
    pub sent_at: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS invoices (
                invoice_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                amount INTEGER NOT NULL,
                groups TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                qr_payload TEXT,
                created_at TEXT NOT NULL,
                paid_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_invoices_user ON invoices(user_id);
            CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status);

            CREATE TABLE IF NOT EXISTS invite_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                group_id TEXT NOT NULL,
                invite_link TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                UNIQUE(invoice_id, group_id)
            );
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn create_invoice(&self, invoice: &Invoice) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO invoices (invoice_id, user_id, amount, groups, status, qr_payload, created_at, paid_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                invoice.invoice_id,
                invoice.user_id,
                invoice.amount,
                serde_json::to_string(&invoice.groups)?,
                invoice.status.as_str(),
                invoice.qr_payload,
                invoice.created_at,
                invoice.paid_at,
            ],
        )
        .map_err(db_err)?;
        debug!(invoice = %invoice.invoice_id, "Invoice created");
        Ok(())
    }

    pub fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT invoice_id, user_id, amount, groups, status, qr_payload, created_at, paid_at
             FROM invoices WHERE invoice_id = ?1",
            params![invoice_id],
            row_to_invoice,
        )
        .optional()
        .map_err(db_err)
    }

    /// Flip an invoice to PAID. Idempotent: a second confirmation for the
    /// same invoice changes nothing and reports `false`.
    pub fn mark_paid(&self, invoice_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE invoices SET status = 'PAID', paid_at = ?2
                 WHERE invoice_id = ?1 AND status = 'PENDING'",
                params![invoice_id, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Cache the QR artifact data URL on the invoice.
    pub fn update_qr_payload(&self, invoice_id: &str, payload: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE invoices SET qr_payload = ?2 WHERE invoice_id = ?1",
                params![invoice_id, payload],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Invoice {}", invoice_id)));
        }
        Ok(())
    }

    /// Most recent invoices first.
    pub fn list_invoices(&self, limit: usize) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT invoice_id, user_id, amount, groups, status, qr_payload, created_at, paid_at
                 FROM invoices ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_invoice)
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Record an invite delivery. Idempotent per (invoice, group): replays
    /// of the same paid webhook do not produce duplicate rows, and the
    /// `false` return tells the caller not to send again.
    pub fn add_invite_log(
        &self,
        invoice_id: &str,
        user_id: i64,
        group_id: &str,
        invite_link: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO invite_logs (invoice_id, user_id, group_id, invite_link, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    invoice_id,
                    user_id,
                    group_id,
                    invite_link,
                    chrono::Utc::now().to_rfc3339()
                ],
            )
            .map_err(db_err)?;
        Ok(inserted > 0)
    }

    /// Group ids already invited for an invoice.
    pub fn invited_groups(&self, invoice_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT group_id FROM invite_logs WHERE invoice_id = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![invoice_id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    pub fn list_invite_logs(&self, limit: usize) -> Result<Vec<InviteLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, invoice_id, user_id, group_id, invite_link, sent_at
                 FROM invite_logs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(InviteLog {
                    id: row.get(0)?,
                    invoice_id: row.get(1)?,
                    user_id: row.get(2)?,
                    group_id: row.get(3)?,
                    invite_link: row.get(4)?,
                    sent_at: row.get(5)?,
                })
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }
}

fn row_to_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    let groups_json: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    Ok(Invoice {
        invoice_id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        groups: serde_json::from_str(&groups_json).unwrap_or_default(),
        status: InvoiceStatus::from_str(&status_str).unwrap_or(InvoiceStatus::Pending),
        qr_payload: row.get(5)?,
        created_at: row.get(6)?,
        paid_at: row.get(7)?,
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn sample_invoice() -> Invoice {
        Invoice::new(42, vec!["-100123".into(), "-100456".into()], 25_000)
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let inv = sample_invoice();
        store.create_invoice(&inv).unwrap();
        let loaded = store.get_invoice(&inv.invoice_id).unwrap().unwrap();
        assert_eq!(loaded.user_id, 42);
        assert_eq!(loaded.groups, inv.groups);
        assert_eq!(loaded.status, InvoiceStatus::Pending);
        assert!(store.get_invoice("missing").unwrap().is_none());
    }

    #[test]
    fn test_mark_paid_is_idempotent() {
        let store = store();
        let inv = sample_invoice();
        store.create_invoice(&inv).unwrap();
        assert!(store.mark_paid(&inv.invoice_id).unwrap());
        assert!(!store.mark_paid(&inv.invoice_id).unwrap());
        let loaded = store.get_invoice(&inv.invoice_id).unwrap().unwrap();
        assert_eq!(loaded.status, InvoiceStatus::Paid);
        assert!(loaded.paid_at.is_some());
    }

    #[test]
    fn test_mark_paid_unknown_invoice() {
        let store = store();
        assert!(!store.mark_paid("missing").unwrap());
    }

    #[test]
    fn test_update_qr_payload() {
        let store = store();
        let inv = sample_invoice();
        store.create_invoice(&inv).unwrap();
        store
            .update_qr_payload(&inv.invoice_id, "data:image/png;base64,AAAA")
            .unwrap();
        let loaded = store.get_invoice(&inv.invoice_id).unwrap().unwrap();
        assert_eq!(loaded.qr_payload.as_deref(), Some("data:image/png;base64,AAAA"));

        let err = store.update_qr_payload("missing", "x").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_invite_log_dedup_per_invoice_group() {
        let store = store();
        let inv = sample_invoice();
        store.create_invoice(&inv).unwrap();
        assert!(store
            .add_invite_log(&inv.invoice_id, 42, "-100123", "https://t.me/+abc")
            .unwrap());
        assert!(!store
            .add_invite_log(&inv.invoice_id, 42, "-100123", "https://t.me/+other")
            .unwrap());
        assert!(store
            .add_invite_log(&inv.invoice_id, 42, "-100456", "https://t.me/+def")
            .unwrap());
        let invited = store.invited_groups(&inv.invoice_id).unwrap();
        assert_eq!(invited.len(), 2);
    }

    #[test]
    fn test_list_invoices_newest_first() {
        let store = store();
        let mut first = sample_invoice();
        first.created_at = "2026-01-01T00:00:00Z".into();
        let mut second = sample_invoice();
        second.created_at = "2026-02-01T00:00:00Z".into();
        store.create_invoice(&first).unwrap();
        store.create_invoice(&second).unwrap();
        let listed = store.list_invoices(10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].invoice_id, second.invoice_id);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vipgate.db");
        let store = Store::open(&path).unwrap();
        let inv = sample_invoice();
        store.create_invoice(&inv).unwrap();
        drop(store);
        let reopened = Store::open(&path).unwrap();
        assert!(reopened.get_invoice(&inv.invoice_id).unwrap().is_some());
    }
}
