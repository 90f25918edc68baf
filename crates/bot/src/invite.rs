//! Invite delivery after a paid webhook.
//!
//! Each purchased group gets a single-use, short-lived invite link sent
//! to the buyer by DM. Delivery is idempotent per (invoice, group): the
//! invite log is consulted and written through the same unique key the
//! webhook replays hit.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use vipgate_core::{Config, Error, Invoice, Result};
use vipgate_storage::Store;

use crate::api::TelegramApi;

/// Invite links die after 15 minutes; a buyer who misses the window asks
/// again rather than leaving a live link in their DMs.
pub const INVITE_EXPIRE_SECS: i64 = 15 * 60;

/// Backoff between attempts at creating one link.
pub const RETRY_DELAYS_MS: [u64; 3] = [0, 700, 1_200];

/// Create a single-use invite link with retries, degrading to the chat's
/// primary link when the bot lacks invite-management rights.
pub async fn create_invite_link(api: &TelegramApi, chat_id: &str, label: &str) -> Result<String> {
    let mut last_err = None;
    for delay_ms in RETRY_DELAYS_MS {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        match api.create_invite_link(chat_id, label, INVITE_EXPIRE_SECS).await {
            Ok(link) => return Ok(link),
            Err(e) => {
                warn!(chat = chat_id, "createChatInviteLink failed: {}", e);
                last_err = Some(e);
            }
        }
    }

    match api.export_invite_link(chat_id).await {
        Ok(link) => {
            warn!(chat = chat_id, "Falling back to the chat's primary invite link");
            Ok(link)
        }
        Err(e) => Err(last_err.unwrap_or(e)),
    }
}

/// Deliver invites for every group on a paid invoice. Returns how many
/// new invites went out (already-logged groups are skipped).
pub async fn deliver_invites(
    api: &TelegramApi,
    store: &Arc<Store>,
    config: &Config,
    invoice: &Invoice,
) -> Result<usize> {
    let already = store.invited_groups(&invoice.invoice_id)?;
    let mut sent = 0;

    for group_id in &invoice.groups {
        if already.contains(group_id) {
            continue;
        }
        let name = config
            .group_name(group_id)
            .unwrap_or(group_id.as_str())
            .to_string();

        let link = match create_invite_link(api, group_id, &invoice.invoice_id).await {
            Ok(link) => link,
            Err(e) => {
                warn!(invoice = %invoice.invoice_id, group = %group_id, "No invite link: {}", e);
                continue;
            }
        };

        let text = format!(
            "✅ Pembayaran diterima!\n\nAkses <b>{}</b>:\n{}\n\nLink berlaku 15 menit dan hanya untuk satu orang.",
            name, link
        );
        if let Err(e) = api.send_message(invoice.user_id, &text, None).await {
            // Not logged: the next webhook replay retries this group.
            warn!(invoice = %invoice.invoice_id, group = %group_id, "Invite DM failed: {}", e);
            continue;
        }

        if store.add_invite_log(&invoice.invoice_id, invoice.user_id, group_id, &link)? {
            sent += 1;
        }
    }

    if sent > 0 {
        info!(invoice = %invoice.invoice_id, sent, "Invites delivered");
    }
    Ok(sent)
}

/// Guard used by webhook handling: invites only ever flow for PAID
/// invoices with a real buyer attached.
pub fn invites_allowed(invoice: &Invoice) -> std::result::Result<(), Error> {
    if invoice.status != vipgate_core::InvoiceStatus::Paid {
        return Err(Error::Validation(format!(
            "Invoice {} is not paid",
            invoice.invoice_id
        )));
    }
    if invoice.user_id <= 0 {
        return Err(Error::Validation(format!(
            "Invoice {} has no buyer",
            invoice.invoice_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vipgate_core::InvoiceStatus;

    #[test]
    fn test_retry_delays_shape() {
        assert_eq!(RETRY_DELAYS_MS.len(), 3);
        assert_eq!(RETRY_DELAYS_MS[0], 0);
        assert!(RETRY_DELAYS_MS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_invites_allowed_requires_paid() {
        let mut inv = Invoice::new(42, vec!["-100123".into()], 25_000);
        assert!(invites_allowed(&inv).is_err());
        inv.status = InvoiceStatus::Paid;
        assert!(invites_allowed(&inv).is_ok());
    }

    #[test]
    fn test_invites_allowed_requires_buyer() {
        let mut inv = Invoice::new(0, vec!["-100123".into()], 25_000);
        inv.status = InvoiceStatus::Paid;
        assert!(invites_allowed(&inv).is_err());
    }
}
