//! Membership gate: buyers must sit in the configured groups/channels
//! before the storefront opens.
//!
//! The decision logic is pure so modes and edge cases are testable; the
//! async wrapper only gathers statuses.

use tracing::debug;

use vipgate_core::config::GateConfig;
use vipgate_core::Result;

use crate::api::TelegramApi;

/// Statuses counting as "in the chat".
const JOINED_STATUSES: &[&str] = &["member", "administrator", "creator"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Joined,
    NotJoined,
    /// Lookup failed (bot not admin there, user never interacted). Counts
    /// as not joined for the decision.
    Unknown,
}

pub fn classify(status: Option<&str>) -> Membership {
    match status {
        Some(s) if JOINED_STATUSES.contains(&s) => Membership::Joined,
        Some(_) => Membership::NotJoined,
        None => Membership::Unknown,
    }
}

/// Per-chat outcome plus the overall decision.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub passed: bool,
    /// Chat ids the user has not (verifiably) joined, index-aligned with
    /// the invite links the keyboard shows.
    pub missing: Vec<MissingChat>,
    pub joined_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct MissingChat {
    pub chat_id: String,
    pub invite_link: Option<String>,
    pub is_channel: bool,
}

/// Decide from counts. `mode` "ALL" needs every chat, anything else is
/// treated as ANY with `min_count`.
pub fn decide(mode: &str, min_count: usize, joined: usize, total: usize) -> bool {
    if total == 0 {
        // No gate configured means the storefront is open.
        return true;
    }
    if mode.eq_ignore_ascii_case("ALL") {
        joined == total
    } else {
        joined >= min_count.max(1)
    }
}

/// Gather memberships and decide.
pub async fn check_gate(api: &TelegramApi, gate: &GateConfig, user_id: i64) -> Result<GateOutcome> {
    let mut joined_count = 0;
    let mut missing = Vec::new();
    let mut total = 0;

    for (ids, invites, is_channel) in [
        (&gate.group_ids, &gate.group_invites, false),
        (&gate.channel_ids, &gate.channel_invites, true),
    ] {
        for (i, chat_id) in ids.iter().enumerate() {
            total += 1;
            let status = api.get_chat_member(chat_id, user_id).await?;
            let membership = classify(status.as_deref());
            debug!(chat = %chat_id, user = user_id, ?membership, "Gate check");
            if membership == Membership::Joined {
                joined_count += 1;
            } else {
                missing.push(MissingChat {
                    chat_id: chat_id.clone(),
                    invite_link: invites.get(i).cloned().filter(|l| !l.is_empty()),
                    is_channel,
                });
            }
        }
    }

    let passed = decide(&gate.mode, gate.min_count, joined_count, total);
    Ok(GateOutcome {
        passed,
        missing,
        joined_count,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some("member")), Membership::Joined);
        assert_eq!(classify(Some("administrator")), Membership::Joined);
        assert_eq!(classify(Some("creator")), Membership::Joined);
        assert_eq!(classify(Some("left")), Membership::NotJoined);
        assert_eq!(classify(Some("kicked")), Membership::NotJoined);
        assert_eq!(classify(Some("restricted")), Membership::NotJoined);
        assert_eq!(classify(None), Membership::Unknown);
    }

    #[test]
    fn test_decide_all_mode() {
        assert!(decide("ALL", 1, 3, 3));
        assert!(!decide("ALL", 1, 2, 3));
        assert!(decide("all", 1, 1, 1));
    }

    #[test]
    fn test_decide_any_mode() {
        assert!(decide("ANY", 2, 2, 5));
        assert!(!decide("ANY", 2, 1, 5));
        // min_count 0 is clamped so ANY still needs at least one join.
        assert!(!decide("ANY", 0, 0, 3));
        assert!(decide("ANY", 0, 1, 3));
    }

    #[test]
    fn test_empty_gate_is_open() {
        assert!(decide("ALL", 1, 0, 0));
        assert!(decide("ANY", 3, 0, 0));
    }
}
