//! Telegram collaborator: membership gate, storefront entry, and invite
//! delivery for paid invoices.

pub mod api;
pub mod gate;
pub mod invite;
pub mod service;

pub use api::TelegramApi;
pub use gate::{check_gate, GateOutcome};
pub use invite::{deliver_invites, invites_allowed};
pub use service::BotService;
