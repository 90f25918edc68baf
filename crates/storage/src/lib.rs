//! SQLite persistence for invoices and invite delivery logs.

mod store;

pub use store::{InviteLog, Store};
