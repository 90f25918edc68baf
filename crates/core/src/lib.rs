pub mod config;
pub mod error;
pub mod invoice;
pub mod paths;

pub use config::{Config, ExtractionPolicy, GroupEntry};
pub use error::{Error, Result};
pub use invoice::{canonical_marker, Invoice, InvoiceStatus};
pub use paths::Paths;
