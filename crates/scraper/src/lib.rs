//! Browser-driven checkout automation for the donation site family.
//!
//! The pipeline navigates a creator's donation page, fills the form with
//! an invoice reconciliation marker, selects a payment method, submits,
//! resolves where the checkout UI rendered, and extracts a QR artifact
//! through a fidelity-ordered fallback chain.

pub mod browser;
pub mod cdp;
pub mod checkout;
pub mod extract;
pub mod fill;
pub mod method;
pub mod pipeline;
pub mod selector;

pub use checkout::{CheckoutTarget, Surface};
pub use extract::{Provenance, QrArtifact};
pub use fill::{FieldOutcome, FillReport};
pub use method::format_rupiah;
pub use pipeline::{PipelineReport, Scraper, Stage};
pub use selector::{Locator, SelectorChain};
