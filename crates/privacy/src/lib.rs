//! Redaction helpers for everything the engine shows outside a job.
//!
//! Secrets supplied by a human are replaced structurally by markers before
//! they reach history. This crate covers the rest: PII masking of free
//! text, query-string redaction, and scrubbing of JSON payloads.

pub mod apply;
pub mod errors;
pub mod policy;
pub mod secret;
pub mod text;
pub mod url;

pub use apply::{RedactReport, Redactor};
pub use errors::{PrivacyError, PrivacyResult};
pub use policy::{PiiRule, RedactionPolicy};
pub use secret::{scrub_secret, sensitive_marker, REDACTED};
