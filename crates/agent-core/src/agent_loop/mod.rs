//! Per-job execution loop.
//!
//! ```text
//! while !terminal && step < max_steps:
//!     action = oracle.propose(context)
//!     request_input -> suspend until the human answers or the timeout fires
//!     fill          -> sensitive-field guard decides the written value
//!     navigate      -> input-clearing guard decides whether to wipe fields
//!     execute       -> driver, then credential outcome classification
//! ```

pub mod config;
pub mod controller;
pub mod prompt;

pub use config::JobLoopConfig;
pub use controller::{JobRunner, JobServices};
pub use prompt::{format_system_prompt, format_user_message, JOB_SYSTEM_PROMPT};
