//! Handoff: a browser-automation job engine that pauses for a human.
//!
//! Exposes modules for integration testing

pub mod cli;
pub mod config;
pub mod driver;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use errors::AppError;
pub use server::{build_router, ServeState};
