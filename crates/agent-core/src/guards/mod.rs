//! Policy layers applied to every proposed action before the driver sees it.
//!
//! Both guards are total: they always return a definite answer.

pub mod clearing;
pub mod sensitive;

pub use clearing::{ClearDecision, ClearingSignals, InputClearingGuard};
pub use sensitive::{
    FieldClass, FieldSensitivity, FieldTokens, FillResolution, FillRule, HeuristicFieldPolicy,
    SensitiveFieldGuard,
};
