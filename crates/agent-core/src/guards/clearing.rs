use crate::job::{JobPhase, JobState};
use crate::registry::ProtectionRegistry;

/// The five independent witnesses consulted before wiping form fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearingSignals {
    pub step: u64,
    pub phase: JobPhase,
    pub has_last_response: bool,
    pub input_flow_active: bool,
    pub protected: bool,
}

impl ClearingSignals {
    pub fn observe(state: &JobState, registry: &ProtectionRegistry) -> Self {
        Self {
            step: state.step(),
            phase: state.phase(),
            has_last_response: state.has_last_response(),
            input_flow_active: state.input_flow_active(),
            protected: registry.contains(state.id()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearDecision {
    Clear,
    Suppressed(&'static str),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InputClearingGuard;

impl InputClearingGuard {
    /// Clearing happens only on a fresh job with no trace of an input flow.
    pub fn decide(signals: &ClearingSignals) -> ClearDecision {
        if signals.input_flow_active {
            return ClearDecision::Suppressed("input flow active");
        }
        if signals.protected {
            return ClearDecision::Suppressed("job registered as protected");
        }
        if signals.has_last_response {
            return ClearDecision::Suppressed("unconsumed human value");
        }
        if signals.phase == JobPhase::WaitingForInput {
            return ClearDecision::Suppressed("waiting for input");
        }
        if signals.step != 1 {
            return ClearDecision::Suppressed("not the first step");
        }
        ClearDecision::Clear
    }

    pub fn should_clear(signals: &ClearingSignals) -> bool {
        Self::decide(signals) == ClearDecision::Clear
    }

    pub fn evaluate(state: &JobState, registry: &ProtectionRegistry) -> ClearDecision {
        Self::decide(&ClearingSignals::observe(state, registry))
    }
}
