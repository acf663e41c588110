//! Human-in-the-loop job execution engine.
//!
//! Runs browser automation jobs one oracle-proposed action at a time,
//! pausing a job when the oracle asks the human for a value and keeping
//! that value away from logs, history and the wrong form fields.

pub mod agent_loop;
pub mod classifier;
pub mod driver;
pub mod errors;
pub mod events;
pub mod guards;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod oracle;
pub mod registry;
pub mod suspend;

pub use agent_loop::{
    format_system_prompt, format_user_message, JobLoopConfig, JobRunner, JobServices,
};
pub use classifier::{Classification, ClassifierMarkers, CredentialOutcome, OutcomeClassifier};
pub use driver::{BrowserDriver, ScriptedDriver};
pub use errors::{AgentError, DriverError};
pub use events::{EventLog, JobEvent, JobEventKind};
pub use guards::{
    ClearDecision, ClearingSignals, FieldClass, FieldSensitivity, FieldTokens, FillResolution,
    FillRule, HeuristicFieldPolicy, InputClearingGuard, SensitiveFieldGuard,
};
pub use job::{
    CredentialFailure, HistoryEntry, HistoryEvent, JobPhase, JobSnapshot, JobState, JobStatus,
    StepUsage, TokenUsage,
};
pub use manager::{JobManager, JobOptions};
pub use oracle::{ActionOracle, OracleContext, Proposal, ScriptedOracle, StartUrlOracle};
pub use registry::ProtectionRegistry;
pub use suspend::{PendingSuspension, SuspendOutcome, SuspensionChannel, DEFAULT_INPUT_TIMEOUT};

pub use handoff_core_types::{Action, InputKind, InputRequest, JobId, PageSnapshot, ScrollDirection};
