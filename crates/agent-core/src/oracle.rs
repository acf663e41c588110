use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use handoff_core_types::{Action, InputRequest, JobId, PageSnapshot};
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::AgentError;
use crate::job::{CredentialFailure, HistoryEntry, JobPhase, JobState, TokenUsage};

/// Everything the oracle may look at when proposing the next action.
///
/// History holds markers instead of secrets. The one exception is
/// `last_response`, the literal unconsumed human value, so the oracle can
/// reference it when proposing the fill that uses it.
#[derive(Clone, Serialize)]
pub struct OracleContext {
    pub job_id: JobId,
    pub goal: String,
    pub step: u64,
    pub phase: JobPhase,
    pub history: Vec<HistoryEntry>,
    pub pending_request: Option<InputRequest>,
    pub request_context: Option<InputRequest>,
    pub last_response: Option<String>,
    pub credential_failure: Option<CredentialFailure>,
    pub failed_signatures: Vec<(String, u32)>,
    pub results_collected: usize,
    pub result_budget: Option<usize>,
    pub page: Option<PageSnapshot>,
}

impl OracleContext {
    pub fn from_state(state: &JobState) -> Self {
        Self {
            job_id: state.id().clone(),
            goal: state.goal().to_string(),
            step: state.step(),
            phase: state.phase(),
            history: state.history().to_vec(),
            pending_request: state.pending_request().cloned(),
            request_context: state.request_context().cloned(),
            last_response: state.last_response().map(str::to_string),
            credential_failure: state.credential_failure().cloned(),
            failed_signatures: state.failed_signatures(),
            results_collected: state.results().len(),
            result_budget: state.result_budget(),
            page: state.last_page().cloned(),
        }
    }
}

impl fmt::Debug for OracleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleContext")
            .field("job_id", &self.job_id)
            .field("step", &self.step)
            .field("phase", &self.phase)
            .field("history_len", &self.history.len())
            .field("request_context", &self.request_context)
            .field("has_last_response", &self.last_response.is_some())
            .field("credential_failure", &self.credential_failure)
            .finish()
    }
}

/// An oracle answer together with what it cost, when the backend reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub action: Action,
    pub usage: Option<TokenUsage>,
}

impl Proposal {
    pub fn with_usage(action: Action, usage: TokenUsage) -> Self {
        Self {
            action,
            usage: Some(usage),
        }
    }
}

impl From<Action> for Proposal {
    fn from(action: Action) -> Self {
        Self {
            action,
            usage: None,
        }
    }
}

/// The external decision-maker consulted once per step.
#[async_trait]
pub trait ActionOracle: Send + Sync {
    async fn propose_action(&self, context: &OracleContext) -> Result<Action, AgentError>;

    /// Same as [`propose_action`](Self::propose_action) plus token usage.
    async fn propose(&self, context: &OracleContext) -> Result<Proposal, AgentError> {
        self.propose_action(context).await.map(Proposal::from)
    }
}

type ScriptFn = Box<dyn Fn(&OracleContext) -> Action + Send + Sync>;

enum ScriptStep {
    Fixed(Proposal),
    Dynamic(ScriptFn),
    Fail(String),
}

/// Deterministic oracle replaying a script; used for tests and demos.
///
/// Every context it is consulted with is recorded. Once the script runs
/// out it proposes `complete`.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    steps: Arc<Mutex<VecDeque<ScriptStep>>>,
    seen: Arc<Mutex<Vec<OracleContext>>>,
}

impl fmt::Debug for ScriptedOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedOracle")
            .field("remaining", &self.steps.lock().len())
            .field("calls", &self.seen.lock().len())
            .finish()
    }
}

impl ScriptedOracle {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        let oracle = Self::default();
        for action in actions {
            oracle.push(action);
        }
        oracle
    }

    pub fn push(&self, action: Action) {
        self.steps
            .lock()
            .push_back(ScriptStep::Fixed(Proposal::from(action)));
    }

    /// Queues an action reported as having cost `usage`.
    pub fn push_with_usage(&self, action: Action, usage: TokenUsage) {
        self.steps
            .lock()
            .push_back(ScriptStep::Fixed(Proposal::with_usage(action, usage)));
    }

    /// Queues a step decided from the context at call time.
    pub fn push_with<F>(&self, decide: F)
    where
        F: Fn(&OracleContext) -> Action + Send + Sync + 'static,
    {
        self.steps
            .lock()
            .push_back(ScriptStep::Dynamic(Box::new(decide)));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.steps.lock().push_back(ScriptStep::Fail(message.into()));
    }

    pub fn calls(&self) -> Vec<OracleContext> {
        self.seen.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl ActionOracle for ScriptedOracle {
    async fn propose_action(&self, context: &OracleContext) -> Result<Action, AgentError> {
        self.propose(context).await.map(|proposal| proposal.action)
    }

    async fn propose(&self, context: &OracleContext) -> Result<Proposal, AgentError> {
        self.seen.lock().push(context.clone());
        let next = self.steps.lock().pop_front();
        match next {
            Some(ScriptStep::Fixed(proposal)) => Ok(proposal),
            Some(ScriptStep::Dynamic(decide)) => Ok(decide(context).into()),
            Some(ScriptStep::Fail(message)) => Err(AgentError::oracle(message)),
            None => Ok(Action::Complete {
                summary: Some("script exhausted".to_string()),
            }
            .into()),
        }
    }
}

/// Opens the job on a fixed page before handing control to `inner`.
pub struct StartUrlOracle {
    url: String,
    started: AtomicBool,
    inner: Arc<dyn ActionOracle>,
}

impl StartUrlOracle {
    pub fn new(url: impl Into<String>, inner: Arc<dyn ActionOracle>) -> Self {
        Self {
            url: url.into(),
            started: AtomicBool::new(false),
            inner,
        }
    }
}

#[async_trait]
impl ActionOracle for StartUrlOracle {
    async fn propose_action(&self, context: &OracleContext) -> Result<Action, AgentError> {
        self.propose(context).await.map(|proposal| proposal.action)
    }

    async fn propose(&self, context: &OracleContext) -> Result<Proposal, AgentError> {
        if !self.started.swap(true, Ordering::SeqCst) {
            return Ok(Action::Navigate {
                url: self.url.clone(),
            }
            .into());
        }
        self.inner.propose(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_then_completes() {
        let oracle = ScriptedOracle::new([Action::Navigate {
            url: "https://site".into(),
        }]);
        oracle.push_error("model offline");
        let state = JobState::new(JobId::from("job"), "goal");
        let ctx = OracleContext::from_state(&state);

        assert!(matches!(
            oracle.propose_action(&ctx).await,
            Ok(Action::Navigate { .. })
        ));
        assert!(matches!(
            oracle.propose_action(&ctx).await,
            Err(AgentError::Oracle(_))
        ));
        assert!(matches!(
            oracle.propose_action(&ctx).await,
            Ok(Action::Complete { .. })
        ));
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn start_url_comes_first() {
        let inner = ScriptedOracle::new([Action::Complete { summary: None }]);
        let oracle = StartUrlOracle::new("https://site/login", Arc::new(inner.clone()));
        let ctx = OracleContext::from_state(&JobState::new(JobId::from("job"), "goal"));
        assert_eq!(
            oracle.propose_action(&ctx).await.unwrap(),
            Action::Navigate {
                url: "https://site/login".into()
            }
        );
        assert!(matches!(
            oracle.propose_action(&ctx).await,
            Ok(Action::Complete { .. })
        ));
        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn usage_passes_through_the_start_url_wrapper() {
        let inner = ScriptedOracle::default();
        inner.push_with_usage(Action::Complete { summary: None }, TokenUsage::new(50, 7));
        let oracle = StartUrlOracle::new("https://site", Arc::new(inner));
        let ctx = OracleContext::from_state(&JobState::new(JobId::from("job"), "goal"));
        assert_eq!(oracle.propose(&ctx).await.unwrap().usage, None);
        let proposal = oracle.propose(&ctx).await.unwrap();
        assert_eq!(proposal.usage, Some(TokenUsage::new(50, 7)));
        assert_eq!(proposal.action, Action::Complete { summary: None });
    }

    #[test]
    fn debug_hides_the_human_value() {
        let mut state = JobState::new(JobId::from("job"), "goal");
        state
            .issue_request(InputRequest::new(
                handoff_core_types::InputKind::Password,
                "Password?",
            ))
            .unwrap();
        state.record_response("S3cr3t!".into()).unwrap();
        let ctx = OracleContext::from_state(&state);
        assert_eq!(ctx.last_response.as_deref(), Some("S3cr3t!"));
        assert!(!format!("{ctx:?}").contains("S3cr3t!"));
    }
}
