//! Per-job state record and the snapshots handed to external readers.
//!
//! [`JobState`] is owned by the job's own execution context. Every mutation
//! goes through a transition method so the pending-request invariant holds
//! after each one; readers only ever see a [`JobSnapshot`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use handoff_core_types::{Action, InputKind, InputRequest, JobId, PageSnapshot};
use handoff_privacy::{sensitive_marker, Redactor, REDACTED};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::CredentialOutcome;
use crate::errors::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Running,
    WaitingForInput,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Running => "RUNNING",
            JobPhase::WaitingForInput => "WAITING_FOR_INPUT",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest unresolved credential failure, surfaced to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFailure {
    pub step: u64,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

/// What happened at a step. Secret values never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    ActionExecuted {
        action: Action,
        url: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// The written value came from the human.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        human_value: bool,
    },
    ActionSkipped {
        signature: String,
        failures: u32,
    },
    InputsCleared {
        url: String,
    },
    InputRequested {
        request: InputRequest,
    },
    InputProvided {
        input_kind: InputKind,
        value: String,
    },
    InputTimedOut {
        input_kind: InputKind,
    },
    CredentialChecked {
        outcome: CredentialOutcome,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    DriverFault {
        attempt: u32,
        message: String,
    },
    OracleFault {
        message: String,
    },
    ResultsExtracted {
        count: usize,
        total: usize,
    },
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl HistoryEvent {
    /// Stores a fill with its value replaced when the field is sensitive.
    pub fn executed(
        action: &Action,
        snapshot: &PageSnapshot,
        human_value: bool,
        redact_as: Option<InputKind>,
    ) -> Self {
        let action = match (action, redact_as) {
            (
                Action::Fill {
                    selector,
                    sensitive: true,
                    ..
                },
                kind,
            ) => Action::Fill {
                selector: selector.clone(),
                value: kind
                    .map(|kind| sensitive_marker(kind.as_str()))
                    .unwrap_or_else(|| REDACTED.to_string()),
                sensitive: true,
            },
            (other, _) => other.clone(),
        };
        HistoryEvent::ActionExecuted {
            action,
            url: snapshot.url.clone(),
            success: snapshot.success,
            error: snapshot.error.clone(),
            human_value,
        }
    }
}

/// Tokens spent by the oracle on one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUsage {
    pub step: u64,
    #[serde(flatten)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
struct HumanValue {
    value: String,
    request: InputRequest,
}

/// Authoritative state of one job.
#[derive(Debug)]
pub struct JobState {
    id: JobId,
    goal: String,
    step: u64,
    phase: JobPhase,
    pending_request: Option<InputRequest>,
    last_response: Option<HumanValue>,
    last_satisfied: Option<InputRequest>,
    input_flow_active: bool,
    awaiting_credential_outcome: bool,
    credential_failure: Option<CredentialFailure>,
    failed_signatures: HashMap<String, u32>,
    last_page: Option<PageSnapshot>,
    history: Vec<HistoryEntry>,
    results: Vec<Value>,
    result_budget: Option<usize>,
    token_usage: Vec<StepUsage>,
    summary: Option<String>,
    reason: Option<String>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(id: JobId, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            goal: goal.into(),
            step: 0,
            phase: JobPhase::Running,
            pending_request: None,
            last_response: None,
            last_satisfied: None,
            input_flow_active: false,
            awaiting_credential_outcome: false,
            credential_failure: None,
            failed_signatures: HashMap::new(),
            last_page: None,
            history: Vec::new(),
            results: Vec::new(),
            result_budget: None,
            token_usage: Vec::new(),
            summary: None,
            reason: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// The job completes once this many results were collected.
    pub fn with_result_budget(mut self, budget: Option<usize>) -> Self {
        self.result_budget = budget.filter(|budget| *budget > 0);
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn pending_request(&self) -> Option<&InputRequest> {
        self.pending_request.as_ref()
    }

    /// The unconsumed human value, if any. Reading does not consume it.
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_ref().map(|human| human.value.as_str())
    }

    pub fn has_last_response(&self) -> bool {
        self.last_response.is_some()
    }

    pub fn input_flow_active(&self) -> bool {
        self.input_flow_active
    }

    /// The pending request, or else the one most recently answered.
    pub fn request_context(&self) -> Option<&InputRequest> {
        self.pending_request
            .as_ref()
            .or(self.last_satisfied.as_ref())
    }

    pub fn awaiting_credential_outcome(&self) -> bool {
        self.awaiting_credential_outcome
    }

    pub fn credential_failure(&self) -> Option<&CredentialFailure> {
        self.credential_failure.as_ref()
    }

    pub fn last_page(&self) -> Option<&PageSnapshot> {
        self.last_page.as_ref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn failure_count(&self, signature: &str) -> u32 {
        self.failed_signatures.get(signature).copied().unwrap_or(0)
    }

    /// Failed signatures, most frequent first.
    pub fn failed_signatures(&self) -> Vec<(String, u32)> {
        let mut failed: Vec<(String, u32)> = self
            .failed_signatures
            .iter()
            .map(|(sig, count)| (sig.clone(), *count))
            .collect();
        failed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        failed
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn result_budget(&self) -> Option<usize> {
        self.result_budget
    }

    pub fn result_budget_reached(&self) -> bool {
        self.result_budget
            .map_or(false, |budget| self.results.len() >= budget)
    }

    /// Appends extracted items and returns the new total.
    pub fn record_results(&mut self, items: Vec<Value>) -> usize {
        let count = items.len();
        self.results.extend(items);
        let total = self.results.len();
        self.record(HistoryEvent::ResultsExtracted { count, total });
        total
    }

    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.token_usage.push(StepUsage {
            step: self.step,
            usage,
        });
    }

    pub fn token_usage(&self) -> &[StepUsage] {
        &self.token_usage
    }

    pub fn total_usage(&self) -> TokenUsage {
        total_usage(&self.token_usage)
    }

    /// `pending_request` is set iff the job waits for input.
    pub fn check_invariant(&self) -> bool {
        self.pending_request.is_some() == (self.phase == JobPhase::WaitingForInput)
    }

    pub fn begin_step(&mut self) -> u64 {
        self.step += 1;
        self.touch();
        self.step
    }

    pub fn record(&mut self, event: HistoryEvent) {
        self.history.push(HistoryEntry {
            step: self.step,
            at: Utc::now(),
            event,
        });
        self.touch();
    }

    pub fn record_page(&mut self, snapshot: PageSnapshot) {
        self.last_page = Some(snapshot);
    }

    pub fn record_failed_action(&mut self, signature: String) -> u32 {
        let count = self.failed_signatures.entry(signature).or_insert(0);
        *count += 1;
        *count
    }

    /// RUNNING -> WAITING_FOR_INPUT. Any unconsumed earlier value is discarded.
    pub fn issue_request(&mut self, request: InputRequest) -> Result<(), AgentError> {
        if let Some(pending) = &self.pending_request {
            return Err(AgentError::invalid_state(format!(
                "job {} already waits for {} input",
                self.id, pending.kind
            )));
        }
        if self.phase != JobPhase::Running {
            return Err(AgentError::invalid_state(format!(
                "job {} cannot request input while {}",
                self.id, self.phase
            )));
        }
        self.record(HistoryEvent::InputRequested {
            request: request.clone(),
        });
        self.pending_request = Some(request);
        self.phase = JobPhase::WaitingForInput;
        self.last_response = None;
        self.input_flow_active = true;
        self.credential_failure = None;
        Ok(())
    }

    /// WAITING_FOR_INPUT -> RUNNING with the human value held for one use.
    pub fn record_response(&mut self, value: String) -> Result<InputRequest, AgentError> {
        let Some(request) = self.pending_request.take() else {
            return Err(AgentError::NoPendingRequest(self.id.clone()));
        };
        let shown = if request.is_redacted() {
            sensitive_marker(request.kind.as_str())
        } else {
            value.clone()
        };
        self.phase = JobPhase::Running;
        self.last_satisfied = Some(request.clone());
        self.last_response = Some(HumanValue {
            value,
            request: request.clone(),
        });
        self.record(HistoryEvent::InputProvided {
            input_kind: request.kind,
            value: shown,
        });
        Ok(request)
    }

    /// WAITING_FOR_INPUT -> RUNNING with no value; the input flow ends.
    pub fn expire_request(&mut self) -> Result<InputRequest, AgentError> {
        let Some(request) = self.pending_request.take() else {
            return Err(AgentError::NoPendingRequest(self.id.clone()));
        };
        self.phase = JobPhase::Running;
        self.last_response = None;
        self.input_flow_active = false;
        self.record(HistoryEvent::InputTimedOut {
            input_kind: request.kind,
        });
        Ok(request)
    }

    /// Hands out the human value exactly once and closes the input flow.
    pub fn take_response(&mut self) -> Option<(String, InputRequest)> {
        let human = self.last_response.take()?;
        self.input_flow_active = false;
        self.awaiting_credential_outcome = true;
        self.touch();
        Some((human.value, human.request))
    }

    pub fn record_credential_outcome(
        &mut self,
        outcome: CredentialOutcome,
        url: &str,
        reason: Option<String>,
    ) {
        self.awaiting_credential_outcome = false;
        if outcome == CredentialOutcome::Failure {
            self.credential_failure = Some(CredentialFailure {
                step: self.step,
                url: url.to_string(),
                reason: reason
                    .clone()
                    .unwrap_or_else(|| "credentials rejected".to_string()),
            });
        } else if outcome == CredentialOutcome::Success {
            self.credential_failure = None;
        }
        self.record(HistoryEvent::CredentialChecked {
            outcome,
            url: url.to_string(),
            reason,
        });
    }

    pub fn complete(&mut self, summary: Option<String>) {
        self.finish(JobPhase::Completed);
        self.summary = summary.clone();
        self.record(HistoryEvent::Completed { summary });
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.finish(JobPhase::Failed);
        self.reason = Some(reason.clone());
        self.record(HistoryEvent::Failed { reason });
    }

    fn finish(&mut self, phase: JobPhase) {
        self.phase = phase;
        self.pending_request = None;
        self.last_response = None;
        self.input_flow_active = false;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            goal: self.goal.clone(),
            step: self.step,
            phase: self.phase,
            pending_request: self.pending_request.clone(),
            has_last_response: self.last_response.is_some(),
            input_flow_active: self.input_flow_active,
            credential_failure: self.credential_failure.clone(),
            current_url: self.last_page.as_ref().map(|page| page.url.clone()),
            history: self.history.clone(),
            results: self.results.clone(),
            result_budget: self.result_budget,
            token_usage: self.token_usage.clone(),
            summary: self.summary.clone(),
            reason: self.reason.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

/// Immutable copy of a job for readers outside its execution context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub goal: String,
    pub step: u64,
    pub phase: JobPhase,
    pub pending_request: Option<InputRequest>,
    pub has_last_response: bool,
    pub input_flow_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_failure: Option<CredentialFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub results: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_budget: Option<usize>,
    pub token_usage: Vec<StepUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public status returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub phase: JobPhase,
    pub step: u64,
    pub last_public_history_entry: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn status(&self, redactor: &Redactor) -> JobStatus {
        JobStatus {
            job_id: self.job_id.clone(),
            phase: self.phase,
            step: self.step,
            last_public_history_entry: self
                .history
                .last()
                .map(|entry| public_entry(entry, redactor)),
            reason: self.reason.as_deref().map(|reason| redactor.text(reason)),
        }
    }

    pub fn total_usage(&self) -> TokenUsage {
        total_usage(&self.token_usage)
    }

    /// Collected results with secrets and URL credentials masked.
    pub fn public_results(&self, redactor: &Redactor) -> Vec<Value> {
        self.results
            .iter()
            .map(|item| {
                let mut item = item.clone();
                redactor.json(&mut item);
                item
            })
            .collect()
    }

    pub fn public_history(&self, redactor: &Redactor) -> Vec<Value> {
        self.history
            .iter()
            .map(|entry| public_entry(entry, redactor))
            .collect()
    }
}

fn total_usage(steps: &[StepUsage]) -> TokenUsage {
    steps.iter().fold(TokenUsage::default(), |acc, step| {
        TokenUsage::new(
            acc.input_tokens + step.usage.input_tokens,
            acc.output_tokens + step.usage.output_tokens,
        )
    })
}

pub fn public_entry(entry: &HistoryEntry, redactor: &Redactor) -> Value {
    let mut value = serde_json::to_value(entry).unwrap_or(Value::Null);
    redactor.json(&mut value);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> JobState {
        JobState::new(JobId::from("job-1"), "log in")
    }

    #[test]
    fn invariant_holds_across_request_lifecycle() {
        let mut state = job();
        assert!(state.check_invariant());

        state.begin_step();
        state
            .issue_request(InputRequest::new(InputKind::Email, "Email?"))
            .unwrap();
        assert_eq!(state.phase(), JobPhase::WaitingForInput);
        assert!(state.check_invariant());
        assert!(state.input_flow_active());

        state.record_response("a@b.com".into()).unwrap();
        assert_eq!(state.phase(), JobPhase::Running);
        assert!(state.check_invariant());
        assert_eq!(state.last_response(), Some("a@b.com"));

        let (value, request) = state.take_response().unwrap();
        assert_eq!(value, "a@b.com");
        assert_eq!(request.kind, InputKind::Email);
        assert!(state.take_response().is_none());
        assert!(!state.input_flow_active());
        assert!(state.check_invariant());
    }

    #[test]
    fn second_request_is_invalid_state() {
        let mut state = job();
        state
            .issue_request(InputRequest::new(InputKind::Password, "Password?"))
            .unwrap();
        let err = state
            .issue_request(InputRequest::new(InputKind::Otp, "Code?"))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
        assert_eq!(state.pending_request().unwrap().kind, InputKind::Password);
        assert!(state.check_invariant());
    }

    #[test]
    fn expiry_clears_request_and_value() {
        let mut state = job();
        state
            .issue_request(InputRequest::new(InputKind::Otp, "Code?"))
            .unwrap();
        state.expire_request().unwrap();
        assert_eq!(state.phase(), JobPhase::Running);
        assert!(state.pending_request().is_none());
        assert!(state.last_response().is_none());
        assert!(!state.input_flow_active());
        assert!(state.check_invariant());
        assert!(matches!(
            state.history().last().unwrap().event,
            HistoryEvent::InputTimedOut {
                input_kind: InputKind::Otp
            }
        ));
    }

    #[test]
    fn secret_responses_are_recorded_as_markers() {
        let mut state = job();
        state
            .issue_request(InputRequest::new(InputKind::Password, "Password?"))
            .unwrap();
        state.record_response("S3cr3t!".into()).unwrap();
        let snapshot = state.snapshot();
        let rendered = serde_json::to_string(&snapshot).unwrap();
        assert!(!rendered.contains("S3cr3t!"));
        assert!(rendered.contains("[SENSITIVE PASSWORD PROVIDED]"));
        assert!(snapshot.has_last_response);
    }

    #[test]
    fn terminal_transitions_discard_pending_state() {
        let mut state = job();
        state
            .issue_request(InputRequest::new(InputKind::Text, "Captcha?"))
            .unwrap();
        state.fail("cancelled");
        assert_eq!(state.phase(), JobPhase::Failed);
        assert!(state.pending_request().is_none());
        assert!(state.check_invariant());
        assert_eq!(state.reason(), Some("cancelled"));
    }

    #[test]
    fn status_exposes_only_last_entry() {
        let mut state = job();
        state.begin_step();
        state.record(HistoryEvent::InputsCleared {
            url: "https://site/login?token=abc".into(),
        });
        let status = state.snapshot().status(&Redactor::default());
        assert_eq!(status.phase, JobPhase::Running);
        assert_eq!(status.step, 1);
        let entry = status.last_public_history_entry.unwrap();
        assert_eq!(entry["kind"], "inputs_cleared");
        assert_eq!(entry["url"], "https://site/login?token=***");
    }

    #[test]
    fn results_accumulate_until_the_budget() {
        let mut state = job().with_result_budget(Some(3));
        state.begin_step();
        assert_eq!(
            state.record_results(vec![json!({"title": "a"}), json!({"title": "b"})]),
            2
        );
        assert!(!state.result_budget_reached());
        assert_eq!(state.record_results(vec![json!({"title": "c"})]), 3);
        assert!(state.result_budget_reached());
        assert!(matches!(
            state.history().last().unwrap().event,
            HistoryEvent::ResultsExtracted { count: 1, total: 3 }
        ));
        assert_eq!(state.snapshot().results.len(), 3);
    }

    #[test]
    fn zero_budget_means_unbounded() {
        let mut state = job().with_result_budget(Some(0));
        state.record_results(vec![json!({})]);
        assert_eq!(state.result_budget(), None);
        assert!(!state.result_budget_reached());
    }

    #[test]
    fn usage_is_kept_per_step_and_summed() {
        let mut state = job();
        state.begin_step();
        state.record_usage(TokenUsage::new(120, 30));
        state.begin_step();
        state.record_usage(TokenUsage::new(80, 10));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.token_usage[1].step, 2);
        assert_eq!(snapshot.total_usage(), TokenUsage::new(200, 40));
        let rendered = serde_json::to_value(&snapshot.token_usage[0]).unwrap();
        assert_eq!(rendered, json!({"step": 1, "input_tokens": 120, "output_tokens": 30}));
    }
}
