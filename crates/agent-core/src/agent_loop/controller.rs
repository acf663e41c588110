//! Job runner - the per-job execution loop.
//!
//! Each step asks the oracle for one action, passes it through the guards,
//! executes it with the driver and classifies credential outcomes. The only
//! suspension point is a `request_input` action.

use std::sync::Arc;
use std::time::Duration;

use handoff_core_types::{Action, InputRequest, PageSnapshot};
use handoff_event_bus::{EventBus, InMemoryBus};
use handoff_privacy::{scrub_secret, Redactor};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::config::JobLoopConfig;
use crate::classifier::{CredentialOutcome, OutcomeClassifier};
use crate::driver::BrowserDriver;
use crate::errors::{AgentError, DriverError};
use crate::events::{EventLog, JobEvent, JobEventKind};
use crate::guards::{ClearDecision, FillResolution, InputClearingGuard, SensitiveFieldGuard};
use crate::job::{HistoryEvent, JobSnapshot, JobState};
use crate::metrics;
use crate::oracle::{ActionOracle, OracleContext};
use crate::registry::ProtectionRegistry;
use crate::suspend::SuspensionChannel;

/// Collaborators shared by every job in the process.
#[derive(Clone)]
pub struct JobServices {
    pub registry: Arc<ProtectionRegistry>,
    pub suspensions: SuspensionChannel,
    pub bus: Arc<InMemoryBus<JobEvent>>,
    pub redactor: Arc<Redactor>,
    pub guard: SensitiveFieldGuard,
    pub classifier: Arc<OutcomeClassifier>,
}

impl Default for JobServices {
    fn default() -> Self {
        Self {
            registry: Arc::new(ProtectionRegistry::new()),
            suspensions: SuspensionChannel::new(),
            bus: InMemoryBus::new(1024),
            redactor: Arc::new(Redactor::default()),
            guard: SensitiveFieldGuard::default(),
            classifier: Arc::new(OutcomeClassifier::new()),
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Termination {
    Completed(Option<String>),
    Failed(String),
    Cancelled,
}

enum StepFlow {
    Continue,
    Finished(Termination),
}

/// Owns one job's state for the whole run.
pub struct JobRunner {
    config: JobLoopConfig,
    state: JobState,
    oracle: Arc<dyn ActionOracle>,
    driver: Arc<dyn BrowserDriver>,
    services: JobServices,
    publisher: watch::Sender<JobSnapshot>,
    events: Arc<EventLog>,
    cancel: CancellationToken,
    consecutive_oracle_failures: u32,
}

impl JobRunner {
    pub fn new(
        config: JobLoopConfig,
        state: JobState,
        oracle: Arc<dyn ActionOracle>,
        driver: Arc<dyn BrowserDriver>,
        services: JobServices,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<JobSnapshot>) {
        let (publisher, receiver) = watch::channel(state.snapshot());
        let runner = Self {
            config,
            state,
            oracle,
            driver,
            services,
            publisher,
            events: Arc::new(EventLog::default()),
            cancel,
            consecutive_oracle_failures: 0,
        };
        (runner, receiver)
    }

    /// Shares the replay buffer this runner appends its events to.
    pub fn with_event_log(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &JobLoopConfig {
        &self.config
    }

    /// Drives the job to a terminal phase and returns its final snapshot.
    pub async fn run(mut self) -> JobSnapshot {
        info!(job_id = %self.state.id(), goal = %self.state.goal(), "job started");
        metrics::job_started();
        self.emit(
            JobEventKind::JobStarted,
            json!({ "goal": self.state.goal() }),
        )
        .await;

        let termination = loop {
            if self.cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            if self.state.step() >= self.config.max_steps {
                break Termination::Failed(format!(
                    "step budget of {} exhausted",
                    self.config.max_steps
                ));
            }

            let step = self.state.begin_step();
            self.publish();
            self.emit(JobEventKind::StepStarted, json!({ "step": step }))
                .await;

            let context = OracleContext::from_state(&self.state);
            let action = match self.oracle.propose(&context).await {
                Ok(proposal) => {
                    self.consecutive_oracle_failures = 0;
                    if let Some(usage) = proposal.usage {
                        metrics::record_token_usage(usage.input_tokens, usage.output_tokens);
                        self.state.record_usage(usage);
                    }
                    proposal.action
                }
                Err(err) => {
                    self.consecutive_oracle_failures += 1;
                    warn!(
                        job_id = %self.state.id(),
                        step,
                        failures = self.consecutive_oracle_failures,
                        error = %err,
                        "oracle did not propose an action"
                    );
                    self.state.record(HistoryEvent::OracleFault {
                        message: err.to_string(),
                    });
                    self.publish();
                    if self.consecutive_oracle_failures
                        >= self.config.max_consecutive_oracle_failures
                    {
                        break Termination::Failed(format!(
                            "action oracle failed {} times in a row: {}",
                            self.consecutive_oracle_failures, err
                        ));
                    }
                    continue;
                }
            };
            debug!(job_id = %self.state.id(), step, action = action.name(), "oracle proposed action");

            match self.apply(action).await {
                StepFlow::Continue => {}
                StepFlow::Finished(termination) => break termination,
            }

            if self.config.step_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.step_delay_ms)).await;
            }
        };

        self.finish(termination).await
    }

    async fn apply(&mut self, action: Action) -> StepFlow {
        match action {
            Action::Complete { summary } => StepFlow::Finished(Termination::Completed(summary)),
            Action::Abort { reason } => {
                let reason = if reason.trim().is_empty() {
                    "aborted by oracle".to_string()
                } else {
                    format!("aborted by oracle: {reason}")
                };
                StepFlow::Finished(Termination::Failed(reason))
            }
            Action::RequestInput { .. } => match action.input_request() {
                Some(request) => self.await_input(request).await,
                None => StepFlow::Continue,
            },
            Action::Extract { items } => self.collect_results(items).await,
            Action::Navigate { .. }
            | Action::Fill { .. }
            | Action::Click { .. }
            | Action::Submit { .. }
            | Action::Press { .. }
            | Action::Scroll { .. } => self.execute_page_action(action).await,
        }
    }

    async fn await_input(&mut self, request: InputRequest) -> StepFlow {
        let job_id = self.state.id().clone();
        let pending = match self.services.suspensions.register(&job_id) {
            Ok(pending) => pending,
            Err(err) => return StepFlow::Finished(Termination::Failed(err.to_string())),
        };
        if let Err(err) = self.state.issue_request(request.clone()) {
            return StepFlow::Finished(Termination::Failed(err.to_string()));
        }
        self.services.registry.protect(&job_id);
        metrics::record_input_request(request.kind.as_str());
        self.publish();
        info!(
            job_id = %job_id,
            step = self.state.step(),
            kind = %request.kind,
            sensitive = request.is_redacted(),
            "waiting for human input"
        );
        self.emit(
            JobEventKind::InputRequested,
            json!({
                "input_type": request.kind,
                "prompt": request.prompt,
                "is_sensitive": request.is_redacted(),
            }),
        )
        .await;

        let outcome = pending
            .wait(self.config.input_timeout(), Some(&self.cancel))
            .await;
        match outcome.into_response() {
            Ok(value) => {
                let length = value.chars().count();
                if let Err(err) = self.state.record_response(value) {
                    return StepFlow::Finished(Termination::Failed(err.to_string()));
                }
                self.publish();
                info!(job_id = %job_id, kind = %request.kind, "human input received");
                self.emit(
                    JobEventKind::InputReceived,
                    json!({ "input_type": request.kind, "length": length }),
                )
                .await;
                StepFlow::Continue
            }
            Err(AgentError::Timeout) => {
                if let Err(err) = self.state.expire_request() {
                    return StepFlow::Finished(Termination::Failed(err.to_string()));
                }
                self.services.registry.release(&job_id);
                metrics::record_input_timeout();
                self.publish();
                warn!(job_id = %job_id, kind = %request.kind, "input request timed out");
                self.emit(
                    JobEventKind::InputTimedOut,
                    json!({ "input_type": request.kind }),
                )
                .await;
                StepFlow::Continue
            }
            Err(_) => StepFlow::Finished(Termination::Cancelled),
        }
    }

    async fn execute_page_action(&mut self, action: Action) -> StepFlow {
        // The guard runs first: a fill that consumes a fresh human value is
        // never treated as a repeat of an earlier failure.
        let (action, fill) = self.guard_fill(action);
        let human_value = fill.as_ref().map_or(false, |res| res.rule.consumes());
        let signature = match &action {
            Action::Fill { selector, .. } if human_value => Action::Fill {
                selector: selector.clone(),
                value: String::new(),
                sensitive: true,
            }
            .signature(),
            other => other.signature(),
        };
        if self.config.skip_repeated_failures && !human_value {
            let failures = self.state.failure_count(&signature);
            if failures > 0 {
                debug!(job_id = %self.state.id(), %signature, failures, "skipping repeated failing action");
                self.state.record(HistoryEvent::ActionSkipped {
                    signature: signature.clone(),
                    failures,
                });
                self.publish();
                self.emit(
                    JobEventKind::ActionSkipped,
                    json!({ "signature": signature, "failures": failures }),
                )
                .await;
                return StepFlow::Continue;
            }
        }

        if let Some(resolution) = fill.as_ref().filter(|res| res.rule.consumes()) {
            self.emit(
                JobEventKind::SensitiveValueInjected,
                json!({
                    "signature": signature,
                    "rule": resolution.rule,
                    "input_type": resolution.answered,
                }),
            )
            .await;
        }

        let clear = if action.is_navigation() {
            InputClearingGuard::evaluate(&self.state, &self.services.registry)
        } else {
            ClearDecision::Suppressed("not a navigation")
        };

        let mut snapshot = match self.execute_with_retry(&action).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return StepFlow::Finished(Termination::Failed(format!(
                    "driver failed after {} attempts: {}",
                    self.config.driver_retry_limit + 1,
                    err
                )))
            }
        };
        if let Some(resolution) = fill.as_ref().filter(|res| res.sensitive) {
            snapshot.error = snapshot
                .error
                .map(|error| scrub_secret(&error, &resolution.value));
        }

        if snapshot.success {
            match clear {
                ClearDecision::Clear => self.clear_inputs(&snapshot).await,
                ClearDecision::Suppressed(reason) if action.is_navigation() => {
                    debug!(job_id = %self.state.id(), reason, "input clearing suppressed");
                }
                ClearDecision::Suppressed(_) => {}
            }
        }

        let redact_as = fill.as_ref().and_then(|res| res.answered);
        self.state.record(HistoryEvent::executed(
            &action,
            &snapshot,
            human_value,
            redact_as,
        ));

        if snapshot.success {
            self.emit(
                JobEventKind::ActionExecuted,
                json!({ "signature": signature, "url": snapshot.url }),
            )
            .await;
        } else {
            let failures = self.state.record_failed_action(signature.clone());
            warn!(
                job_id = %self.state.id(),
                %signature,
                failures,
                error = snapshot.error.as_deref().unwrap_or("unknown error"),
                "action failed"
            );
            self.emit(
                JobEventKind::ActionFailed,
                json!({
                    "signature": signature,
                    "error": snapshot.error,
                    "failures": failures,
                }),
            )
            .await;
        }

        if snapshot.success
            && OutcomeClassifier::is_credential_bearing(
                &action,
                self.state.awaiting_credential_outcome(),
            )
        {
            self.classify(&action, &snapshot).await;
        }

        self.state.record_page(snapshot);
        self.publish();
        StepFlow::Continue
    }

    async fn collect_results(&mut self, items: Vec<Value>) -> StepFlow {
        let base = self
            .state
            .last_page()
            .and_then(|page| Url::parse(&page.url).ok());
        let items: Vec<Value> = items
            .into_iter()
            .map(|item| resolve_item_url(item, base.as_ref()))
            .collect();
        let count = items.len();
        let total = self.state.record_results(items);
        metrics::record_results_extracted(count);
        self.publish();
        info!(job_id = %self.state.id(), count, total, "results extracted");
        self.emit(
            JobEventKind::ResultsExtracted,
            json!({ "new_items_found": count, "total_items": total }),
        )
        .await;

        match self.state.result_budget() {
            Some(budget) if total >= budget => StepFlow::Finished(Termination::Completed(Some(
                format!("Collected {total}/{budget} items."),
            ))),
            _ => StepFlow::Continue,
        }
    }

    fn guard_fill(&mut self, action: Action) -> (Action, Option<FillResolution>) {
        match action {
            Action::Fill {
                selector,
                value,
                sensitive,
            } => {
                let resolution = self.services.guard.resolve(
                    &mut self.state,
                    &self.services.registry,
                    &selector,
                    &value,
                    sensitive,
                );
                let guarded = Action::Fill {
                    selector,
                    value: resolution.value.clone(),
                    sensitive: resolution.sensitive,
                };
                (guarded, Some(resolution))
            }
            other => (other, None),
        }
    }

    async fn execute_with_retry(&mut self, action: &Action) -> Result<PageSnapshot, DriverError> {
        let attempts = self.config.driver_retry_limit + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.driver.execute(self.state.id(), action).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => {
                    metrics::record_driver_fault();
                    warn!(
                        job_id = %self.state.id(),
                        action = action.name(),
                        attempt,
                        attempts,
                        error = %err,
                        "driver fault"
                    );
                    self.state.record(HistoryEvent::DriverFault {
                        attempt,
                        message: err.to_string(),
                    });
                    self.emit(
                        JobEventKind::DriverFault,
                        json!({ "attempt": attempt, "error": err.to_string() }),
                    )
                    .await;
                    if attempt >= attempts {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn clear_inputs(&mut self, snapshot: &PageSnapshot) {
        match self.driver.clear_inputs(self.state.id()).await {
            Ok(cleared) => {
                debug!(job_id = %self.state.id(), cleared, "cleared residual form inputs");
                self.state.record(HistoryEvent::InputsCleared {
                    url: snapshot.url.clone(),
                });
                self.emit(
                    JobEventKind::InputsCleared,
                    json!({ "url": snapshot.url, "cleared": cleared }),
                )
                .await;
            }
            Err(err) => {
                warn!(job_id = %self.state.id(), error = %err, "failed to clear inputs");
            }
        }
    }

    async fn classify(&mut self, action: &Action, snapshot: &PageSnapshot) {
        let classification = self.services.classifier.classify(action, snapshot);
        metrics::record_credential_outcome(classification.outcome.as_str());
        self.state.record_credential_outcome(
            classification.outcome,
            &snapshot.url,
            classification.reason.clone(),
        );
        if classification.outcome == CredentialOutcome::Failure {
            info!(
                job_id = %self.state.id(),
                step = self.state.step(),
                url = %self.services.redactor.url(&snapshot.url),
                reason = classification.reason.as_deref().unwrap_or(""),
                "login failure detected"
            );
            self.emit(
                JobEventKind::LoginFailureDetected,
                json!({
                    "failure_url": snapshot.url,
                    "step": self.state.step(),
                    "reason": classification.reason,
                }),
            )
            .await;
        } else {
            debug!(
                job_id = %self.state.id(),
                outcome = %classification.outcome,
                "credential action classified"
            );
        }
    }

    async fn finish(mut self, termination: Termination) -> JobSnapshot {
        let job_id = self.state.id().clone();
        match &termination {
            Termination::Completed(summary) => {
                self.state.complete(summary.clone());
                info!(job_id = %job_id, steps = self.state.step(), "job completed");
                self.emit(JobEventKind::JobCompleted, json!({ "summary": summary }))
                    .await;
            }
            Termination::Failed(reason) => {
                self.state.fail(reason.clone());
                warn!(job_id = %job_id, steps = self.state.step(), reason = %reason, "job failed");
                self.emit(JobEventKind::JobFailed, json!({ "reason": reason }))
                    .await;
            }
            Termination::Cancelled => {
                self.state.fail("cancelled by request");
                info!(job_id = %job_id, steps = self.state.step(), "job cancelled");
                self.emit(JobEventKind::JobCancelled, json!({ "reason": "cancelled by request" }))
                    .await;
            }
        }
        self.services.registry.release(&job_id);
        self.services.suspensions.cancel(&job_id);
        metrics::job_finished();
        self.publish();
        self.state.snapshot()
    }

    fn publish(&self) {
        if !self.state.check_invariant() {
            error!(
                job_id = %self.state.id(),
                phase = %self.state.phase(),
                "pending request does not match job phase"
            );
        }
        self.publisher.send_replace(self.state.snapshot());
    }

    async fn emit(&self, kind: JobEventKind, mut details: Value) {
        self.services.redactor.json(&mut details);
        let event = JobEvent::new(self.state.id().clone(), kind, self.state.step(), details);
        self.events.push(event.clone());
        if let Err(err) = self.services.bus.publish(event).await {
            debug!(?err, "job event not published");
        }
    }
}

/// Resolves a relative `url` field against the page it was read from.
fn resolve_item_url(mut item: Value, base: Option<&Url>) -> Value {
    if let (Some(base), Some(Value::String(link))) = (base, item.get_mut("url")) {
        if let Ok(resolved) = base.join(link) {
            *link = resolved.to_string();
        }
    }
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use crate::job::JobPhase;
    use crate::job::TokenUsage;
    use crate::oracle::ScriptedOracle;
    use handoff_core_types::JobId;

    fn runner(
        oracle: ScriptedOracle,
        driver: ScriptedDriver,
        config: JobLoopConfig,
    ) -> (JobRunner, watch::Receiver<JobSnapshot>) {
        JobRunner::new(
            config,
            JobState::new(JobId::new(), "goal"),
            Arc::new(oracle),
            Arc::new(driver),
            JobServices::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn completes_when_oracle_says_so() {
        let oracle = ScriptedOracle::new([
            Action::Navigate {
                url: "https://site/".into(),
            },
            Action::Complete {
                summary: Some("done".into()),
            },
        ]);
        let (runner, _rx) = runner(oracle, ScriptedDriver::new(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Completed);
        assert_eq!(snapshot.summary.as_deref(), Some("done"));
        assert_eq!(snapshot.step, 2);
    }

    #[tokio::test]
    async fn step_budget_fails_the_job() {
        let oracle = ScriptedOracle::default();
        for _ in 0..10 {
            oracle.push(Action::Scroll {
                direction: Default::default(),
            });
        }
        let config = JobLoopConfig::minimal()
            .with_max_steps(3)
            .with_skip_repeated_failures(false);
        let (runner, _rx) = runner(oracle, ScriptedDriver::new(), config);
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Failed);
        assert_eq!(snapshot.step, 3);
        assert!(snapshot.reason.unwrap().contains("step budget"));
    }

    #[tokio::test]
    async fn driver_fault_is_retried_once_then_fails() {
        let oracle = ScriptedOracle::new([Action::Click {
            selector: "#go".into(),
        }]);
        let driver = ScriptedDriver::with_responder(|_| {
            Err(DriverError::Transport("connection reset".into()))
        });
        let (runner, _rx) = runner(oracle, driver.clone(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Failed);
        assert_eq!(driver.executed().len(), 2);
        let reason = snapshot.reason.unwrap();
        assert!(reason.starts_with("driver failed after 2 attempts"), "{reason}");
    }

    #[tokio::test]
    async fn single_driver_fault_recovers() {
        let oracle = ScriptedOracle::new([Action::Click {
            selector: "#go".into(),
        }]);
        let driver = ScriptedDriver::new();
        driver.push(Err(DriverError::Navigation("timeout".into())));
        let (runner, _rx) = runner(oracle, driver.clone(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Completed);
        assert_eq!(driver.executed().len(), 2);
    }

    #[tokio::test]
    async fn repeated_failing_action_is_skipped() {
        let click = Action::Click {
            selector: "#missing".into(),
        };
        let oracle = ScriptedOracle::new([click.clone(), click.clone()]);
        let driver = ScriptedDriver::with_responder(|_| {
            Ok(PageSnapshot::failed("https://site/", "element not found"))
        });
        let (runner, _rx) = runner(oracle, driver.clone(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(driver.executed().len(), 1);
        assert!(snapshot.history.iter().any(|entry| matches!(
            entry.event,
            HistoryEvent::ActionSkipped { failures: 1, .. }
        )));
    }

    #[tokio::test]
    async fn oracle_failures_in_a_row_fail_the_job() {
        let oracle = ScriptedOracle::default();
        oracle.push_error("rate limited");
        oracle.push_error("rate limited");
        let (runner, _rx) = runner(oracle, ScriptedDriver::new(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Failed);
        assert!(snapshot.reason.unwrap().contains("2 times in a row"));
    }

    #[tokio::test]
    async fn first_navigation_clears_inputs() {
        let oracle = ScriptedOracle::new([
            Action::Navigate {
                url: "https://site/".into(),
            },
            Action::Navigate {
                url: "https://site/next".into(),
            },
        ]);
        let driver = ScriptedDriver::new();
        let (runner, _rx) = runner(oracle, driver.clone(), JobLoopConfig::minimal());
        runner.run().await;
        assert_eq!(driver.clears().len(), 1);
    }

    #[tokio::test]
    async fn abort_fails_with_reason() {
        let oracle = ScriptedOracle::new([Action::Abort {
            reason: "captcha wall".into(),
        }]);
        let (runner, _rx) = runner(oracle, ScriptedDriver::new(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Failed);
        assert_eq!(snapshot.reason.as_deref(), Some("aborted by oracle: captcha wall"));
    }

    #[tokio::test]
    async fn plain_fills_with_new_text_are_not_skipped() {
        let fill = |text: &str| Action::Fill {
            selector: "#search".into(),
            value: text.into(),
            sensitive: false,
        };
        let oracle = ScriptedOracle::new([fill("rust books"), fill("rust novels")]);
        let driver = ScriptedDriver::with_responder(|_| {
            Ok(PageSnapshot::failed("https://shop/", "no suggestions"))
        });
        let (runner, _rx) = runner(oracle, driver.clone(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(driver.executed().len(), 2);
        assert!(!snapshot
            .history
            .iter()
            .any(|entry| matches!(entry.event, HistoryEvent::ActionSkipped { .. })));
    }

    #[tokio::test]
    async fn extracted_urls_are_resolved_and_the_budget_completes_the_job() {
        let oracle = ScriptedOracle::new([
            Action::Navigate {
                url: "https://shop.example/search?q=lamp".into(),
            },
            Action::Extract {
                items: vec![
                    json!({"title": "Desk lamp", "url": "/item/1"}),
                    json!({"title": "Floor lamp", "url": "https://cdn.example/item/2"}),
                ],
            },
            Action::Extract {
                items: vec![json!({"title": "Wall lamp", "url": "item/3"})],
            },
            Action::Scroll {
                direction: Default::default(),
            },
        ]);
        let (runner, _rx) = JobRunner::new(
            JobLoopConfig::minimal(),
            JobState::new(JobId::new(), "find three lamps").with_result_budget(Some(3)),
            Arc::new(oracle.clone()),
            Arc::new(ScriptedDriver::new()),
            JobServices::default(),
            CancellationToken::new(),
        );
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Completed);
        assert_eq!(snapshot.summary.as_deref(), Some("Collected 3/3 items."));
        assert_eq!(oracle.call_count(), 3);
        let urls: Vec<&str> = snapshot
            .results
            .iter()
            .filter_map(|item| item["url"].as_str())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://shop.example/item/1",
                "https://cdn.example/item/2",
                "https://shop.example/item/3",
            ]
        );
    }

    #[tokio::test]
    async fn extract_before_any_page_keeps_urls_as_given() {
        let oracle = ScriptedOracle::new([Action::Extract {
            items: vec![json!({"url": "/relative"}), json!("bare string")],
        }]);
        let (runner, _rx) = runner(oracle, ScriptedDriver::new(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        assert_eq!(snapshot.phase, JobPhase::Completed);
        assert_eq!(snapshot.results, vec![json!({"url": "/relative"}), json!("bare string")]);
    }

    #[tokio::test]
    async fn oracle_token_usage_is_recorded_per_step() {
        let oracle = ScriptedOracle::default();
        oracle.push_with_usage(
            Action::Navigate {
                url: "https://site/".into(),
            },
            TokenUsage::new(900, 40),
        );
        oracle.push_with_usage(Action::Complete { summary: None }, TokenUsage::new(1100, 25));
        let (runner, _rx) = runner(oracle, ScriptedDriver::new(), JobLoopConfig::minimal());
        let snapshot = runner.run().await;
        let steps: Vec<u64> = snapshot.token_usage.iter().map(|usage| usage.step).collect();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(snapshot.total_usage(), TokenUsage::new(2000, 65));
    }
}
