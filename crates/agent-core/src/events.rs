use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use handoff_core_types::JobId;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobStarted,
    StepStarted,
    ActionExecuted,
    ActionFailed,
    ActionSkipped,
    InputsCleared,
    InputRequested,
    InputReceived,
    InputTimedOut,
    SensitiveValueInjected,
    LoginFailureDetected,
    DriverFault,
    ResultsExtracted,
    JobCompleted,
    JobFailed,
    JobCancelled,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::JobStarted => "job_started",
            JobEventKind::StepStarted => "step_started",
            JobEventKind::ActionExecuted => "action_executed",
            JobEventKind::ActionFailed => "action_failed",
            JobEventKind::ActionSkipped => "action_skipped",
            JobEventKind::InputsCleared => "inputs_cleared",
            JobEventKind::InputRequested => "input_requested",
            JobEventKind::InputReceived => "input_received",
            JobEventKind::InputTimedOut => "input_timed_out",
            JobEventKind::SensitiveValueInjected => "sensitive_value_injected",
            JobEventKind::LoginFailureDetected => "login_failure_detected",
            JobEventKind::DriverFault => "driver_fault",
            JobEventKind::ResultsExtracted => "results_extracted",
            JobEventKind::JobCompleted => "job_completed",
            JobEventKind::JobFailed => "job_failed",
            JobEventKind::JobCancelled => "job_cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobEventKind::JobCompleted | JobEventKind::JobFailed | JobEventKind::JobCancelled
        )
    }
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status event published on the job event bus.
///
/// Details are built without secret values and pass through the redactor
/// before publication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobEventKind,
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobEventKind, step: u64, details: Value) -> Self {
        Self {
            job_id,
            kind,
            step,
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Bounded per-job replay buffer so late subscribers see earlier events.
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<JobEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: JobEvent) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<JobEvent> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_keeps_most_recent_events() {
        let log = EventLog::new(2);
        for step in 1..=3 {
            log.push(JobEvent::new(
                JobId::from("job"),
                JobEventKind::StepStarted,
                step,
                json!({}),
            ));
        }
        let steps: Vec<u64> = log.snapshot().iter().map(|event| event.step).collect();
        assert_eq!(steps, vec![2, 3]);
    }

    #[test]
    fn kinds_serialize_in_snake_case() {
        let value = serde_json::to_value(JobEventKind::LoginFailureDetected).unwrap();
        assert_eq!(value, json!("login_failure_detected"));
        assert_eq!(
            JobEventKind::LoginFailureDetected.as_str(),
            "login_failure_detected"
        );
    }
}
