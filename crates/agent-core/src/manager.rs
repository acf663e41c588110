//! Process-wide job table.
//!
//! Each job runs on its own task; the manager only keeps the read side of
//! its snapshot channel plus the handles needed to answer or cancel it.

use std::sync::Arc;

use dashmap::DashMap;
use handoff_core_types::{InputRequest, JobId};
use handoff_event_bus::EventBus;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::agent_loop::{JobLoopConfig, JobRunner, JobServices};
use crate::driver::BrowserDriver;
use crate::errors::AgentError;
use crate::events::{EventLog, JobEvent};
use crate::job::{JobSnapshot, JobState, JobStatus};
use crate::oracle::ActionOracle;

/// Per-job knobs chosen by the caller at spawn time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Complete the job once this many results were extracted.
    pub result_budget: Option<usize>,
}

impl JobOptions {
    pub fn with_result_budget(mut self, budget: usize) -> Self {
        self.result_budget = Some(budget);
        self
    }
}

#[derive(Debug, Clone)]
struct JobHandle {
    snapshot: watch::Receiver<JobSnapshot>,
    cancel: CancellationToken,
    events: Arc<EventLog>,
}

/// Owns every job started in this process.
#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<DashMap<JobId, JobHandle>>,
    services: JobServices,
    config: JobLoopConfig,
}

impl JobManager {
    pub fn new(config: JobLoopConfig, services: JobServices) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            services,
            config,
        }
    }

    pub fn services(&self) -> &JobServices {
        &self.services
    }

    pub fn config(&self) -> &JobLoopConfig {
        &self.config
    }

    /// Starts a job on its own task and returns its id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &self,
        goal: impl Into<String>,
        oracle: Arc<dyn ActionOracle>,
        driver: Arc<dyn BrowserDriver>,
    ) -> JobId {
        self.spawn_with_options(goal, JobOptions::default(), oracle, driver)
    }

    pub fn spawn_with_options(
        &self,
        goal: impl Into<String>,
        options: JobOptions,
        oracle: Arc<dyn ActionOracle>,
        driver: Arc<dyn BrowserDriver>,
    ) -> JobId {
        let job_id = JobId::new();
        let state = JobState::new(job_id.clone(), goal).with_result_budget(options.result_budget);
        let cancel = CancellationToken::new();
        let events = Arc::new(EventLog::default());
        let (runner, snapshot) = JobRunner::new(
            self.config.clone(),
            state,
            oracle,
            driver,
            self.services.clone(),
            cancel.clone(),
        );
        let runner = runner.with_event_log(events.clone());
        self.jobs.insert(
            job_id.clone(),
            JobHandle {
                snapshot,
                cancel,
                events,
            },
        );
        info!(job_id = %job_id, "job spawned");
        tokio::spawn(runner.run());
        job_id
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self, job_id: &JobId) -> Result<JobSnapshot, AgentError> {
        self.handle(job_id)
            .map(|handle| handle.snapshot.borrow().clone())
    }

    /// The request the job is blocked on, if it is waiting.
    pub fn get_pending_request(&self, job_id: &JobId) -> Result<Option<InputRequest>, AgentError> {
        self.snapshot(job_id)
            .map(|snapshot| snapshot.pending_request)
    }

    /// Hands the human's answer to the waiting job. Does not touch any
    /// other job.
    #[instrument(name = "handoff.jobs.submit_response", skip(self, value), fields(job_id = %job_id))]
    pub fn submit_response(&self, job_id: &JobId, value: String) -> Result<(), AgentError> {
        if !self.jobs.contains_key(job_id) {
            return Err(AgentError::JobNotFound(job_id.clone()));
        }
        self.services.suspensions.deliver(job_id, value)?;
        info!("human response delivered");
        Ok(())
    }

    /// Phase, step and the last history entry with sensitive values redacted.
    pub fn get_status(&self, job_id: &JobId) -> Result<JobStatus, AgentError> {
        self.snapshot(job_id)
            .map(|snapshot| snapshot.status(&self.services.redactor))
    }

    /// Requests cancellation; a waiting job is unblocked immediately.
    #[instrument(name = "handoff.jobs.cancel", skip(self), fields(job_id = %job_id))]
    pub fn cancel(&self, job_id: &JobId) -> Result<(), AgentError> {
        let handle = self.handle(job_id)?;
        handle.cancel.cancel();
        self.services.suspensions.cancel(job_id);
        info!("job cancellation requested");
        Ok(())
    }

    /// Resolves once the job reaches a terminal phase.
    pub async fn wait(&self, job_id: &JobId) -> Result<JobSnapshot, AgentError> {
        let mut receiver = self.handle(job_id)?.snapshot;
        loop {
            {
                let current = receiver.borrow_and_update();
                if current.is_terminal() {
                    return Ok(current.clone());
                }
            }
            if receiver.changed().await.is_err() {
                return Ok(receiver.borrow().clone());
            }
        }
    }

    /// Snapshot stream for one job.
    pub fn watch(&self, job_id: &JobId) -> Result<watch::Receiver<JobSnapshot>, AgentError> {
        self.handle(job_id).map(|handle| handle.snapshot)
    }

    /// Events for every job, live.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.services.bus.subscribe()
    }

    /// Events already emitted by one job, oldest first.
    pub fn events(&self, job_id: &JobId) -> Result<Vec<JobEvent>, AgentError> {
        self.handle(job_id).map(|handle| handle.events.snapshot())
    }

    /// Drops finished jobs from the table; returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, handle| !handle.snapshot.borrow().is_terminal());
        before.saturating_sub(self.jobs.len())
    }

    fn handle(&self, job_id: &JobId) -> Result<JobHandle, AgentError> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AgentError::JobNotFound(job_id.clone()))
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(JobLoopConfig::default(), JobServices::default())
    }
}
