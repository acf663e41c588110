//! Per-job suspension points for human input.
//!
//! Each waiting job owns one oneshot slot keyed by its id. Delivering a
//! response removes the slot, so one response unblocks exactly one wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use handoff_core_types::JobId;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::AgentError;

/// Default window a human has to answer one request.
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendOutcome {
    Response(String),
    TimedOut,
    Cancelled,
}

impl SuspendOutcome {
    pub fn into_response(self) -> Result<String, AgentError> {
        match self {
            SuspendOutcome::Response(value) => Ok(value),
            SuspendOutcome::TimedOut => Err(AgentError::Timeout),
            SuspendOutcome::Cancelled => Err(AgentError::Cancelled),
        }
    }
}

#[derive(Debug)]
enum Signal {
    Response(String),
    Cancel,
}

#[derive(Debug)]
struct Slot {
    token: u64,
    sender: oneshot::Sender<Signal>,
}

#[derive(Debug, Default, Clone)]
pub struct SuspensionChannel {
    slots: Arc<DashMap<JobId, Slot>>,
    next_token: Arc<AtomicU64>,
}

impl SuspensionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the wait slot for `job_id`.
    ///
    /// Register before publishing the request so a fast response cannot
    /// arrive ahead of its slot.
    pub fn register(&self, job_id: &JobId) -> Result<PendingSuspension, AgentError> {
        match self.slots.entry(job_id.clone()) {
            Entry::Occupied(_) => Err(AgentError::invalid_state(format!(
                "job {job_id} already has an outstanding input request"
            ))),
            Entry::Vacant(vacant) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = oneshot::channel();
                vacant.insert(Slot { token, sender });
                Ok(PendingSuspension {
                    job_id: job_id.clone(),
                    token,
                    receiver,
                    slots: self.slots.clone(),
                })
            }
        }
    }

    /// Registers and waits in one call.
    pub async fn suspend(
        &self,
        job_id: &JobId,
        timeout: Duration,
    ) -> Result<SuspendOutcome, AgentError> {
        let pending = self.register(job_id)?;
        Ok(pending.wait(timeout, None).await)
    }

    /// Delivers a human response to the job waiting under `job_id`.
    pub fn deliver(&self, job_id: &JobId, value: String) -> Result<(), AgentError> {
        let Some((_, slot)) = self.slots.remove(job_id) else {
            return Err(AgentError::NoPendingRequest(job_id.clone()));
        };
        slot.sender
            .send(Signal::Response(value))
            .map_err(|_| AgentError::NoPendingRequest(job_id.clone()))
    }

    /// Unblocks the waiting job, if any, as cancelled.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.slots.remove(job_id) {
            Some((_, slot)) => slot.sender.send(Signal::Cancel).is_ok(),
            None => false,
        }
    }

    pub fn is_waiting(&self, job_id: &JobId) -> bool {
        self.slots.contains_key(job_id)
    }

    pub fn waiting_count(&self) -> usize {
        self.slots.len()
    }
}

/// A registered wait that has not been awaited yet.
#[derive(Debug)]
pub struct PendingSuspension {
    job_id: JobId,
    token: u64,
    receiver: oneshot::Receiver<Signal>,
    slots: Arc<DashMap<JobId, Slot>>,
}

impl PendingSuspension {
    /// Blocks this job until a response, the timeout, or cancellation.
    pub async fn wait(
        mut self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> SuspendOutcome {
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        let outcome = tokio::select! {
            received = &mut self.receiver => match received {
                Ok(Signal::Response(value)) => SuspendOutcome::Response(value),
                Ok(Signal::Cancel) | Err(_) => SuspendOutcome::Cancelled,
            },
            _ = tokio::time::sleep(timeout) => SuspendOutcome::TimedOut,
            _ = cancel.cancelled() => SuspendOutcome::Cancelled,
        };
        if outcome != SuspendOutcome::TimedOut {
            return outcome;
        }
        self.release_slot();
        // A response accepted just before the slot was released still counts.
        match self.receiver.try_recv() {
            Ok(Signal::Response(value)) => {
                debug!(job_id = %self.job_id, "late response accepted at timeout");
                SuspendOutcome::Response(value)
            }
            Ok(Signal::Cancel) => SuspendOutcome::Cancelled,
            Err(_) => SuspendOutcome::TimedOut,
        }
    }

    fn release_slot(&self) {
        let token = self.token;
        self.slots.remove_if(&self.job_id, |_, slot| slot.token == token);
    }
}

impl Drop for PendingSuspension {
    fn drop(&mut self) {
        self.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn response_unblocks_waiter() {
        let channel = SuspensionChannel::new();
        let job = JobId::from("job");
        let pending = channel.register(&job).unwrap();
        assert!(channel.is_waiting(&job));

        channel.deliver(&job, "a@b.com".into()).unwrap();
        let outcome = pending.wait(Duration::from_secs(5), None).await;
        assert_eq!(outcome, SuspendOutcome::Response("a@b.com".into()));
        assert!(!channel.is_waiting(&job));
    }

    #[tokio::test]
    async fn second_registration_fails_fast() {
        let channel = SuspensionChannel::new();
        let job = JobId::from("job");
        let _pending = channel.register(&job).unwrap();
        let err = channel.register(&job).unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
    }

    #[tokio::test]
    async fn short_timeout_returns_promptly() {
        let channel = SuspensionChannel::new();
        let job = JobId::from("job");
        let started = Instant::now();
        let outcome = channel
            .suspend(&job, Duration::from_millis(50))
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(outcome, SuspendOutcome::TimedOut);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");
        assert!(!channel.is_waiting(&job));
        assert!(matches!(
            channel.deliver(&job, "late".into()),
            Err(AgentError::NoPendingRequest(_))
        ));
    }

    #[tokio::test]
    async fn cancel_unblocks_immediately() {
        let channel = SuspensionChannel::new();
        let job = JobId::from("job");
        let pending = channel.register(&job).unwrap();
        let waiter = tokio::spawn(async move { pending.wait(DEFAULT_INPUT_TIMEOUT, None).await });
        tokio::task::yield_now().await;
        assert!(channel.cancel(&job));
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SuspendOutcome::Cancelled);
    }

    #[tokio::test]
    async fn token_cancellation_unblocks_wait() {
        let channel = SuspensionChannel::new();
        let job = JobId::from("job");
        let token = CancellationToken::new();
        token.cancel();
        let pending = channel.register(&job).unwrap();
        let outcome = pending.wait(DEFAULT_INPUT_TIMEOUT, Some(&token)).await;
        assert_eq!(outcome, SuspendOutcome::Cancelled);
        assert!(!channel.is_waiting(&job));
    }

    #[tokio::test]
    async fn dropping_a_pending_wait_frees_the_slot() {
        let channel = SuspensionChannel::new();
        let job = JobId::from("job");
        drop(channel.register(&job).unwrap());
        assert!(!channel.is_waiting(&job));
        assert!(channel.register(&job).is_ok());
    }
}
