use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use handoff_core_types::{Action, JobId, PageSnapshot};
use parking_lot::Mutex;

use crate::errors::DriverError;

/// The external executor that performs actions against a live page.
///
/// One driver may serve many jobs; every call names the job it acts for.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn execute(&self, job_id: &JobId, action: &Action) -> Result<PageSnapshot, DriverError>;

    /// Wipes visible form fields; returns how many were cleared.
    async fn clear_inputs(&self, job_id: &JobId) -> Result<usize, DriverError>;
}

type Responder = Box<dyn Fn(&Action) -> Result<PageSnapshot, DriverError> + Send + Sync>;

/// Driver answering from a queue of canned results, falling back to a
/// responder closure. Records every executed action.
#[derive(Clone)]
pub struct ScriptedDriver {
    queue: Arc<Mutex<VecDeque<Result<PageSnapshot, DriverError>>>>,
    responder: Arc<Responder>,
    executed: Arc<Mutex<Vec<(JobId, Action)>>>,
    clears: Arc<Mutex<Vec<JobId>>>,
}

impl fmt::Debug for ScriptedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedDriver")
            .field("queued", &self.queue.lock().len())
            .field("executed", &self.executed.lock().len())
            .finish()
    }
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::with_responder(|action| {
            let url = match action {
                Action::Navigate { url } => url.clone(),
                _ => "about:blank".to_string(),
            };
            Ok(PageSnapshot::new(url, ""))
        })
    }
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Action) -> Result<PageSnapshot, DriverError> + Send + Sync + 'static,
    {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            responder: Arc::new(Box::new(responder)),
            executed: Arc::new(Mutex::new(Vec::new())),
            clears: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues the result of the next `execute` call.
    pub fn push(&self, result: Result<PageSnapshot, DriverError>) {
        self.queue.lock().push_back(result);
    }

    pub fn executed(&self) -> Vec<(JobId, Action)> {
        self.executed.lock().clone()
    }

    pub fn executed_for(&self, job_id: &JobId) -> Vec<Action> {
        self.executed
            .lock()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, action)| action.clone())
            .collect()
    }

    pub fn clears(&self) -> Vec<JobId> {
        self.clears.lock().clone()
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn execute(&self, job_id: &JobId, action: &Action) -> Result<PageSnapshot, DriverError> {
        self.executed.lock().push((job_id.clone(), action.clone()));
        let queued = self.queue.lock().pop_front();
        match queued {
            Some(result) => result,
            None => (self.responder)(action),
        }
    }

    async fn clear_inputs(&self, job_id: &JobId) -> Result<usize, DriverError> {
        self.clears.lock().push(job_id.clone());
        Ok(0)
    }
}
