use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use handoff_agent_core::{ActionOracle, BrowserDriver, JobManager};
use parking_lot::Mutex;

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct ServeState {
    pub manager: JobManager,
    pub oracle: Arc<dyn ActionOracle>,
    pub driver: Arc<dyn BrowserDriver>,
    pub health: Arc<ServeHealth>,
    pub allowed_origins: Vec<String>,
}

impl ServeState {
    pub fn new(
        manager: JobManager,
        oracle: Arc<dyn ActionOracle>,
        driver: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self {
            manager,
            oracle,
            driver,
            health: Arc::new(ServeHealth::new()),
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn health_snapshot(&self) -> ServeHealthSnapshot {
        self.health.snapshot()
    }
}

#[derive(Debug, Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = None;
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = Some(error.into());
    }

    pub fn snapshot(&self) -> ServeHealthSnapshot {
        ServeHealthSnapshot {
            ready: self.ready.load(Ordering::SeqCst),
            live: self.live.load(Ordering::SeqCst),
            last_ready_check: match self.last_ready_check.load(Ordering::SeqCst) {
                0 => None,
                value => Some(value),
            },
            last_error: self.last_error.lock().clone(),
        }
    }

    fn update_last_check(&self) {
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_ready_check
                .store(duration.as_secs(), Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServeHealthSnapshot {
    pub ready: bool,
    pub live: bool,
    pub last_ready_check: Option<u64>,
    pub last_error: Option<String>,
}
