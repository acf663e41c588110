use dashmap::DashSet;
use handoff_core_types::JobId;
use tracing::debug;

use crate::metrics;

/// Process-wide set of jobs currently inside a human input flow.
///
/// Independent of the per-job `input_flow_active` flag; both must agree
/// before any form state is cleared.
#[derive(Debug, Default)]
pub struct ProtectionRegistry {
    jobs: DashSet<JobId>,
}

impl ProtectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the job was already protected.
    pub fn protect(&self, job_id: &JobId) -> bool {
        let inserted = self.jobs.insert(job_id.clone());
        debug!(job_id = %job_id, inserted, "job entered input flow");
        metrics::set_protected_jobs(self.jobs.len());
        inserted
    }

    /// Returns false if the job was not protected.
    pub fn release(&self, job_id: &JobId) -> bool {
        let removed = self.jobs.remove(job_id).is_some();
        if removed {
            debug!(job_id = %job_id, "job left input flow");
        }
        metrics::set_protected_jobs(self.jobs.len());
        removed
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_and_release_are_explicit() {
        let registry = ProtectionRegistry::new();
        let a = JobId::from("a");
        let b = JobId::from("b");
        assert!(registry.protect(&a));
        assert!(!registry.protect(&a));
        assert!(registry.contains(&a));
        assert!(!registry.contains(&b));
        assert!(!registry.release(&b));
        assert!(registry.release(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_updates_from_many_threads() {
        let registry = std::sync::Arc::new(ProtectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let id = JobId::from(format!("job-{i}"));
                    registry.protect(&id);
                    if i % 2 == 0 {
                        registry.release(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 4);
    }
}
