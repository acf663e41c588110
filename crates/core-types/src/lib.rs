//! Vocabulary shared by the engine, the adapters and the transport.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod action;
mod input;
mod snapshot;

pub use action::{Action, ScrollDirection, SIGNATURE_MAX_LEN};
pub use input::{InputKind, InputRequest};
pub use snapshot::PageSnapshot;

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique_and_display_raw() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.0);
        assert_eq!(JobId::from("job-1").as_str(), "job-1");
    }
}
