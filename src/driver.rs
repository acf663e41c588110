//! Browser driver reached over HTTP.
//!
//! The remote side keeps one browser session per job id and answers each
//! action with a [`PageSnapshot`].

use std::time::Duration;

use async_trait::async_trait;
use handoff_agent_core::{Action, BrowserDriver, DriverError, JobId, PageSnapshot};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::DriverSettings;

pub struct HttpDriver {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ClearResponse {
    #[serde(default)]
    cleared: usize,
}

impl HttpDriver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DriverError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &DriverSettings) -> Result<Self, DriverError> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or_else(|| DriverError::Transport("no driver endpoint configured".to_string()))?;
        Self::new(endpoint, Duration::from_secs(settings.timeout_secs.max(1)))
    }

    fn session_url(&self, job_id: &JobId, path: &str) -> String {
        format!("{}/sessions/{}/{}", self.endpoint, job_id, path)
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn execute(&self, job_id: &JobId, action: &Action) -> Result<PageSnapshot, DriverError> {
        let response = self
            .client
            .post(self.session_url(job_id, "actions"))
            .json(action)
            .send()
            .await
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }
        let snapshot: PageSnapshot = response
            .json()
            .await
            .map_err(|err| DriverError::Protocol(format!("invalid page snapshot: {err}")))?;
        debug!(job_id = %job_id, action = action.name(), url = %snapshot.url, "driver executed action");
        Ok(snapshot)
    }

    async fn clear_inputs(&self, job_id: &JobId) -> Result<usize, DriverError> {
        let response = self
            .client
            .post(self.session_url(job_id, "clear-inputs"))
            .send()
            .await
            .map_err(|err| DriverError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }
        let body: ClearResponse = response
            .json()
            .await
            .map_err(|err| DriverError::Protocol(format!("invalid clear response: {err}")))?;
        Ok(body.cleared)
    }
}

fn status_error(status: StatusCode, body: &str) -> DriverError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        DriverError::Navigation(detail)
    } else {
        DriverError::Protocol(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_urls_are_scoped_per_job() {
        let driver = HttpDriver::new("http://127.0.0.1:9515/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            driver.session_url(&JobId::from("job-1"), "actions"),
            "http://127.0.0.1:9515/sessions/job-1/actions"
        );
    }

    #[test]
    fn missing_endpoint_is_a_transport_error() {
        let err = HttpDriver::from_settings(&DriverSettings::default()).err();
        assert!(matches!(err, Some(DriverError::Transport(_))));
    }

    #[test]
    fn status_codes_map_to_driver_errors() {
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "page crashed"),
            DriverError::Navigation(message) if message.contains("page crashed")
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, ""),
            DriverError::Protocol(_)
        ));
    }
}
