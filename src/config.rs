//! Application configuration loaded from YAML.

use std::env;

use handoff_agent_core::{
    ClassifierMarkers, FieldTokens, HeuristicFieldPolicy, JobLoopConfig, JobServices,
    OutcomeClassifier, SensitiveFieldGuard,
};
use handoff_privacy::{PrivacyResult, RedactionPolicy, Redactor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const ENV_INPUT_TIMEOUT_SECS: &str = "HANDOFF_INPUT_TIMEOUT_SECS";
pub const ENV_MAX_STEPS: &str = "HANDOFF_MAX_STEPS";
pub const ENV_ORACLE_API_KEY: &str = "HANDOFF_ORACLE_API_KEY";
pub const ENV_DRIVER_ENDPOINT: &str = "HANDOFF_DRIVER_ENDPOINT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: JobLoopConfig,
    pub fields: FieldTokens,
    pub classifier: ClassifierMarkers,
    pub privacy: RedactionPolicy,
    pub oracle: OracleSettings,
    pub driver: DriverSettings,
    pub server: ServerSettings,
}

/// Backend answering the per-step action prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// Any OpenAI-compatible chat completions endpoint.
    #[default]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

impl OracleProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OracleProvider::OpenAi => "openai",
            OracleProvider::Anthropic => "anthropic",
        }
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            OracleProvider::OpenAi => "https://api.openai.com/v1",
            OracleProvider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            OracleProvider::OpenAi => "gpt-4o-mini",
            OracleProvider::Anthropic => "claude-3-5-haiku-20241022",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            OracleProvider::OpenAi => "OPENAI_API_KEY",
            OracleProvider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Oracle backend settings. Unset endpoint, model and key variable fall
/// back to the provider's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub provider: OracleProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Inline key; prefer `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    /// Reply length cap; the Messages API requires one.
    pub max_tokens: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            provider: OracleProvider::default(),
            api_base: None,
            model: None,
            api_key_env: None,
            api_key: None,
            timeout_secs: 60,
            temperature: 0.0,
            max_tokens: 2048,
        }
    }
}

impl OracleSettings {
    pub fn api_base(&self) -> &str {
        non_empty(self.api_base.as_deref()).unwrap_or(self.provider.default_api_base())
    }

    pub fn model(&self) -> &str {
        non_empty(self.model.as_deref()).unwrap_or(self.provider.default_model())
    }

    pub fn api_key_env(&self) -> &str {
        non_empty(self.api_key_env.as_deref()).unwrap_or(self.provider.default_api_key_env())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Finished jobs are dropped on this cadence; 0 keeps them forever.
    pub prune_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            allowed_origins: Vec::new(),
            prune_interval_secs: 3600,
        }
    }
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Applies `HANDOFF_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_INPUT_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => {
                    self.engine.input_timeout_ms = secs.saturating_mul(1000);
                    info!(secs, "input timeout overridden from environment");
                }
                Err(err) => warn!(value = %raw, ?err, "ignoring invalid {ENV_INPUT_TIMEOUT_SECS}"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            match raw.trim().parse::<u64>() {
                Ok(steps) if steps > 0 => {
                    self.engine.max_steps = steps;
                    info!(steps, "step budget overridden from environment");
                }
                _ => warn!(value = %raw, "ignoring invalid {ENV_MAX_STEPS}"),
            }
        }
        if let Some(key) = lookup(ENV_ORACLE_API_KEY).filter(|key| !key.trim().is_empty()) {
            self.oracle.api_key = Some(key);
        } else if self.oracle.api_key.is_none() {
            self.oracle.api_key =
                lookup(self.oracle.api_key_env()).filter(|key| !key.trim().is_empty());
        }
        if let Some(endpoint) = lookup(ENV_DRIVER_ENDPOINT).filter(|value| !value.trim().is_empty()) {
            self.driver.endpoint = Some(endpoint);
        }
    }

    /// Builds the collaborators shared by every job.
    pub fn services(&self) -> PrivacyResult<JobServices> {
        let redactor = Redactor::new(self.privacy.clone())?;
        Ok(JobServices {
            redactor: Arc::new(redactor),
            guard: SensitiveFieldGuard::new(Arc::new(HeuristicFieldPolicy::with_tokens(
                self.fields.clone(),
            ))),
            classifier: Arc::new(OutcomeClassifier::with_markers(self.classifier.clone())),
            ..JobServices::default()
        })
    }

    /// Copy safe to print: secrets replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.oracle.api_key.is_some() {
            copy.oracle.api_key = Some(handoff_privacy::REDACTED.to_string());
        }
        copy
    }
}
