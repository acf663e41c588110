use std::time::Duration;

use async_trait::async_trait;
use handoff_agent_core::{
    format_system_prompt, format_user_message, Action, ActionOracle, AgentError, OracleContext,
    Proposal, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OracleSettings;
use crate::llm::openai::parse_action;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Only the first of several comma-separated keys is used.
    pub fn from_settings(settings: &OracleSettings) -> Self {
        let api_key = settings
            .api_key
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .find(|key| !key.is_empty())
            .unwrap_or_default()
            .to_string();
        Self {
            api_key,
            model: settings.model().to_string(),
            api_base: settings.api_base().to_string(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens.max(1),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }
}

/// Action oracle backed by the Anthropic Messages API.
pub struct AnthropicOracle {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicOracle {
    pub fn new(config: AnthropicConfig) -> Result<Self, AgentError> {
        if config.api_key.is_empty() {
            return Err(AgentError::oracle("missing API key for the action oracle"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AgentError::oracle(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    fn request_body(&self, context: &OracleContext) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            system: format_system_prompt(),
            messages: vec![MessagesMessage {
                role: "user".to_string(),
                content: vec![MessagesContent {
                    _type: "text".to_string(),
                    text: format_user_message(context),
                }],
            }],
        }
    }
}

#[async_trait]
impl ActionOracle for AnthropicOracle {
    async fn propose_action(&self, context: &OracleContext) -> Result<Action, AgentError> {
        self.propose(context).await.map(|proposal| proposal.action)
    }

    async fn propose(&self, context: &OracleContext) -> Result<Proposal, AgentError> {
        let url = format!("{}/messages", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(context))
            .send()
            .await
            .map_err(|err| AgentError::oracle(format!("oracle request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(AgentError::oracle(format!(
                "oracle returned {status}: {text}"
            )));
        }

        let response: MessagesResponse = response
            .json()
            .await
            .map_err(|err| AgentError::oracle(format!("oracle response invalid: {err}")))?;
        let content = response.text();
        if content.is_empty() {
            return Err(AgentError::oracle("oracle response missing content"));
        }
        let action = parse_action(&content)?;
        let usage = response.usage.map(TokenUsage::from);
        debug!(
            job_id = %context.job_id,
            action = action.name(),
            input_tokens = usage.map(|usage| usage.input_tokens),
            output_tokens = usage.map(|usage| usage.output_tokens),
            "oracle replied"
        );
        Ok(Proposal { action, usage })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    system: String,
    messages: Vec<MessagesMessage>,
}

#[derive(Debug, Serialize)]
struct MessagesMessage {
    role: String,
    content: Vec<MessagesContent>,
}

#[derive(Debug, Serialize)]
struct MessagesContent {
    #[serde(rename = "type")]
    _type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<MessagesResponseContent>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

impl MessagesResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_ref())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponseContent {
    #[serde(rename = "type")]
    _type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl From<MessagesUsage> for TokenUsage {
    fn from(usage: MessagesUsage) -> Self {
        TokenUsage::new(usage.input_tokens, usage.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleProvider;
    use handoff_agent_core::{JobId, JobState};

    fn settings() -> OracleSettings {
        OracleSettings {
            provider: OracleProvider::Anthropic,
            api_key: Some("sk-ant-a, sk-ant-b".into()),
            ..OracleSettings::default()
        }
    }

    #[test]
    fn config_takes_provider_defaults_and_first_key() {
        let config = AnthropicConfig::from_settings(&settings());
        assert_eq!(config.api_key, "sk-ant-a");
        assert_eq!(config.api_base, "https://api.anthropic.com/v1");
        assert_eq!(config.max_tokens, 2048);

        let keyless = OracleSettings {
            provider: OracleProvider::Anthropic,
            ..OracleSettings::default()
        };
        assert!(matches!(
            AnthropicOracle::new(AnthropicConfig::from_settings(&keyless)),
            Err(AgentError::Oracle(_))
        ));
    }

    #[test]
    fn request_puts_the_prompt_in_system_and_context_in_user() {
        let oracle = AnthropicOracle::new(AnthropicConfig::from_settings(&settings())).unwrap();
        let state = JobState::new(JobId::from("job"), "Renew the library loan");
        let body = serde_json::to_value(oracle.request_body(&OracleContext::from_state(&state)))
            .unwrap();
        assert_eq!(body["system"], format_system_prompt());
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert!(body["messages"][0]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Renew the library loan"));
    }

    #[test]
    fn reply_text_and_usage_are_read() {
        let raw = r##"{
            "id": "msg_01",
            "content": [
                {"type": "text", "text": "Filling the field now."},
                {"type": "text", "text": "{\"type\":\"fill\",\"selector\":\"#q\",\"value\":\"lamps\"}"}
            ],
            "usage": {"input_tokens": 1530, "output_tokens": 42}
        }"##;
        let response: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.usage.map(TokenUsage::from), Some(TokenUsage::new(1530, 42)));
        let action = parse_action(&response.text()).unwrap();
        assert_eq!(
            action,
            Action::Fill {
                selector: "#q".into(),
                value: "lamps".into(),
                sensitive: false,
            }
        );
    }
}
