use std::time::Duration;

use async_trait::async_trait;
use handoff_agent_core::{
    format_system_prompt, format_user_message, Action, ActionOracle, AgentError, OracleContext,
    Proposal, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OracleSettings;
use crate::llm::utils::extract_json_object;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Comma-separated keys are tried in order when one is rate limited.
    pub fn from_settings(settings: &OracleSettings) -> Self {
        let api_keys = settings
            .api_key
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            api_keys,
            model: settings.model().to_string(),
            api_base: settings.api_base().to_string(),
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }
}

/// Action oracle backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiOracle {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiOracle {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        if config.api_keys.is_empty() {
            return Err(AgentError::oracle("missing API key for the action oracle"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AgentError::oracle(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    fn request_body(&self, context: &OracleContext) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                r#type: "json_object".to_string(),
            },
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format_system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format_user_message(context),
                },
            ],
        }
    }
}

#[async_trait]
impl ActionOracle for OpenAiOracle {
    async fn propose_action(&self, context: &OracleContext) -> Result<Action, AgentError> {
        self.propose(context).await.map(|proposal| proposal.action)
    }

    async fn propose(&self, context: &OracleContext) -> Result<Proposal, AgentError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = self.request_body(context);

        let mut last_error: Option<AgentError> = None;
        for (index, key) in self.config.api_keys.iter().enumerate() {
            let response = match self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    last_error = Some(AgentError::oracle(format!("oracle request failed: {err}")));
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                if status.as_u16() == 429 && index + 1 < self.config.api_keys.len() {
                    let friendly = rate_limit_message(&text);
                    warn!(
                        target: "openai",
                        message = %friendly,
                        attempt = index + 1,
                        remaining = self.config.api_keys.len() - index - 1,
                        "oracle rate limited; switching API key"
                    );
                    last_error = Some(AgentError::oracle(friendly));
                    continue;
                }
                return Err(AgentError::oracle(format!(
                    "oracle returned {status}: {text}"
                )));
            }

            let response: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|err| AgentError::oracle(format!("oracle response invalid: {err}")))?;
            let content = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_text())
                .ok_or_else(|| AgentError::oracle("oracle response missing content"))?;
            let action = parse_action(&content)?;
            let usage = response.usage.map(TokenUsage::from);
            debug!(
                job_id = %context.job_id,
                action = action.name(),
                input_tokens = usage.map(|usage| usage.input_tokens),
                output_tokens = usage.map(|usage| usage.output_tokens),
                "oracle replied"
            );
            return Ok(Proposal { action, usage });
        }

        Err(last_error
            .unwrap_or_else(|| AgentError::oracle("oracle request exhausted all API keys")))
    }
}

/// Reads one action out of a model reply.
pub fn parse_action(content: &str) -> Result<Action, AgentError> {
    let json = extract_json_object(content)
        .ok_or_else(|| AgentError::oracle("oracle reply contains no JSON object"))?;
    serde_json::from_str(&json)
        .map_err(|err| AgentError::oracle(format!("oracle reply is not a valid action: {err}")))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<ChatCompletionUsage> for TokenUsage {
    fn from(usage: ChatCompletionUsage) -> Self {
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: ChatCompletionContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(&self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value.clone()),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| part.text.as_ref())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: Option<String>,
}

fn rate_limit_message(raw: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(raw) {
        if let Some(message) = envelope.error.message {
            return format!("oracle rate limit exceeded: {}", message.trim());
        }
    }
    "oracle rate limit exceeded; retry later".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_agent_core::{InputKind, JobId, JobState};

    #[test]
    fn parses_request_input_reply() {
        let reply = "```json\n{\"type\":\"request_input\",\"kind\":\"password\",\"prompt\":\"Password?\"}\n```";
        let action = parse_action(reply).unwrap();
        assert_eq!(
            action.input_request().map(|req| (req.kind, req.sensitive)),
            Some((InputKind::Password, true))
        );
    }

    #[test]
    fn unknown_action_is_an_oracle_error() {
        let err = parse_action("{\"type\":\"teleport\"}").unwrap_err();
        assert!(matches!(err, AgentError::Oracle(_)));
        assert!(matches!(
            parse_action("no json here"),
            Err(AgentError::Oracle(_))
        ));
    }

    #[test]
    fn keys_are_split_and_required() {
        let settings = OracleSettings {
            api_key: Some("sk-a, sk-b,".into()),
            ..OracleSettings::default()
        };
        let config = OpenAiConfig::from_settings(&settings);
        assert_eq!(config.api_keys, vec!["sk-a".to_string(), "sk-b".to_string()]);

        let empty = OpenAiConfig::from_settings(&OracleSettings::default());
        assert!(matches!(OpenAiOracle::new(empty), Err(AgentError::Oracle(_))));
    }

    #[test]
    fn request_carries_goal_and_json_mode() {
        let settings = OracleSettings {
            api_key: Some("sk-a".into()),
            ..OracleSettings::default()
        };
        let oracle = OpenAiOracle::new(OpenAiConfig::from_settings(&settings)).unwrap();
        let state = JobState::new(JobId::from("job"), "Log in to the portal");
        let body = serde_json::to_value(oracle.request_body(&OracleContext::from_state(&state)))
            .unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("Log in to the portal"));
    }

    #[test]
    fn usage_is_read_from_the_completion() {
        let raw = r#"{
            "choices": [{"message": {"content": "{\"type\":\"scroll\",\"direction\":\"down\"}"}}],
            "usage": {"prompt_tokens": 812, "completion_tokens": 19, "total_tokens": 831}
        }"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.usage.map(TokenUsage::from), Some(TokenUsage::new(812, 19)));
        let content = response.choices[0].message.content.as_text().unwrap();
        assert!(matches!(parse_action(&content), Ok(Action::Scroll { .. })));

        let bare: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(bare.usage.is_none());
    }

    #[test]
    fn reply_with_trailing_prose_still_parses() {
        let action = parse_action("{\"type\":\"complete\"} That is all for now.").unwrap();
        assert_eq!(action, Action::Complete { summary: None });
    }

    #[test]
    fn rate_limit_message_uses_provider_text() {
        let raw = r#"{"error":{"message":"Too many requests "}}"#;
        assert_eq!(
            rate_limit_message(raw),
            "oracle rate limit exceeded: Too many requests"
        );
    }
}
