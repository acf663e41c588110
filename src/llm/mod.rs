pub mod anthropic;
pub mod openai;
mod utils;

use std::sync::Arc;

use handoff_agent_core::{ActionOracle, AgentError};

use crate::config::{OracleProvider, OracleSettings};

pub use anthropic::{AnthropicConfig, AnthropicOracle};
pub use openai::{parse_action, OpenAiConfig, OpenAiOracle};
pub use utils::extract_json_object;

/// Builds the oracle selected by `oracle.provider`.
pub fn build_oracle(settings: &OracleSettings) -> Result<Arc<dyn ActionOracle>, AgentError> {
    let oracle: Arc<dyn ActionOracle> = match settings.provider {
        OracleProvider::OpenAi => Arc::new(OpenAiOracle::new(OpenAiConfig::from_settings(settings))?),
        OracleProvider::Anthropic => Arc::new(AnthropicOracle::new(
            AnthropicConfig::from_settings(settings),
        )?),
    };
    Ok(oracle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_switch_requires_a_key_either_way() {
        for provider in [OracleProvider::OpenAi, OracleProvider::Anthropic] {
            let keyless = OracleSettings {
                provider,
                ..OracleSettings::default()
            };
            assert!(build_oracle(&keyless).is_err(), "{}", provider.as_str());

            let keyed = OracleSettings {
                provider,
                api_key: Some("sk-test".into()),
                ..OracleSettings::default()
            };
            assert!(build_oracle(&keyed).is_ok(), "{}", provider.as_str());
        }
    }
}
