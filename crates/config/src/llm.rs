//! LLM provider configuration structures.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

/// LLM routing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Whether the LLM endpoints are enabled.
    enabled: bool,

    /// The path prefix under which the LLM endpoints are mounted.
    pub path: Cow<'static, str>,

    /// Provider priority order used when falling back after a failure.
    /// Providers not listed here are never used as fallback candidates.
    pub fallback_order: Vec<String>,

    /// Map of LLM provider configurations.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: Cow::Borrowed("/v1"),
            fallback_order: Vec::new(),
            providers: BTreeMap::new(),
        }
    }
}

impl LlmConfig {
    /// Whether the LLM endpoints are enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether there are any LLM providers configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Every model name configured across all providers.
    pub fn model_names(&self) -> BTreeSet<&str> {
        self.providers
            .values()
            .flat_map(|provider| provider.models.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Configuration for one OpenAI-compatible provider endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// API key for authentication. A provider without a key is skipped at
    /// startup rather than failing the whole gateway.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Custom base URL for the provider API.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Upper bound on any single call to this provider.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Models served through this provider. At least one model must be
    /// configured.
    #[serde(deserialize_with = "deserialize_non_empty_models")]
    pub models: BTreeMap<String, ModelConfig>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for an individual model within a provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Optional rename - the actual provider model name.
    /// If not specified, the model ID (map key) is used.
    pub rename: Option<String>,
    /// Capability tier, used by model selection and cross-provider
    /// fallback equivalence.
    pub tier: ModelTier,
    /// Context window size in tokens.
    pub max_context_tokens: u32,
    /// Cost in USD per 1000 input tokens.
    pub cost_per_1k_input: f64,
    /// Cost in USD per 1000 output tokens.
    pub cost_per_1k_output: f64,
    /// Whether the model supports streaming completions.
    pub supports_streaming: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rename: None,
            tier: ModelTier::Base,
            max_context_tokens: 128_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
            supports_streaming: true,
        }
    }
}

/// Capability tier of a model.
///
/// Tiers are the unit of cross-provider equivalence: when a request falls
/// back to another provider, the replacement model is the one sharing the
/// original model's tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Cheapest general-purpose tier.
    #[default]
    Base,
    /// Middle tier, stronger reasoning and code.
    Mid,
    /// Strongest configured tier.
    Top,
}

/// Custom deserializer for provider models that ensures at least one model is
/// configured. This handles both missing field (uses default) and empty map
/// cases.
fn deserialize_non_empty_models<'de, D>(deserializer: D) -> Result<BTreeMap<String, ModelConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let models = Option::<BTreeMap<String, ModelConfig>>::deserialize(deserializer)?.unwrap_or_default();

    if models.is_empty() {
        Err(Error::custom("At least one model must be configured for each provider"))
    } else {
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use insta::assert_debug_snapshot;

    #[test]
    fn llm_config_defaults() {
        let config: LlmConfig = toml::from_str("").unwrap();

        assert!(config.enabled());
        assert_eq!(config.path, "/v1");
        assert!(config.fallback_order.is_empty());
        assert!(!config.has_providers());
    }

    #[test]
    fn provider_with_models() {
        let config = indoc! {r#"
            fallback_order = ["openai", "deepseek"]

            [providers.openai]
            api_key = "sk-1234567890abcdef"

            [providers.openai.models.gpt-3-5-turbo]
            rename = "gpt-3.5-turbo"
            tier = "base"
            max_context_tokens = 16385
            cost_per_1k_input = 0.0015
            cost_per_1k_output = 0.002

            [providers.openai.models.gpt-4]
            tier = "mid"
            cost_per_1k_input = 0.01
            cost_per_1k_output = 0.03
        "#};

        let config: LlmConfig = toml::from_str(config).unwrap();

        assert_eq!(config.fallback_order, vec!["openai", "deepseek"]);

        let openai = &config.providers["openai"];
        assert!(openai.api_key.is_some());
        assert_eq!(openai.timeout, Duration::from_secs(30));

        assert_debug_snapshot!(&openai.models["gpt-3-5-turbo"], @r#"
        ModelConfig {
            rename: Some(
                "gpt-3.5-turbo",
            ),
            tier: Base,
            max_context_tokens: 16385,
            cost_per_1k_input: 0.0015,
            cost_per_1k_output: 0.002,
            supports_streaming: true,
        }
        "#);

        assert_eq!(openai.models["gpt-4"].tier, ModelTier::Mid);
    }

    #[test]
    fn provider_without_models_is_rejected() {
        let config = indoc! {r#"
            [providers.openai]
            api_key = "sk-1234567890abcdef"
        "#};

        let result: Result<LlmConfig, _> = toml::from_str(config);
        assert!(result.is_err());
    }

    #[test]
    fn provider_with_empty_models_is_rejected() {
        let config = indoc! {r#"
            [providers.openai]
            api_key = "sk-1234567890abcdef"
            models = {}
        "#};

        let result: Result<LlmConfig, _> = toml::from_str(config);
        assert!(result.is_err());

        let error = result.unwrap_err().to_string();
        assert!(error.contains("At least one model must be configured"));
    }

    #[test]
    fn custom_timeout_and_base_url() {
        let config = indoc! {r#"
            [providers.deepseek]
            api_key = "sk-other"
            base_url = "https://api.deepseek.com/v1"
            timeout = "10s"

            [providers.deepseek.models.deepseek-chat]
        "#};

        let config: LlmConfig = toml::from_str(config).unwrap();
        let deepseek = &config.providers["deepseek"];

        assert_eq!(deepseek.base_url.as_deref(), Some("https://api.deepseek.com/v1"));
        assert_eq!(deepseek.timeout, Duration::from_secs(10));
        assert_eq!(deepseek.models["deepseek-chat"].tier, ModelTier::Base);
    }

    #[test]
    fn model_names_span_providers() {
        let config = indoc! {r#"
            [providers.openai]
            api_key = "key1"

            [providers.openai.models.gpt-4]
            tier = "mid"

            [providers.deepseek]
            api_key = "key2"

            [providers.deepseek.models.deepseek-chat]
        "#};

        let config: LlmConfig = toml::from_str(config).unwrap();
        let names = config.model_names();

        assert!(names.contains("gpt-4"));
        assert!(names.contains("deepseek-chat"));
        assert_eq!(names.len(), 2);
    }
}
