use config::ModelTier;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Chat request accepted by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ChatRequest {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default = "default_temperature")]
    pub(crate) temperature: f32,
    #[serde(default)]
    pub(crate) max_tokens: Option<u32>,
    #[serde(default)]
    pub(crate) stream: bool,
    #[serde(default)]
    pub(crate) conversation_id: Option<String>,
    #[serde(default)]
    pub(crate) system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ChatRequest {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::InvalidRequest(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }

        Ok(())
    }
}

/// Static description of one routable model.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModelDescriptor {
    pub(crate) name: String,
    pub(crate) provider: String,
    pub(crate) tier: ModelTier,
    pub(crate) max_context_tokens: u32,
    pub(crate) cost_per_1k_input: f64,
    pub(crate) cost_per_1k_output: f64,
    pub(crate) supports_streaming: bool,
    /// The name the upstream API expects; never exposed to callers.
    #[serde(skip)]
    pub(crate) upstream_name: String,
}

/// Result of one routed completion, before accounting.
#[derive(Debug, Clone)]
pub(crate) struct CompletionResult {
    pub(crate) text: String,
    pub(crate) model_used: String,
    pub(crate) provider_used: String,
    pub(crate) input_tokens: u64,
    pub(crate) output_tokens: u64,
    pub(crate) processing_time: f64,
    pub(crate) fallback_used: bool,
    pub(crate) original_model: Option<String>,
}

/// Response envelope for a non-streaming chat completion.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatResponse {
    pub(crate) id: String,
    pub(crate) message: String,
    pub(crate) model_used: String,
    pub(crate) provider_used: String,
    pub(crate) tokens_used: u64,
    pub(crate) input_tokens: u64,
    pub(crate) output_tokens: u64,
    pub(crate) cost_estimate: f64,
    pub(crate) processing_time: f64,
    pub(crate) fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) original_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) conversation_id: Option<String>,
}

/// One increment of a streaming completion.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StreamChunk {
    pub(crate) delta: String,
    pub(crate) model: String,
    pub(crate) provider: String,
    pub(crate) done: bool,
}

/// Response for the model listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModelsResponse {
    pub(crate) models: Vec<ModelDescriptor>,
    pub(crate) user_plan: String,
    pub(crate) total_models: usize,
}

/// Health probe result for one provider.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProviderHealth {
    pub(crate) status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) latency: Option<f64>,
    pub(crate) models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

/// Provider availability as seen by the health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum HealthStatus {
    Healthy,
    Error,
}

/// Per-user usage projection returned by the usage endpoint.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct UsageResponse {
    pub(crate) user_plan: String,
    pub(crate) usage: UsageNumbers,
    pub(crate) remaining: RemainingNumbers,
    pub(crate) percentage_used: PercentageNumbers,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UsageNumbers {
    pub(crate) requests_last_hour: u32,
    pub(crate) tokens_today: u64,
    pub(crate) requests_limit_hour: u32,
    pub(crate) tokens_limit_day: u64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RemainingNumbers {
    pub(crate) requests_hour: u32,
    pub(crate) tokens_day: u64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PercentageNumbers {
    pub(crate) requests: f64,
    pub(crate) tokens: f64,
}

impl From<rate_limit::UsageStats> for UsageResponse {
    fn from(stats: rate_limit::UsageStats) -> Self {
        UsageResponse {
            user_plan: stats.plan.to_string(),
            usage: UsageNumbers {
                requests_last_hour: stats.requests_last_hour,
                tokens_today: stats.tokens_today,
                requests_limit_hour: stats.requests_limit,
                tokens_limit_day: stats.tokens_limit,
            },
            remaining: RemainingNumbers {
                requests_hour: stats.requests_remaining,
                tokens_day: stats.tokens_remaining,
            },
            percentage_used: PercentageNumbers {
                requests: stats.requests_used_pct,
                tokens: stats.tokens_used_pct,
            },
        }
    }
}

/// Batch processing response.
#[derive(Debug, Serialize)]
pub(crate) struct BatchResponse {
    pub(crate) results: Vec<BatchItemResult>,
    pub(crate) total_requests: usize,
    pub(crate) successful_requests: usize,
    pub(crate) failed_requests: usize,
}

/// Outcome of one item within a batch. Failures are collected, not escalated.
#[derive(Debug, Serialize)]
pub(crate) struct BatchItemResult {
    pub(crate) index: usize,
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<BatchItemData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchItemData {
    pub(crate) message: String,
    pub(crate) model_used: String,
    pub(crate) provider_used: String,
    /// Provider-reported usage; 0 when the provider reports none.
    pub(crate) tokens_used: u64,
    pub(crate) fallback_used: bool,
    pub(crate) processing_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> ChatRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn request_defaults() {
        let request = request(r#"{"message": "hello"}"#);

        assert_eq!(request.message, "hello");
        assert!(request.model.is_none());
        assert!((request.temperature - 0.7).abs() < f32::EPSILON);
        assert!(request.max_tokens.is_none());
        assert!(!request.stream);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn temperature_bounds_are_validated() {
        assert!(request(r#"{"message": "hi", "temperature": 0.0}"#).validate().is_ok());
        assert!(request(r#"{"message": "hi", "temperature": 2.0}"#).validate().is_ok());
        assert!(request(r#"{"message": "hi", "temperature": 2.1}"#).validate().is_err());
        assert!(request(r#"{"message": "hi", "temperature": -0.1}"#).validate().is_err());
    }

    #[test]
    fn unknown_request_fields_are_rejected() {
        let result: Result<ChatRequest, _> = serde_json::from_str(r#"{"message": "hi", "mdoel": "gpt-4"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn chat_response_omits_empty_fallback_metadata() {
        let response = ChatResponse {
            id: "chat-1".to_string(),
            message: "hello".to_string(),
            model_used: "gpt-4".to_string(),
            provider_used: "openai".to_string(),
            tokens_used: 10,
            input_tokens: 4,
            output_tokens: 6,
            cost_estimate: 0.0,
            processing_time: 0.5,
            fallback_used: false,
            original_model: None,
            conversation_id: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("original_model"));
        assert!(!json.contains("conversation_id"));
    }
}
