mod input;
mod output;

use std::time::Instant;

use async_trait::async_trait;
use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use self::{
    input::OpenAiRequest,
    output::{OpenAiResponse, OpenAiStreamChunk},
};

use crate::{
    error::LlmError,
    messages::{ChatRequest, HealthStatus, ModelDescriptor, ProviderHealth, StreamChunk},
    provider::{ChatCompletionStream, Provider, ProviderCompletion},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Adapter for any provider speaking the OpenAI chat completion protocol.
///
/// One instance is constructed per configured provider; the endpoint it
/// targets is set by `base_url`, so OpenAI itself and OpenAI-compatible
/// vendors share this implementation.
pub(crate) struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: SecretString,
    catalog: Vec<ModelDescriptor>,
}

impl OpenAiProvider {
    pub(crate) fn new(name: String, config: &ProviderConfig) -> crate::Result<Self> {
        let Some(api_key) = config.api_key.clone() else {
            return Err(LlmError::InternalError(Some(format!(
                "Provider '{name}' has no API key configured"
            ))));
        };

        // Provider calls must never outlive the configured deadline; the
        // client-level timeout covers connect and body alike.
        let client = Client::builder().timeout(config.timeout).build().map_err(|e| {
            log::error!("Failed to create HTTP client for provider '{name}': {e}");
            LlmError::InternalError(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string());

        let catalog = config
            .models
            .iter()
            .map(|(id, model)| ModelDescriptor {
                name: id.clone(),
                provider: name.clone(),
                tier: model.tier,
                max_context_tokens: model.max_context_tokens,
                cost_per_1k_input: model.cost_per_1k_input,
                cost_per_1k_output: model.cost_per_1k_output,
                supports_streaming: model.supports_streaming,
                upstream_name: model.rename.clone().unwrap_or_else(|| id.clone()),
            })
            .collect();

        Ok(Self {
            name,
            client,
            base_url,
            api_key,
            catalog,
        })
    }

    fn upstream_name(&self, model: &str) -> crate::Result<&str> {
        self.model(model)
            .map(|descriptor| descriptor.upstream_name.as_str())
            .ok_or_else(|| LlmError::ModelNotFound(model.to_string()))
    }

    fn transport_error(&self, error: reqwest::Error, what: &str) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(format!("{what} to '{}' timed out", self.name))
        } else {
            LlmError::ConnectionError(format!("Failed to send {what} to '{}': {error}", self.name))
        }
    }

    fn api_error(status: u16, message: String) -> LlmError {
        match status {
            400 => LlmError::InvalidRequest(message),
            500 => LlmError::InternalError(Some(message)),
            _ => LlmError::ProviderApiError { status, message },
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat_completion(&self, request: &ChatRequest, model: &str) -> crate::Result<ProviderCompletion> {
        let url = format!("{}/chat/completions", self.base_url);
        let wire_request = OpenAiRequest::build(request, self.upstream_name(model)?, false);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| self.transport_error(e, "completion request"))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Provider '{}' API error ({status}): {error_text}", self.name);

            return Err(Self::api_error(status.as_u16(), error_text));
        }

        // First get the response as text to log if parsing fails
        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read completion response body from '{}': {e}", self.name);
            LlmError::InternalError(None)
        })?;

        let wire_response: OpenAiResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse completion response from '{}': {e}", self.name);
            log::error!("Raw response that failed to parse: {response_text}");
            LlmError::InternalError(None)
        })?;

        let text = wire_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let usage = wire_response.usage.unwrap_or_default();

        Ok(ProviderCompletion {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }

    async fn chat_stream(&self, request: &ChatRequest, model: &str) -> crate::Result<ChatCompletionStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let wire_request = OpenAiRequest::build(request, self.upstream_name(model)?, true);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| self.transport_error(e, "streaming request"))?;

        let status = response.status();

        // Check for HTTP errors before attempting to stream
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Provider '{}' streaming API error ({status}): {error_text}", self.name);

            return Err(Self::api_error(status.as_u16(), error_text));
        }

        let provider_name = self.name.clone();
        let model_name = model.to_string();

        // Decode SSE events into deltas, dropping the upstream [DONE] marker.
        let event_stream = response.bytes_stream().eventsource();

        let delta_stream = event_stream.filter_map({
            let provider = provider_name.clone();
            let model = model_name.clone();

            move |event| {
                let provider = provider.clone();
                let model = model.clone();

                async move {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            log::warn!("SSE decoding error in stream from '{provider}': {e}");
                            return Some(Err(LlmError::ConnectionError(format!(
                                "Stream from '{provider}' broke: {e}"
                            ))));
                        }
                    };

                    if event.data == "[DONE]" {
                        return None;
                    }

                    let Ok(chunk) = sonic_rs::from_str::<OpenAiStreamChunk>(&event.data) else {
                        log::warn!("Failed to parse streaming chunk from '{provider}'");
                        return None;
                    };

                    let delta = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .unwrap_or_default();

                    if delta.is_empty() {
                        return None;
                    }

                    Some(Ok(StreamChunk {
                        delta,
                        model,
                        provider,
                        done: false,
                    }))
                }
            }
        });

        // Exactly one terminal sentinel once the upstream closes.
        let with_sentinel = delta_stream.chain(futures::stream::once(async move {
            Ok(StreamChunk {
                delta: String::new(),
                model: model_name,
                provider: provider_name,
                done: true,
            })
        }));

        // An error is terminal: nothing after it, not even the sentinel.
        let fused = with_sentinel.scan(false, |errored, item| {
            if *errored {
                return futures::future::ready(None);
            }

            *errored = item.is_err();
            futures::future::ready(Some(item))
        });

        Ok(Box::pin(fused))
    }

    async fn health_check(&self) -> ProviderHealth {
        let url = format!("{}/models", self.base_url);
        let started = Instant::now();

        let result = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .send()
            .await;

        let latency = started.elapsed().as_secs_f64();
        let models = self.catalog.iter().map(|m| m.name.clone()).collect();

        match result {
            Ok(response) if response.status().is_success() => ProviderHealth {
                status: HealthStatus::Healthy,
                latency: Some(latency),
                models,
                message: None,
            },
            Ok(response) => ProviderHealth {
                status: HealthStatus::Error,
                latency: Some(latency),
                models,
                message: Some(format!("Provider returned status {}", response.status())),
            },
            Err(e) => ProviderHealth {
                status: HealthStatus::Error,
                latency: None,
                models,
                message: Some(e.to_string()),
            },
        }
    }

    fn models(&self) -> &[ModelDescriptor] {
        &self.catalog
    }

    fn name(&self) -> &str {
        &self.name
    }
}
