pub(crate) mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::messages::{ChatRequest, ModelDescriptor, ProviderHealth, StreamChunk};

/// Type alias for a stream of chat completion chunks.
///
/// The stream is finite and ends with exactly one `done = true` sentinel
/// carrying an empty delta. It is pinned and boxed to allow dynamic dispatch
/// across provider implementations.
pub(crate) type ChatCompletionStream = Pin<Box<dyn Stream<Item = crate::Result<StreamChunk>> + Send>>;

/// Raw outcome of one provider completion call, before routing metadata and
/// accounting are attached.
#[derive(Debug, Clone)]
pub(crate) struct ProviderCompletion {
    pub(crate) text: String,
    /// Prompt tokens as reported by the provider, 0 when unreported.
    pub(crate) input_tokens: u64,
    /// Completion tokens as reported by the provider, 0 when unreported.
    pub(crate) output_tokens: u64,
}

/// Trait for LLM provider implementations.
///
/// Adapters must not retry internally: converting one failed attempt into the
/// next fallback attempt is the router's job, so retry policy stays in one
/// place. Every network call must be bounded by the provider's configured
/// timeout.
///
/// Note for async_trait: We need this trait to be dyn-compatible, so we can't
/// just use the Rust async trait functions without Box/Pin.
#[async_trait]
pub(crate) trait Provider: Send + Sync {
    /// Process a chat completion request against one of this provider's
    /// models.
    async fn chat_completion(&self, request: &ChatRequest, model: &str) -> crate::Result<ProviderCompletion>;

    /// Process a streaming chat completion request.
    ///
    /// Returns a stream of chunks whose deltas concatenate to the complete
    /// message. The stream is not restartable; a mid-stream failure surfaces
    /// as an `Err` item and terminates it.
    async fn chat_stream(&self, request: &ChatRequest, model: &str) -> crate::Result<ChatCompletionStream>;

    /// Probe the provider for availability.
    async fn health_check(&self) -> ProviderHealth;

    /// The static model catalog this provider serves.
    fn models(&self) -> &[ModelDescriptor];

    /// Get the provider name.
    fn name(&self) -> &str;

    /// Cost in USD of a completion against this provider's cost table.
    /// Returns 0 for a model this provider does not serve.
    fn calculate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.model(model)
            .map(|descriptor| {
                (input_tokens as f64 / 1000.0) * descriptor.cost_per_1k_input
                    + (output_tokens as f64 / 1000.0) * descriptor.cost_per_1k_output
            })
            .unwrap_or(0.0)
    }

    /// Look up one model in the catalog.
    fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models().iter().find(|descriptor| descriptor.name == name)
    }
}
