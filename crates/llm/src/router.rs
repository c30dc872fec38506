//! Provider registry, model selection, and cross-provider fallback.

use std::collections::HashMap;
use std::time::Instant;

use config::{LlmConfig, ModelAccess, ModelTier, Plan};
use itertools::Itertools;

use crate::{
    error::LlmError,
    messages::{ChatRequest, CompletionResult, ModelDescriptor, ProviderHealth},
    provider::{ChatCompletionStream, Provider, ProviderCompletion, openai::OpenAiProvider},
};

/// Messages longer than this are routed to a stronger tier.
const LONG_MESSAGE_CHARS: usize = 2000;

/// Word count beyond which a message counts as complex.
const COMPLEX_WORD_COUNT: usize = 100;

/// Markers that flag a message as code-related.
const CODE_INDICATORS: &[&str] = &[
    "code", "function", "class", "import", "def ", "var ", "let ", "const ", "if (", "for (", "while (", "try:",
    "except:", "async def", "```", "python", "javascript", "java", "c++", "sql", "html", "css",
];

/// Phrases that flag an analytical, multi-step request.
const COMPLEXITY_INDICATORS: &[&str] = &[
    "analyze",
    "explain in detail",
    "comprehensive",
    "step by step",
    "compare",
    "contrast",
    "pros and cons",
    "advantages and disadvantages",
    "research",
    "thesis",
    "essay",
    "report",
    "detailed analysis",
];

/// Routes requests across the registered providers.
pub(crate) struct ModelRouter {
    providers: Vec<Box<dyn Provider>>,
    model_to_provider: HashMap<String, usize>,
    fallback_order: Vec<String>,
}

impl ModelRouter {
    /// Build the registry from configuration.
    ///
    /// A provider that fails to construct is logged and excluded rather than
    /// failing the start: partial availability beats refusing all traffic.
    /// Only a registry with zero live providers is an error.
    pub(crate) fn new(config: &LlmConfig) -> crate::Result<Self> {
        log::debug!("Initializing model router with {} providers", config.providers.len());

        let mut providers: Vec<Box<dyn Provider>> = Vec::with_capacity(config.providers.len());

        for (name, provider_config) in &config.providers {
            match OpenAiProvider::new(name.clone(), provider_config) {
                Ok(provider) => providers.push(Box::new(provider)),
                Err(e) => log::warn!("Skipping provider '{name}': {e}"),
            }
        }

        if providers.is_empty() {
            return Err(LlmError::InternalError(Some(
                "Failed to initialize any LLM providers.".to_string(),
            )));
        }

        let fallback_order = if config.fallback_order.is_empty() {
            providers.iter().map(|p| p.name().to_string()).collect()
        } else {
            config.fallback_order.clone()
        };

        log::debug!(
            "Model router initialized with {} active provider(s): [{}]",
            providers.len(),
            providers.iter().map(|p| p.name()).join(", ")
        );

        Ok(Self::from_parts(providers, fallback_order))
    }

    fn from_parts(providers: Vec<Box<dyn Provider>>, fallback_order: Vec<String>) -> Self {
        let mut model_to_provider = HashMap::new();

        for (index, provider) in providers.iter().enumerate() {
            for model in provider.models() {
                if model_to_provider.insert(model.name.clone(), index).is_some() {
                    log::warn!(
                        "Model '{}' is served by multiple providers; keeping '{}'",
                        model.name,
                        provider.name()
                    );
                }
            }
        }

        Self {
            providers,
            model_to_provider,
            fallback_order,
        }
    }

    /// Every registered model the given access set covers.
    pub(crate) fn available_models(&self, access: &ModelAccess) -> Vec<ModelDescriptor> {
        self.providers
            .iter()
            .flat_map(|provider| provider.models())
            .filter(|model| access.allows(&model.name))
            .cloned()
            .collect()
    }

    /// Names of all registered providers.
    pub(crate) fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Pick a model for the message under the plan's cost/quality tradeoff.
    ///
    /// Pure function of `(message, plan)`: the same inputs always select the
    /// same model, which keeps routing auditable.
    pub(crate) fn select_model(&self, message: &str, plan: Plan) -> Option<String> {
        let is_code = is_code_related(message);
        let is_long = message.chars().count() > LONG_MESSAGE_CHARS;
        let is_complex = is_complex_query(message);

        let tier = match plan {
            Plan::Free => ModelTier::Base,
            Plan::Premium if is_complex || is_long => ModelTier::Mid,
            Plan::Premium => ModelTier::Base,
            Plan::Enterprise | Plan::Admin if is_complex || is_long => ModelTier::Top,
            Plan::Enterprise | Plan::Admin if is_code => ModelTier::Mid,
            Plan::Enterprise | Plan::Admin => ModelTier::Base,
        };

        self.cheapest_model(tier)
    }

    /// The cheapest registered base-tier model, used when a batch item names
    /// no model of its own.
    pub(crate) fn default_model(&self) -> Option<String> {
        self.cheapest_model(ModelTier::Base)
    }

    /// Cheapest model of the tier, falling down to base and then to the
    /// cheapest model overall when the tier is not populated.
    fn cheapest_model(&self, tier: ModelTier) -> Option<String> {
        self.cheapest_in_tier(tier)
            .or_else(|| self.cheapest_in_tier(ModelTier::Base))
            .or_else(|| self.all_models().min_by(cost_order).map(|m| m.name.clone()))
    }

    fn cheapest_in_tier(&self, tier: ModelTier) -> Option<String> {
        self.all_models()
            .filter(|model| model.tier == tier)
            .min_by(cost_order)
            .map(|model| model.name.clone())
    }

    fn all_models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.providers.iter().flat_map(|provider| provider.models())
    }

    /// Static descriptor for a registered model.
    pub(crate) fn descriptor(&self, model: &str) -> Option<&ModelDescriptor> {
        let provider = self.provider_for_model(model)?;
        provider.model(model)
    }

    fn provider_for_model(&self, model: &str) -> Option<&dyn Provider> {
        let index = *self.model_to_provider.get(model)?;
        self.providers.get(index).map(|p| p.as_ref())
    }

    fn provider_by_name(&self, name: &str) -> Option<&dyn Provider> {
        self.providers.iter().find(|p| p.name() == name).map(|p| p.as_ref())
    }

    /// Dispatch a completion, falling back across providers on failure.
    ///
    /// Fallback attempts run strictly in sequence over the configured
    /// priority order, so the attempt count is bounded by the number of
    /// registered providers.
    pub(crate) async fn dispatch(&self, request: &ChatRequest, model: &str) -> crate::Result<CompletionResult> {
        let Some(provider) = self.provider_for_model(model) else {
            log::error!(
                "No provider found for model '{model}'. Available providers: [{}]",
                self.provider_names().join(", ")
            );

            return Err(LlmError::ModelNotFound(model.to_string()));
        };

        let started = Instant::now();

        match provider.chat_completion(request, model).await {
            Ok(completion) => Ok(completion_result(completion, model, provider.name(), started, None)),
            Err(e) => {
                log::error!("Primary provider '{}' failed for model '{model}': {e}", provider.name());

                self.try_fallback(request, model, provider.name()).await
            }
        }
    }

    async fn try_fallback(
        &self,
        request: &ChatRequest,
        original_model: &str,
        failed_provider: &str,
    ) -> crate::Result<CompletionResult> {
        let original_tier = self.descriptor(original_model).map(|model| model.tier);

        for candidate in &self.fallback_order {
            if candidate == failed_provider {
                continue;
            }

            let Some(provider) = self.provider_by_name(candidate) else {
                continue;
            };

            let Some(fallback_model) = equivalent_model(provider, original_tier) else {
                continue;
            };

            log::info!("Trying fallback: {candidate}/{fallback_model}");

            let started = Instant::now();

            match provider.chat_completion(request, &fallback_model).await {
                Ok(completion) => {
                    return Ok(completion_result(
                        completion,
                        &fallback_model,
                        candidate,
                        started,
                        Some(original_model.to_string()),
                    ));
                }
                Err(e) => {
                    log::error!("Fallback provider '{candidate}' also failed: {e}");
                    continue;
                }
            }
        }

        Err(LlmError::AllProvidersFailed)
    }

    /// Dispatch a streaming completion.
    ///
    /// Resolution matches [`dispatch`], but there is no fallback: once
    /// partial output may have been committed downstream it cannot be
    /// un-sent, so re-dispatch is the caller's decision.
    ///
    /// [`dispatch`]: ModelRouter::dispatch
    pub(crate) async fn dispatch_stream(
        &self,
        request: &ChatRequest,
        model: &str,
    ) -> crate::Result<ChatCompletionStream> {
        let Some(provider) = self.provider_for_model(model) else {
            return Err(LlmError::ModelNotFound(model.to_string()));
        };

        let supports_streaming = provider.model(model).is_some_and(|m| m.supports_streaming);

        if !supports_streaming {
            return Err(LlmError::StreamingNotSupported(model.to_string()));
        }

        provider.chat_stream(request, model).await
    }

    /// Cost of a completion against the serving provider's cost table.
    /// Unknown models cost 0 rather than failing.
    pub(crate) fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.provider_for_model(model)
            .map(|provider| provider.calculate_cost(model, input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Health of one provider, `None` for an unknown name.
    pub(crate) async fn provider_status(&self, name: &str) -> Option<ProviderHealth> {
        let provider = self.provider_by_name(name)?;
        Some(provider.health_check().await)
    }
}

fn cost_order(a: &&ModelDescriptor, b: &&ModelDescriptor) -> std::cmp::Ordering {
    let total = |m: &ModelDescriptor| m.cost_per_1k_input + m.cost_per_1k_output;
    total(a).total_cmp(&total(b))
}

fn completion_result(
    completion: ProviderCompletion,
    model: &str,
    provider: &str,
    started: Instant,
    original_model: Option<String>,
) -> CompletionResult {
    CompletionResult {
        text: completion.text,
        model_used: model.to_string(),
        provider_used: provider.to_string(),
        input_tokens: completion.input_tokens,
        output_tokens: completion.output_tokens,
        processing_time: started.elapsed().as_secs_f64(),
        fallback_used: original_model.is_some(),
        original_model,
    }
}

/// Whether the message looks code-related.
fn is_code_related(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CODE_INDICATORS.iter().any(|indicator| lowered.contains(indicator))
}

/// Whether the message signals an analytical request.
fn is_complex_query(message: &str) -> bool {
    let lowered = message.to_lowercase();
    let word_count = message.split_whitespace().count();

    word_count > COMPLEX_WORD_COUNT || COMPLEXITY_INDICATORS.iter().any(|indicator| lowered.contains(indicator))
}

/// The fallback provider's stand-in for the original model: same tier when it
/// serves one, else its first model.
fn equivalent_model(provider: &dyn Provider, original_tier: Option<ModelTier>) -> Option<String> {
    if let Some(tier) = original_tier
        && let Some(model) = provider.models().iter().find(|m| m.tier == tier)
    {
        return Some(model.name.clone());
    }

    provider.models().first().map(|model| model.name.clone())
}
