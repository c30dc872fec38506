//! Request orchestration: quota gates, model resolution, dispatch, accounting.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use config::{Config, Identity, Plan, PlanCatalog};
use futures::Stream;
use rate_limit::RateLimitManager;
use uuid::Uuid;

use crate::{
    error::LlmError,
    messages::{
        BatchItemData, BatchItemResult, BatchResponse, ChatRequest, ChatResponse, ModelsResponse, ProviderHealth,
        StreamChunk, UsageResponse,
    },
    provider::ChatCompletionStream,
    router::ModelRouter,
    token_counter,
};

/// Largest accepted batch.
const MAX_BATCH_SIZE: usize = 100;

/// The gateway's request orchestrator.
///
/// Owns the provider registry and the quota manager; handlers share it via a
/// cheap clone.
#[derive(Clone)]
pub(crate) struct LlmServer {
    shared: Arc<LlmServerInner>,
}

struct LlmServerInner {
    router: ModelRouter,
    limiter: Arc<RateLimitManager>,
    plans: PlanCatalog,
}

impl LlmServer {
    pub(crate) fn new(config: &Config) -> crate::Result<Self> {
        let router = ModelRouter::new(&config.llm)?;
        let limiter = Arc::new(RateLimitManager::new(config.plans.clone()));

        Ok(Self {
            shared: Arc::new(LlmServerInner {
                router,
                limiter,
                plans: config.plans.clone(),
            }),
        })
    }

    /// Process a non-streaming chat request.
    ///
    /// The step order is load-bearing: both quota gates run before any
    /// provider traffic, and accounting runs only after a confirmed success
    /// so a failed dispatch consumes no token budget.
    pub(crate) async fn chat(&self, identity: &Identity, request: ChatRequest) -> crate::Result<ChatResponse> {
        request.validate()?;

        // Streaming has its own entry point; the flag alone does not switch
        // transports.
        if request.stream {
            log::debug!("stream=true on the non-streaming endpoint; responding with a single completion");
        }

        self.check_request_gate(identity).await?;

        let input_tokens = token_counter::estimate(&request.message);

        let fits = self
            .shared
            .limiter
            .check_daily_tokens(&identity.user_id, identity.plan, input_tokens)
            .await?;

        if !fits {
            return Err(LlmError::DailyTokenLimitExceeded {
                limit: self.shared.limiter.daily_token_limit(identity.plan),
            });
        }

        let model = self.resolve_model(&request, identity.plan)?;
        self.check_model_access(identity.plan, &model)?;

        let result = self.shared.router.dispatch(&request, &model).await?;

        let output_tokens = token_counter::estimate(&result.text);
        let total_tokens = input_tokens + output_tokens;
        let cost_estimate = self.shared.router.cost(&result.model_used, input_tokens, output_tokens);

        self.shared.limiter.record_usage(&identity.user_id, total_tokens).await?;

        log::info!(
            "Chat completed for user {}: {total_tokens} tokens via {}/{}, ${cost_estimate:.4}",
            identity.user_id,
            result.provider_used,
            result.model_used,
        );

        Ok(ChatResponse {
            id: format!("chat-{}", Uuid::new_v4()),
            message: result.text,
            model_used: result.model_used,
            provider_used: result.provider_used,
            tokens_used: total_tokens,
            input_tokens,
            output_tokens,
            cost_estimate,
            processing_time: result.processing_time,
            fallback_used: result.fallback_used,
            original_model: result.original_model,
            conversation_id: request.conversation_id,
        })
    }

    /// Process a streaming chat request.
    ///
    /// Token accounting for streams is reconciled post-hoc: the returned
    /// stream meters the deltas it actually yields and records usage once,
    /// when it is dropped - whether it was drained, failed mid-way, or the
    /// caller disconnected early.
    pub(crate) async fn chat_stream(
        &self,
        identity: &Identity,
        request: ChatRequest,
    ) -> crate::Result<ChatCompletionStream> {
        request.validate()?;

        self.check_request_gate(identity).await?;

        let input_tokens = token_counter::estimate(&request.message);

        let model = self.resolve_model(&request, identity.plan)?;
        self.check_model_access(identity.plan, &model)?;

        let stream = self.shared.router.dispatch_stream(&request, &model).await?;

        Ok(Box::pin(MeteredStream {
            inner: stream,
            collected: String::new(),
            yielded_any: false,
            input_tokens,
            user_id: identity.user_id.clone(),
            limiter: self.shared.limiter.clone(),
        }))
    }

    /// Process a batch of chat requests, enterprise/admin only.
    ///
    /// Items are dispatched independently and strictly in sequence; per-item
    /// failures are collected into the result list, never escalated.
    pub(crate) async fn chat_batch(
        &self,
        identity: &Identity,
        requests: Vec<ChatRequest>,
    ) -> crate::Result<BatchResponse> {
        if !matches!(identity.plan, Plan::Enterprise | Plan::Admin) {
            return Err(LlmError::InsufficientPermissions(
                "Batch processing is only available for enterprise users".to_string(),
            ));
        }

        if requests.len() > MAX_BATCH_SIZE {
            return Err(LlmError::InvalidRequest(format!(
                "Maximum {MAX_BATCH_SIZE} requests per batch"
            )));
        }

        let mut results = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            let outcome = self.dispatch_batch_item(request).await;

            results.push(match outcome {
                Ok(data) => BatchItemResult {
                    index,
                    success: true,
                    data: Some(data),
                    error: None,
                },
                Err(e) => BatchItemResult {
                    index,
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                },
            });
        }

        let successful_requests = results.iter().filter(|r| r.success).count();

        Ok(BatchResponse {
            total_requests: results.len(),
            successful_requests,
            failed_requests: results.len() - successful_requests,
            results,
        })
    }

    async fn dispatch_batch_item(&self, request: &ChatRequest) -> crate::Result<BatchItemData> {
        request.validate()?;

        let model = match &request.model {
            Some(model) => model.clone(),
            None => self
                .shared
                .router
                .default_model()
                .ok_or_else(|| LlmError::InternalError(None))?,
        };

        let result = self.shared.router.dispatch(request, &model).await?;

        Ok(BatchItemData {
            message: result.text,
            model_used: result.model_used,
            provider_used: result.provider_used,
            tokens_used: result.input_tokens + result.output_tokens,
            fallback_used: result.fallback_used,
            processing_time: result.processing_time,
        })
    }

    /// Models the caller's plan may use.
    pub(crate) fn list_models(&self, identity: &Identity) -> ModelsResponse {
        let access = &self.shared.plans.quota(identity.plan).models;
        let models = self.shared.router.available_models(access);

        ModelsResponse {
            total_models: models.len(),
            models,
            user_plan: identity.plan.to_string(),
        }
    }

    /// Health of one provider.
    pub(crate) async fn provider_status(&self, provider: &str) -> crate::Result<ProviderHealth> {
        self.shared
            .router
            .provider_status(provider)
            .await
            .ok_or_else(|| LlmError::ProviderNotFound(provider.to_string()))
    }

    /// The caller's current quota standing.
    pub(crate) async fn usage(&self, identity: &Identity) -> crate::Result<UsageResponse> {
        let stats = self.shared.limiter.usage_stats(&identity.user_id, identity.plan).await?;

        Ok(UsageResponse::from(stats))
    }

    async fn check_request_gate(&self, identity: &Identity) -> crate::Result<()> {
        let gate = self.shared.limiter.check_request(&identity.user_id, identity.plan).await?;

        if !gate.allowed {
            return Err(LlmError::RateLimitExceeded {
                current_count: gate.current_count,
                limit: gate.limit,
                reset_in: gate.reset_in,
            });
        }

        Ok(())
    }

    fn resolve_model(&self, request: &ChatRequest, plan: Plan) -> crate::Result<String> {
        if let Some(model) = &request.model {
            return Ok(model.clone());
        }

        self.shared.router.select_model(&request.message, plan).ok_or_else(|| {
            log::error!("Model selection found no registered models");
            LlmError::InternalError(None)
        })
    }

    fn check_model_access(&self, plan: Plan, model: &str) -> crate::Result<()> {
        if self.shared.plans.quota(plan).models.allows(model) {
            return Ok(());
        }

        Err(LlmError::InsufficientPermissions(format!(
            "Your plan does not include access to {model}"
        )))
    }
}

/// Stream wrapper reconciling token accounting at end of stream.
///
/// Usage is recorded exactly once, from the drop guard, so every exit path -
/// normal exhaustion, mid-stream failure, caller disconnect - both releases
/// the upstream connection (by dropping the inner stream) and accounts for
/// the deltas that were actually delivered. A stream that never yielded a
/// chunk records nothing, matching the failed-dispatch rule for
/// non-streaming requests.
struct MeteredStream {
    inner: ChatCompletionStream,
    collected: String,
    yielded_any: bool,
    input_tokens: u64,
    user_id: String,
    limiter: Arc<RateLimitManager>,
}

impl Stream for MeteredStream {
    type Item = crate::Result<StreamChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        let poll = this.inner.as_mut().poll_next(cx);

        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            this.yielded_any = true;
            this.collected.push_str(&chunk.delta);
        }

        poll
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        if !self.yielded_any {
            return;
        }

        let total = self.input_tokens + token_counter::estimate(&self.collected);
        let user_id = std::mem::take(&mut self.user_id);
        let limiter = self.limiter.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No runtime available to record streamed usage for user '{user_id}'");
            return;
        };

        handle.spawn(async move {
            if let Err(e) = limiter.record_usage(&user_id, total).await {
                log::error!("Failed to record streamed usage for user '{user_id}': {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    /// A gateway whose single provider points at an unreachable port, so
    /// construction succeeds but every dispatch fails fast.
    fn gateway_config() -> Config {
        let raw = r#"
            [llm.providers.openai]
            api_key = "sk-test"
            base_url = "http://127.0.0.1:9"
            timeout = "2s"

            [llm.providers.openai.models.gpt-3-5-turbo]
            tier = "base"
            cost_per_1k_input = 0.0015
            cost_per_1k_output = 0.002

            [llm.providers.openai.models.gpt-4]
            tier = "mid"
        "#;

        toml::from_str(raw).unwrap()
    }

    fn request(json: &str) -> ChatRequest {
        serde_json::from_str(json).unwrap()
    }

    fn identity(plan: Plan) -> Identity {
        Identity::new("user-1", plan)
    }

    #[tokio::test]
    async fn failed_dispatch_consumes_no_token_budget() {
        let server = LlmServer::new(&gateway_config()).unwrap();
        let identity = identity(Plan::Free);

        let error = server.chat(&identity, request(r#"{"message": "hello"}"#)).await.unwrap_err();
        assert!(matches!(error, LlmError::AllProvidersFailed));

        let usage = server.usage(&identity).await.unwrap();
        assert_eq!(usage.usage.tokens_today, 0);
        // The admitted request itself is charged against the request gate.
        assert_eq!(usage.usage.requests_last_hour, 1);
    }

    #[tokio::test]
    async fn request_gate_rejects_with_reset_metadata() {
        let mut config = gateway_config();
        config.plans.free.requests_per_hour = 2;

        let server = LlmServer::new(&config).unwrap();
        let identity = identity(Plan::Free);

        for _ in 0..2 {
            let _ = server.chat(&identity, request(r#"{"message": "hello"}"#)).await;
        }

        let error = server.chat(&identity, request(r#"{"message": "hello"}"#)).await.unwrap_err();

        let LlmError::RateLimitExceeded {
            current_count,
            limit,
            reset_in,
        } = error
        else {
            unreachable!("expected RateLimitExceeded, got {error}");
        };

        assert_eq!(current_count, 2);
        assert_eq!(limit, 2);
        assert!(reset_in <= 3600);
    }

    #[tokio::test]
    async fn model_access_is_enforced_before_dispatch() {
        let mut config = gateway_config();
        config.plans.free.models = config::ModelAccess::Models(["gpt-3-5-turbo".to_string()].into_iter().collect());

        let server = LlmServer::new(&config).unwrap();
        let identity = identity(Plan::Free);

        let error = server
            .chat(&identity, request(r#"{"message": "hello", "model": "gpt-4"}"#))
            .await
            .unwrap_err();

        assert!(matches!(error, LlmError::InsufficientPermissions(_)));
    }

    #[tokio::test]
    async fn invalid_temperature_is_rejected_before_any_gate() {
        let server = LlmServer::new(&gateway_config()).unwrap();
        let identity = identity(Plan::Free);

        let error = server
            .chat(&identity, request(r#"{"message": "hello", "temperature": 3.0}"#))
            .await
            .unwrap_err();

        assert!(matches!(error, LlmError::InvalidRequest(_)));

        // The rejected request never reached the request gate.
        let usage = server.usage(&identity).await.unwrap();
        assert_eq!(usage.usage.requests_last_hour, 0);
    }

    #[tokio::test]
    async fn batch_is_plan_gated_and_size_capped() {
        let server = LlmServer::new(&gateway_config()).unwrap();

        let error = server
            .chat_batch(&identity(Plan::Premium), vec![request(r#"{"message": "hello"}"#)])
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::InsufficientPermissions(_)));

        let oversized: Vec<ChatRequest> = (0..101).map(|_| request(r#"{"message": "hello"}"#)).collect();
        let error = server.chat_batch(&identity(Plan::Admin), oversized).await.unwrap_err();
        assert!(matches!(error, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn batch_collects_per_item_failures() {
        let server = LlmServer::new(&gateway_config()).unwrap();

        let response = server
            .chat_batch(
                &identity(Plan::Enterprise),
                vec![request(r#"{"message": "hello"}"#), request(r#"{"message": "there"}"#)],
            )
            .await
            .unwrap();

        assert_eq!(response.total_requests, 2);
        assert_eq!(response.successful_requests, 0);
        assert_eq!(response.failed_requests, 2);
        assert!(response.results.iter().all(|r| !r.success && r.error.is_some()));
        assert_eq!(response.results[0].index, 0);
        assert_eq!(response.results[1].index, 1);
    }

    #[tokio::test]
    async fn list_models_filters_by_plan_access() {
        let mut config = gateway_config();
        config.plans.free.models = config::ModelAccess::Models(["gpt-3-5-turbo".to_string()].into_iter().collect());

        let server = LlmServer::new(&config).unwrap();

        let free = server.list_models(&identity(Plan::Free));
        assert_eq!(free.total_models, 1);
        assert_eq!(free.user_plan, "free");

        let admin = server.list_models(&identity(Plan::Admin));
        assert_eq!(admin.total_models, 2);
    }

    #[tokio::test]
    async fn provider_status_for_unknown_provider_fails() {
        let server = LlmServer::new(&gateway_config()).unwrap();

        let error = server.provider_status("missing").await.unwrap_err();
        assert!(matches!(error, LlmError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn metered_stream_records_usage_on_drop() {
        let server = LlmServer::new(&gateway_config()).unwrap();
        let limiter = server.shared.limiter.clone();

        let chunks: Vec<crate::Result<StreamChunk>> = vec![
            Ok(StreamChunk {
                delta: "Hello".to_string(),
                model: "gpt-3-5-turbo".to_string(),
                provider: "openai".to_string(),
                done: false,
            }),
            Ok(StreamChunk {
                delta: String::new(),
                model: "gpt-3-5-turbo".to_string(),
                provider: "openai".to_string(),
                done: true,
            }),
        ];

        let mut stream = MeteredStream {
            inner: Box::pin(futures::stream::iter(chunks)),
            collected: String::new(),
            yielded_any: false,
            input_tokens: 4,
            user_id: "user-1".to_string(),
            limiter: limiter.clone(),
        };

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap().delta);
        }
        assert_eq!(text, "Hello");

        drop(stream);

        // The drop guard records through a spawned task; give it a moment.
        let mut tokens_today = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tokens_today = limiter.usage_stats("user-1", Plan::Free).await.unwrap().tokens_today;
            if tokens_today > 0 {
                break;
            }
        }

        // 4 input tokens plus one token for "Hello".
        assert_eq!(tokens_today, 5);
    }

    #[tokio::test]
    async fn unconsumed_stream_records_nothing() {
        let server = LlmServer::new(&gateway_config()).unwrap();
        let limiter = server.shared.limiter.clone();

        let stream = MeteredStream {
            inner: Box::pin(futures::stream::empty()),
            collected: String::new(),
            yielded_any: false,
            input_tokens: 4,
            user_id: "user-2".to_string(),
            limiter: limiter.clone(),
        };

        drop(stream);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let usage = limiter.usage_stats("user-2", Plan::Free).await.unwrap();
        assert_eq!(usage.tokens_today, 0);
    }
}
