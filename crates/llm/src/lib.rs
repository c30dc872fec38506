//! LLM routing endpoints: chat, streaming chat, batch, models, usage, and
//! provider health.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    extract::{Extension, Json, Path, State},
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use config::{Config, Identity};
use futures::StreamExt;

mod error;
mod messages;
mod provider;
mod router;
mod server;
mod token_counter;

use error::LlmError;
use messages::ChatRequest;
use server::LlmServer;

pub(crate) type Result<T> = std::result::Result<T, LlmError>;

/// Creates an axum router for the LLM endpoints.
pub fn router(config: &Config) -> anyhow::Result<Router> {
    let server = Arc::new(
        LlmServer::new(config).map_err(|e| anyhow::anyhow!("Failed to initialize LLM server: {e}"))?,
    );

    let routes = Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/batch", post(chat_batch))
        .route("/models", get(list_models))
        .route("/providers/{provider}/status", get(provider_status))
        .route("/usage", get(usage))
        .with_state(server);

    Ok(Router::new().nest(&config.llm.path, routes))
}

/// Handle a non-streaming chat completion request.
async fn chat(
    State(server): State<Arc<LlmServer>>,
    identity: Option<Extension<Identity>>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let Some(Extension(identity)) = identity else {
        return Err(LlmError::Unauthenticated);
    };

    log::info!(
        "Chat request from user {} ({} chars)",
        identity.user_id,
        request.message.len()
    );

    let response = server.chat(&identity, request).await?;

    Ok(Json(response))
}

/// Handle a streaming chat completion request.
///
/// The response is sent as Server-Sent Events: one data event per delta, an
/// in-stream error marker if the upstream breaks, and a final `[DONE]`.
async fn chat_stream(
    State(server): State<Arc<LlmServer>>,
    identity: Option<Extension<Identity>>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse> {
    let Some(Extension(identity)) = identity else {
        return Err(LlmError::Unauthenticated);
    };

    log::info!("Streaming chat request from user {}", identity.user_id);

    let stream = server.chat_stream(&identity, request).await?;

    let event_stream = stream.map(|result| {
        let event = match result {
            Ok(chunk) => {
                let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                    log::error!("Failed to serialize chunk: {e}");
                    r#"{"error":true,"message":"serialization failed"}"#.to_string()
                });

                Event::default().data(json)
            }
            Err(e) => {
                log::error!("Stream error: {e}");
                Event::default().data(format!(r#"{{"error":true,"message":"{e}"}}"#))
            }
        };

        Ok::<_, Infallible>(event)
    });

    let with_done = event_stream.chain(futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().data("[DONE]"))
    }));

    Ok(Sse::new(with_done).into_response())
}

/// Handle a batch of chat completions (enterprise/admin only).
async fn chat_batch(
    State(server): State<Arc<LlmServer>>,
    identity: Option<Extension<Identity>>,
    Json(requests): Json<Vec<ChatRequest>>,
) -> Result<impl IntoResponse> {
    let Some(Extension(identity)) = identity else {
        return Err(LlmError::Unauthenticated);
    };

    let response = server.chat_batch(&identity, requests).await?;

    log::info!(
        "Batch completed for user {}: {}/{} successful",
        identity.user_id,
        response.successful_requests,
        response.total_requests
    );

    Ok(Json(response))
}

/// Handle list models requests: only the models the caller's plan covers.
async fn list_models(
    State(server): State<Arc<LlmServer>>,
    identity: Option<Extension<Identity>>,
) -> Result<impl IntoResponse> {
    let Some(Extension(identity)) = identity else {
        return Err(LlmError::Unauthenticated);
    };

    let response = server.list_models(&identity);

    log::debug!("Returning {} models for plan {}", response.total_models, identity.plan);

    Ok(Json(response))
}

/// Handle a provider health probe.
async fn provider_status(
    State(server): State<Arc<LlmServer>>,
    identity: Option<Extension<Identity>>,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse> {
    if identity.is_none() {
        return Err(LlmError::Unauthenticated);
    }

    let health = server.provider_status(&provider).await?;

    Ok(Json(health))
}

/// Handle usage statistics requests.
async fn usage(
    State(server): State<Arc<LlmServer>>,
    identity: Option<Extension<Identity>>,
) -> Result<impl IntoResponse> {
    let Some(Extension(identity)) = identity else {
        return Err(LlmError::Unauthenticated);
    };

    let response = server.usage(&identity).await?;

    Ok(Json(response))
}
