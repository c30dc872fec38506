use serde::Serialize;

use crate::messages::ChatRequest;

/// Default output budget when the caller does not set one.
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Wire format of a chat completion request.
#[derive(Debug, Serialize)]
pub(super) struct OpenAiRequest {
    pub(super) model: String,
    pub(super) messages: Vec<OpenAiMessage>,
    pub(super) temperature: f32,
    pub(super) max_tokens: u32,
    pub(super) stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct OpenAiMessage {
    pub(super) role: &'static str,
    pub(super) content: String,
}

impl OpenAiRequest {
    pub(super) fn build(request: &ChatRequest, upstream_model: &str, stream: bool) -> Self {
        let mut messages = Vec::with_capacity(2);

        if let Some(system_prompt) = &request.system_prompt {
            messages.push(OpenAiMessage {
                role: "system",
                content: system_prompt.clone(),
            });
        }

        messages.push(OpenAiMessage {
            role: "user",
            content: request.message.clone(),
        });

        OpenAiRequest {
            model: upstream_model.to_string(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream,
        }
    }
}
