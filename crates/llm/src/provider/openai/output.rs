use serde::Deserialize;

/// Wire format of a non-streaming chat completion response.
#[derive(Debug, Deserialize)]
pub(super) struct OpenAiResponse {
    pub(super) choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub(super) usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAiChoice {
    pub(super) message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAiResponseMessage {
    #[serde(default)]
    pub(super) content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OpenAiUsage {
    #[serde(default)]
    pub(super) prompt_tokens: u64,
    #[serde(default)]
    pub(super) completion_tokens: u64,
}

/// Wire format of one streaming SSE chunk.
#[derive(Debug, Deserialize)]
pub(super) struct OpenAiStreamChunk {
    #[serde(default)]
    pub(super) choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAiStreamChoice {
    #[serde(default)]
    pub(super) delta: OpenAiDelta,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OpenAiDelta {
    #[serde(default)]
    pub(super) content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_usage() {
        let body = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;

        let response: OpenAiResponse = sonic_rs::from_str(body).unwrap();

        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hi!"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 9);
        assert_eq!(usage.completion_tokens, 3);
    }

    #[test]
    fn stream_chunk_with_delta() {
        let body = r#"{"choices": [{"index": 0, "delta": {"content": "Hel"}}]}"#;

        let chunk: OpenAiStreamChunk = sonic_rs::from_str(body).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
    }

    #[test]
    fn stream_chunk_without_content() {
        let body = r#"{"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}"#;

        let chunk: OpenAiStreamChunk = sonic_rs::from_str(body).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
