use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No identity was forwarded for the request.
    #[error("User identification required")]
    Unauthenticated,

    /// The caller's plan does not cover the requested operation or model.
    #[error("{0}")]
    InsufficientPermissions(String),

    /// No registered provider serves the model.
    #[error("No provider found for model '{0}'")]
    ModelNotFound(String),

    /// Provider not known to the gateway.
    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    /// The sliding-window request gate rejected the request.
    #[error("Rate limit exceeded. Try again in {reset_in} seconds")]
    RateLimitExceeded {
        /// Requests currently recorded in the window.
        current_count: u32,
        /// The plan's window limit.
        limit: u32,
        /// Seconds until a slot frees up.
        reset_in: u64,
    },

    /// The daily token budget would be exceeded.
    #[error("Daily token limit exceeded")]
    DailyTokenLimitExceeded {
        /// The plan's daily token budget.
        limit: u64,
    },

    /// The resolved model does not support streaming.
    #[error("Model '{0}' does not support streaming")]
    StreamingNotSupported(String),

    /// Provider API returned an error.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A provider call exceeded its configured deadline.
    #[error("Provider request timed out: {0}")]
    Timeout(String),

    /// Every fallback candidate was exhausted without a successful completion.
    #[error("All providers failed")]
    AllProvidersFailed,

    /// Internal server error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, it's an internal Relay error and should not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl LlmError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::StreamingNotSupported(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::ModelNotFound(_) | Self::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } | Self::DailyTokenLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::AllProvidersFailed => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProviderApiError { status, .. } => {
                // Map provider status codes to our status codes
                match *status {
                    400 => StatusCode::BAD_REQUEST,
                    401 => StatusCode::UNAUTHORIZED,
                    403 => StatusCode::FORBIDDEN,
                    404 => StatusCode::NOT_FOUND,
                    429 => StatusCode::TOO_MANY_REQUESTS,
                    _ => StatusCode::BAD_GATEWAY,
                }
            }
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the stable machine-readable error kind for the response.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) | Self::StreamingNotSupported(_) => "invalid_request_error",
            Self::Unauthenticated => "authentication_error",
            Self::InsufficientPermissions(_) => "insufficient_permissions",
            Self::ModelNotFound(_) => "model_not_found",
            Self::ProviderNotFound(_) => "provider_not_found",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::DailyTokenLimitExceeded { .. } => "daily_token_limit_exceeded",
            Self::ConnectionError(_) | Self::ProviderApiError { .. } | Self::Timeout(_) => "api_error",
            Self::AllProvidersFailed => "service_unavailable",
            Self::InternalError(_) => "internal_error",
        }
    }
}

impl From<rate_limit::RateLimitError> for LlmError {
    fn from(error: rate_limit::RateLimitError) -> Self {
        log::error!("Rate limit backend failed: {error}");
        LlmError::InternalError(None)
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
    /// Seconds until the quota frees up, on quota rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    /// The numeric limit that was hit, on quota rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    /// Current consumption against that limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<u64>,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log all 5xx errors for administrators
        if status.is_server_error() {
            match &self {
                Self::InternalError(Some(provider_msg)) => {
                    log::error!("Provider returned internal error: {provider_msg}");
                }
                Self::InternalError(None) => {
                    // Full error details are already logged where the error was created
                    log::error!("Internal server error occurred");
                }
                _ => {
                    log::error!("Server error ({}): {}", status.as_u16(), self);
                }
            }
        }

        // For internal errors, only show provider messages, not Relay internals
        let message = match &self {
            Self::InternalError(Some(provider_msg)) => provider_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let (retry_after, limit, current) = match &self {
            Self::RateLimitExceeded {
                current_count,
                limit,
                reset_in,
            } => (Some(*reset_in), Some(u64::from(*limit)), Some(u64::from(*current_count))),
            Self::DailyTokenLimitExceeded { limit } => (None, Some(*limit), None),
            _ => (None, None, None),
        };

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message,
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
                retry_after,
                limit,
                current,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        let cases = [
            (LlmError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (LlmError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                LlmError::InsufficientPermissions("no access".into()),
                StatusCode::FORBIDDEN,
            ),
            (LlmError::ModelNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                LlmError::RateLimitExceeded {
                    current_count: 50,
                    limit: 50,
                    reset_in: 60,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                LlmError::DailyTokenLimitExceeded { limit: 10_000 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (LlmError::ConnectionError("refused".into()), StatusCode::BAD_GATEWAY),
            (LlmError::Timeout("30s".into()), StatusCode::GATEWAY_TIMEOUT),
            (LlmError::AllProvidersFailed, StatusCode::SERVICE_UNAVAILABLE),
            (LlmError::InternalError(None), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{error}");
        }
    }

    #[test]
    fn provider_status_codes_are_mapped() {
        let error = LlmError::ProviderApiError {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let error = LlmError::ProviderApiError {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn error_types_are_stable() {
        assert_eq!(
            LlmError::RateLimitExceeded {
                current_count: 1,
                limit: 1,
                reset_in: 1
            }
            .error_type(),
            "rate_limit_exceeded"
        );
        assert_eq!(
            LlmError::DailyTokenLimitExceeded { limit: 1 }.error_type(),
            "daily_token_limit_exceeded"
        );
        assert_eq!(LlmError::AllProvidersFailed.error_type(), "service_unavailable");
    }
}
