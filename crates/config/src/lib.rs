//! Relay configuration structures to map the relay.toml configuration.

#![deny(missing_docs)]

mod identity;
mod llm;
mod loader;
mod plans;

use std::{borrow::Cow, net::SocketAddr, path::Path};

pub use identity::Identity;
pub use llm::{LlmConfig, ModelConfig, ModelTier, ProviderConfig};
pub use plans::{ModelAccess, Plan, PlanCatalog, PlanQuota};
use serde::Deserialize;

/// Main configuration structure for the Relay application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// LLM provider configuration settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Subscription plan catalog: model access and quotas per plan.
    #[serde(default)]
    pub plans: PlanCatalog,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration describes a servable gateway.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Health endpoint configuration.
    pub health: HealthConfig,
    /// Identity header extraction configuration.
    pub identity: IdentityConfig,
}

/// Health endpoint configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is enabled.
    pub enabled: bool,
    /// The path for the health endpoint.
    pub path: Cow<'static, str>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            enabled: true,
            path: Cow::Borrowed("/health"),
        }
    }
}

/// Identity extraction configuration.
///
/// The upstream authenticator validates credentials and forwards the caller's
/// identity in trusted headers; these settings name the headers to read.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Header carrying the authenticated user id. Requests without it are rejected.
    pub user_id_header: Cow<'static, str>,
    /// Header carrying the subscription plan. Unknown values degrade to `free`.
    pub plan_header: Cow<'static, str>,
    /// Header carrying a comma-separated permission list.
    pub permissions_header: Cow<'static, str>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            user_id_header: Cow::Borrowed("X-User-Id"),
            plan_header: Cow::Borrowed("X-User-Plan"),
            permissions_header: Cow::Borrowed("X-User-Permissions"),
        }
    }
}
