//! Subscription plan catalog: per-plan model access and quota configuration.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Deserializer};

/// Subscription tier governing model access and quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Free tier.
    Free,
    /// Paid individual tier.
    Premium,
    /// Organization tier.
    Enterprise,
    /// Operator tier.
    Admin,
}

impl Plan {
    /// Parse a plan from a header value. Unknown values degrade to `free`
    /// rather than rejecting the request.
    pub fn from_header(value: &str) -> Plan {
        match value.trim().to_ascii_lowercase().as_str() {
            "premium" => Plan::Premium,
            "enterprise" => Plan::Enterprise,
            "admin" => Plan::Admin,
            "free" => Plan::Free,
            other => {
                log::debug!("Unknown plan value '{other}', defaulting to free");
                Plan::Free
            }
        }
    }
}

impl AsRef<str> for Plan {
    fn as_ref(&self) -> &str {
        match self {
            Plan::Free => "free",
            Plan::Premium => "premium",
            Plan::Enterprise => "enterprise",
            Plan::Admin => "admin",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// The set of models a plan may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ModelAccess {
    /// The `"*"` sentinel: every registered model.
    #[default]
    All,
    /// An explicit allow-list of model names.
    Models(BTreeSet<String>),
}

impl ModelAccess {
    /// Whether the given model is covered by this access set.
    pub fn allows(&self, model: &str) -> bool {
        match self {
            ModelAccess::All => true,
            ModelAccess::Models(models) => models.contains(model),
        }
    }

    /// The explicit model names, when the access set is not the sentinel.
    pub fn explicit_models(&self) -> Option<&BTreeSet<String>> {
        match self {
            ModelAccess::All => None,
            ModelAccess::Models(models) => Some(models),
        }
    }
}

impl<'de> Deserialize<'de> for ModelAccess {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Sentinel(String),
            List(BTreeSet<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Sentinel(s) if s == "*" => Ok(ModelAccess::All),
            Raw::Sentinel(other) => Err(Error::custom(format!(
                "model access must be a list of model names or the \"*\" sentinel, got \"{other}\""
            ))),
            Raw::List(models) => Ok(ModelAccess::Models(models)),
        }
    }
}

/// Quota and model access for a single plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanQuota {
    /// Requests admitted per trailing one-hour window.
    pub requests_per_hour: u32,
    /// Tokens admitted per UTC day.
    pub tokens_per_day: u64,
    /// Models this plan may use.
    #[serde(default)]
    pub models: ModelAccess,
}

impl PlanQuota {
    fn new(requests_per_hour: u32, tokens_per_day: u64) -> Self {
        Self {
            requests_per_hour,
            tokens_per_day,
            models: ModelAccess::All,
        }
    }
}

/// Model access and quotas for every plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanCatalog {
    /// Quota for the free plan.
    pub free: PlanQuota,
    /// Quota for the premium plan.
    pub premium: PlanQuota,
    /// Quota for the enterprise plan.
    pub enterprise: PlanQuota,
    /// Quota for the admin plan.
    pub admin: PlanQuota,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        PlanCatalog {
            free: PlanQuota::new(50, 10_000),
            premium: PlanQuota::new(500, 100_000),
            enterprise: PlanQuota::new(5_000, 1_000_000),
            admin: PlanQuota::new(10_000, 2_000_000),
        }
    }
}

impl PlanCatalog {
    /// The quota configured for the given plan.
    pub fn quota(&self, plan: Plan) -> &PlanQuota {
        match plan {
            Plan::Free => &self.free,
            Plan::Premium => &self.premium,
            Plan::Enterprise => &self.enterprise,
            Plan::Admin => &self.admin,
        }
    }
}
