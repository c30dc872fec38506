//! Rate limit manager implementation.

use std::time::Duration;

use config::{Plan, PlanCatalog};
use jiff::Timestamp;

use crate::error::RateLimitError;
use crate::storage::{InMemoryStorage, RateLimitStorage, RequestGate, StorageError, UsageSnapshot};

/// The sliding window over which request counts are enforced.
const REQUEST_WINDOW: Duration = Duration::from_secs(3600);

/// Storage backend for rate limiting.
enum Storage {
    Memory(InMemoryStorage),
}

impl Storage {
    async fn check_and_record_request(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<RequestGate, StorageError> {
        match self {
            Storage::Memory(storage) => storage.check_and_record_request(key, limit, window, now).await,
        }
    }

    async fn check_daily_tokens(
        &self,
        key: &str,
        tokens: u64,
        limit: u64,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        match self {
            Storage::Memory(storage) => storage.check_daily_tokens(key, tokens, limit, now).await,
        }
    }

    async fn record_tokens(&self, key: &str, tokens: u64, now: Timestamp) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.record_tokens(key, tokens, now).await,
        }
    }

    async fn usage_snapshot(
        &self,
        key: &str,
        window: Duration,
        now: Timestamp,
    ) -> Result<UsageSnapshot, StorageError> {
        match self {
            Storage::Memory(storage) => storage.usage_snapshot(key, window, now).await,
        }
    }
}

/// Enforces per-plan request and token quotas for every user.
pub struct RateLimitManager {
    plans: PlanCatalog,
    storage: Storage,
}

impl RateLimitManager {
    /// Create a manager backed by the in-process store.
    pub fn new(plans: PlanCatalog) -> Self {
        Self {
            plans,
            storage: Storage::Memory(InMemoryStorage::new()),
        }
    }

    /// Run the sliding-window request gate for the user.
    ///
    /// An admitted request is recorded immediately: the gate bounds request
    /// attempts, so the increment is charged regardless of whether the
    /// downstream dispatch later succeeds.
    pub async fn check_request(&self, user_id: &str, plan: Plan) -> Result<RequestGate, RateLimitError> {
        let limit = self.plans.quota(plan).requests_per_hour;

        let gate = self
            .storage
            .check_and_record_request(user_id, limit, REQUEST_WINDOW, Timestamp::now())
            .await?;

        Ok(gate)
    }

    /// Whether `tokens` more tokens fit in the user's daily budget.
    pub async fn check_daily_tokens(&self, user_id: &str, plan: Plan, tokens: u64) -> Result<bool, RateLimitError> {
        let limit = self.plans.quota(plan).tokens_per_day;

        let fits = self
            .storage
            .check_daily_tokens(user_id, tokens, limit, Timestamp::now())
            .await?;

        Ok(fits)
    }

    /// Record the actual token consumption of a completed request.
    ///
    /// Called exactly once per successful request with the total of input and
    /// output tokens; failed dispatches must not reach this.
    pub async fn record_usage(&self, user_id: &str, tokens: u64) -> Result<(), RateLimitError> {
        self.storage.record_tokens(user_id, tokens, Timestamp::now()).await?;

        Ok(())
    }

    /// Derived usage projection for the user. Never stored.
    pub async fn usage_stats(&self, user_id: &str, plan: Plan) -> Result<UsageStats, RateLimitError> {
        let quota = self.plans.quota(plan);

        let snapshot = self
            .storage
            .usage_snapshot(user_id, REQUEST_WINDOW, Timestamp::now())
            .await?;

        Ok(UsageStats::project(plan, quota.requests_per_hour, quota.tokens_per_day, snapshot))
    }

    /// The daily token limit for a plan, for error reporting.
    pub fn daily_token_limit(&self, plan: Plan) -> u64 {
        self.plans.quota(plan).tokens_per_day
    }
}

/// A user's current standing against their plan's quotas.
#[derive(Debug, Clone, Copy)]
pub struct UsageStats {
    /// The plan the projection was computed against.
    pub plan: Plan,
    /// Requests recorded in the trailing hour.
    pub requests_last_hour: u32,
    /// Tokens recorded against the current UTC date.
    pub tokens_today: u64,
    /// The plan's hourly request limit.
    pub requests_limit: u32,
    /// The plan's daily token limit.
    pub tokens_limit: u64,
    /// Requests still admissible this hour.
    pub requests_remaining: u32,
    /// Tokens still admissible today.
    pub tokens_remaining: u64,
    /// Share of the hourly request limit consumed, in percent.
    pub requests_used_pct: f64,
    /// Share of the daily token limit consumed, in percent.
    pub tokens_used_pct: f64,
}

impl UsageStats {
    fn project(plan: Plan, requests_limit: u32, tokens_limit: u64, snapshot: UsageSnapshot) -> Self {
        let pct = |used: f64, limit: f64| if limit > 0.0 { used / limit * 100.0 } else { 0.0 };

        Self {
            plan,
            requests_last_hour: snapshot.requests_in_window,
            tokens_today: snapshot.tokens_today,
            requests_limit,
            tokens_limit,
            requests_remaining: requests_limit.saturating_sub(snapshot.requests_in_window),
            tokens_remaining: tokens_limit.saturating_sub(snapshot.tokens_today),
            requests_used_pct: pct(snapshot.requests_in_window as f64, requests_limit as f64),
            tokens_used_pct: pct(snapshot.tokens_today as f64, tokens_limit as f64),
        }
    }
}
