//! Storage backends for rate limiting.

use std::time::Duration;

use jiff::Timestamp;

pub mod memory;

pub use memory::InMemoryStorage;

/// Verdict of the sliding-window request gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestGate {
    /// Whether the request was admitted (and recorded).
    pub allowed: bool,
    /// Requests in the window, including this one when admitted.
    pub current_count: u32,
    /// The configured window limit.
    pub limit: u32,
    /// Seconds until a slot frees up. Full window length when admitted.
    pub reset_in: u64,
}

/// Read-only view of a user's current consumption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Requests recorded within the trailing window.
    pub requests_in_window: u32,
    /// Tokens recorded against the current UTC date.
    pub tokens_today: u64,
}

/// Contract a rate-limit storage backend must satisfy.
///
/// Implementations must make each operation atomic per key: two concurrent
/// calls for the same key must not interleave their read-then-write steps.
/// Operations on distinct keys must not contend.
#[allow(async_fn_in_trait)]
pub trait RateLimitStorage: Send + Sync {
    /// Prune the key's window, then admit-and-record or reject.
    ///
    /// A rejected attempt is not recorded. `now` is supplied by the caller so
    /// the window logic stays clock-free and testable.
    async fn check_and_record_request(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<RequestGate, StorageError>;

    /// Whether `tokens` more tokens still fit in today's budget.
    ///
    /// Pure check: consumption is recorded separately via [`record_tokens`]
    /// once the actual total is known.
    ///
    /// [`record_tokens`]: RateLimitStorage::record_tokens
    async fn check_daily_tokens(
        &self,
        key: &str,
        tokens: u64,
        limit: u64,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    /// Add `tokens` to today's bucket and prune buckets older than the
    /// retention horizon.
    async fn record_tokens(&self, key: &str, tokens: u64, now: Timestamp) -> Result<(), StorageError>;

    /// Read-only usage projection for the key.
    async fn usage_snapshot(
        &self,
        key: &str,
        window: Duration,
        now: Timestamp,
    ) -> Result<UsageSnapshot, StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Internal storage error.
    #[error("Storage error: {0}")]
    Internal(String),
}
