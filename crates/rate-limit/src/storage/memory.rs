//! In-memory rate limit storage.
//!
//! State lives in a [`DashMap`] keyed by user id. The map's entry guard is
//! the per-user critical section: every check-then-mutate sequence runs under
//! it, while distinct users land on different shards and do not contend.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use jiff::{Timestamp, tz::TimeZone};

use super::{RateLimitStorage, RequestGate, StorageError, UsageSnapshot};

/// How many days of daily-token buckets to retain.
const TOKEN_BUCKET_RETENTION_DAYS: i64 = 7;

/// Quota state tracked for a single user.
#[derive(Debug, Default)]
struct UserState {
    /// Request timestamps (unix seconds), oldest first, pruned to the
    /// trailing window on every gate check.
    recent_requests: VecDeque<i64>,
    /// Tokens consumed per UTC date (`YYYY-MM-DD` keys, so lexicographic
    /// order is chronological order).
    daily_tokens: BTreeMap<String, u64>,
}

/// In-memory rate limit storage implementation.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    users: DashMap<String, UserState>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStorage for InMemoryStorage {
    async fn check_and_record_request(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> Result<RequestGate, StorageError> {
        let now_secs = now.as_second();
        let window_secs = window.as_secs() as i64;
        let horizon = now_secs - window_secs;

        let mut state = self.users.entry(key.to_string()).or_default();

        while state.recent_requests.front().is_some_and(|&ts| ts < horizon) {
            state.recent_requests.pop_front();
        }

        let current_count = state.recent_requests.len() as u32;

        if current_count >= limit {
            // The oldest surviving timestamp is the first to leave the
            // window, so it determines when a slot frees up.
            let oldest = state.recent_requests.front().copied().unwrap_or(now_secs);
            let reset_in = (oldest + window_secs - now_secs).max(0) as u64;

            log::debug!("Request blocked for key '{key}': {current_count}/{limit} in window, reset in {reset_in}s");

            return Ok(RequestGate {
                allowed: false,
                current_count,
                limit,
                reset_in,
            });
        }

        state.recent_requests.push_back(now_secs);

        Ok(RequestGate {
            allowed: true,
            current_count: current_count + 1,
            limit,
            reset_in: window_secs.max(0) as u64,
        })
    }

    async fn check_daily_tokens(
        &self,
        key: &str,
        tokens: u64,
        limit: u64,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let today = date_key(now);

        let used_today = self
            .users
            .get(key)
            .and_then(|state| state.daily_tokens.get(&today).copied())
            .unwrap_or(0);

        Ok(used_today.saturating_add(tokens) <= limit)
    }

    async fn record_tokens(&self, key: &str, tokens: u64, now: Timestamp) -> Result<(), StorageError> {
        let today = date_key(now);
        let cutoff = retention_cutoff(now);

        let mut state = self.users.entry(key.to_string()).or_default();

        *state.daily_tokens.entry(today).or_insert(0) += tokens;
        state.daily_tokens.retain(|date, _| *date > cutoff);

        Ok(())
    }

    async fn usage_snapshot(
        &self,
        key: &str,
        window: Duration,
        now: Timestamp,
    ) -> Result<UsageSnapshot, StorageError> {
        let horizon = now.as_second() - window.as_secs() as i64;
        let today = date_key(now);

        let Some(state) = self.users.get(key) else {
            return Ok(UsageSnapshot::default());
        };

        let requests_in_window = state.recent_requests.iter().filter(|&&ts| ts > horizon).count() as u32;
        let tokens_today = state.daily_tokens.get(&today).copied().unwrap_or(0);

        Ok(UsageSnapshot {
            requests_in_window,
            tokens_today,
        })
    }
}

/// UTC calendar date key for a timestamp.
fn date_key(ts: Timestamp) -> String {
    ts.to_zoned(TimeZone::UTC).strftime("%Y-%m-%d").to_string()
}

/// The oldest date key still retained.
fn retention_cutoff(now: Timestamp) -> String {
    let cutoff = Timestamp::from_second(now.as_second() - TOKEN_BUCKET_RETENTION_DAYS * 86_400).unwrap_or(now);
    date_key(cutoff)
}
