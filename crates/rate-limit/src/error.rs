//! Rate limiting error types.

use crate::storage::StorageError;

/// Errors that can occur while enforcing rate limits.
///
/// Quota rejections are not errors at this layer: the gate operations return
/// their verdict as data so callers can attach the numeric limit and reset
/// values to their own error surface.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
