//! Fatal error kinds for the sorting core.
//!
//! Every collective algorithm in this crate runs across a process group that
//! cannot meaningfully resume from a partial state (see the concurrency
//! model): any error here is propagated up to the caller, which is expected
//! to log it and abort the whole group. None of these are retried.

use thiserror::Error;

/// Errors raised by the distributed sorting core.
///
/// All variants are fatal to the process group: there is no retry path for
/// a collective algorithm that has already exchanged partial state with its
/// peers.
#[derive(Debug, Error)]
pub enum SortError {
    /// A send/recv count mismatch, malformed NUL-terminated stream, or an
    /// empty broadcast where a string was expected.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Input that violates a documented precondition: an unsorted run handed
    /// to the merger, an empty string set handed to median selection with
    /// `n > 0`, or a depth mismatch between the communicator hierarchy and a
    /// stored `MultiLevelPermutation`.
    #[error("precondition violation: {0}")]
    Precondition(String),

    /// A buffer resize or allocation failed.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, SortError>;

impl SortError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        SortError::Protocol(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        SortError::Precondition(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        SortError::ResourceExhaustion(msg.into())
    }
}
