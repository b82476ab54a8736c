//! Error types for the undo request manager.
//!
//! Follows the same layered approach as `transaction::error` in the
//! wider RustyDB codebase: soft, normal-path conditions are returned as
//! plain values (`register` returning `None`, never `Err`), while
//! [`UndoError`] is reserved for conditions worth reporting to a
//! caller: corrupt restore input, and misconfiguration at construction
//! time.
//!
//! Invariant violations reachable only through caller misuse of the
//! lifecycle contract (e.g. calling `finalize` twice) are *not*
//! represented here. Those are programming bugs that must never occur
//! on a normal commit/abort unwind path, so they panic immediately via
//! [`bug`] rather than unwind through a `Result` that every caller
//! would otherwise be forced to handle.

use thiserror::Error;

/// Result type alias for the fallible parts of the undo manager's API.
pub type UndoResult<T> = std::result::Result<T, UndoError>;

/// Errors the undo request manager can report to a caller.
#[derive(Debug, Error)]
pub enum UndoError {
    /// `restore` was given a byte blob whose length is not a whole
    /// multiple of the fixed record width, or whose record count
    /// exceeds `capacity`.
    #[error("corrupt undo request snapshot: {reason}")]
    RestoreCorrupt { reason: String },

    /// `UndoManagerConfig` failed validation (`soft_limit > capacity`,
    /// or `capacity == 0`).
    #[error("invalid undo manager configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Panics with a message identifying the violated invariant.
///
/// Used for bugs in the manager or its callers, not runtime conditions
/// a caller could be expected to recover from.
#[track_caller]
pub(crate) fn bug(reason: &str) -> ! {
    panic!("undo request manager invariant violated: {reason}");
}
