//! Core value types shared across the undo request manager.
//!
//! These mirror the persistent subset of an undo request plus the
//! handful of small newtypes that give the arena-index fields more
//! type safety than bare `u32`/`u64`.

use std::fmt;

/// Sentinel used throughout the arenas and trees for "no link".
pub(crate) const NONE: u32 = u32::MAX;

/// A full, epoch-extended transaction identifier.
///
/// `Fxid(0)` is reserved as the invalid sentinel: a request slot whose
/// `fxid` is invalid is FREE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fxid(pub u64);

impl Fxid {
    /// The invalid sentinel. Never assigned to a live request.
    pub const INVALID: Fxid = Fxid(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Fxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The database a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dbid(pub u32);

/// A location within the logged or unlogged undo log.
///
/// `UndoRecPtr::INVALID` marks "no undo was written in this log".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UndoRecPtr(pub u64);

impl UndoRecPtr {
    pub const INVALID: UndoRecPtr = UndoRecPtr(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Sentinel retry time meaning "this request has never failed".
///
/// Chosen as `u64::MAX` so that, were a NEVER-RETRIED record ever to end
/// up ordered by retry time (it never should; see `ListedIn`), it would
/// sort last rather than spuriously winning the gate in `next()`.
pub const NEVER_RETRIED: u64 = u64::MAX;

/// The persistent subset of a request: everything that survives
/// `serialize`/`restore` across a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoRequestInfo {
    pub fxid: Fxid,
    pub dbid: Dbid,
    pub size: u64,
    pub start_logged: UndoRecPtr,
    pub end_logged: UndoRecPtr,
    pub start_unlogged: UndoRecPtr,
    pub end_unlogged: UndoRecPtr,
}

impl UndoRequestInfo {
    pub(crate) fn empty(fxid: Fxid, dbid: Dbid) -> Self {
        Self {
            fxid,
            dbid,
            size: 0,
            start_logged: UndoRecPtr::INVALID,
            end_logged: UndoRecPtr::INVALID,
            start_unlogged: UndoRecPtr::INVALID,
            end_unlogged: UndoRecPtr::INVALID,
        }
    }

    /// True once no undo was actually written on either log. This is
    /// `performInBackground`'s short-circuit case: such a request has
    /// nothing for a worker to do and is unregistered immediately.
    pub(crate) fn has_no_undo(&self) -> bool {
        !self.start_logged.is_valid() && !self.start_unlogged.is_valid()
    }
}

/// Which index tree(s), if any, currently hold a LISTED request.
///
/// A LISTED request is in either `{byFxid, bySize}` or `{byRetryTime}`,
/// never both, never neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListedIn {
    Nowhere,
    FxidAndSize,
    RetryTime,
}

/// Observable lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Free,
    Unlisted,
    Listed,
}

/// Opaque handle to a request slot, returned by `register` and `next`.
///
/// Holding a handle to an UNLISTED request is the caller's exclusive
/// right and responsibility: the manager will not touch that slot's
/// persistent payload until the handle comes back through
/// `unregister`, `performInBackground`, or `reschedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoRequestHandle(pub(crate) u32);

impl UndoRequestHandle {
    pub(crate) fn slot(self) -> u32 {
        self.0
    }
}

/// Which of the three orderings an operation is acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dim {
    Fxid,
    Size,
    Retry,
}

impl Dim {
    /// Round-robin successor, used by the scheduler's rotating cursor.
    pub(crate) fn next(self) -> Dim {
        match self {
            Dim::Fxid => Dim::Size,
            Dim::Size => Dim::Retry,
            Dim::Retry => Dim::Fxid,
        }
    }
}
