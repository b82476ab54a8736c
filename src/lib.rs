//! RustyDB undo request manager.
//!
//! An in-memory component of the transactional storage engine that
//! tracks, prioritizes, and dispatches background undo work after a
//! transaction aborts or a prepared transaction is rolled back. It does
//! not itself understand undo log records or the WAL: it hands a
//! background worker a `(fxid, dbid, size, log ranges)` tuple and lets
//! the worker do the rest (`rmgr` dispatch, actual log replay, and undo
//! execution all live elsewhere).

mod arena;
mod clock;
mod config;
mod error;
mod index;
mod manager;
mod retry;
mod serialize;
mod types;

pub use clock::{ManualClock, SystemClock, UndoClock};
pub use config::UndoManagerConfig;
pub use error::{UndoError, UndoResult};
pub use manager::UndoRequestManager;
pub use types::{Dbid, Fxid, RequestState, UndoRecPtr, UndoRequestHandle, UndoRequestInfo};
