//! The undo request manager: the concurrency envelope and public API
//! that ties the arena, the three ordered indexes, the lifecycle state
//! machine, the scheduler, retry policy, and serialization together.
//!
//! A single `parking_lot::Mutex` guards everything the three indexes,
//! the free-lists, the cursor, the utilization counter, and the
//! oldest-fxid cache touch. This is the same coarse-lock shape
//! `transaction::manager::TransactionManager` and
//! `transaction::lock_manager::LockManager` already use elsewhere in
//! RustyDB. A worker or transaction holding an UNLISTED request has
//! exclusive access to its contents, so in principle the lock doesn't
//! need to cover those bytes; this implementation still takes the lock
//! for `finalize` (see its doc comment) because the arena storage is a
//! single `Vec` shared by every operation, and Rust has no way to carve
//! out an unsynchronized sub-borrow of it across calls without
//! `unsafe`. The critical section stays O(1) either way.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::arena::Arenas;
use crate::clock::{SystemClock, UndoClock};
use crate::config::UndoManagerConfig;
use crate::error::{bug, UndoError, UndoResult};
use crate::index;
use crate::retry;
use crate::serialize;
use crate::types::{
    Dbid, Dim, Fxid, ListedIn, RequestState, UndoRecPtr, UndoRequestHandle, UndoRequestInfo,
    NEVER_RETRIED,
};

/// `oldest_fxid`'s cache: distinguishes "no non-FREE requests exist"
/// from "needs a rescan" so that a freshly-emptied manager doesn't get
/// confused with one whose cache was merely invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OldestCache {
    Empty,
    Known(Fxid),
    Invalid,
}

struct Inner {
    arenas: Arenas,
    capacity: u32,
    soft_limit: u32,
    utilization: u32,
    oldest: OldestCache,
    cursor: Dim,
    clock: Arc<dyn UndoClock>,
}

impl Inner {
    fn new(config: UndoManagerConfig, clock: Arc<dyn UndoClock>) -> Self {
        Self {
            arenas: Arenas::new(config.capacity),
            capacity: config.capacity,
            soft_limit: config.soft_limit,
            utilization: 0,
            oldest: OldestCache::Empty,
            cursor: Dim::Fxid,
            clock,
        }
    }

    fn register(&mut self, fxid: Fxid, dbid: Dbid) -> Option<u32> {
        let slot = self.arenas.alloc_request()?;
        let rec = &mut self.arenas.requests[slot as usize];
        rec.info = UndoRequestInfo::empty(fxid, dbid);
        rec.retry_time = NEVER_RETRIED;
        rec.finalized = false;
        rec.listed = ListedIn::Nowhere;
        self.utilization += 1;

        self.oldest = match self.oldest {
            OldestCache::Empty => OldestCache::Known(fxid),
            OldestCache::Known(cur) if fxid < cur => OldestCache::Known(fxid),
            OldestCache::Known(cur) => OldestCache::Known(cur),
            OldestCache::Invalid => OldestCache::Invalid,
        };

        Some(slot)
    }

    fn finalize(
        &mut self,
        slot: u32,
        size: u64,
        start_logged: UndoRecPtr,
        end_logged: UndoRecPtr,
        start_unlogged: UndoRecPtr,
        end_unlogged: UndoRecPtr,
    ) {
        let rec = &mut self.arenas.requests[slot as usize];
        if rec.is_free() {
            bug("finalize called on a FREE request");
        }
        if !matches!(rec.listed, ListedIn::Nowhere) {
            bug("finalize called on a LISTED request; finalize requires UNLISTED");
        }
        if rec.finalized {
            bug("finalize called twice on the same request");
        }
        if size == 0 {
            bug("finalize requires size > 0");
        }
        if start_logged.is_valid() != end_logged.is_valid() {
            bug("logged undo range must be both valid or both invalid");
        }
        if start_unlogged.is_valid() != end_unlogged.is_valid() {
            bug("unlogged undo range must be both valid or both invalid");
        }
        if !start_logged.is_valid() && !start_unlogged.is_valid() {
            bug("finalize requires at least one of the logged/unlogged ranges to be valid");
        }

        rec.info.size = size;
        rec.info.start_logged = start_logged;
        rec.info.end_logged = end_logged;
        rec.info.start_unlogged = start_unlogged;
        rec.info.end_unlogged = end_unlogged;
        rec.finalized = true;
    }

    fn unregister(&mut self, slot: u32) {
        let listed = self.arenas.requests[slot as usize].listed;
        match listed {
            ListedIn::Nowhere => {}
            ListedIn::FxidAndSize => {
                index::tree_remove(&mut self.arenas, Dim::Fxid, slot);
                index::tree_remove(&mut self.arenas, Dim::Size, slot);
            }
            ListedIn::RetryTime => {
                index::tree_remove(&mut self.arenas, Dim::Retry, slot);
            }
        }

        let fxid = self.arenas.requests[slot as usize].info.fxid;
        if self.oldest == OldestCache::Known(fxid) {
            self.oldest = OldestCache::Invalid;
        }

        self.arenas.free_request(slot);
        self.utilization -= 1;
    }

    fn perform_in_background(&mut self, slot: u32, force: bool) -> bool {
        {
            let rec = &self.arenas.requests[slot as usize];
            if rec.is_free() {
                bug("performInBackground called on a FREE request");
            }
            if !matches!(rec.listed, ListedIn::Nowhere) {
                bug("performInBackground called on a LISTED request; it requires UNLISTED");
            }
        }

        if self.arenas.requests[slot as usize].info.has_no_undo() {
            self.unregister(slot);
            return true;
        }

        if force || self.utilization <= self.soft_limit {
            index::tree_insert(&mut self.arenas, Dim::Fxid, slot);
            index::tree_insert(&mut self.arenas, Dim::Size, slot);
            self.arenas.requests[slot as usize].listed = ListedIn::FxidAndSize;
            true
        } else {
            false
        }
    }

    fn reschedule(&mut self, slot: u32) {
        let rec = &self.arenas.requests[slot as usize];
        if rec.is_free() {
            bug("reschedule called on a FREE request");
        }
        if !matches!(rec.listed, ListedIn::Nowhere) {
            bug("reschedule called on a LISTED request; it requires UNLISTED");
        }

        let now = self.clock.now_millis();
        let has_failed_before = rec.retry_time != NEVER_RETRIED;
        let delay_ms = retry::next_delay(has_failed_before).as_millis() as u64;

        let rec = &mut self.arenas.requests[slot as usize];
        rec.retry_time = now + delay_ms;
        index::tree_insert(&mut self.arenas, Dim::Retry, slot);
        self.arenas.requests[slot as usize].listed = ListedIn::RetryTime;
    }

    /// Transitions the winning slot LISTED -> UNLISTED, removing it
    /// from whichever index(es) currently hold it.
    fn take_winner(&mut self, slot: u32) -> (u32, UndoRequestInfo) {
        match self.arenas.requests[slot as usize].listed {
            ListedIn::FxidAndSize => {
                index::tree_remove(&mut self.arenas, Dim::Fxid, slot);
                index::tree_remove(&mut self.arenas, Dim::Size, slot);
            }
            ListedIn::RetryTime => {
                index::tree_remove(&mut self.arenas, Dim::Retry, slot);
            }
            ListedIn::Nowhere => bug("scheduler selected a request that is not LISTED"),
        }
        self.arenas.requests[slot as usize].listed = ListedIn::Nowhere;
        (slot, self.arenas.requests[slot as usize].info)
    }

    /// The dispatch algorithm: three probes rotating across
    /// byFxid/bySize/byRetryTime, falling back to an affinity scan only
    /// when every probe lost to a database mismatch and the caller
    /// hasn't signaled it wants to exit promptly.
    fn next(&mut self, dbid: Option<Dbid>, minimum_runtime_reached: bool) -> Option<(u32, UndoRequestInfo)> {
        let now = self.clock.now_millis();
        let mut saw_db_mismatch = false;

        for _ in 0..3 {
            let dim = self.cursor;
            self.cursor = dim.next();

            let candidate = match index::tree_leftmost(&self.arenas, dim) {
                Some(slot) => slot,
                None => continue,
            };

            if dim == Dim::Retry && self.arenas.requests[candidate as usize].retry_time > now {
                continue;
            }

            if let Some(filter) = dbid {
                if self.arenas.requests[candidate as usize].info.dbid != filter {
                    saw_db_mismatch = true;
                    continue;
                }
            }

            return Some(self.take_winner(candidate));
        }

        if saw_db_mismatch && !minimum_runtime_reached {
            if let Some(slot) = self.affinity_scan(dbid.expect("saw_db_mismatch implies a dbid filter"), now) {
                return Some(self.take_winner(slot));
            }
        }

        None
    }

    /// The affinity scan: an interleaved one-step-at-a-time walk of
    /// all three trees, returning the first request matching
    /// `dbid`. A byRetryTime candidate whose time hasn't arrived yet is
    /// skipped (not returned) without otherwise disturbing the scan, to
    /// preserve the "never returned before its retry time" guarantee
    /// that also holds for the fast-path probes.
    fn affinity_scan(&self, dbid: Dbid, now: u64) -> Option<u32> {
        let mut cursors = [
            index::TreeCursor::new(&self.arenas, Dim::Fxid),
            index::TreeCursor::new(&self.arenas, Dim::Size),
            index::TreeCursor::new(&self.arenas, Dim::Retry),
        ];
        let mut alive = [true, true, true];

        while alive.iter().any(|&a| a) {
            for (i, cursor) in cursors.iter_mut().enumerate() {
                if !alive[i] {
                    continue;
                }
                match cursor.advance(&self.arenas) {
                    Some(slot) => {
                        if i == 2 && self.arenas.requests[slot as usize].retry_time > now {
                            continue;
                        }
                        if self.arenas.requests[slot as usize].info.dbid == dbid {
                            return Some(slot);
                        }
                    }
                    None => alive[i] = false,
                }
            }
        }
        None
    }

    fn suspend_prepared(&mut self, fxid: Fxid) -> (u32, UndoRequestInfo) {
        let slot = index::find_by_fxid(&self.arenas, fxid)
            .unwrap_or_else(|| bug("suspendPrepared: fxid not found in byFxid"));

        let rec = &self.arenas.requests[slot as usize];
        if !matches!(rec.listed, ListedIn::FxidAndSize) {
            bug("suspendPrepared: request is not LISTED in byFxid/bySize");
        }
        if !rec.finalized {
            bug("suspendPrepared: request has not been finalized");
        }
        if rec.retry_time != NEVER_RETRIED {
            bug("suspendPrepared: request has failed since restart");
        }

        index::tree_remove(&mut self.arenas, Dim::Fxid, slot);
        index::tree_remove(&mut self.arenas, Dim::Size, slot);
        self.arenas.requests[slot as usize].listed = ListedIn::Nowhere;
        (slot, self.arenas.requests[slot as usize].info)
    }

    fn oldest_fxid(&mut self) -> Fxid {
        match self.oldest {
            OldestCache::Empty => Fxid::INVALID,
            OldestCache::Known(f) => f,
            OldestCache::Invalid => {
                let mut min: Option<Fxid> = None;
                for rec in &self.arenas.requests {
                    if !rec.is_free() {
                        min = Some(match min {
                            Some(m) if m <= rec.info.fxid => m,
                            _ => rec.info.fxid,
                        });
                    }
                }
                self.oldest = match min {
                    Some(f) => OldestCache::Known(f),
                    None => OldestCache::Empty,
                };
                min.unwrap_or(Fxid::INVALID)
            }
        }
    }

    fn serialize_bytes(&self) -> Bytes {
        let mut infos = Vec::new();
        let mut cursor = index::TreeCursor::new(&self.arenas, Dim::Fxid);
        while let Some(slot) = cursor.advance(&self.arenas) {
            infos.push(self.arenas.requests[slot as usize].info);
        }
        let mut cursor = index::TreeCursor::new(&self.arenas, Dim::Retry);
        while let Some(slot) = cursor.advance(&self.arenas) {
            infos.push(self.arenas.requests[slot as usize].info);
        }
        serialize::encode_all(&infos)
    }
}

/// The in-memory undo request manager.
///
/// Owns the arena storage and the single exclusive lock for the life of
/// the process. See the module docs for why this implementation takes
/// the lock directly rather than accepting one from the embedding.
pub struct UndoRequestManager {
    inner: Mutex<Inner>,
}

impl UndoRequestManager {
    /// Builds a manager over a real, monotonic wall-clock source.
    pub fn new(config: UndoManagerConfig) -> UndoResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Builds a manager over a caller-supplied clock. Primarily useful
    /// for tests that need to control retry-time gating deterministically.
    pub fn with_clock(config: UndoManagerConfig, clock: Arc<dyn UndoClock>) -> UndoResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(Inner::new(config, clock)),
        })
    }

    /// Bytes required for the manager's two arenas at this capacity.
    pub fn estimate_size(capacity: u32) -> usize {
        UndoManagerConfig::estimate_size(capacity)
    }

    /// Registers a new undo request for `fxid`/`dbid`. Returns `None`
    /// when the request pool is exhausted; this is the one normal-path
    /// soft failure in the whole API, and the caller is expected to
    /// degrade to foreground undo rather than treat it as an error.
    pub fn register(&self, fxid: Fxid, dbid: Dbid) -> Option<UndoRequestHandle> {
        if !fxid.is_valid() {
            bug("register called with the invalid fxid sentinel");
        }
        let mut inner = self.inner.lock();
        match inner.register(fxid, dbid) {
            Some(slot) => {
                tracing::debug!(fxid = fxid.0, dbid = dbid.0, "registered undo request");
                Some(UndoRequestHandle(slot))
            }
            None => {
                tracing::warn!(fxid = fxid.0, dbid = dbid.0, "undo request pool exhausted");
                None
            }
        }
    }

    /// Records the final size and undo-log pointer ranges for a
    /// request. Panics if `handle` is not currently UNLISTED-and-
    /// unfinalized, or if the payload violates the persistent-subset
    /// invariants (non-zero size, a matched-valid/invalid logged and
    /// unlogged range, at least one range valid).
    pub fn finalize(
        &self,
        handle: UndoRequestHandle,
        size: u64,
        start_logged: UndoRecPtr,
        end_logged: UndoRecPtr,
        start_unlogged: UndoRecPtr,
        end_unlogged: UndoRecPtr,
    ) {
        let mut inner = self.inner.lock();
        inner.finalize(handle.slot(), size, start_logged, end_logged, start_unlogged, end_unlogged);
    }

    /// Removes a request from tracking entirely. Infallible: called
    /// from commit and post-abort paths that cannot unwind.
    pub fn unregister(&self, handle: UndoRequestHandle) {
        let mut inner = self.inner.lock();
        inner.unregister(handle.slot());
        tracing::trace!(slot = handle.slot(), "unregistered undo request");
    }

    /// Attempts to hand a finalized request off to a background worker.
    /// Returns `false` when the pool is over its soft limit and `force`
    /// wasn't set, leaving the request UNLISTED for its owner to undo
    /// in the foreground instead. Infallible.
    pub fn perform_in_background(&self, handle: UndoRequestHandle, force: bool) -> bool {
        let mut inner = self.inner.lock();
        inner.perform_in_background(handle.slot(), force)
    }

    /// Dispatches the next eligible request to a background worker,
    /// optionally restricted to `dbid`.
    pub fn next(
        &self,
        dbid: Option<Dbid>,
        minimum_runtime_reached: bool,
    ) -> Option<(UndoRequestHandle, UndoRequestInfo)> {
        let mut inner = self.inner.lock();
        inner.next(dbid, minimum_runtime_reached).map(|(slot, info)| {
            tracing::trace!(slot, fxid = info.fxid.0, "dispatched undo request to worker");
            (UndoRequestHandle(slot), info)
        })
    }

    /// Puts a request that a worker failed to complete back on the
    /// byRetryTime queue with the next backoff delay applied. Infallible
    /// on the hot path; the one pathological precondition violation
    /// (calling this on a request that isn't UNLISTED) is treated as a
    /// bug rather than a recoverable error, since it can't happen
    /// through the normal worker lifecycle.
    pub fn reschedule(&self, handle: UndoRequestHandle) {
        let mut inner = self.inner.lock();
        inner.reschedule(handle.slot());
        tracing::debug!(slot = handle.slot(), "rescheduled undo request for retry");
    }

    /// Pulls a prepared-transaction's finalized request out of
    /// byFxid/bySize so it can be suspended across a shutdown instead of
    /// dispatched to a worker. Panics if `fxid` isn't found LISTED in
    /// byFxid/bySize, unfinalized, or already failed once since restart.
    pub fn suspend_prepared(&self, fxid: Fxid) -> (UndoRequestHandle, UndoRequestInfo) {
        let mut inner = self.inner.lock();
        let (slot, info) = inner.suspend_prepared(fxid);
        (UndoRequestHandle(slot), info)
    }

    /// The oldest fxid among all non-FREE requests. Returns
    /// `Fxid::INVALID` when no non-FREE request exists.
    pub fn oldest_fxid(&self) -> Fxid {
        self.inner.lock().oldest_fxid()
    }

    /// Count of non-FREE requests.
    pub fn utilization(&self) -> u32 {
        self.inner.lock().utilization
    }

    pub fn capacity(&self) -> u32 {
        self.inner.lock().capacity
    }

    /// Observable lifecycle state of `handle`'s slot.
    ///
    /// Note this reflects whatever currently occupies the slot: once a
    /// handle has been consumed by `unregister`, the slot may have been
    /// recycled for an unrelated request. The caller is responsible for
    /// not reusing a handle past its lifetime.
    pub fn state_of(&self, handle: UndoRequestHandle) -> RequestState {
        let inner = self.inner.lock();
        let rec = &inner.arenas.requests[handle.slot() as usize];
        if rec.is_free() {
            RequestState::Free
        } else if matches!(rec.listed, ListedIn::Nowhere) {
            RequestState::Unlisted
        } else {
            RequestState::Listed
        }
    }

    /// Encodes the persistent subset of every LISTED request into a
    /// byte blob suitable for [`Self::restore`].
    pub fn serialize(&self) -> Bytes {
        self.inner.lock().serialize_bytes()
    }

    /// Rebuilds a fresh manager from a [`Self::serialize`] blob, over a
    /// real clock.
    pub fn restore(config: UndoManagerConfig, bytes: &[u8]) -> UndoResult<Self> {
        Self::restore_with_clock(config, Arc::new(SystemClock::new()), bytes)
    }

    /// `restore(bytes)` into a fresh manager over a caller-supplied clock.
    pub fn restore_with_clock(
        config: UndoManagerConfig,
        clock: Arc<dyn UndoClock>,
        bytes: &[u8]
    ) -> UndoResult<Self> {
        config.validate()?;

        if bytes.len() % serialize::RECORD_WIDTH != 0 {
            return Err(UndoError::RestoreCorrupt {
                reason: format!(
                    "byte length {} is not a multiple of the record width {}",
                    bytes.len(),
                    serialize::RECORD_WIDTH
                ),
            });
        }
        let count = bytes.len() / serialize::RECORD_WIDTH;
        if count as u32 > config.capacity {
            return Err(UndoError::RestoreCorrupt {
                reason: format!("record count {} exceeds capacity {}", count, config.capacity),
            });
        }

        let mut inner = Inner::new(config, clock);
        let mut cursor: &[u8] = bytes;
        for _ in 0..count {
            let info = serialize::decode_record(&mut cursor);
            let slot = inner
                .arenas
                .alloc_request()
                .unwrap_or_else(|| bug("restore: request arena undersized despite capacity check"));

            let rec = &mut inner.arenas.requests[slot as usize];
            rec.info = info;
            rec.retry_time = NEVER_RETRIED;
            rec.finalized = true;
            rec.listed = ListedIn::Nowhere;
            inner.utilization += 1;

            index::tree_insert(&mut inner.arenas, Dim::Fxid, slot);
            index::tree_insert(&mut inner.arenas, Dim::Size, slot);
            inner.arenas.requests[slot as usize].listed = ListedIn::FxidAndSize;
        }
        inner.oldest = OldestCache::Invalid;

        tracing::debug!(count, "restored undo requests from snapshot");
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}
