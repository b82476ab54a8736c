//! Fixed-size arena pools.
//!
//! Two arrays are sized once at construction and never grown: one of
//! `capacity` request records, one of `2 * capacity` index-node
//! records (the tight upper bound, since a LISTED request occupies at
//! most two trees at once). Each pool threads its free slots onto an
//! intrusive singly-linked free-list. The link lives in a field of the
//! slot itself rather than in a side structure, the same shape as the
//! embedded-pointer free-lists in `memory::allocator::slab_allocator`,
//! just expressed as arena indices instead of raw pointers (there are
//! no raw pointers anywhere in this crate).

use crate::types::{Dbid, Fxid, ListedIn, UndoRequestInfo, NEVER_RETRIED, NONE};

/// One request slot: the persistent payload plus the in-memory extras
/// and index-tree bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct RequestRecord {
    pub(crate) info: UndoRequestInfo,
    /// Monotonic retry time, or `NEVER_RETRIED` if this request has
    /// never failed.
    pub(crate) retry_time: u64,
    /// Set once `finalize` has been called; guards against finalizing
    /// an already-finalized slot.
    pub(crate) finalized: bool,
    /// Which tree(s) this slot currently participates in.
    pub(crate) listed: ListedIn,
    /// Node-arena slot for this request in byFxid, or `NONE`.
    pub(crate) node_fxid: u32,
    /// Node-arena slot for this request in bySize, or `NONE`.
    pub(crate) node_size: u32,
    /// Node-arena slot for this request in byRetryTime, or `NONE`.
    pub(crate) node_retry: u32,
    /// Free-list link, meaningful only while `info.fxid` is invalid.
    next_free: u32,
}

impl RequestRecord {
    fn free() -> Self {
        Self {
            info: UndoRequestInfo::empty(Fxid::INVALID, Dbid(0)),
            retry_time: NEVER_RETRIED,
            finalized: false,
            listed: ListedIn::Nowhere,
            node_fxid: NONE,
            node_size: NONE,
            node_retry: NONE,
            next_free: NONE,
        }
    }

    pub(crate) fn is_free(&self) -> bool {
        !self.info.fxid.is_valid()
    }
}

/// One node in one of the three ordered index trees.
///
/// A node's identity as "which tree" is implicit: it is only ever
/// reachable by walking from that tree's root, via the `request_slot`'s
/// `node_fxid`/`node_size`/`node_retry` field.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexNode {
    pub(crate) request_slot: u32,
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) parent: u32,
    pub(crate) height: i32,
    next_free: u32,
}

impl IndexNode {
    fn free() -> Self {
        Self {
            request_slot: NONE,
            left: NONE,
            right: NONE,
            parent: NONE,
            height: 0,
            next_free: NONE,
        }
    }
}

/// The two arenas plus the three tree roots, all behind the manager's
/// single lock.
pub(crate) struct Arenas {
    pub(crate) requests: Vec<RequestRecord>,
    pub(crate) nodes: Vec<IndexNode>,
    free_requests: u32,
    free_nodes: u32,
    pub(crate) root_fxid: u32,
    pub(crate) root_size: u32,
    pub(crate) root_retry: u32,
}

impl Arenas {
    pub(crate) fn new(capacity: u32) -> Self {
        let node_capacity = capacity as usize * 2;

        let mut requests = Vec::with_capacity(capacity as usize);
        for i in 0..capacity {
            let mut rec = RequestRecord::free();
            rec.next_free = if i + 1 < capacity { i + 1 } else { NONE };
            requests.push(rec);
        }

        let mut nodes = Vec::with_capacity(node_capacity);
        for i in 0..node_capacity as u32 {
            let mut node = IndexNode::free();
            node.next_free = if i + 1 < node_capacity as u32 { i + 1 } else { NONE };
            nodes.push(node);
        }

        Self {
            requests,
            nodes,
            free_requests: if capacity > 0 { 0 } else { NONE },
            free_nodes: if node_capacity > 0 { 0 } else { NONE },
            root_fxid: NONE,
            root_size: NONE,
            root_retry: NONE,
        }
    }

    pub(crate) fn estimate_size(capacity: u32) -> usize {
        let request_bytes = capacity as usize * std::mem::size_of::<RequestRecord>();
        let node_bytes = capacity as usize * 2 * std::mem::size_of::<IndexNode>();
        std::mem::size_of::<Self>() + request_bytes + node_bytes
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.requests.len() as u32
    }

    /// Pops a FREE request slot, or `None` if the pool is exhausted.
    /// This is `register`'s soft-failure path, not an error.
    pub(crate) fn alloc_request(&mut self) -> Option<u32> {
        if self.free_requests == NONE {
            return None;
        }
        let slot = self.free_requests;
        self.free_requests = self.requests[slot as usize].next_free;
        Some(slot)
    }

    pub(crate) fn free_request(&mut self, slot: u32) {
        let rec = &mut self.requests[slot as usize];
        *rec = RequestRecord::free();
        rec.next_free = self.free_requests;
        self.free_requests = slot;
    }

    /// Pops a free index-node slot. Exhaustion here is structurally
    /// impossible given the `2 * capacity` budget (at most two tree
    /// memberships per request); callers upstream (`index::tree_insert`)
    /// escalate a `None` here to [`crate::error::bug`].
    pub(crate) fn alloc_node(&mut self, request_slot: u32) -> Option<u32> {
        if self.free_nodes == NONE {
            return None;
        }
        let slot = self.free_nodes;
        self.free_nodes = self.nodes[slot as usize].next_free;
        let node = &mut self.nodes[slot as usize];
        node.request_slot = request_slot;
        node.left = NONE;
        node.right = NONE;
        node.parent = NONE;
        node.height = 1;
        Some(slot)
    }

    pub(crate) fn free_node(&mut self, slot: u32) {
        let node = &mut self.nodes[slot as usize];
        *node = IndexNode::free();
        node.next_free = self.free_nodes;
        self.free_nodes = slot;
    }
}
