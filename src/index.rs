//! The three ordered indexes over the active requests.
//!
//! byFxid, bySize, and byRetryTime are each an intrusive AVL tree built
//! directly over the shared node arena: node slots are drawn from
//! [`crate::arena::Arenas`] rather than separately heap-allocated, and a
//! request participates in at most two of the three trees at once,
//! which is exactly why the node arena is sized at `2 * capacity`.
//!
//! The comparators below admit no ties (every ordering tiebreaks on the
//! unique `fxid`), so a duplicate-key merge can never legitimately
//! arise; hitting one anyway is a [`crate::error::bug`].

use std::cmp::Ordering;

use crate::arena::{Arenas, RequestRecord};
use crate::types::{Dim, NONE};

fn root_of(arenas: &Arenas, dim: Dim) -> u32 {
    match dim {
        Dim::Fxid => arenas.root_fxid,
        Dim::Size => arenas.root_size,
        Dim::Retry => arenas.root_retry,
    }
}

fn set_root(arenas: &mut Arenas, dim: Dim, val: u32) {
    match dim {
        Dim::Fxid => arenas.root_fxid = val,
        Dim::Size => arenas.root_size = val,
        Dim::Retry => arenas.root_retry = val,
    }
}

fn node_field(rec: &RequestRecord, dim: Dim) -> u32 {
    match dim {
        Dim::Fxid => rec.node_fxid,
        Dim::Size => rec.node_size,
        Dim::Retry => rec.node_retry,
    }
}

fn set_node_field(rec: &mut RequestRecord, dim: Dim, val: u32) {
    match dim {
        Dim::Fxid => rec.node_fxid = val,
        Dim::Size => rec.node_size = val,
        Dim::Retry => rec.node_retry = val,
    }
}

/// byFxid: ascending fxid. bySize: descending size, ties (impossible)
/// broken by ascending fxid. byRetryTime: ascending retry time, ties
/// broken by ascending fxid.
fn compare(requests: &[RequestRecord], dim: Dim, a: u32, b: u32) -> Ordering {
    let (ra, rb) = (&requests[a as usize], &requests[b as usize]);
    match dim {
        Dim::Fxid => ra.info.fxid.cmp(&rb.info.fxid),
        Dim::Size => rb.info.size.cmp(&ra.info.size).then_with(|| ra.info.fxid.cmp(&rb.info.fxid)),
        Dim::Retry => ra.retry_time.cmp(&rb.retry_time).then_with(|| ra.info.fxid.cmp(&rb.info.fxid)),
    }
}

fn height(arenas: &Arenas, n: u32) -> i32 {
    if n == NONE {
        0
    } else {
        arenas.nodes[n as usize].height
    }
}

fn update_height(arenas: &mut Arenas, n: u32) {
    let l = height(arenas, arenas.nodes[n as usize].left);
    let r = height(arenas, arenas.nodes[n as usize].right);
    arenas.nodes[n as usize].height = 1 + l.max(r);
}

fn balance_factor(arenas: &Arenas, n: u32) -> i32 {
    height(arenas, arenas.nodes[n as usize].left) - height(arenas, arenas.nodes[n as usize].right)
}

fn rotate_left(arenas: &mut Arenas, dim: Dim, x: u32) -> u32 {
    let y = arenas.nodes[x as usize].right;
    let t2 = arenas.nodes[y as usize].left;

    arenas.nodes[y as usize].left = x;
    arenas.nodes[x as usize].right = t2;
    if t2 != NONE {
        arenas.nodes[t2 as usize].parent = x;
    }

    let x_parent = arenas.nodes[x as usize].parent;
    arenas.nodes[y as usize].parent = x_parent;
    arenas.nodes[x as usize].parent = y;

    if x_parent == NONE {
        set_root(arenas, dim, y);
    } else if arenas.nodes[x_parent as usize].left == x {
        arenas.nodes[x_parent as usize].left = y;
    } else {
        arenas.nodes[x_parent as usize].right = y;
    }

    update_height(arenas, x);
    update_height(arenas, y);
    y
}

fn rotate_right(arenas: &mut Arenas, dim: Dim, x: u32) -> u32 {
    let y = arenas.nodes[x as usize].left;
    let t2 = arenas.nodes[y as usize].right;

    arenas.nodes[y as usize].right = x;
    arenas.nodes[x as usize].left = t2;
    if t2 != NONE {
        arenas.nodes[t2 as usize].parent = x;
    }

    let x_parent = arenas.nodes[x as usize].parent;
    arenas.nodes[y as usize].parent = x_parent;
    arenas.nodes[x as usize].parent = y;

    if x_parent == NONE {
        set_root(arenas, dim, y);
    } else if arenas.nodes[x_parent as usize].left == x {
        arenas.nodes[x_parent as usize].left = y;
    } else {
        arenas.nodes[x_parent as usize].right = y;
    }

    update_height(arenas, x);
    update_height(arenas, y);
    y
}

fn rebalance_from(arenas: &mut Arenas, dim: Dim, mut n: u32) {
    while n != NONE {
        update_height(arenas, n);
        let bf = balance_factor(arenas, n);
        let new_subtree_root = if bf > 1 {
            let left = arenas.nodes[n as usize].left;
            if balance_factor(arenas, left) < 0 {
                rotate_left(arenas, dim, left);
            }
            rotate_right(arenas, dim, n)
        } else if bf < -1 {
            let right = arenas.nodes[n as usize].right;
            if balance_factor(arenas, right) > 0 {
                rotate_right(arenas, dim, right);
            }
            rotate_left(arenas, dim, n)
        } else {
            n
        };
        n = arenas.nodes[new_subtree_root as usize].parent;
    }
}

/// Inserts `slot` into the `dim` tree. Panics (via [`crate::error::bug`])
/// if `slot` is already indexed under `dim`, if its key ties with an
/// existing entry, or if the node arena is exhausted. All three are
/// impossible given `register`/`performInBackground`/`reschedule`'s own
/// bookkeeping and the `2 * capacity` node budget.
pub(crate) fn tree_insert(arenas: &mut Arenas, dim: Dim, slot: u32) {
    let root = root_of(arenas, dim);
    if root == NONE {
        let node = arenas
            .alloc_node(slot)
            .unwrap_or_else(|| crate::error::bug("index node arena exhausted"));
        set_root(arenas, dim, node);
        set_node_field(&mut arenas.requests[slot as usize], dim, node);
        return;
    }

    let mut cur = root;
    let (parent, went_left) = loop {
        let cur_slot = arenas.nodes[cur as usize].request_slot;
        match compare(&arenas.requests, dim, slot, cur_slot) {
            Ordering::Less => {
                let left = arenas.nodes[cur as usize].left;
                if left == NONE {
                    break (cur, true);
                }
                cur = left;
            }
            Ordering::Greater => {
                let right = arenas.nodes[cur as usize].right;
                if right == NONE {
                    break (cur, false);
                }
                cur = right;
            }
            Ordering::Equal => crate::error::bug("duplicate key inserted into ordered index"),
        }
    };

    let node = arenas
        .alloc_node(slot)
        .unwrap_or_else(|| crate::error::bug("index node arena exhausted"));
    arenas.nodes[node as usize].parent = parent;
    if went_left {
        arenas.nodes[parent as usize].left = node;
    } else {
        arenas.nodes[parent as usize].right = node;
    }
    set_node_field(&mut arenas.requests[slot as usize], dim, node);
    rebalance_from(arenas, dim, parent);
}

/// Removes `slot` from the `dim` tree. Panics if `slot` is not
/// currently indexed under `dim`.
pub(crate) fn tree_remove(arenas: &mut Arenas, dim: Dim, slot: u32) {
    let node = node_field(&arenas.requests[slot as usize], dim);
    if node == NONE {
        crate::error::bug("attempted to remove a request that is not in this index");
    }

    let left = arenas.nodes[node as usize].left;
    let right = arenas.nodes[node as usize].right;

    let (node_to_free, rebalance_start) = if left != NONE && right != NONE {
        let mut succ = right;
        while arenas.nodes[succ as usize].left != NONE {
            succ = arenas.nodes[succ as usize].left;
        }
        let succ_request_slot = arenas.nodes[succ as usize].request_slot;

        arenas.nodes[node as usize].request_slot = succ_request_slot;
        set_node_field(&mut arenas.requests[succ_request_slot as usize], dim, node);

        let succ_parent = arenas.nodes[succ as usize].parent;
        let succ_right = arenas.nodes[succ as usize].right;
        if succ_right != NONE {
            arenas.nodes[succ_right as usize].parent = succ_parent;
        }
        if arenas.nodes[succ_parent as usize].left == succ {
            arenas.nodes[succ_parent as usize].left = succ_right;
        } else {
            arenas.nodes[succ_parent as usize].right = succ_right;
        }

        (succ, succ_parent)
    } else {
        let child = if left != NONE { left } else { right };
        let parent = arenas.nodes[node as usize].parent;
        if child != NONE {
            arenas.nodes[child as usize].parent = parent;
        }
        if parent == NONE {
            set_root(arenas, dim, child);
        } else if arenas.nodes[parent as usize].left == node {
            arenas.nodes[parent as usize].left = child;
        } else {
            arenas.nodes[parent as usize].right = child;
        }
        (node, parent)
    };

    set_node_field(&mut arenas.requests[slot as usize], dim, NONE);
    arenas.free_node(node_to_free);
    rebalance_from(arenas, dim, rebalance_start);
}

/// Looks up a request slot in byFxid by its fxid value directly,
/// without already holding a slot to compare against. `suspendPrepared`
/// is the one caller that needs this: it is handed a bare fxid rather
/// than a handle.
pub(crate) fn find_by_fxid(arenas: &Arenas, fxid: crate::types::Fxid) -> Option<u32> {
    let mut cur = arenas.root_fxid;
    while cur != NONE {
        let cur_slot = arenas.nodes[cur as usize].request_slot;
        let cur_fxid = arenas.requests[cur_slot as usize].info.fxid;
        cur = match fxid.cmp(&cur_fxid) {
            Ordering::Less => arenas.nodes[cur as usize].left,
            Ordering::Greater => arenas.nodes[cur as usize].right,
            Ordering::Equal => return Some(cur_slot),
        };
    }
    None
}

/// The leftmost (highest-priority) request slot in the `dim` tree.
pub(crate) fn tree_leftmost(arenas: &Arenas, dim: Dim) -> Option<u32> {
    let mut cur = root_of(arenas, dim);
    if cur == NONE {
        return None;
    }
    while arenas.nodes[cur as usize].left != NONE {
        cur = arenas.nodes[cur as usize].left;
    }
    Some(arenas.nodes[cur as usize].request_slot)
}

/// An in-order cursor over one tree, used by the affinity scan to walk
/// all three trees with interleaved steps without materializing any of
/// them.
pub(crate) struct TreeCursor {
    stack: Vec<u32>,
}

impl TreeCursor {
    pub(crate) fn new(arenas: &Arenas, dim: Dim) -> Self {
        let mut stack = Vec::new();
        let mut cur = root_of(arenas, dim);
        while cur != NONE {
            stack.push(cur);
            cur = arenas.nodes[cur as usize].left;
        }
        Self { stack }
    }

    /// Advances to and returns the next request slot in ascending
    /// priority order, or `None` once this tree is exhausted.
    pub(crate) fn advance(&mut self, arenas: &Arenas) -> Option<u32> {
        let node = self.stack.pop()?;
        let mut cur = arenas.nodes[node as usize].right;
        while cur != NONE {
            self.stack.push(cur);
            cur = arenas.nodes[cur as usize].left;
        }
        Some(arenas.nodes[node as usize].request_slot)
    }
}
