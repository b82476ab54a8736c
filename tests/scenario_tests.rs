//! Integration tests for the six literal scenarios and the
//! universally-quantified invariants covering the undo request manager's
//! external API.

use std::sync::Arc;

use rustydb_undo::{
    Dbid, Fxid, ManualClock, RequestState, UndoManagerConfig, UndoRecPtr, UndoRequestManager,
};

fn manager(capacity: u32, soft_limit: u32) -> (UndoRequestManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let mgr = UndoRequestManager::with_clock(UndoManagerConfig::new(capacity, soft_limit), clock.clone())
        .expect("valid config");
    (mgr, clock)
}

#[test]
fn scenario_1_register_commit_round_trip() {
    let (mgr, _clock) = manager(8, 8);

    let handle = mgr.register(Fxid(100), Dbid(5)).expect("pool has room");
    assert_eq!(mgr.utilization(), 1);
    assert_eq!(mgr.state_of(handle), RequestState::Unlisted);

    mgr.unregister(handle);
    assert_eq!(mgr.utilization(), 0);
    assert_eq!(mgr.oldest_fxid(), Fxid::INVALID);
}

#[test]
fn scenario_2_finalize_then_background_promotion_under_headroom() {
    let (mgr, _clock) = manager(8, 6);

    let handle = mgr.register(Fxid(1), Dbid(1)).unwrap();
    mgr.finalize(handle, 1000, UndoRecPtr(10), UndoRecPtr(20), UndoRecPtr::INVALID, UndoRecPtr::INVALID);

    assert!(mgr.perform_in_background(handle, false));
    assert_eq!(mgr.state_of(handle), RequestState::Listed);

    // It must come back out via next() on the Fxid dimension (the only
    // populated one), confirming it landed in byFxid/bySize and not
    // byRetryTime.
    let (won, info) = mgr.next(None, false).expect("one listed request");
    assert_eq!(won, handle);
    assert_eq!(info.fxid, Fxid(1));
}

#[test]
fn scenario_3_soft_limit_enforcement() {
    let (mgr, _clock) = manager(8, 2);

    // Bring utilization to 3 via three independent registrations.
    let a = mgr.register(Fxid(1), Dbid(1)).unwrap();
    mgr.register(Fxid(2), Dbid(1)).unwrap();
    mgr.register(Fxid(3), Dbid(1)).unwrap();
    assert_eq!(mgr.utilization(), 3);

    mgr.finalize(a, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(!mgr.perform_in_background(a, false));
    assert!(mgr.perform_in_background(a, true));
}

#[test]
fn scenario_4_round_robin_scheduling() {
    let (mgr, _clock) = manager(8, 8);

    let a = mgr.register(Fxid(10), Dbid(1)).unwrap();
    mgr.finalize(a, 100, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(mgr.perform_in_background(a, false));

    let b = mgr.register(Fxid(20), Dbid(1)).unwrap();
    mgr.finalize(b, 500, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(mgr.perform_in_background(b, false));

    let c = mgr.register(Fxid(30), Dbid(1)).unwrap();
    mgr.finalize(c, 300, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(mgr.perform_in_background(c, false));

    let (first, info1) = mgr.next(None, false).unwrap();
    assert_eq!(first, a);
    assert_eq!(info1.fxid, Fxid(10));

    let (second, info2) = mgr.next(None, false).unwrap();
    assert_eq!(second, b);
    assert_eq!(info2.fxid, Fxid(20));

    let (third, info3) = mgr.next(None, false).unwrap();
    assert_eq!(third, c);
    assert_eq!(info3.fxid, Fxid(30));

    assert!(mgr.next(None, false).is_none());
}

#[test]
fn scenario_5_retry_backoff() {
    let (mgr, clock) = manager(8, 8);

    let handle = mgr.register(Fxid(1), Dbid(1)).unwrap();
    mgr.finalize(handle, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(mgr.perform_in_background(handle, false));

    let (won, _) = mgr.next(None, false).expect("listed request available");
    assert_eq!(won, handle);

    clock.set(0);
    mgr.reschedule(won);

    clock.set(5_000);
    assert!(mgr.next(None, false).is_none());

    clock.set(11_000);
    let (won_again, _) = mgr.next(None, false).expect("retry time has arrived");
    assert_eq!(won_again, handle);

    clock.set(11_000);
    mgr.reschedule(won_again);
    let (won_third, _) = {
        clock.set(41_001); // 11_000 + 30_000 + 1
        mgr.next(None, false).expect("second retry has arrived")
    };
    assert_eq!(won_third, handle);
}

#[test]
fn scenario_6_serialize_restore_round_trip() {
    let (mgr, clock) = manager(8, 8);

    let a = mgr.register(Fxid(1), Dbid(3)).unwrap();
    mgr.finalize(a, 200, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(mgr.perform_in_background(a, false));

    let b = mgr.register(Fxid(2), Dbid(4)).unwrap();
    mgr.finalize(b, 50, UndoRecPtr(5), UndoRecPtr(6), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    assert!(mgr.perform_in_background(b, false));
    let (won, _) = mgr.next(None, false).unwrap();
    assert_eq!(won, b);
    clock.set(1_000);
    mgr.reschedule(won);

    let bytes = mgr.serialize();
    let restored = UndoRequestManager::restore(UndoManagerConfig::new(8, 8), &bytes).unwrap();

    assert_eq!(restored.utilization(), 2);
    let mut seen = Vec::new();
    while let Some((handle, info)) = restored.next(None, false) {
        seen.push(info);
        let _ = handle;
    }
    seen.sort_by_key(|i| i.fxid.0);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].fxid, Fxid(1));
    assert_eq!(seen[0].size, 200);
    assert_eq!(seen[1].fxid, Fxid(2));
    assert_eq!(seen[1].size, 50);
}

#[test]
fn scheduler_fairness_three_distinct_sources_when_all_populated() {
    let (mgr, clock) = manager(8, 8);

    let a = mgr.register(Fxid(1), Dbid(1)).unwrap();
    mgr.finalize(a, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    mgr.perform_in_background(a, false);

    let b = mgr.register(Fxid(2), Dbid(1)).unwrap();
    mgr.finalize(b, 9999, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    mgr.perform_in_background(b, false);
    let (b_handle, _) = mgr.next(None, false).unwrap();
    clock.set(0);
    mgr.reschedule(b_handle);

    let c = mgr.register(Fxid(3), Dbid(1)).unwrap();
    mgr.finalize(c, 1, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    mgr.perform_in_background(c, false);

    clock.set(20_000);
    let (first, _) = mgr.next(None, false).unwrap();
    let (second, _) = mgr.next(None, false).unwrap();
    let (third, _) = mgr.next(None, false).unwrap();
    let mut won = vec![first, second, third];
    won.sort_by_key(|h| format!("{:?}", h));
    let mut expected = vec![a, b_handle, c];
    expected.sort_by_key(|h| format!("{:?}", h));
    assert_eq!(won, expected);
}

#[test]
fn retry_time_in_the_future_is_never_returned() {
    let (mgr, clock) = manager(4, 4);

    let handle = mgr.register(Fxid(1), Dbid(1)).unwrap();
    mgr.finalize(handle, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    mgr.perform_in_background(handle, false);
    let (won, _) = mgr.next(None, false).unwrap();
    clock.set(0);
    mgr.reschedule(won);

    clock.set(9_999);
    assert!(mgr.next(None, false).is_none());
}

#[test]
fn register_unregister_returns_arena_to_prior_state() {
    let (mgr, _clock) = manager(4, 4);
    assert_eq!(mgr.capacity(), 4);

    let mut handles = Vec::new();
    for i in 1..=4 {
        handles.push(mgr.register(Fxid(i), Dbid(1)).expect("room"));
    }
    assert!(mgr.register(Fxid(99), Dbid(1)).is_none());

    for h in handles {
        mgr.unregister(h);
    }
    assert_eq!(mgr.utilization(), 0);

    for i in 1..=4 {
        assert!(mgr.register(Fxid(i), Dbid(1)).is_some());
    }
}

#[test]
fn perform_in_background_with_no_undo_unregisters_immediately() {
    let (mgr, _clock) = manager(4, 4);
    let handle = mgr.register(Fxid(1), Dbid(1)).unwrap();
    // A freshly-registered, not-yet-finalized request already reports no
    // undo (both ranges default to INVALID), matching the transaction
    // that wrote nothing durable and commits without ever finalizing.
    assert!(mgr.perform_in_background(handle, false));
    assert_eq!(mgr.utilization(), 0);
}

#[test]
fn affinity_scan_finds_matching_dbid_past_failed_probes() {
    let (mgr, _clock) = manager(8, 8);

    // Populate byFxid/bySize with three requests in a different database
    // than the one the caller is looking for, so all three probes miss.
    for i in 1..=3u64 {
        let h = mgr.register(Fxid(i), Dbid(1)).unwrap();
        mgr.finalize(h, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
        mgr.perform_in_background(h, false);
    }
    // A fourth request, further back in byFxid order, matches dbid 2.
    let target = mgr.register(Fxid(4), Dbid(2)).unwrap();
    mgr.finalize(target, 5, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    mgr.perform_in_background(target, false);

    let (won, info) = mgr
        .next(Some(Dbid(2)), false)
        .expect("affinity scan should find the dbid-2 request");
    assert_eq!(won, target);
    assert_eq!(info.dbid, Dbid(2));
}

#[test]
fn affinity_scan_skipped_when_minimum_runtime_reached() {
    let (mgr, _clock) = manager(8, 8);
    for i in 1..=3u64 {
        let h = mgr.register(Fxid(i), Dbid(1)).unwrap();
        mgr.finalize(h, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
        mgr.perform_in_background(h, false);
    }
    assert!(mgr.next(Some(Dbid(2)), true).is_none());
}

#[test]
fn suspend_prepared_returns_request_to_unlisted() {
    let (mgr, _clock) = manager(4, 4);
    let handle = mgr.register(Fxid(7), Dbid(1)).unwrap();
    mgr.finalize(handle, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
    mgr.perform_in_background(handle, false);

    let (got, info) = mgr.suspend_prepared(Fxid(7));
    assert_eq!(got, handle);
    assert_eq!(info.fxid, Fxid(7));
    assert_eq!(mgr.state_of(handle), RequestState::Unlisted);
}

#[test]
fn restore_rejects_misaligned_byte_length() {
    let err = UndoRequestManager::restore(UndoManagerConfig::new(4, 4), &[0u8; 7]);
    assert!(err.is_err());
}

#[test]
fn restore_rejects_record_count_exceeding_capacity() {
    let mgr = UndoRequestManager::new(UndoManagerConfig::new(8, 8)).unwrap();
    for i in 1..=3u64 {
        let h = mgr.register(Fxid(i), Dbid(1)).unwrap();
        mgr.finalize(h, 10, UndoRecPtr(1), UndoRecPtr(2), UndoRecPtr::INVALID, UndoRecPtr::INVALID);
        mgr.perform_in_background(h, false);
    }
    let bytes = mgr.serialize();

    let err = UndoRequestManager::restore(UndoManagerConfig::new(2, 2), &bytes);
    assert!(err.is_err());
}
