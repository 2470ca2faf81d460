//! Tests for slot allocation, release and dispatch

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Callback, Occupant, SlotTable, SlotToken, TimerId, UserContext, in_dispatch};
use crate::error::TimerError;

fn noop() -> Callback {
    Arc::new(|_: TimerId, _: &UserContext| {})
}

fn counting(counter: &Arc<AtomicUsize>) -> Callback {
    let counter = Arc::clone(counter);
    Arc::new(move |_: TimerId, _: &UserContext| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn explode(_: TimerId, _: &UserContext) {
    panic!("callback failure");
}

fn occupant(native: u32, callback: Callback) -> Occupant<u32> {
    Occupant {
        native,
        interval_ms: 100,
        callback,
        context: Arc::new(()),
    }
}

/// Claim and occupy the next free slot
fn fill(table: &SlotTable<u32>, native: u32, callback: Callback) -> SlotToken {
    let slots = table.lock();
    let token = slots.claim().expect("free slot");
    slots.occupy(token, occupant(native, callback));
    token
}

#[test]
fn test_allocation_is_first_fit_and_unique() {
    let table = SlotTable::new(8);

    let ids: Vec<TimerId> = (0..8).map(|n| fill(&table, n, noop()).id()).collect();
    assert_eq!(ids, (0..8).map(TimerId::new).collect::<Vec<_>>());

    table.lock().release(TimerId::new(3)).expect("release");
    table.lock().release(TimerId::new(5)).expect("release");

    assert_eq!(table.lock().allocate_id().unwrap(), TimerId::new(3));
    assert_eq!(fill(&table, 99, noop()).id(), TimerId::new(3));
    assert_eq!(fill(&table, 98, noop()).id(), TimerId::new(5));
}

#[test]
fn test_allocate_does_not_occupy() {
    let table: SlotTable<u32> = SlotTable::new(4);
    let slots = table.lock();

    let first = slots.allocate_id().unwrap();
    let second = slots.allocate_id().unwrap();
    assert_eq!(first, second);
    assert!(!slots.is_occupied(first));
}

#[test]
fn test_full_table_reports_capacity_exceeded() {
    let table = SlotTable::new(2);
    fill(&table, 1, noop());
    fill(&table, 2, noop());

    let err = table.lock().claim().unwrap_err();
    assert!(matches!(err, TimerError::CapacityExceeded { capacity: 2 }));
    assert_eq!(err.status(), 5);
    assert_eq!(table.active().len(), 2);
}

#[test]
fn test_release_rejects_bad_ids_without_mutation() {
    let table = SlotTable::new(4);
    let token = fill(&table, 7, noop());

    let out_of_range = table.lock().release(TimerId::new(4)).unwrap_err();
    assert!(matches!(out_of_range, TimerError::InvalidId { capacity: 4, .. }));

    let never_created = table.lock().release(TimerId::new(2)).unwrap_err();
    assert!(matches!(never_created, TimerError::NotActive { .. }));

    assert_eq!(table.lock().release(token.id()).unwrap(), Some(7));
    let twice = table.lock().release(token.id()).unwrap_err();
    assert!(matches!(twice, TimerError::NotActive { .. }));
    assert!(table.active().is_empty());
}

#[test]
fn test_dispatch_passes_id_and_context() {
    let table = SlotTable::new(4);
    fill(&table, 0, noop());

    let context: UserContext = Arc::new(String::from("payload"));
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let callback: Callback = {
        let seen = Arc::clone(&seen);
        let expected = Arc::clone(&context);
        Arc::new(move |id: TimerId, context: &UserContext| {
            assert!(Arc::ptr_eq(context, &expected));
            assert_eq!(context.downcast_ref::<String>().unwrap(), "payload");
            seen.store(id.index(), Ordering::SeqCst);
        })
    };

    let slots = table.lock();
    let token = slots.claim().unwrap();
    slots.occupy(
        token,
        Occupant {
            native: 1,
            interval_ms: 50,
            callback,
            context,
        },
    );
    drop(slots);

    assert!(table.dispatch(token).unwrap());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispatch_out_of_range_is_rejected() {
    let table: SlotTable<u32> = SlotTable::new(4);
    let err = table.dispatch(SlotToken::new(9, 1)).unwrap_err();
    assert!(matches!(err, TimerError::InvalidId { .. }));
}

#[test]
fn test_stale_token_is_not_dispatched_to_new_occupant() {
    let table = SlotTable::new(1);
    let old_hits = Arc::new(AtomicUsize::new(0));
    let new_hits = Arc::new(AtomicUsize::new(0));

    let old = fill(&table, 1, counting(&old_hits));
    table.lock().release(old.id()).unwrap();
    assert!(!table.dispatch(old).unwrap());

    let new = fill(&table, 2, counting(&new_hits));
    assert_eq!(new.id(), old.id());
    assert_ne!(new.generation(), old.generation());

    assert!(!table.dispatch(old).unwrap());
    assert!(table.dispatch(new).unwrap());
    assert_eq!(old_hits.load(Ordering::SeqCst), 0);
    assert_eq!(new_hits.load(Ordering::SeqCst), 1);

    let stats = table.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.stale, 2);
}

#[test]
fn test_dispatch_matching_checks_native_handle() {
    let table = SlotTable::new(2);
    let hits = Arc::new(AtomicUsize::new(0));
    let token = fill(&table, 42, counting(&hits));

    assert!(!table.dispatch_matching(token.id(), |native| *native == 41).unwrap());
    assert!(table.dispatch_matching(token.id(), |native| *native == 42).unwrap());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_callback_can_release_its_own_slot() {
    let table = Arc::new(SlotTable::new(2));
    let weak = Arc::downgrade(&table);
    let callback: Callback = Arc::new(move |id: TimerId, _: &UserContext| {
        assert!(in_dispatch());
        if let Some(table) = weak.upgrade() {
            table.lock().release(id).expect("reentrant release");
        }
    });
    let token = fill(&table, 5, callback);

    assert!(!in_dispatch());
    assert!(table.dispatch(token).unwrap());
    assert!(!table.lock().is_occupied(token.id()));
    assert!(!table.dispatch(token).unwrap());
}

#[test]
fn test_panicking_callback_leaves_table_usable() {
    let table = SlotTable::new(2);
    let token = fill(&table, 1, Arc::new(explode));

    assert!(table.dispatch(token).unwrap());
    assert!(!in_dispatch());
    assert_eq!(table.lock().release(token.id()).unwrap(), Some(1));
}

#[test]
fn test_release_all_closes_and_deletes_each_timer() {
    let table = SlotTable::new(4);
    fill(&table, 10, noop());
    fill(&table, 11, noop());
    fill(&table, 12, noop());
    table.lock().release(TimerId::new(1)).unwrap();

    let mut released = Vec::new();
    table
        .release_all(|id| {
            let native = table.lock().release(id)?;
            released.push(native);
            Ok(())
        })
        .unwrap();

    assert_eq!(released, vec![Some(10), Some(12)]);
    assert!(table.active().is_empty());
    assert!(!table.lock().is_open());
    assert!(matches!(table.lock().claim(), Err(TimerError::Finalized)));
}

#[test]
fn test_release_all_reports_first_failure_and_continues() {
    let table = SlotTable::new(3);
    fill(&table, 1, noop());
    fill(&table, 2, noop());

    let mut attempts = 0;
    let result = table.release_all(|id| {
        attempts += 1;
        Err(TimerError::NotActive { id })
    });

    assert_eq!(attempts, 2);
    assert!(matches!(result, Err(TimerError::NotActive { id }) if id == TimerId::new(0)));
}

#[test]
fn test_token_survives_word_packing() {
    let token = SlotToken::new(63, 12345);
    let unpacked = SlotToken::from_bits(token.to_bits());
    assert_eq!(unpacked, token);
    assert_ne!(token.to_bits(), 0);
}
