//! Fixed-capacity slot table shared by every backend
//!
//! The table owns id allocation and the single dispatch path. Every access
//! goes through one reentrant lock, so a timer callback may create or delete
//! timers from the thread that is dispatching it.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{error, warn};

use super::slot::{Occupant, Slot, SlotToken, TimerId, TimerInfo, TimerStats, next_generation};
use crate::error::{Result, TimerError};

struct TableState<H> {
    slots: Box<[Slot<H>]>,
    /// Cleared by finalize; no new timers are accepted afterwards
    open: bool,
}

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is running a timer callback
pub fn in_dispatch() -> bool {
    DISPATCH_DEPTH.with(|depth| depth.get() > 0)
}

struct DispatchScope;

impl DispatchScope {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Pool of timer records, generic over the backend's native handle type.
pub struct SlotTable<H> {
    state: ReentrantMutex<RefCell<TableState<H>>>,
    capacity: usize,
    dispatched: AtomicU64,
    stale: AtomicU64,
}

impl<H> SlotTable<H> {
    /// Allocate all `capacity` slots up front. Storage never moves afterwards.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot::vacant()).collect();
        Self {
            state: ReentrantMutex::new(RefCell::new(TableState { slots, open: true })),
            capacity,
            dispatched: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire the table lock. Reentrant on the owning thread.
    pub fn lock(&self) -> SlotLock<'_, H> {
        SlotLock {
            guard: self.state.lock(),
            capacity: self.capacity,
        }
    }

    /// Invoke the callback of the timer `token` was issued for.
    ///
    /// Returns `Ok(false)` when the slot was released or re-claimed since the
    /// token was issued.
    pub fn dispatch(&self, token: SlotToken) -> Result<bool> {
        self.dispatch_slot(token.id(), |slot| slot.generation == token.generation())
    }

    /// Invoke the callback of `id` if its native handle passes `accept`.
    pub fn dispatch_matching(&self, id: TimerId, accept: impl FnOnce(&H) -> bool) -> Result<bool> {
        self.dispatch_slot(id, |slot| slot.native.as_ref().is_some_and(accept))
    }

    fn dispatch_slot(&self, id: TimerId, accept: impl FnOnce(&Slot<H>) -> bool) -> Result<bool> {
        if id.index() >= self.capacity {
            return Err(TimerError::InvalidId {
                id,
                capacity: self.capacity,
            });
        }

        // The guard stays held while the callback runs; only the RefCell
        // borrow is released so the callback can reenter the table.
        let guard = self.state.lock();
        let target = {
            let state = guard.borrow();
            let slot = &state.slots[id.index()];
            if slot.occupied && accept(slot) {
                slot.callback.clone().zip(slot.context.clone())
            } else {
                None
            }
        };

        let Some((callback, context)) = target else {
            self.stale.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        };

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let _scope = DispatchScope::enter();
        if panic::catch_unwind(AssertUnwindSafe(|| callback(id, &context))).is_err() {
            error!(%id, "timer callback panicked");
        }
        drop(guard);
        Ok(true)
    }

    /// Stop accepting timers and delete every occupied one through `delete`.
    ///
    /// Keeps going after a failed delete and reports the first failure.
    pub fn release_all(&self, mut delete: impl FnMut(TimerId) -> Result<()>) -> Result<()> {
        let slots = self.lock();
        slots.close();

        let mut first_error = None;
        for id in slots.occupied_ids() {
            if let Err(e) = delete(id) {
                warn!(%id, error = %e, "failed to release timer");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Occupied slots in id order
    pub fn active(&self) -> Vec<TimerInfo> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.occupied)
            .map(|(index, slot)| TimerInfo {
                id: TimerId::new(index),
                interval_ms: slot.interval_ms,
            })
            .collect()
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            dropped: 0,
        }
    }
}

/// Held table lock. Each method borrows the table only for its own duration.
pub struct SlotLock<'a, H> {
    guard: ReentrantMutexGuard<'a, RefCell<TableState<H>>>,
    capacity: usize,
}

impl<H> SlotLock<'_, H> {
    pub fn is_open(&self) -> bool {
        self.guard.borrow().open
    }

    pub fn close(&self) {
        self.guard.borrow_mut().open = false;
    }

    /// Lowest unoccupied index. Does not mark it occupied.
    pub fn allocate_id(&self) -> Result<TimerId> {
        let state = self.guard.borrow();
        if !state.open {
            return Err(TimerError::Finalized);
        }
        state
            .slots
            .iter()
            .position(|slot| !slot.occupied)
            .map(TimerId::new)
            .ok_or(TimerError::CapacityExceeded {
                capacity: self.capacity,
            })
    }

    /// Allocate an id and the generation it will be occupied under
    pub fn claim(&self) -> Result<SlotToken> {
        let id = self.allocate_id()?;
        let generation = next_generation(self.guard.borrow().slots[id.index()].generation);
        Ok(SlotToken::new(id.index(), generation))
    }

    pub(crate) fn occupy(&self, token: SlotToken, occupant: Occupant<H>) {
        let mut state = self.guard.borrow_mut();
        let slot = &mut state.slots[token.index()];
        debug_assert!(!slot.occupied, "slot {} claimed twice", token.index());

        slot.native = Some(occupant.native);
        slot.interval_ms = occupant.interval_ms;
        slot.callback = Some(occupant.callback);
        slot.context = Some(occupant.context);
        slot.generation = token.generation();
        slot.occupied = true;
    }

    /// Mark `id` unoccupied and hand its native handle back to the backend
    pub fn release(&self, id: TimerId) -> Result<Option<H>> {
        self.check_range(id)?;
        let mut state = self.guard.borrow_mut();
        let slot = &mut state.slots[id.index()];
        if !slot.occupied {
            return Err(TimerError::NotActive { id });
        }

        slot.occupied = false;
        slot.context = None;
        slot.callback = None;
        Ok(slot.native.take())
    }

    pub fn is_occupied(&self, id: TimerId) -> bool {
        self.guard
            .borrow()
            .slots
            .get(id.index())
            .is_some_and(|slot| slot.occupied)
    }

    pub fn occupied_ids(&self) -> Vec<TimerId> {
        self.guard
            .borrow()
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.occupied)
            .map(|(index, _)| TimerId::new(index))
            .collect()
    }

    fn check_range(&self, id: TimerId) -> Result<()> {
        if id.index() >= self.capacity {
            return Err(TimerError::InvalidId {
                id,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}
