//! Multimedia timer backend (Windows)
//!
//! Timers are `timeSetEvent` periodic callbacks. The system calls them on its
//! own timer thread with a per-slot route as user data; the route leads back
//! to the slot table, where the native id is checked before dispatching.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use timerex_types::{BackendKind, MultimediaConfig};
use tracing::{debug, info, warn};
use windows::Win32::Media::{
    TIME_CALLBACK_FUNCTION, TIME_PERIODIC, TIMERR_NOERROR, timeBeginPeriod, timeEndPeriod,
    timeKillEvent, timeSetEvent,
};

use super::{TimerBackend, check_interval};
use crate::error::{Result, TimerError};
use crate::slots::{Callback, Occupant, SlotTable, TimerId, TimerInfo, TimerStats, UserContext};

/// Multimedia timer id returned by `timeSetEvent`
pub struct MultimediaTimer(u32);

/// User data handed to the system callback for one slot
struct Route {
    slots: Arc<SlotTable<MultimediaTimer>>,
    id: TimerId,
}

unsafe extern "system" fn on_timer_event(timer_id: u32, _msg: u32, user: usize, _: usize, _: usize) {
    if user == 0 {
        return;
    }
    // SAFETY: `user` is the address of a Route in the backend's leaked route
    // table, which lives for the rest of the process.
    let route = unsafe { &*(user as *const Route) };
    if let Err(e) = route
        .slots
        .dispatch_matching(route.id, |native| native.0 == timer_id)
    {
        warn!(error = %e, "discarding multimedia timer event");
    }
}

/// Periodic multimedia timers
pub struct MultimediaBackend {
    config: MultimediaConfig,
    slots: Arc<SlotTable<MultimediaTimer>>,
    /// One route per slot. Leaked so a late system callback never reads
    /// freed memory.
    routes: &'static [Route],
    initialized: AtomicBool,
}

impl MultimediaBackend {
    pub fn new(capacity: usize, config: &MultimediaConfig) -> Self {
        let slots = Arc::new(SlotTable::new(capacity));
        let routes: Vec<Route> = (0..capacity)
            .map(|index| Route {
                slots: Arc::clone(&slots),
                id: TimerId::new(index),
            })
            .collect();

        Self {
            config: config.clone(),
            slots,
            routes: Box::leak(routes.into_boxed_slice()),
            initialized: AtomicBool::new(false),
        }
    }

    fn end_period(&self) {
        // SAFETY: only called to undo a successful timeBeginPeriod.
        let rc = unsafe { timeEndPeriod(self.config.resolution_ms) };
        if rc != TIMERR_NOERROR {
            warn!(rc, "timeEndPeriod failed");
        }
    }

    fn kill(&self, id: TimerId, timer: MultimediaTimer) -> Result<()> {
        // SAFETY: timer.0 was returned by timeSetEvent and is killed once.
        let rc = unsafe { timeKillEvent(timer.0) };
        self.end_period();
        if rc != TIMERR_NOERROR {
            return Err(TimerError::NativeDelete {
                id,
                source: std::io::Error::other(format!("timeKillEvent returned {rc}")),
            });
        }
        Ok(())
    }

    fn delete_native(&self, id: TimerId) -> Result<()> {
        let native = self.slots.lock().release(id)?;
        match native {
            Some(timer) => self.kill(id, timer),
            None => Ok(()),
        }
    }
}

impl TimerBackend for MultimediaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Multimedia
    }

    fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!(
                resolution_ms = self.config.resolution_ms,
                capacity = self.slots.capacity(),
                "multimedia backend initialized"
            );
        }
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let result = self.slots.release_all(|id| self.delete_native(id));
        self.initialized.store(false, Ordering::Release);
        info!("multimedia backend finalized");
        result
    }

    fn create_timer(
        &self,
        interval_ms: u32,
        callback: Callback,
        context: UserContext,
    ) -> Result<TimerId> {
        check_interval(interval_ms)?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(TimerError::Uninitialized);
        }

        let slots = self.slots.lock();
        let token = slots.claim()?;
        let route = &self.routes[token.index()];

        // SAFETY: balanced by timeEndPeriod when the timer is killed or
        // fails to start.
        let rc = unsafe { timeBeginPeriod(self.config.resolution_ms) };
        if rc != TIMERR_NOERROR {
            return Err(TimerError::NativeCreate(std::io::Error::other(format!(
                "timeBeginPeriod({}) returned {rc}",
                self.config.resolution_ms
            ))));
        }

        // Events fired before the slot is occupied wait on the table lock
        // held here.
        // SAFETY: the route outlives every timer that references it.
        let timer_id = unsafe {
            timeSetEvent(
                interval_ms,
                self.config.resolution_ms,
                Some(on_timer_event),
                route as *const Route as usize,
                TIME_PERIODIC | TIME_CALLBACK_FUNCTION,
            )
        };
        if timer_id == 0 {
            self.end_period();
            return Err(TimerError::NativeCreate(std::io::Error::other(
                "timeSetEvent returned 0",
            )));
        }

        slots.occupy(
            token,
            Occupant {
                native: MultimediaTimer(timer_id),
                interval_ms,
                callback,
                context,
            },
        );
        debug!(id = %token.id(), interval_ms, timer_id, "created multimedia timer");
        Ok(token.id())
    }

    fn delete_timer(&self, id: TimerId) -> Result<()> {
        self.delete_native(id)?;
        debug!(%id, "deleted multimedia timer");
        Ok(())
    }

    fn active_timers(&self) -> Vec<TimerInfo> {
        self.slots.active()
    }

    fn stats(&self) -> TimerStats {
        self.slots.stats()
    }
}
