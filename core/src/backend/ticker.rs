//! Portable backend: one ticking worker thread per timer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use parking_lot::Mutex;
use timerex_types::BackendKind;
use tracing::{debug, info, warn};

use super::{TimerBackend, check_interval};
use crate::error::{Result, TimerError};
use crate::slots::{
    Callback, Occupant, SlotTable, SlotToken, TimerId, TimerInfo, TimerStats, UserContext,
};

/// Native handle of a ticker timer. Dropping `cancel` stops the worker.
pub struct TickerTimer {
    cancel: Sender<()>,
    worker: JoinHandle<()>,
}

fn run_worker(
    slots: Arc<SlotTable<TickerTimer>>,
    token: SlotToken,
    period: Duration,
    cancel: Receiver<()>,
) {
    let ticks = tick(period);
    loop {
        select! {
            recv(ticks) -> _ => match slots.dispatch(token) {
                Ok(true) => {}
                // Slot released or re-claimed: this worker is retired.
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "ticker worker stopping");
                    break;
                }
            },
            recv(cancel) -> _ => break,
        }
    }
}

/// Periodic timers driven by `crossbeam_channel::tick`
pub struct TickerBackend {
    slots: Arc<SlotTable<TickerTimer>>,
    initialized: AtomicBool,
    /// Workers of deleted timers that have not been joined yet
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl TickerBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(SlotTable::new(capacity)),
            initialized: AtomicBool::new(false),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Join retired workers that have already exited
    fn reap(&self) {
        let mut retired = self.retired.lock();
        let (finished, running): (Vec<_>, Vec<_>) =
            retired.drain(..).partition(|handle| handle.is_finished());
        *retired = running;
        drop(retired);

        for handle in finished {
            if handle.join().is_err() {
                warn!("ticker worker panicked");
            }
        }
    }

    /// Cancel a released timer's worker and queue it for joining.
    ///
    /// Never joins a running worker, so a callback may delete its own timer.
    fn retire(&self, timer: TickerTimer) {
        let TickerTimer { cancel, worker } = timer;
        drop(cancel);
        self.retired.lock().push(worker);
    }
}

impl TimerBackend for TickerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ticker
    }

    fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!(capacity = self.slots.capacity(), "ticker backend initialized");
        }
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let result = self.slots.release_all(|id| {
            let native = self.slots.lock().release(id)?;
            if let Some(timer) = native {
                self.retire(timer);
            }
            Ok(())
        });

        // Released slots make every worker exit on its next wake-up; none of
        // them can dispatch again, so joining outside the lock is safe.
        let workers: Vec<_> = self.retired.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == thread::current().id() {
                continue;
            }
            if worker.join().is_err() {
                warn!("ticker worker panicked");
            }
        }

        self.initialized.store(false, Ordering::Release);
        info!("ticker backend finalized");
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
        let (cancel, cancelled) = bounded(0);
        let worker = {
            let table = Arc::clone(&self.slots);
            let period = Duration::from_millis(u64::from(interval_ms));
            thread::Builder::new()
                .name(format!("timerex-ticker-{}", token.index()))
                .spawn(move || run_worker(table, token, period, cancelled))
                .map_err(TimerError::NativeCreate)?
        };

        // The worker's first dispatch blocks on the table lock until the
        // slot is occupied.
        slots.occupy(
            token,
            Occupant {
                native: TickerTimer { cancel, worker },
                interval_ms,
                callback,
                context,
            },
        );
        debug!(id = %token.id(), interval_ms, "created ticker timer");
        Ok(token.id())
    }

    fn delete_timer(&self, id: TimerId) -> Result<()> {
        let native = self.slots.lock().release(id)?;
        if let Some(timer) = native {
            self.retire(timer);
        }
        self.reap();
        debug!(%id, "deleted ticker timer");
        Ok(())
    }

    fn active_timers(&self) -> Vec<TimerInfo> {
        self.slots.active()
    }

    fn stats(&self) -> TimerStats {
        self.slots.stats()
    }
}
