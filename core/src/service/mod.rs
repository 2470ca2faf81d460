//! Timer service facade
//!
//! [`TimerService`] owns one backend and enforces the lifecycle around it:
//! timers can only be created between `initialize` and `finalize`, and a
//! finalized service stays finalized.


use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use timerex_types::{BackendKind, TimerConfig};
use tracing::{debug, info, warn};

use crate::backend::{Backend, TimerBackend};
use crate::config::ConfigExt;
use crate::error::{Result, TimerError};
use crate::slots::{Callback, TimerId, TimerInfo, TimerStats, UserContext, in_dispatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    Finalizing,
    Finalized,
}

/// Periodic timer service.
///
/// Share it by reference or `Arc`; every method takes `&self` and may be
/// called from any thread, including from inside a timer callback (except
/// [`finalize`](Self::finalize)).
pub struct TimerService {
    backend: Backend,
    capacity: usize,
    state: Mutex<Lifecycle>,
}

impl TimerService {
    /// Validate `config` and construct its backend. Nothing is started until
    /// [`initialize`](Self::initialize).
    pub fn new(config: TimerConfig) -> Result<Self> {
        config.validate()?;
        let backend = Backend::new(&config)?;
        info!(
            requested = %config.backend,
            backend = %backend.kind(),
            capacity = config.capacity,
            "timer service created"
        );

        Ok(Self {
            backend,
            capacity: config.capacity,
            state: Mutex::new(Lifecycle::Uninitialized),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(TimerConfig::default())
    }

    /// Build a service from a TOML configuration file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Self::new(TimerConfig::load_from(path)?)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_initialized(&self) -> bool {
        *self.state.lock() == Lifecycle::Initialized
    }

    /// Start the backend. Repeated calls are a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Initialized => return Ok(()),
            Lifecycle::Finalizing | Lifecycle::Finalized => return Err(TimerError::Finalized),
            Lifecycle::Uninitialized => {}
        }

        self.backend.initialize()?;
        *state = Lifecycle::Initialized;
        debug!(backend = %self.backend.kind(), "timer service initialized");
        Ok(())
    }

    /// Delete every outstanding timer and release the backend.
    ///
    /// No callback runs after this returns. Calling it before `initialize`
    /// or a second time is a no-op.
    pub fn finalize(&self) -> Result<()> {
        if in_dispatch() {
            return Err(TimerError::FinalizeFromCallback);
        }
        self.shut_down()
    }

    /// Finalize without the callback check.
    ///
    /// Backends never join the thread they are called on, so this is safe
    /// from a callback: that thread is detached and exits once the callback
    /// returns.
    fn shut_down(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Initialized {
                return Ok(());
            }
            *state = Lifecycle::Finalizing;
        }

        // The lifecycle lock is not held here: callbacks still running may
        // call back into the service and must observe `Finalizing`.
        let result = self.backend.finalize();
        *self.state.lock() = Lifecycle::Finalized;
        debug!(backend = %self.backend.kind(), "timer service finalized");
        result
    }

    /// Start a periodic timer.
    ///
    /// `callback` runs every `interval_ms` milliseconds with the timer's id
    /// and a reference to `context`, until the timer is deleted or the
    /// service finalized. `context` is dropped when the timer is.
    pub fn create_timer<C, F>(&self, interval_ms: u32, callback: F, context: C) -> Result<TimerId>
    where
        C: Send + Sync + 'static,
        F: Fn(TimerId, &C) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(move |id: TimerId, context: &UserContext| {
            if let Some(context) = context.downcast_ref::<C>() {
                callback(id, context);
            }
        });
        self.create_timer_erased(interval_ms, callback, Arc::new(context))
    }

    /// Start a periodic timer from an already type-erased callback and context
    pub fn create_timer_erased(
        &self,
        interval_ms: u32,
        callback: Callback,
        context: UserContext,
    ) -> Result<TimerId> {
        self.ensure_running()?;
        self.backend.create_timer(interval_ms, callback, context)
    }

    /// Stop a timer and release its slot.
    ///
    /// Returns once any callback of the timer running on another thread has
    /// finished; the callback is never invoked again afterwards.
    pub fn delete_timer(&self, id: TimerId) -> Result<()> {
        self.ensure_running()?;
        self.backend.delete_timer(id)
    }

    pub fn active_timers(&self) -> Vec<TimerInfo> {
        self.backend.active_timers()
    }

    pub fn stats(&self) -> TimerStats {
        self.backend.stats()
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.lock() {
            Lifecycle::Initialized => Ok(()),
            Lifecycle::Uninitialized => Err(TimerError::Uninitialized),
            Lifecycle::Finalizing | Lifecycle::Finalized => Err(TimerError::Finalized),
        }
    }
}

impl Drop for TimerService {
    // The last owner may be a callback of this service.
    fn drop(&mut self) {
        if let Err(e) = self.shut_down() {
            warn!(error = %e, "failed to finalize timer service on drop");
        }
    }
}
