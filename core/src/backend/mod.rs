//! Native timer backends
//!
//! Every backend owns a [`SlotTable`](crate::slots::SlotTable) and turns
//! native expirations into calls to its dispatch path. The concrete backend
//! is chosen once, from [`TimerConfig::backend`], when a service is built.

#[cfg(target_os = "linux")]
pub mod signal;

#[cfg(target_os = "windows")]
pub mod multimedia;

pub mod ticker;

#[cfg(test)]
mod backend_tests;

use timerex_types::{BackendKind, TimerConfig};

use crate::error::{Result, TimerError};
use crate::slots::{Callback, TimerId, TimerInfo, TimerStats, UserContext};

/// Trait that all timer backends must implement
pub trait TimerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Acquire process-level resources (handlers, dispatcher threads, clock
    /// resolution). Calling it again on a running backend is a no-op.
    fn initialize(&self) -> Result<()>;

    /// Stop and delete every active timer, then release process-level resources.
    ///
    /// No callback runs once this returns.
    fn finalize(&self) -> Result<()>;

    /// Create a periodic timer firing every `interval_ms` until deleted
    fn create_timer(
        &self,
        interval_ms: u32,
        callback: Callback,
        context: UserContext,
    ) -> Result<TimerId>;

    /// Stop `id` and release its slot. Waits for a callback of `id` that is
    /// running on another thread.
    fn delete_timer(&self, id: TimerId) -> Result<()>;

    fn active_timers(&self) -> Vec<TimerInfo>;

    fn stats(&self) -> TimerStats;
}

/// Backend that wraps whichever native facility was selected
pub enum Backend {
    #[cfg(target_os = "linux")]
    Signal(signal::SignalBackend),
    #[cfg(target_os = "windows")]
    Multimedia(multimedia::MultimediaBackend),
    Ticker(ticker::TickerBackend),
}

impl Backend {
    /// Build the backend named by `config.backend`.
    ///
    /// `Auto` resolves to [`native_kind`]. A backend this platform cannot
    /// provide is reported as `UnsupportedBackend`.
    pub fn new(config: &TimerConfig) -> Result<Self> {
        let kind = match config.backend {
            BackendKind::Auto => native_kind(),
            kind => kind,
        };

        match kind {
            #[cfg(target_os = "linux")]
            BackendKind::Signal => {
                signal::SignalBackend::new(config.capacity, &config.signal).map(Backend::Signal)
            }
            #[cfg(target_os = "windows")]
            BackendKind::Multimedia => Ok(Backend::Multimedia(multimedia::MultimediaBackend::new(
                config.capacity,
                &config.multimedia,
            ))),
            BackendKind::Ticker => Ok(Backend::Ticker(ticker::TickerBackend::new(config.capacity))),
            backend => Err(TimerError::UnsupportedBackend { backend }),
        }
    }
}

/// The backend `Auto` resolves to on this platform
pub fn native_kind() -> BackendKind {
    if cfg!(target_os = "linux") {
        BackendKind::Signal
    } else if cfg!(target_os = "windows") {
        BackendKind::Multimedia
    } else {
        BackendKind::Ticker
    }
}

/// Reject intervals the native facilities cannot express
pub(crate) fn check_interval(interval_ms: u32) -> Result<()> {
    if interval_ms == 0 {
        return Err(TimerError::InvalidInterval);
    }
    Ok(())
}

impl TimerBackend for Backend {
    fn kind(&self) -> BackendKind {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.kind(),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.kind(),
            Self::Ticker(b) => b.kind(),
        }
    }

    fn initialize(&self) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.initialize(),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.initialize(),
            Self::Ticker(b) => b.initialize(),
        }
    }

    fn finalize(&self) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.finalize(),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.finalize(),
            Self::Ticker(b) => b.finalize(),
        }
    }

    fn create_timer(
        &self,
        interval_ms: u32,
        callback: Callback,
        context: UserContext,
    ) -> Result<TimerId> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.create_timer(interval_ms, callback, context),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.create_timer(interval_ms, callback, context),
            Self::Ticker(b) => b.create_timer(interval_ms, callback, context),
        }
    }

    fn delete_timer(&self, id: TimerId) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.delete_timer(id),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.delete_timer(id),
            Self::Ticker(b) => b.delete_timer(id),
        }
    }

    fn active_timers(&self) -> Vec<TimerInfo> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.active_timers(),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.active_timers(),
            Self::Ticker(b) => b.active_timers(),
        }
    }

    fn stats(&self) -> TimerStats {
        match self {
            #[cfg(target_os = "linux")]
            Self::Signal(b) => b.stats(),
            #[cfg(target_os = "windows")]
            Self::Multimedia(b) => b.stats(),
            Self::Ticker(b) => b.stats(),
        }
    }
}
