//! Periodic timer service over native timer facilities.
//!
//! A [`TimerService`] hands out small integer [`TimerId`]s from a
//! fixed-capacity slot table and invokes a callback with the caller's
//! context on every expiration. The backend is the platform's native timer
//! facility (POSIX interval timers and a real-time signal on Linux,
//! multimedia timers on Windows) or a portable thread-per-timer ticker.

pub mod backend;
pub mod config;
pub mod error;
pub mod service;
pub mod slots;

pub use backend::{Backend, TimerBackend, native_kind};
pub use config::{BackendKind, ConfigError, ConfigExt, MultimediaConfig, SignalConfig, TimerConfig};
pub use error::{Result, TimerError, status_of};
pub use service::TimerService;
pub use slots::{Callback, TimerId, TimerInfo, TimerStats, UserContext, in_dispatch};
