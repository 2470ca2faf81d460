//! Error types for timer operations

use std::io;
use thiserror::Error;
use timerex_types::BackendKind;

use crate::config::ConfigError;
use crate::slots::TimerId;

pub type Result<T, E = TimerError> = std::result::Result<T, E>;

/// Errors reported by the timer service and its backends
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer id {id} is outside the slot table (capacity {capacity})")]
    InvalidId { id: TimerId, capacity: usize },

    #[error("timer {id} is not active")]
    NotActive { id: TimerId },

    #[error("all {capacity} timer slots are in use")]
    CapacityExceeded { capacity: usize },

    #[error("timer interval must be at least 1 ms")]
    InvalidInterval,

    #[error("failed to install timer signal handler")]
    HandlerInstall(#[source] io::Error),

    #[error("failed to create native timer")]
    NativeCreate(#[source] io::Error),

    #[error("failed to arm native timer")]
    NativeArm(#[source] io::Error),

    #[error("failed to delete native timer {id}")]
    NativeDelete {
        id: TimerId,
        #[source]
        source: io::Error,
    },

    #[error("failed to start timer dispatcher")]
    DispatcherStart(#[source] io::Error),

    #[error("finalize cannot be called from inside a timer callback")]
    FinalizeFromCallback,

    #[error("timer service is not initialized")]
    Uninitialized,

    #[error("timer service has been finalized")]
    Finalized,

    #[error("{backend} backend is not available on this platform")]
    UnsupportedBackend { backend: BackendKind },

    #[error("invalid timer configuration")]
    InvalidConfig(#[from] ConfigError),
}

impl TimerError {
    /// Stable non-zero status code for this failure
    pub fn status(&self) -> i32 {
        match self {
            TimerError::InvalidId { .. } => 1,
            TimerError::HandlerInstall(_) => 2,
            TimerError::NativeCreate(_) => 3,
            TimerError::NativeArm(_) => 4,
            TimerError::CapacityExceeded { .. } => 5,
            TimerError::InvalidInterval => 6,
            TimerError::NotActive { .. } => 7,
            TimerError::NativeDelete { .. } => 8,
            TimerError::DispatcherStart(_) => 9,
            TimerError::FinalizeFromCallback => 10,
            TimerError::Uninitialized => 100,
            TimerError::Finalized => 101,
            TimerError::UnsupportedBackend { .. } => 102,
            TimerError::InvalidConfig(_) => 103,
        }
    }
}

/// Status code of an operation result: 0 on success, the error's status otherwise
pub fn status_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status(),
    }
}
