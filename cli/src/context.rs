use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use timerex_core::{TimerConfig, TimerError, TimerService};

/// Holds all shared state for the CLI application.
#[derive(Clone)]
pub struct CliContext {
    pub service: Arc<TimerService>,
    /// Configuration the service was built from
    pub config: Arc<TimerConfig>,
    /// Fires observed across every timer created from the REPL
    pub fire_count: Arc<AtomicU64>,
}

impl CliContext {
    /// Build and start a timer service for `config`
    pub fn new(config: TimerConfig) -> Result<Self, TimerError> {
        let service = TimerService::new(config.clone())?;
        service.initialize()?;

        Ok(Self {
            service: Arc::new(service),
            config: Arc::new(config),
            fire_count: Arc::new(AtomicU64::new(0)),
        })
    }
}
