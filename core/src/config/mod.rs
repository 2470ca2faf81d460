//! Timer service configuration
//!
//! Re-exports the shared types from timerex-types and adds validation and
//! confy persistence.

mod error;


use std::path::Path;

pub use error::ConfigError;
pub use timerex_types::{
    BackendKind, DEFAULT_CAPACITY, MAX_CAPACITY, MultimediaConfig, SignalConfig, TimerConfig,
};

const APP_NAME: &str = "timerex";
const CONFIG_NAME: &str = "config";

/// Extension trait for TimerConfig persistence and validation
pub trait ConfigExt: Sized {
    /// Load the user's configuration, falling back to defaults
    fn load() -> Self;
    fn load_from(path: &Path) -> Result<Self, ConfigError>;
    fn save_to(&self, path: &Path) -> Result<(), ConfigError>;
    fn validate(&self) -> Result<(), ConfigError>;
}

impl ConfigExt for TimerConfig {
    fn load() -> Self {
        confy::load(APP_NAME, CONFIG_NAME).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load timer configuration, using defaults");
            Self::default()
        })
    }

    /// Load and validate an existing file. Unlike `load`, a missing file is
    /// an error rather than a default written to disk.
    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let config: Self = confy::load_path(path)?;
        config.validate()?;
        Ok(config)
    }

    fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        confy::store_path(path, self.clone()).map_err(ConfigError::Save)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(invalid(format!(
                "capacity must be between 1 and {MAX_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if self.signal.inbox_depth == 0 {
            return Err(invalid("signal.inbox_depth must be at least 1"));
        }
        if self.multimedia.resolution_ms == 0 {
            return Err(invalid("multimedia.resolution_ms must be at least 1"));
        }

        #[cfg(target_os = "linux")]
        if crate::backend::signal::timer_signal(self.signal.rt_offset).is_none() {
            return Err(invalid(format!(
                "signal.rt_offset {} is past SIGRTMAX",
                self.signal.rt_offset
            )));
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}
