//! Shared configuration types for timerex
//!
//! This crate contains the serializable configuration types shared between
//! the timer service (timerex-core) and its front ends (timerex-cli).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of timer slots.
pub const DEFAULT_CAPACITY: usize = 64;

/// Largest slot table a service may be configured with.
pub const MAX_CAPACITY: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// Backend Selection
// ─────────────────────────────────────────────────────────────────────────────

/// Which native timer facility drives the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Pick the native facility of the host platform (default)
    #[default]
    Auto,
    /// POSIX interval timers delivering a real-time signal (Linux)
    Signal,
    /// Multimedia periodic callback timers (Windows)
    Multimedia,
    /// One ticking worker thread per timer (any platform)
    Ticker,
}

impl BackendKind {
    /// Stable lowercase name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::Signal => "signal",
            BackendKind::Multimedia => "multimedia",
            BackendKind::Ticker => "ticker",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "signal" => Ok(BackendKind::Signal),
            "multimedia" => Ok(BackendKind::Multimedia),
            "ticker" => Ok(BackendKind::Ticker),
            other => Err(format!(
                "unknown backend '{other}' (expected auto, signal, multimedia or ticker)"
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serde Default Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_inbox_depth() -> usize {
    256
}
fn default_resolution_ms() -> u32 {
    1
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for the signal backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Timer signal is `SIGRTMIN + rt_offset`
    #[serde(default)]
    pub rt_offset: u8,
    /// Capacity of the queue between the signal handler and the dispatcher thread.
    /// Expirations arriving while it is full are dropped and counted.
    #[serde(default = "default_inbox_depth")]
    pub inbox_depth: usize,
    /// Ignore SIGPIPE process-wide during initialization
    #[serde(default = "default_true")]
    pub ignore_sigpipe: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rt_offset: 0,
            inbox_depth: default_inbox_depth(),
            ignore_sigpipe: true,
        }
    }
}

/// Settings for the multimedia backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultimediaConfig {
    /// Timer resolution requested from the system, in milliseconds
    #[serde(default = "default_resolution_ms")]
    pub resolution_ms: u32,
}

impl Default for MultimediaConfig {
    fn default() -> Self {
        Self {
            resolution_ms: default_resolution_ms(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timer Service Config
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level configuration of a timer service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Number of timer slots. Fixed for the lifetime of a service.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub multimedia: MultimediaConfig,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            backend: BackendKind::Auto,
            signal: SignalConfig::default(),
            multimedia: MultimediaConfig::default(),
        }
    }
}

impl TimerConfig {
    /// Default configuration with an explicit backend
    pub fn with_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Default configuration with an explicit slot count
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}
