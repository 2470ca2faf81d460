//! Slot table
//!
//! This module provides:
//! - **Identifiers**: `TimerId` (the public slot index) and `SlotToken`
//!   (index + generation, carried through native notifications)
//! - **Table**: the fixed-capacity pool every backend allocates from
//! - **Dispatch**: the one path from a native expiration to a user callback

mod slot;
mod table;

#[cfg(test)]
mod table_tests;

pub use slot::{Callback, SlotToken, TimerId, TimerInfo, TimerStats, UserContext};
pub use table::{SlotLock, SlotTable, in_dispatch};

pub(crate) use slot::Occupant;
