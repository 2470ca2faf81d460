//! Timer slot records and the identifiers that address them

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Externally visible timer identifier: the index of the timer's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(usize);

impl TimerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller payload stored with a timer and handed back on every fire.
///
/// The service never inspects or clones the value behind it; it is dropped
/// when the timer's slot is released.
pub type UserContext = Arc<dyn Any + Send + Sync>;

/// Type-erased callback stored in a slot
pub type Callback = Arc<dyn Fn(TimerId, &UserContext) + Send + Sync>;

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: usize = usize::MAX >> INDEX_BITS;

/// A slot index tagged with the generation it was claimed under.
///
/// Packs into one machine word so it can ride along as the payload of a
/// native notification (signal value, callback user data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotToken {
    index: usize,
    generation: usize,
}

impl SlotToken {
    pub(crate) fn new(index: usize, generation: usize) -> Self {
        Self {
            index: index & INDEX_MASK,
            generation: generation & GENERATION_MASK,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn id(&self) -> TimerId {
        TimerId(self.index)
    }

    pub fn to_bits(self) -> usize {
        (self.generation << INDEX_BITS) | self.index
    }

    pub fn from_bits(bits: usize) -> Self {
        Self {
            index: bits & INDEX_MASK,
            generation: bits >> INDEX_BITS,
        }
    }
}

/// Generation that follows `current`. Zero is never handed out, so a zeroed
/// payload can not match a live slot.
pub(crate) fn next_generation(current: usize) -> usize {
    match (current + 1) & GENERATION_MASK {
        0 => 1,
        next => next,
    }
}

/// Everything a backend stores when it occupies a slot
pub(crate) struct Occupant<H> {
    pub native: H,
    pub interval_ms: u32,
    pub callback: Callback,
    pub context: UserContext,
}

/// One fixed-position record of the slot table
pub(crate) struct Slot<H> {
    pub native: Option<H>,
    pub interval_ms: u32,
    pub context: Option<UserContext>,
    pub callback: Option<Callback>,
    pub generation: usize,
    pub occupied: bool,
}

impl<H> Slot<H> {
    pub fn vacant() -> Self {
        Self {
            native: None,
            interval_ms: 0,
            context: None,
            callback: None,
            generation: 0,
            occupied: false,
        }
    }
}

/// Public view of an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    pub id: TimerId,
    pub interval_ms: u32,
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Callbacks invoked
    pub dispatched: u64,
    /// Expirations that no longer matched a live timer
    pub stale: u64,
    /// Expirations lost before reaching the dispatch path
    pub dropped: u64,
}
