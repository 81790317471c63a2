//! Time-ordered 64-bit identifier allocation
//!
//! Layout (most significant bit first, sign bit always zero):
//!
//! ```text
//! | 41 bits: ms since EPOCH_MS | 10 bits: instance id | 12 bits: sequence |
//! ```
//!
//! Ids are the correlation key between the issuer, the transcoding worker and
//! the reconciler, so they must be unique across instances and strictly
//! increasing within one instance.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::IdError;

/// 2021-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: i64 = 1_609_459_200_000;

const INSTANCE_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

pub const MAX_INSTANCE_ID: u16 = (1 << INSTANCE_ID_BITS) - 1;
pub const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: i64 = (1 << TIMESTAMP_BITS) - 1;

const INSTANCE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + INSTANCE_ID_BITS;

/// Wall clock used by the allocator.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Reads the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Decomposed identifier, for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedId {
    /// Unix milliseconds at which the id was issued.
    pub timestamp_ms: i64,
    pub instance_id: u16,
    pub sequence: u16,
}

impl ParsedId {
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}

#[derive(Debug)]
struct AllocatorState {
    /// Epoch-relative ms of the last issued id; -1 before the first one.
    last_timestamp: i64,
    sequence: u16,
}

/// Issues unique, time-ordered ids for one process instance.
///
/// The `(last_timestamp, sequence)` pair lives behind a mutex so concurrent
/// callers can never observe the same pair. When 4096 ids have been issued in
/// one millisecond the caller spins, holding the lock, until the clock ticks.
pub struct IdAllocator {
    instance_id: u16,
    clock: Arc<dyn Clock>,
    state: Mutex<AllocatorState>,
}

impl IdAllocator {
    /// Create an allocator on the system clock.
    ///
    /// `instance_id` comes from configuration; when absent the process id is
    /// used. Either way it is masked to 10 bits.
    pub fn new(instance_id: Option<u16>) -> Self {
        Self::with_clock(instance_id, Arc::new(SystemClock))
    }

    pub fn with_clock(instance_id: Option<u16>, clock: Arc<dyn Clock>) -> Self {
        let raw = instance_id
            .map(u32::from)
            .unwrap_or_else(std::process::id);
        let instance_id = (raw & u32::from(MAX_INSTANCE_ID)) as u16;

        Self {
            instance_id,
            clock,
            state: Mutex::new(AllocatorState {
                last_timestamp: -1,
                sequence: 0,
            }),
        }
    }

    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    /// Issue the next id.
    pub fn generate(&self) -> Result<i64, IdError> {
        // The critical section never panics, so a poisoned lock still holds
        // consistent state.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut timestamp = self.current_timestamp()?;

        if timestamp < state.last_timestamp {
            return Err(IdError::ClockRegression {
                last_ms: state.last_timestamp + EPOCH_MS,
                now_ms: timestamp + EPOCH_MS,
            });
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                timestamp = self.wait_next_millis(state.last_timestamp)?;
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;

        Ok(compose(timestamp, self.instance_id, state.sequence))
    }

    /// Split an id back into its fields.
    pub fn parse(id: i64) -> ParsedId {
        ParsedId {
            timestamp_ms: (id >> TIMESTAMP_SHIFT) + EPOCH_MS,
            instance_id: ((id >> INSTANCE_ID_SHIFT) & i64::from(MAX_INSTANCE_ID)) as u16,
            sequence: (id & i64::from(MAX_SEQUENCE)) as u16,
        }
    }

    fn current_timestamp(&self) -> Result<i64, IdError> {
        let now_ms = self.clock.now_ms();
        let elapsed_ms = now_ms - EPOCH_MS;
        if elapsed_ms < 0 {
            return Err(IdError::ClockBeforeEpoch { now_ms });
        }
        if elapsed_ms > MAX_TIMESTAMP {
            return Err(IdError::TimestampOverflow { elapsed_ms });
        }
        Ok(elapsed_ms)
    }

    fn wait_next_millis(&self, last_timestamp: i64) -> Result<i64, IdError> {
        loop {
            let timestamp = self.current_timestamp()?;
            if timestamp > last_timestamp {
                return Ok(timestamp);
            }
            std::hint::spin_loop();
        }
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

#[inline]
fn compose(timestamp: i64, instance_id: u16, sequence: u16) -> i64 {
    (timestamp << TIMESTAMP_SHIFT)
        | (i64::from(instance_id) << INSTANCE_ID_SHIFT)
        | i64::from(sequence)
}
