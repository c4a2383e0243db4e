//! Snowflake id generator used to stamp sessions.
//!
//! Layout (most significant first): 41 bits of milliseconds since
//! [`EPOCH_MS`], 10 bits of worker id, 12 bits of per-millisecond sequence.

use std::{
    sync::{Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Custom epoch: 2019-01-01T00:00:00Z.
pub const EPOCH_MS: i64 = 1_546_300_800_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

/// Largest accepted worker id.
pub const MAX_WORKER_ID: i64 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Errors from [`Snowflake::new`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnowflakeError {
    /// Worker id does not fit in the worker bits.
    #[error("worker id {0} is out of range 0..={MAX_WORKER_ID}")]
    InvalidWorkerId(i64),
}

#[derive(Debug, Default)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// Thread-safe, monotonic id generator.
#[derive(Debug)]
pub struct Snowflake {
    worker_id: i64,
    state: Mutex<State>,
}

impl Snowflake {
    /// Create a generator for `worker_id`.
    pub fn new(worker_id: i64) -> Result<Self, SnowflakeError> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(SnowflakeError::InvalidWorkerId(worker_id));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(State::default()),
        })
    }

    /// Worker id baked into every generated id.
    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    /// Next id. Strictly increasing for this generator.
    ///
    /// If the clock goes backwards, or the sequence of the current
    /// millisecond is exhausted, the generator advances its own millisecond
    /// instead of waiting for the wall clock.
    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = now_ms().max(state.last_ms);
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                state.last_ms += 1;
            }
        } else {
            state.sequence = 0;
            state.last_ms = now;
        }
        ((state.last_ms - EPOCH_MS) << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc};

    #[test]
    fn test_rejects_invalid_worker() {
        assert_eq!(Snowflake::new(-1).unwrap_err(), SnowflakeError::InvalidWorkerId(-1));
        assert!(Snowflake::new(MAX_WORKER_ID + 1).is_err());
        assert!(Snowflake::new(MAX_WORKER_ID).is_ok());
    }

    #[test]
    fn test_ids_strictly_increase() {
        let sf = Snowflake::new(3).unwrap();
        let mut last = sf.next_id();
        for _ in 0..10_000 {
            let id = sf.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_worker_bits() {
        let sf = Snowflake::new(42).unwrap();
        let id = sf.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_WORKER_ID, 42);
    }

    #[test]
    fn test_unique_across_threads() {
        let sf = Arc::new(Snowflake::new(1).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sf = sf.clone();
                std::thread::spawn(move || (0..2_000).map(|_| sf.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
