use std::{
    fmt::Display,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::Serialize;

/// 2024-01-01T00:00:00Z in milliseconds
const EPOCH_MILLIS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// A time-ordered id handed out when a task is accepted.
/// Only used to let clients follow the progress of their request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(i64);

/// Generates [CorrelationId]s: 41 bits of milliseconds, 10 bits of node, 12 bits of sequence.
pub struct Snowflake {
    node: i64,
    state: Mutex<SnowflakeState>,
}

#[derive(Default)]
struct SnowflakeState {
    last_millis: i64,
    sequence: i64,
}

impl Snowflake {
    /// Creates a generator for the given node. Nodes beyond 10 bits wrap around.
    pub fn new(node: u64) -> Self {
        Self {
            node: node as i64 & MAX_NODE,
            state: Default::default(),
        }
    }

    pub fn generate(&self) -> CorrelationId {
        let mut state = self.state.lock();

        // Never go backwards, even if the wall clock does
        let mut now = current_millis().max(state.last_millis);

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;

            // Sequence exhausted for this millisecond, borrow the next one
            if state.sequence == 0 {
                now += 1;
            }
        } else {
            state.sequence = 0;
        }

        state.last_millis = now;

        CorrelationId(
            ((now - EPOCH_MILLIS) << (NODE_BITS + SEQUENCE_BITS))
                | (self.node << SEQUENCE_BITS)
                | state.sequence,
        )
    }
}

impl CorrelationId {
    pub fn from_value(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// The node that generated this id
    pub fn node(&self) -> u64 {
        ((self.0 >> SEQUENCE_BITS) & MAX_NODE) as u64
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(EPOCH_MILLIS)
}
