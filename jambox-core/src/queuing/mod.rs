mod queue;
mod queue_item;

pub use queue::*;
pub use queue_item::*;

use thiserror::Error;

/// Identifies an entry in an [OrderedQueue]. Assigned on enqueue, strictly increasing and never reused.
pub type EntryId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue is full, capacity is {0}")]
    CapacityExceeded(usize),
    #[error("Entry {0} is not in the queue")]
    NotFound(EntryId),
    #[error("Queue is empty")]
    Empty,
}
