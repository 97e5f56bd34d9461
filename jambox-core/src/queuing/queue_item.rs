/// Represents an item that can be held by an [crate::OrderedQueue].
pub trait QueueItem
where
    Self: Send + 'static,
{
    /// Returns the id assigned by the queue, or 0 if the item was never enqueued.
    fn entry_id(&self) -> super::EntryId;

    /// Called exactly once, when the item is enqueued.
    fn assign_entry_id(&mut self, id: super::EntryId);
}
