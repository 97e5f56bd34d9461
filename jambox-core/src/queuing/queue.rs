use std::collections::HashMap;

use parking_lot::Mutex;

use super::{EntryId, QueueError, QueueItem};

/// A bounded, doubly linked queue of items keyed by the id it assigns them.
///
/// Every operation takes the same lock, so a removal and a dequeue racing on the
/// same entry can never both succeed.
pub struct OrderedQueue<T> {
    capacity: usize,
    links: Mutex<Links<T>>,
}

struct Links<T> {
    last_id: EntryId,
    head: Option<EntryId>,
    tail: Option<EntryId>,
    nodes: HashMap<EntryId, Node<T>>,
}

struct Node<T> {
    item: T,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

impl<T> OrderedQueue<T>
where
    T: QueueItem,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            links: Mutex::new(Links {
                last_id: 0,
                head: None,
                tail: None,
                nodes: HashMap::new(),
            }),
        }
    }

    /// Appends an item to the end of the queue and returns its new id.
    pub fn enqueue(&self, mut item: T) -> Result<EntryId, QueueError> {
        let mut links = self.links.lock();

        if links.nodes.len() >= self.capacity {
            return Err(QueueError::CapacityExceeded(self.capacity));
        }

        links.last_id += 1;
        let id = links.last_id;

        item.assign_entry_id(id);
        links.link_before(id, item, None);

        Ok(id)
    }

    /// Removes the entry with the given id, wherever it is.
    pub fn remove(&self, id: EntryId) -> Result<T, QueueError> {
        self.links.lock().unlink(id).ok_or(QueueError::NotFound(id))
    }

    /// Removes and returns the head of the queue.
    pub fn dequeue(&self) -> Result<T, QueueError> {
        let mut links = self.links.lock();
        let head = links.head.ok_or(QueueError::Empty)?;

        links.unlink(head).ok_or(QueueError::Empty)
    }

    /// Moves an entry so that it sits immediately before another.
    pub fn move_before(&self, id: EntryId, before: EntryId) -> Result<(), QueueError> {
        let mut links = self.links.lock();

        let target = links.nodes.get(&id).ok_or(QueueError::NotFound(id))?;

        if !links.nodes.contains_key(&before) {
            return Err(QueueError::NotFound(before));
        }

        if id == before || target.next == Some(before) {
            return Ok(());
        }

        if let Some(item) = links.unlink(id) {
            links.link_before(id, item, Some(before));
        }

        Ok(())
    }

    /// Mutates an entry in place.
    pub fn update<F>(&self, id: EntryId, f: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut T),
    {
        let mut links = self.links.lock();
        let node = links.nodes.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        f(&mut node.item);
        Ok(())
    }

    /// Drops every entry. Ids keep increasing afterwards.
    pub fn clear(&self) {
        let mut links = self.links.lock();

        links.nodes.clear();
        links.head = None;
        links.tail = None;
    }

    pub fn len(&self) -> usize {
        self.links.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.links.lock().nodes.contains_key(&id)
    }

    /// Returns the ids of all entries in order.
    pub fn ids(&self) -> Vec<EntryId> {
        let links = self.links.lock();
        links.walk().map(|(id, _)| id).collect()
    }
}

impl<T> OrderedQueue<T>
where
    T: QueueItem + Clone,
{
    /// Returns a copy of the head of the queue, if any.
    pub fn peek(&self) -> Option<T> {
        let links = self.links.lock();

        links
            .head
            .and_then(|id| links.nodes.get(&id))
            .map(|node| node.item.clone())
    }

    /// Returns a copy of every entry in order.
    pub fn items(&self) -> Vec<T> {
        let links = self.links.lock();
        links.walk().map(|(_, item)| item.clone()).collect()
    }
}

impl<T> Links<T> {
    /// Inserts a new node before the given entry, or at the tail if there is none.
    fn link_before(&mut self, id: EntryId, item: T, before: Option<EntryId>) {
        let (prev, next) = match before {
            Some(before) => (self.nodes.get(&before).and_then(|n| n.prev), Some(before)),
            None => (self.tail, None),
        };

        match prev {
            Some(prev) => {
                if let Some(node) = self.nodes.get_mut(&prev) {
                    node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }

        match next {
            Some(next) => {
                if let Some(node) = self.nodes.get_mut(&next) {
                    node.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }

        self.nodes.insert(id, Node { item, prev, next });
    }

    fn unlink(&mut self, id: EntryId) -> Option<T> {
        let node = self.nodes.remove(&id)?;

        match node.prev {
            Some(prev) => {
                if let Some(prev) = self.nodes.get_mut(&prev) {
                    prev.next = node.next;
                }
            }
            None => self.head = node.next,
        }

        match node.next {
            Some(next) => {
                if let Some(next) = self.nodes.get_mut(&next) {
                    next.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        Some(node.item)
    }

    fn walk(&self) -> impl Iterator<Item = (EntryId, &T)> + '_ {
        let mut cursor = self.head;

        std::iter::from_fn(move || {
            let id = cursor?;
            let node = self.nodes.get(&id)?;
            cursor = node.next;

            Some((id, &node.item))
        })
    }
}
