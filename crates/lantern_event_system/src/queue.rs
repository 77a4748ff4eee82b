//! Thread-safe queue primitives.
//!
//! Three flavors share the same surface (`push`, `shift`, `poll`, `peek`, `len`):
//!
//! - [`Queue`] - plain FIFO
//! - [`DedupeQueue`] - FIFO that ignores items whose key is already queued
//! - [`PriorityQueue`] - ordered by an injected comparator, stable on ties
//!
//! Every operation takes the queue's lock for exactly one structural change.
//! Polling or peeking an empty queue returns `None`.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// A concurrency-safe first-in first-out queue.
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Appends an item at the tail.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Inserts an item at the head, ahead of everything already queued.
    pub fn shift(&self, item: T) {
        self.items.lock().push_front(item);
    }

    /// Inserts a batch at the head, keeping the batch's own order.
    ///
    /// After `shift_all([a, b])` on a queue holding `[x]`, the queue
    /// reads `[a, b, x]`. The batch lands under a single lock acquisition so
    /// no concurrent push can interleave with it.
    pub fn shift_all(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let mut items = self.items.lock();
        for item in batch.into_iter().rev() {
            items.push_front(item);
        }
    }

    /// Removes and returns the head item.
    pub fn poll(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Drops every queued item.
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

impl<T: Clone> Queue<T> {
    /// Returns a copy of the head item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("len", &self.len()).finish()
    }
}

/// Items stored in a [`DedupeQueue`] expose the key that identifies them.
pub trait UniqueNode {
    type Key: Eq + Hash + Clone;

    fn unique_id(&self) -> Self::Key;
}

struct DedupeInner<T: UniqueNode> {
    items: VecDeque<T>,
    in_queue: HashSet<T::Key>,
}

/// A FIFO queue holding at most one entry per [`UniqueNode::unique_id`].
///
/// Pushing an item whose key is already queued is a silent no-op. The
/// presence check and the insert happen under the same lock, so two racing
/// pushes of one key can never both land.
pub struct DedupeQueue<T: UniqueNode> {
    inner: Mutex<DedupeInner<T>>,
}

impl<T: UniqueNode> DedupeQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DedupeInner {
                items: VecDeque::new(),
                in_queue: HashSet::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Returns true when an item with `key` is waiting in the queue.
    pub fn contains(&self, key: &T::Key) -> bool {
        self.inner.lock().in_queue.contains(key)
    }

    /// Appends at the tail. Returns `false` if the key was already queued.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if !inner.in_queue.insert(item.unique_id()) {
            return false;
        }
        inner.items.push_back(item);
        true
    }

    /// Inserts at the head. Returns `false` if the key was already queued.
    pub fn shift(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if !inner.in_queue.insert(item.unique_id()) {
            return false;
        }
        inner.items.push_front(item);
        true
    }

    /// Removes the head item and releases its key.
    pub fn poll(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front()?;
        inner.in_queue.remove(&item.unique_id());
        Some(item)
    }
}

impl<T: UniqueNode + Clone> DedupeQueue<T> {
    pub fn peek(&self) -> Option<T> {
        self.inner.lock().items.front().cloned()
    }
}

impl<T: UniqueNode> Default for DedupeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: UniqueNode> fmt::Debug for DedupeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeQueue").field("len", &self.len()).finish()
    }
}

type LessFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A queue kept sorted by a caller-supplied `less` comparator.
///
/// `less(a, b)` returning true means `a` must be polled before `b`. An item
/// is inserted before the first queued item it is strictly less than, so
/// equal items keep their insertion order. Insert is O(n).
pub struct PriorityQueue<T> {
    items: Mutex<VecDeque<T>>,
    less: LessFn<T>,
}

impl<T> PriorityQueue<T> {
    pub fn new<F>(less: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            items: Mutex::new(VecDeque::new()),
            less: Box::new(less),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Inserts `item` at its sorted position.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        let position = items
            .iter()
            .position(|queued| (self.less)(&item, queued))
            .unwrap_or(items.len());
        items.insert(position, item);
    }

    /// Removes the minimal item.
    pub fn poll(&self) -> Option<T> {
        self.items.lock().pop_front()
    }
}

impl<T: Clone> PriorityQueue<T> {
    pub fn peek(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }
}

impl<T> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .finish()
    }
}
