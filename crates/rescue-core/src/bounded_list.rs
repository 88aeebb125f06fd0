//! A bounded, mutex-protected, doubly-linked container over a pre-allocated
//! slab of slots.
//!
//! This is the "BoundedList" primitive the rest of the system is built on:
//! a fixed-capacity FIFO/LIFO with blocking back-pressure on both ends
//! (`add` blocks while full, `pop`/`pop_tail` block while empty). Stable
//! `Handle`s let a caller remove an arbitrary element in O(1) without
//! walking the list, which the DroneRegistry relies on to drop a specific
//! drone record on eviction.
//!
//! Slots are an index-based arena (`Vec<Slot<T>>` + a free list) rather than
//! individually heap-allocated nodes, so there is no per-node allocator and
//! no `T**` vs `T*` ambiguity to worry about; a [`Handle`] is just a slot
//! index plus a generation counter so a stale handle from a removed-and-
//! reused slot is rejected instead of silently touching the wrong item.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoundedListError {
    #[error("list is closed")]
    Closed,
    #[error("operation timed out")]
    TimedOut,
}

/// An opaque, stable reference to a stored element. Valid only for the
/// [`BoundedList`] that produced it; using it against a different list, or
/// after the slot it names has been removed and reused, returns `false`/`None`
/// rather than touching unrelated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    index: usize,
    generation: u64,
}

struct Slot<T> {
    generation: u64,
    item: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
    capacity: usize,
    /// Most recently added element.
    head: Option<usize>,
    /// Oldest element still present.
    tail: Option<usize>,
    closed: bool,
}

impl<T> Inner<T> {
    fn link_at_head(&mut self, index: usize) {
        let old_head = self.head;
        self.slots[index].prev = None;
        self.slots[index].next = old_head;
        if let Some(old_head) = old_head {
            self.slots[old_head].prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index].prev = None;
        self.slots[index].next = None;
    }

    fn remove_at(&mut self, index: usize) -> T {
        self.unlink(index);
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        let item = slot.item.take().expect("slot marked occupied had no item");
        self.free.push(index);
        self.len -= 1;
        item
    }
}

/// Fixed-capacity, mutex-protected doubly-linked list with blocking
/// back-pressure on both `add` (while full) and `pop`/`pop_tail` (while
/// empty). Async-native: "blocking" means the task suspends, it does not
/// park an OS thread.
pub struct BoundedList<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

impl<T: Clone> BoundedList<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                generation: 0,
                item: None,
                prev: None,
                next: None,
            });
            free.push(capacity - 1 - i);
        }
        Self {
            inner: Mutex::new(Inner {
                slots,
                free,
                len: 0,
                capacity,
                head: None,
                tail: None,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    /// Fixed at construction time; never changes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert `item`, blocking while the list is full. Returns a [`Handle`]
    /// usable for O(1) removal.
    pub async fn add(&self, item: T) -> Result<Handle, BoundedListError> {
        loop {
            let notified = self.not_full.notified();
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(BoundedListError::Closed);
                }
                if inner.len < inner.capacity {
                    let index = inner.free.pop().expect("len < capacity implies a free slot");
                    inner.slots[index].item = Some(item);
                    inner.link_at_head(index);
                    inner.len += 1;
                    let generation = inner.slots[index].generation;
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(Handle {
                        index,
                        generation,
                    });
                }
            }
            notified.await;
        }
    }

    /// Like [`add`](Self::add) but gives up after `timeout` elapses.
    pub async fn add_timeout(&self, item: T, timeout: Duration) -> Result<Handle, BoundedListError> {
        tokio::time::timeout(timeout, self.add(item))
            .await
            .unwrap_or(Err(BoundedListError::TimedOut))
    }

    /// Remove the most recently added element, blocking while empty.
    pub async fn pop(&self) -> Result<T, BoundedListError> {
        self.pop_end(true).await
    }

    /// Remove the oldest element, blocking while empty. The Dispatcher uses
    /// this to drain incidents in FIFO order.
    pub async fn pop_tail(&self) -> Result<T, BoundedListError> {
        self.pop_end(false).await
    }

    /// Like [`pop_tail`](Self::pop_tail) but gives up after `timeout`
    /// elapses instead of blocking forever.
    pub async fn pop_tail_timeout(&self, timeout: Duration) -> Result<T, BoundedListError> {
        tokio::time::timeout(timeout, self.pop_tail())
            .await
            .unwrap_or(Err(BoundedListError::TimedOut))
    }

    async fn pop_end(&self, from_head: bool) -> Result<T, BoundedListError> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut inner = self.inner.lock().await;
                let target = if from_head { inner.head } else { inner.tail };
                if let Some(index) = target {
                    let item = inner.remove_at(index);
                    drop(inner);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                if inner.closed {
                    return Err(BoundedListError::Closed);
                }
            }
            notified.await;
        }
    }

    /// Non-removing access to the most recently added element.
    pub async fn peek(&self) -> Option<T> {
        let inner = self.inner.lock().await;
        inner.head.and_then(|i| inner.slots[i].item.clone())
    }

    /// Non-removing access to the oldest element.
    pub async fn peek_tail(&self) -> Option<T> {
        let inner = self.inner.lock().await;
        inner.tail.and_then(|i| inner.slots[i].item.clone())
    }

    /// Remove a specific element by handle. Returns `false` if the handle is
    /// stale (already removed, or from a reused slot).
    pub async fn remove(&self, handle: Handle) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner.slots.get(handle.index) else {
            return false;
        };
        if slot.generation != handle.generation || slot.item.is_none() {
            return false;
        }
        inner.remove_at(handle.index);
        drop(inner);
        self.not_full.notify_one();
        true
    }

    /// Scan from head, removing the first element for which `matches`
    /// returns true.
    pub async fn remove_match<F>(&self, matches: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut inner = self.inner.lock().await;
        let mut cursor = inner.head;
        while let Some(index) = cursor {
            cursor = inner.slots[index].next;
            let is_match = inner.slots[index]
                .item
                .as_ref()
                .map(&matches)
                .unwrap_or(false);
            if is_match {
                let item = inner.remove_at(index);
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
        }
        None
    }

    /// Snapshot every element currently stored, head to tail (newest to
    /// oldest). Intended for read-only observers (a map viewer, a status
    /// endpoint) - not used on any hot path.
    pub async fn snapshot(&self) -> Vec<T> {
        let inner = self.inner.lock().await;
        let mut out = Vec::with_capacity(inner.len);
        let mut cursor = inner.head;
        while let Some(index) = cursor {
            if let Some(item) = &inner.slots[index].item {
                out.push(item.clone());
            }
            cursor = inner.slots[index].next;
        }
        out
    }

    /// Close the list: wakes every waiter so `add`/`pop` return
    /// [`BoundedListError::Closed`] instead of blocking forever. Idempotent.
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn add_and_pop_tail_is_fifo() {
        let list: BoundedList<i32> = BoundedList::new(4);
        list.add(1).await.unwrap();
        list.add(2).await.unwrap();
        list.add(3).await.unwrap();

        assert_eq!(list.pop_tail().await.unwrap(), 1);
        assert_eq!(list.pop_tail().await.unwrap(), 2);
        assert_eq!(list.pop_tail().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn pop_is_lifo_from_head() {
        let list: BoundedList<i32> = BoundedList::new(4);
        list.add(1).await.unwrap();
        list.add(2).await.unwrap();

        assert_eq!(list.pop().await.unwrap(), 2);
        assert_eq!(list.pop().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn capacity_is_enforced_with_backpressure() {
        let list = Arc::new(BoundedList::<i32>::new(1));
        list.add(1).await.unwrap();

        assert!(matches!(
            list.add_timeout(2, Duration::from_millis(20)).await,
            Err(BoundedListError::TimedOut)
        ));

        let popped = list.pop_tail().await.unwrap();
        assert_eq!(popped, 1);
        list.add(2).await.unwrap();
        assert_eq!(list.pop_tail().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_by_handle_is_idempotent() {
        let list: BoundedList<&'static str> = BoundedList::new(4);
        let h = list.add("a").await.unwrap();
        list.add("b").await.unwrap();

        assert!(list.remove(h).await);
        assert!(!list.remove(h).await, "removing twice must not succeed");
        assert_eq!(list.snapshot().await, vec!["b"]);
    }

    #[tokio::test]
    async fn stale_handle_after_slot_reuse_is_rejected() {
        let list: BoundedList<i32> = BoundedList::new(1);
        let h1 = list.add(1).await.unwrap();
        list.remove(h1).await;
        let h2 = list.add(2).await.unwrap();

        assert_ne!(h1, h2, "reused slot must mint a new generation");
        assert!(!list.remove(h1).await);
        assert!(list.remove(h2).await);
    }

    #[tokio::test]
    async fn remove_match_scans_from_head() {
        let list: BoundedList<i32> = BoundedList::new(4);
        list.add(10).await.unwrap();
        list.add(20).await.unwrap();
        list.add(30).await.unwrap();

        let removed = list.remove_match(|v| *v == 20).await;
        assert_eq!(removed, Some(20));
        assert_eq!(list.snapshot().await, vec![30, 10]);
    }

    #[tokio::test]
    async fn pop_tail_blocks_while_empty_then_unblocks() {
        let list = Arc::new(BoundedList::<i32>::new(4));
        let waiter = {
            let list = list.clone();
            tokio::spawn(async move { list.pop_tail().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        list.add(42).await.unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn close_wakes_blocked_waiters() {
        let list = Arc::new(BoundedList::<i32>::new(4));
        let waiter = {
            let list = list.clone();
            tokio::spawn(async move { list.pop_tail().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        list.close().await;

        assert_eq!(waiter.await.unwrap(), Err(BoundedListError::Closed));
    }

    #[tokio::test]
    async fn closed_add_fails() {
        let list: BoundedList<i32> = BoundedList::new(4);
        list.close().await;
        assert_eq!(list.add(1).await, Err(BoundedListError::Closed));
    }
}
