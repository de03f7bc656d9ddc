//! Recency Tracker (LRU)
//!
//! A doubly-linked list of keys ordered by last access, most recent at the
//! head. Nodes live in a `Vec` arena and link to each other by slot index;
//! a `HashMap` from key to slot gives O(1) touch, erase and evict without
//! any linear scan.
//!
//! ```text
//!   head (most recent)                          tail (evicted next)
//!      │                                              │
//!      ▼                                              ▼
//!   ┌──────┐ next ┌──────┐ next ┌──────┐ next ┌──────┐
//!   │ "c"  │─────>│ "a"  │─────>│ "d"  │─────>│ "b"  │
//!   │      │<─────│      │<─────│      │<─────│      │
//!   └──────┘ prev └──────┘ prev └──────┘ prev └──────┘
//! ```
//!
//! The list must always hold exactly the keys present in the keyspace.
//! Only the storage engine calls into it.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
struct Node {
    key: Bytes,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct RecencyList {
    nodes: Vec<Node>,
    /// Arena slots freed by erase/evict, reused before growing `nodes`.
    /// A free slot holds an empty key and no links.
    free: Vec<usize>,
    slots: HashMap<Bytes, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl RecencyList {
    fn node(&self, slot: usize) -> &Node {
        &self.nodes[slot]
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        &mut self.nodes[slot]
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }

        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn allocate(&mut self, key: Bytes) -> usize {
        let node = Node {
            key,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Bytes {
        self.unlink(slot);
        self.free.push(slot);
        std::mem::take(&mut self.nodes[slot].key)
    }

    fn touch(&mut self, key: &Bytes) {
        if let Some(&slot) = self.slots.get(key) {
            if self.head != Some(slot) {
                self.unlink(slot);
                self.push_front(slot);
            }
            return;
        }

        let slot = self.allocate(key.clone());
        self.push_front(slot);
        self.slots.insert(key.clone(), slot);
    }

    fn evict(&mut self) -> Option<Bytes> {
        let slot = self.tail?;
        let key = self.release(slot);
        self.slots.remove(&key);
        Some(key)
    }

    fn erase(&mut self, key: &[u8]) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.release(slot);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    fn keys_least_recent_first(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.slots.len());
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            let node = self.node(slot);
            keys.push(node.key.clone());
            cursor = node.prev;
        }
        keys
    }
}

/// Thread-safe recency order over the live keys.
#[derive(Debug, Default)]
pub struct LruTracker {
    list: Mutex<RecencyList>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the key as most recently used, inserting it if absent.
    pub fn touch(&self, key: &Bytes) {
        self.list.lock().touch(key);
    }

    /// Removes and returns the least recently used key.
    pub fn evict(&self) -> Option<Bytes> {
        self.list.lock().evict()
    }

    /// Removes the key if present. Returns `true` if it was tracked.
    pub fn erase(&self, key: &[u8]) -> bool {
        self.list.lock().erase(key)
    }

    pub fn clear(&self) {
        self.list.lock().clear();
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.list.lock().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.list.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tracked keys, least recently used first.
    pub fn keys_least_recent_first(&self) -> Vec<Bytes> {
        self.list.lock().keys_least_recent_first()
    }
}
