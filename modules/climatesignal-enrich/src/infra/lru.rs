//! Fixed-capacity LRU set backed by an arena-allocated doubly linked list.
//!
//! Nodes live in a `Vec` and link to each other by index; a `HashMap` maps
//! keys to their slot. Insert, touch and evict are all O(1) and evicted
//! slots are reused, so the arena never grows past `capacity`.

use std::collections::HashMap;
use std::hash::Hash;

struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruSet<K> {
    capacity: usize,
    index: HashMap<K, usize>,
    nodes: Vec<Node<K>>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used; next to be evicted.
    tail: Option<usize>,
}

impl<K: Eq + Hash + Clone> LruSet<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            index: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Membership test without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// If present, move `key` to the most-recent position and return true.
    pub fn touch(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&slot) => {
                self.move_to_front(slot);
                true
            }
            None => false,
        }
    }

    /// Insert `key` as most recent. Returns the evicted key, if capacity
    /// was exceeded. Re-inserting a present key only refreshes it.
    pub fn insert(&mut self, key: K) -> Option<K> {
        if self.touch(&key) {
            return None;
        }
        if self.capacity == 0 {
            return Some(key);
        }

        if self.index.len() < self.capacity {
            let slot = self.nodes.len();
            self.nodes.push(Node {
                key: key.clone(),
                prev: None,
                next: None,
            });
            self.index.insert(key, slot);
            self.push_front(slot);
            return None;
        }

        // Full: recycle the tail slot for the new key.
        let slot = self.tail?;
        self.unlink(slot);
        let evicted = std::mem::replace(&mut self.nodes[slot].key, key.clone());
        self.index.remove(&evicted);
        self.index.insert(key, slot);
        self.push_front(slot);
        Some(evicted)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = cursor?;
            let node = &self.nodes[slot];
            cursor = node.next;
            Some(&node.key)
        })
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = &self.nodes[slot];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}
