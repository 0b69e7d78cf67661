//! Index-addressed doubly linked list.
//!
//! Nodes live in a slab and refer to their neighbours by slot index, so the
//! list owns every node exactly once and no node holds a reference to
//! another. Freed slots are recycled. Front is most recent, back is oldest.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K> {
    key: Option<K>,
    prev: usize,
    next: usize,
}

/// Ordered key set with O(1) push, move-to-front, remove and back lookup.
#[derive(Debug)]
pub struct OrderList<K> {
    nodes: Vec<Node<K>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
}

impl<K: Clone + Eq + Hash> OrderList<K> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert at the front. A key already present is moved to the front and
    /// `false` is returned.
    pub fn push_front(&mut self, key: K) -> bool {
        if let Some(&idx) = self.index.get(&key) {
            self.unlink(idx);
            self.link_front(idx);
            return false;
        }

        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx].key = Some(key.clone());
                idx
            }
            None => {
                self.nodes.push(Node {
                    key: Some(key.clone()),
                    prev: NIL,
                    next: NIL,
                });
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.link_front(idx);
        true
    }

    /// Move a present key to the front. Returns whether the key was present.
    pub fn move_to_front(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&idx) => {
                if idx != self.head {
                    self.unlink(idx);
                    self.link_front(idx);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(idx) => {
                self.unlink(idx);
                self.nodes[idx].key = None;
                self.free.push(idx);
                true
            }
            None => false,
        }
    }

    /// Oldest key.
    pub fn back(&self) -> Option<&K> {
        self.nodes.get(self.tail).and_then(|n| n.key.as_ref())
    }

    pub fn pop_back(&mut self) -> Option<K> {
        let key = self.back()?.clone();
        self.remove(&key);
        Some(key)
    }

    /// Keys from most recent to oldest.
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn link_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }
}

impl<K: Clone + Eq + Hash> Default for OrderList<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, K> {
    list: &'a OrderList<K>,
    cursor: usize,
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.nodes.get(self.cursor)?;
        self.cursor = node.next;
        node.key.as_ref()
    }
}
