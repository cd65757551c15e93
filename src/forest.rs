//! `HashedForest` (spec §4.1): a forest of nodes keyed by content hash,
//! each carrying `{parent, hash, payload}`.
//!
//! Nodes live in a `slotmap::SlotMap` generational arena rather than behind
//! raw parent pointers (design note §9) — a node reference (`NodeKey`)
//! embeds a generation counter, so a stale key from a node that has since
//! been erased simply fails to resolve instead of dangling.

use crate::hash::Hash;
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

new_key_type! {
    /// A stable reference to a forest node. Stale keys (from an erased
    /// node) no longer resolve via `get`/`get_mut`.
    pub struct NodeKey;
}

struct Node<T> {
    parent: Option<NodeKey>,
    hash: Hash,
    payload: T,
}

/// A forest of nodes keyed by content hash. A node is a root iff its
/// parent is `None`.
pub struct HashedForest<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    by_hash: HashMap<Hash, NodeKey>,
    children: HashMap<NodeKey, Vec<NodeKey>>,
    insertion_order: Vec<NodeKey>,
}

impl<T> Default for HashedForest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HashedForest<T> {
    pub fn new() -> Self {
        HashedForest {
            nodes: SlotMap::with_key(),
            by_hash: HashMap::new(),
            children: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node as a child of `parent` (or as a root, if `None`).
    /// `hash` must be unique across the forest; a duplicate insertion is a
    /// programmer error and panics, per spec §4.1.
    pub fn add_child(&mut self, parent: Option<NodeKey>, hash: Hash, payload: T) -> NodeKey {
        assert!(
            !self.by_hash.contains_key(&hash),
            "HashedForest::add_child: duplicate hash insertion"
        );
        if let Some(p) = parent {
            assert!(
                self.nodes.contains_key(p),
                "HashedForest::add_child: parent does not exist"
            );
        }
        let key = self.nodes.insert(Node {
            parent,
            hash,
            payload,
        });
        self.by_hash.insert(hash, key);
        self.insertion_order.push(key);
        if let Some(p) = parent {
            self.children.entry(p).or_default().push(key);
        }
        key
    }

    pub fn find(&self, hash: &Hash) -> Option<NodeKey> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: NodeKey) -> Option<&T> {
        self.nodes.get(key).map(|n| &n.payload)
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut T> {
        self.nodes.get_mut(key).map(|n| &mut n.payload)
    }

    pub fn hash_of(&self, key: NodeKey) -> Option<Hash> {
        self.nodes.get(key).map(|n| n.hash)
    }

    pub fn parent_of(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(key).and_then(|n| n.parent)
    }

    pub fn children_of(&self, key: NodeKey) -> Vec<NodeKey> {
        self.children.get(&key).cloned().unwrap_or_default()
    }

    pub fn is_leaf(&self, key: NodeKey) -> bool {
        self.children.get(&key).map(|c| c.is_empty()).unwrap_or(true)
    }

    pub fn is_root(&self, key: NodeKey) -> bool {
        self.parent_of(key).is_none()
    }

    /// Removes `key`, promoting its direct children to roots. Returns the
    /// newly-orphaned children so the caller (which alone understands any
    /// payload-level "root" bookkeeping, e.g. `ChainTree`'s `root_height`)
    /// can fix them up.
    pub fn erase(&mut self, key: NodeKey) -> Vec<NodeKey> {
        let node = self
            .nodes
            .remove(key)
            .expect("HashedForest::erase: unknown key");
        self.by_hash.remove(&node.hash);
        if let Some(parent) = node.parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|&k| k != key);
            }
        }
        let orphaned = self.children.remove(&key).unwrap_or_default();
        for &child in &orphaned {
            if let Some(n) = self.nodes.get_mut(child) {
                n.parent = None;
            }
        }
        orphaned
    }

    /// Walks parent-wards from `leaf`, deleting every node on the path to
    /// its forest root. At each step, any non-chain sibling of the node
    /// being deleted is orphaned (becomes a root) rather than deleted.
    /// Returns every newly-orphaned node, across the whole walk, for the
    /// caller's root-height fixup.
    ///
    /// Precondition: `leaf` is a leaf (checked, panics otherwise).
    pub fn erase_chain(&mut self, leaf: NodeKey) -> Vec<NodeKey> {
        assert!(
            self.is_leaf(leaf),
            "HashedForest::erase_chain: argument is not a leaf"
        );
        let mut orphaned = Vec::new();
        let mut current = Some(leaf);
        let mut keep_child: Option<NodeKey> = None;

        while let Some(key) = current {
            let parent = self
                .nodes
                .get(key)
                .expect("erase_chain: node vanished mid-walk")
                .parent;

            if let Some(siblings) = self.children.get(&key).cloned() {
                for sibling in siblings {
                    if Some(sibling) != keep_child {
                        if let Some(n) = self.nodes.get_mut(sibling) {
                            n.parent = None;
                        }
                        orphaned.push(sibling);
                    }
                }
            }

            let node = self.nodes.remove(key).expect("erase_chain: double remove");
            self.by_hash.remove(&node.hash);
            self.children.remove(&key);
            if let Some(p) = parent {
                if let Some(siblings) = self.children.get_mut(&p) {
                    siblings.retain(|&k| k != key);
                }
            }

            keep_child = Some(key);
            current = parent;
        }

        orphaned
    }

    /// A lazy iterator from `node` toward the root: `node`, its parent,
    /// grandparent, and so on until (and not including) a `None` parent.
    pub fn up_from(&self, node: NodeKey) -> UpFrom<'_, T> {
        UpFrom {
            forest: self,
            current: Some(node),
        }
    }

    /// All live nodes in insertion order. Safe to erase nodes between
    /// calls to `next()` on a prior snapshot: this iterator owns a
    /// snapshot of keys taken at construction time and simply skips keys
    /// that no longer resolve.
    pub fn forward_from_oldest(&self) -> ForwardFromOldest<'_, T> {
        ForwardFromOldest {
            forest: self,
            order: self.insertion_order.clone(),
            next: 0,
        }
    }
}

pub struct UpFrom<'a, T> {
    forest: &'a HashedForest<T>,
    current: Option<NodeKey>,
}

impl<'a, T> Iterator for UpFrom<'a, T> {
    type Item = NodeKey;
    fn next(&mut self) -> Option<NodeKey> {
        let key = self.current?;
        self.current = self.forest.parent_of(key);
        Some(key)
    }
}

pub struct ForwardFromOldest<'a, T> {
    forest: &'a HashedForest<T>,
    order: Vec<NodeKey>,
    next: usize,
}

impl<'a, T> Iterator for ForwardFromOldest<'a, T> {
    type Item = (NodeKey, &'a T);
    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.order.len() {
            let key = self.order[self.next];
            self.next += 1;
            if let Some(payload) = self.forest.get(key) {
                return Some((key, payload));
            }
        }
        None
    }
}
