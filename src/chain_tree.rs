//! `ChainTree<D>` (spec §4.2): a contiguous `Vec<D>` holding the heaviest
//! linear chain, plus a `HashedForest` holding every non-canonical branch
//! near the tip.
//!
//! `D` carries no obligation to know its own hash or height — both are
//! tracked by the tree itself (`Slot`/`NodeData`) and supplied explicitly
//! by the caller on insertion. This lets the exact same `ChainTree` engine
//! back both `HeaderTimechain` (where `D = HeaderContext`, which happens to
//! carry its own hash too) and `Sidecar<T>` (where `D = T` may be as bare
//! as an `i32`, with no hash of its own — its hash is always the block
//! hash handed down through `AddSync`). See SPEC_FULL.md's Open Question
//! resolution for the full rationale.

use crate::error::{ChainTreeError, ForestContractViolation, InvalidParent};
use crate::forest::{HashedForest, NodeKey};
use crate::hash::Hash;

#[derive(Clone)]
struct Slot<D> {
    hash: Hash,
    value: D,
}

/// A forest node's payload: the domain value plus the structural
/// bookkeeping `ChainTree` needs (height, content hash, and
/// `root_height` — the height of the earliest ancestor of this node that
/// is still in the forest, used for bounded pruning).
#[derive(Clone)]
pub struct NodeData<D> {
    pub hash: Hash,
    pub height: i32,
    pub value: D,
    pub root_height: i32,
}

#[derive(Clone, Copy)]
struct TipMeta {
    height: i32,
    hash: Hash,
}

/// A reference to a node's position, either on the linear chain or in the
/// forest. Plain data (no borrow), so it can be passed into `add`/
/// `promote_branch` by value; dereferencing it always requires an
/// explicit `&ChainTree` (see `get`), which is how this crate ties
/// iterator validity to holding the structural lock, idiomatically,
/// through the borrow checker rather than a manual scope guard.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Position {
    Invalid,
    InChain(i32),
    InForest(NodeKey),
}

impl Position {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Position::Invalid)
    }
}

/// A stable reference across reorgs (spec §3). `ByHeight` migrates: a
/// reorg can change which hash occupies a given height. `ByHash` pins a
/// specific node currently held in the forest.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Locator {
    ByHeight(i32),
    ByHash(Hash),
}

/// A `(height, hash)` pair, stable independent of reorgs: resolves iff
/// either the linear chain's slot at `height` still carries `hash`, or
/// the forest currently holds `hash` (regardless of its height — the
/// hash is definitionally unique, see invariant 2).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Key {
    pub height: i32,
    pub hash: Hash,
}

pub struct ChainTree<D: Clone> {
    chain: Vec<Slot<D>>,
    tip: Option<TipMeta>,
    forest: HashedForest<NodeData<D>>,
    min_root_height: i32,
}

impl<D: Clone> Default for ChainTree<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone> ChainTree<D> {
    pub fn new() -> Self {
        ChainTree {
            chain: Vec::new(),
            tip: None,
            forest: HashedForest::new(),
            min_root_height: i32::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn tip_height(&self) -> Option<i32> {
        self.tip.map(|t| t.height)
    }

    pub fn tip_hash(&self) -> Option<Hash> {
        self.tip.map(|t| t.hash)
    }

    pub fn tip_position(&self) -> Position {
        match self.tip {
            Some(t) => Position::InChain(t.height),
            None => Position::Invalid,
        }
    }

    pub fn chain_value_at(&self, height: i32) -> Option<&D> {
        self.chain.get(height as usize).map(|s| &s.value)
    }

    pub fn chain_hash_at(&self, height: i32) -> Option<Hash> {
        self.chain.get(height as usize).map(|s| s.hash)
    }

    /// Dereferences a position. `None` if the position is invalid, or
    /// names a forest node that has since been erased.
    pub fn get(&self, position: Position) -> Option<&D> {
        match position {
            Position::Invalid => None,
            Position::InChain(h) => self.chain_value_at(h),
            Position::InForest(key) => self.forest.get(key).map(|n| &n.value),
        }
    }

    /// Like `get`, but yields a mutable reference. Used by sidecar
    /// payload writes (`Set`), which mutate a node's value in place
    /// without touching its position in the tree.
    pub fn get_mut(&mut self, position: Position) -> Option<&mut D> {
        match position {
            Position::Invalid => None,
            Position::InChain(h) => self.chain.get_mut(h as usize).map(|s| &mut s.value),
            Position::InForest(key) => self.forest.get_mut(key).map(|n| &mut n.value),
        }
    }

    pub fn height_at(&self, position: Position) -> Option<i32> {
        match position {
            Position::Invalid => None,
            Position::InChain(h) => Some(h),
            Position::InForest(key) => self.forest.get(key).map(|n| n.height),
        }
    }

    pub fn hash_at(&self, position: Position) -> Option<Hash> {
        match position {
            Position::Invalid => None,
            Position::InChain(h) => self.chain_hash_at(h),
            Position::InForest(key) => self.forest.hash_of(key),
        }
    }

    /// Matches the chain tip first (O(1) equality), then falls back to a
    /// forest lookup.
    pub fn find_in_tip_or_forest(&self, hash: &Hash) -> Position {
        if let Some(t) = self.tip {
            if t.hash == *hash {
                return Position::InChain(t.height);
            }
        }
        match self.forest.find(hash) {
            Some(key) => Position::InForest(key),
            None => Position::Invalid,
        }
    }

    /// Resolves a `Locator` to a position. `ByHeight` only ever resolves
    /// into the linear chain (it migrates across reorgs by design);
    /// `ByHash` only ever resolves into the forest, since the chain tip
    /// is already reachable by height and invariant 2 forbids a hash
    /// existing in both places at once.
    pub fn resolve_locator(&self, locator: Locator) -> Position {
        match locator {
            Locator::ByHeight(h) => {
                if h >= 0 && (h as usize) < self.chain.len() {
                    Position::InChain(h)
                } else {
                    Position::Invalid
                }
            }
            Locator::ByHash(hash) => match self.forest.find(&hash) {
                Some(key) => Position::InForest(key),
                None => Position::Invalid,
            },
        }
    }

    /// Resolves a `Key`, requiring both fields to agree with current
    /// state: either the chain slot at `key.height` carries `key.hash`,
    /// or the forest holds `key.hash` (at whatever height it currently
    /// sits at — forest membership alone is sufficient since a hash is
    /// never duplicated across chain and forest).
    pub fn resolve_key(&self, key: Key) -> Position {
        if let Some(hash) = self.chain_hash_at(key.height) {
            if hash == key.hash {
                return Position::InChain(key.height);
            }
        }
        match self.forest.find(&key.hash) {
            Some(node_key) => Position::InForest(node_key),
            None => Position::Invalid,
        }
    }

    fn update_min_root_height(&mut self, candidate: i32) {
        if candidate < self.min_root_height {
            self.min_root_height = candidate;
        }
    }

    /// Inserts `value` as a child of `parent`. `height`/`hash` are
    /// supplied by the caller rather than derived from `value` (see the
    /// module doc). Returns the new node's position.
    pub fn add(
        &mut self,
        parent: Position,
        height: i32,
        hash: Hash,
        value: D,
    ) -> Result<Position, ChainTreeError> {
        match parent {
            Position::Invalid => {
                if !self.chain.is_empty() {
                    return Err(InvalidParent(
                        "non-genesis insertion requires a valid parent".into(),
                    )
                    .into());
                }
                if height != 0 {
                    return Err(InvalidParent("genesis must be inserted at height 0".into()).into());
                }
                self.chain.push(Slot { hash, value });
                self.tip = Some(TipMeta { height: 0, hash });
                Ok(Position::InChain(0))
            }
            Position::InChain(parent_height) => {
                if height != parent_height + 1 {
                    return Err(InvalidParent(format!(
                        "height {height} is not parent height {parent_height} + 1"
                    ))
                    .into());
                }
                if parent_height < 0 || parent_height as usize >= self.chain.len() {
                    return Err(InvalidParent("in-chain parent out of bounds".into()).into());
                }
                let tip_height = self.tip.map(|t| t.height).unwrap_or(-1);
                if parent_height == tip_height {
                    self.chain.push(Slot { hash, value });
                    self.tip = Some(TipMeta { height, hash });
                    Ok(Position::InChain(height))
                } else {
                    // Forking off a mid-chain position: the new node is
                    // itself a forest root (its parent lives in the chain).
                    let node = NodeData {
                        hash,
                        height,
                        value,
                        root_height: height,
                    };
                    let key = self.forest.add_child(None, hash, node);
                    self.update_min_root_height(height);
                    Ok(Position::InForest(key))
                }
            }
            Position::InForest(parent_key) => {
                let parent_node = self
                    .forest
                    .get(parent_key)
                    .ok_or_else(|| InvalidParent("forest parent not found".to_string()))?;
                if height != parent_node.height + 1 {
                    return Err(InvalidParent(format!(
                        "height {height} is not forest parent height {} + 1",
                        parent_node.height
                    ))
                    .into());
                }
                let root_height = parent_node.root_height;
                let node = NodeData {
                    hash,
                    height,
                    value,
                    root_height,
                };
                let key = self.forest.add_child(Some(parent_key), hash, node);
                self.update_min_root_height(root_height);
                Ok(Position::InForest(key))
            }
        }
    }

    /// Recursively sets `root_height` to `new_root_height` across the
    /// whole subtree rooted at `key` — needed whenever `HashedForest`
    /// orphans a node (and everything beneath it logically gets a new
    /// forest root), since `HashedForest` itself has no notion of
    /// `root_height`.
    fn propagate_root_height(&mut self, key: NodeKey, new_root_height: i32) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(n) = self.forest.get_mut(k) {
                n.root_height = new_root_height;
            }
            stack.extend(self.forest.children_of(k));
        }
    }

    fn reroot_orphans(&mut self, orphans: Vec<NodeKey>) {
        for key in orphans {
            let own_height = match self.forest.get(key) {
                Some(n) => n.height,
                None => continue,
            };
            self.propagate_root_height(key, own_height);
            self.update_min_root_height(own_height);
        }
    }

    /// Performs an in-place reorg: swaps the forest branch ending at
    /// `tip` into the linear chain, demoting the displaced chain suffix
    /// into the forest. `old_chain_hashes` gives each demoted element's
    /// hash, oldest (closest to the fork) first; its length must equal
    /// the number of chain slots above the fork point.
    ///
    /// Precondition: `tip` names a forest leaf.
    pub fn promote_branch(
        &mut self,
        tip: Position,
        old_chain_hashes: &[Hash],
    ) -> Result<(), ChainTreeError> {
        let leaf_key = match tip {
            Position::InForest(k) => k,
            _ => {
                return Err(InvalidParent("promote_branch requires a forest position".into()).into());
            }
        };
        if !self.forest.is_leaf(leaf_key) {
            return Err(
                ForestContractViolation("promote_branch requires a leaf tip".into()).into(),
            );
        }

        let stack: Vec<NodeKey> = self.forest.up_from(leaf_key).collect();
        let root_key = *stack
            .last()
            .expect("promote_branch: walk from a leaf always yields at least itself");
        let root_height = self
            .forest
            .get(root_key)
            .expect("promote_branch: root vanished mid-walk")
            .height;
        let fork_height = root_height - 1;

        let tip_height = self.tip.map(|t| t.height).unwrap_or(-1);
        if fork_height >= tip_height {
            return Err(InvalidParent(
                "fork point must be strictly below the current chain tip".into(),
            )
            .into());
        }

        let expected_len = (tip_height - fork_height) as usize;
        if old_chain_hashes.is_empty() || old_chain_hashes.len() != expected_len {
            return Err(InvalidParent(format!(
                "old_chain_hashes length {} does not match demoted span {}",
                old_chain_hashes.len(),
                expected_len
            ))
            .into());
        }

        // Snapshot the about-to-be-truncated chain slots before mutating.
        let demoted_slots: Vec<Slot<D>> = self.chain[(fork_height + 1) as usize..].to_vec();

        // Build the demoted branch as new forest nodes, chained
        // parent -> child, rooted where the old tip used to attach.
        let mut parent_key: Option<NodeKey> = None;
        for (i, slot) in demoted_slots.iter().enumerate() {
            let height = fork_height + 1 + i as i32;
            let hash = old_chain_hashes[i];
            let node = NodeData {
                hash,
                height,
                value: slot.value.clone(),
                root_height: fork_height + 1,
            };
            let key = self.forest.add_child(parent_key, hash, node);
            parent_key = Some(key);
        }
        self.update_min_root_height(fork_height + 1);

        // Truncate the linear chain to the fork point and promote the
        // forest branch onto it, root to leaf.
        self.chain.truncate((fork_height + 1) as usize);
        for key in stack.iter().rev() {
            let node = self
                .forest
                .get(*key)
                .expect("promote_branch: branch node vanished mid-walk");
            self.chain.push(Slot {
                hash: node.hash,
                value: node.value.clone(),
            });
        }
        let last = self
            .chain
            .last()
            .expect("promote_branch: chain cannot be empty after promotion");
        self.tip = Some(TipMeta {
            height: self.chain.len() as i32 - 1,
            hash: last.hash,
        });

        let orphaned = self.forest.erase_chain(leaf_key);
        self.reroot_orphans(orphaned);

        Ok(())
    }

    /// Removes every forest node whose `root_height` falls below
    /// `chain_tip.height - max_keep_depth`. `min_root_height` is left
    /// deliberately stale across `promote_branch` (per spec §9's resolved
    /// open question) and is only ever refreshed here, on the next prune.
    pub fn prune_forest(&mut self, max_keep_depth: i32) {
        let tip_height = self.tip.map(|t| t.height).unwrap_or(-1);
        let threshold = tip_height - max_keep_depth;
        if self.min_root_height >= threshold {
            return;
        }

        let stale: Vec<NodeKey> = self
            .forest
            .forward_from_oldest()
            .filter(|(_, n)| n.root_height < threshold)
            .map(|(k, _)| k)
            .collect();

        for key in stale {
            if !self.forest.contains(key) {
                continue;
            }
            let orphaned = self.forest.erase(key);
            self.reroot_orphans(orphaned);
        }

        let new_min = self
            .forest
            .forward_from_oldest()
            .map(|(_, n)| n.root_height)
            .min()
            .unwrap_or(tip_height + 1);
        self.min_root_height = new_min;
    }

    /// Walks the chain/forest to find the ancestor of `position` at
    /// `height`. Uses the forest subtree's `root_height` to shortcut
    /// straight to the linear chain when the target predates the fork.
    pub fn ancestor_at_height(&self, position: Position, height: i32) -> Option<&D> {
        match position {
            Position::Invalid => None,
            Position::InChain(_) => self.chain_value_at(height),
            Position::InForest(key) => {
                let node = self.forest.get(key)?;
                if node.root_height > height {
                    return self.chain_value_at(height);
                }
                let mut current = key;
                loop {
                    let n = self.forest.get(current)?;
                    if n.height == height {
                        return Some(&n.value);
                    }
                    match self.forest.parent_of(current) {
                        Some(p) => current = p,
                        None => return self.chain_value_at(height),
                    }
                }
            }
        }
    }

    /// Ancestors of `position`, walking toward genesis. Yields `position`
    /// itself first, then its parent, grandparent, and so on.
    pub fn ancestors(&self, position: Position) -> Ancestors<'_, D> {
        Ancestors {
            tree: self,
            state: position,
        }
    }

    /// The full forest in replay order (parent-before-child, since the
    /// arena's insertion order already guarantees that): each entry's
    /// parent expressed as a `Position` — `InForest` if the parent is
    /// itself a forest node, `InChain(height - 1)` if this node is a
    /// forest root forked off the linear chain.
    pub fn forest_replay_order(&self) -> Vec<(Position, Hash)> {
        self.forest
            .forward_from_oldest()
            .map(|(key, node)| {
                let parent_position = match self.forest.parent_of(key) {
                    Some(parent_key) => Position::InForest(parent_key),
                    None => Position::InChain(node.height - 1),
                };
                (parent_position, node.hash)
            })
            .collect()
    }

    /// The height of the earliest still-forest ancestor of a forest
    /// position — i.e. `fork_height + 1` for the branch `position` sits
    /// on. `None` for anything but an `InForest` position.
    pub fn forest_root_height(&self, position: Position) -> Option<i32> {
        match position {
            Position::InForest(key) => self.forest.get(key).map(|n| n.root_height),
            _ => None,
        }
    }

    pub fn min_root_height(&self) -> i32 {
        self.min_root_height
    }

    pub fn forest_len(&self) -> usize {
        self.forest.len()
    }
}

pub struct Ancestors<'a, D: Clone> {
    tree: &'a ChainTree<D>,
    state: Position,
}

impl<'a, D: Clone> Iterator for Ancestors<'a, D> {
    type Item = &'a D;

    fn next(&mut self) -> Option<&'a D> {
        match self.state {
            Position::Invalid => None,
            Position::InChain(h) => {
                let slot = self.tree.chain.get(h as usize)?;
                self.state = if h == 0 {
                    Position::Invalid
                } else {
                    Position::InChain(h - 1)
                };
                Some(&slot.value)
            }
            Position::InForest(key) => {
                let node = self.tree.forest.get(key)?;
                self.state = match self.tree.forest.parent_of(key) {
                    Some(parent) => Position::InForest(parent),
                    None => {
                        let above = node.height - 1;
                        if above < 0 {
                            Position::Invalid
                        } else {
                            Position::InChain(above)
                        }
                    }
                };
                Some(&node.value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash {
        Hash::repeat_byte(byte)
    }

    #[test]
    fn add_requires_invalid_parent_on_empty_tree() {
        let mut tree: ChainTree<i32> = ChainTree::new();
        let err = tree.add(Position::InChain(0), 0, h(1), 10).unwrap_err();
        assert!(matches!(err, ChainTreeError::InvalidParent(_)));
    }

    #[test]
    fn linear_growth() {
        let mut tree: ChainTree<i32> = ChainTree::new();
        let g = tree.add(Position::Invalid, 0, h(1), 1).unwrap();
        let one = tree.add(g, 1, h(2), 2).unwrap();
        let two = tree.add(one, 2, h(3), 3).unwrap();
        assert_eq!(tree.chain_len(), 3);
        assert_eq!(tree.tip_hash(), Some(h(3)));
        assert_eq!(tree.forest_len(), 0);
        assert!(matches!(two, Position::InChain(2)));
    }

    #[test]
    fn fork_and_promote() {
        let mut tree: ChainTree<i32> = ChainTree::new();
        let g = tree.add(Position::Invalid, 0, h(0xAA), 0).unwrap();
        let one = tree.add(g, 1, h(0xBB), 1).unwrap();
        let cc = tree.add(one, 2, h(0xCC), 2).unwrap();

        // rejected fork: branches at height 1, stashed in the forest.
        let dd = tree.add(one, 2, h(0xDD), 20).unwrap();
        assert!(matches!(dd, Position::InForest(_)));
        assert_eq!(tree.tip_hash(), Some(h(0xCC)));

        // accepted reorg: extend the fork past the old tip, then promote.
        let ee = tree.add(dd, 3, h(0xEE), 21).unwrap();
        tree.promote_branch(ee, &[h(0xCC)]).unwrap();

        assert_eq!(tree.chain_len(), 4);
        assert_eq!(tree.chain_hash_at(2), Some(h(0xDD)));
        assert_eq!(tree.chain_hash_at(3), Some(h(0xEE)));
        assert_eq!(tree.tip_hash(), Some(h(0xEE)));

        let displaced = tree.find_in_tip_or_forest(&h(0xCC));
        assert!(matches!(displaced, Position::InForest(_)));
        let _ = cc;
    }

    #[test]
    fn promote_branch_rejects_equal_work_tip() {
        // ChainTree itself doesn't compare work (that's HeaderTimechain's
        // job) but it does enforce fork.height < chain_tip.height, which
        // is what stops a same-height "tie" branch from being promoted.
        let mut tree: ChainTree<i32> = ChainTree::new();
        let g = tree.add(Position::Invalid, 0, h(1), 0).unwrap();
        let tip = tree.add(g, 1, h(2), 1).unwrap();
        let fork = tree.add(g, 1, h(3), 1).unwrap();
        assert!(tree.promote_branch(fork, &[]).is_err());
        let _ = tip;
    }

    #[test]
    fn prune_forest_keeps_recent_depth() {
        let mut tree: ChainTree<i32> = ChainTree::new();
        let mut cursor = tree.add(Position::Invalid, 0, h(0), 0).unwrap();
        for height in 1..=10 {
            cursor = tree.add(cursor, height, h(height as u8), height).unwrap();
        }
        // A stale fork rooted near genesis.
        let root = tree.add(Position::InChain(0), 1, h(200), 99).unwrap();
        assert_eq!(tree.forest_len(), 1);

        tree.prune_forest(3);
        assert_eq!(tree.forest_len(), 0);
        let _ = root;
    }

    #[test]
    fn ancestor_walk_reaches_genesis() {
        let mut tree: ChainTree<i32> = ChainTree::new();
        let g = tree.add(Position::Invalid, 0, h(1), 100).unwrap();
        let one = tree.add(g, 1, h(2), 101).unwrap();
        let values: Vec<i32> = tree.ancestors(one).copied().collect();
        assert_eq!(values, vec![101, 100]);
    }
}
