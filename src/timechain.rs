//! `HeaderTimechain` (spec §4.3): a `ChainTree` specialised to block
//! headers, applying the domain policy that decides when a newly added
//! header triggers a reorg.

use crate::chain_tree::{ChainTree, Key, Locator, Position};
use crate::error::AddError;
use crate::hash::{Hash, Work};
use log::{debug, info, warn};

/// Default forest-depth floor for `PruneForest` (spec §4.3).
pub const DEFAULT_MAX_KEEP_DEPTH: i32 = 288;
/// Default chain-scan bound for `Search` (spec §4.3).
pub const DEFAULT_MAX_SEARCH_DEPTH: i32 = 144;
/// Sample size for median-time-past (spec §8).
pub const MEDIAN_TIME_PAST_SAMPLE: usize = 11;

/// The contract the out-of-scope wire/validator layer fulfills for its
/// concrete header type. The core never hashes or verifies a header; it
/// only needs to know which prior header it claims to extend.
pub trait RawHeader {
    fn previous_hash(&self) -> Hash;
    fn timestamp(&self) -> u32;
}

/// The payload of the header timechain (spec §3): the caller-supplied
/// header plus everything the core needs precomputed (hash, work,
/// height). The core never derives any of these fields itself.
#[derive(Clone)]
pub struct HeaderContext<H: RawHeader> {
    pub header: H,
    pub hash: Hash,
    pub local_work: Work,
    pub total_work: Work,
    pub height: i32,
}

impl<H: RawHeader> HeaderContext<H> {
    pub fn new(header: H, hash: Hash, local_work: Work, total_work: Work, height: i32) -> Self {
        HeaderContext {
            header,
            hash,
            local_work,
            total_work,
            height,
        }
    }
}

/// Outcome of a successful `add`. `moved_from_chain` is non-empty only
/// when the insertion triggered a reorg, oldest-demoted-first, and is
/// exactly what gets fanned out to sidecars as `AddSync::moved_from_chain`.
#[derive(Clone, Debug)]
pub struct AddResult {
    pub position: Position,
    pub moved_from_chain: Vec<Hash>,
}

/// A read-only adaptor over the timechain for consensus-layer needs like
/// median-time-past. Exposes only length and timestamp lookups; never
/// mutates.
pub struct ValidationView<'a, H: RawHeader + Clone> {
    timechain: &'a HeaderTimechain<H>,
}

impl<'a, H: RawHeader + Clone> ValidationView<'a, H> {
    pub fn length(&self) -> usize {
        self.timechain.tree.chain_len()
    }

    pub fn timestamp_at(&self, height: i32) -> Option<u32> {
        self.timechain
            .tree
            .chain_value_at(height)
            .map(|ctx| ctx.header.timestamp())
    }

    /// The `n` most recent timestamps ending at the current tip, ordered
    /// oldest to newest. Fewer than `n` are returned if the chain is
    /// shorter.
    pub fn last_n_timestamps(&self, n: usize) -> Vec<u32> {
        let len = self.length();
        let start = len.saturating_sub(n);
        (start..len)
            .filter_map(|h| self.timestamp_at(h as i32))
            .collect()
    }

    /// Median of the 11 most recent timestamps (fewer if the chain is
    /// shorter), per spec §8.
    pub fn median_time_past(&self) -> Option<u32> {
        let mut timestamps = self.last_n_timestamps(MEDIAN_TIME_PAST_SAMPLE);
        if timestamps.is_empty() {
            return None;
        }
        timestamps.sort_unstable();
        Some(timestamps[timestamps.len() / 2])
    }
}

pub struct HeaderTimechain<H: RawHeader + Clone> {
    tree: ChainTree<HeaderContext<H>>,
    max_search_depth: i32,
    max_keep_depth: i32,
}

impl<H: RawHeader + Clone> HeaderTimechain<H> {
    pub fn new() -> Self {
        HeaderTimechain {
            tree: ChainTree::new(),
            max_search_depth: DEFAULT_MAX_SEARCH_DEPTH,
            max_keep_depth: DEFAULT_MAX_KEEP_DEPTH,
        }
    }

    pub fn with_config(max_search_depth: i32, max_keep_depth: i32) -> Self {
        HeaderTimechain {
            tree: ChainTree::new(),
            max_search_depth,
            max_keep_depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn chain_len(&self) -> usize {
        self.tree.chain_len()
    }

    pub fn tip_position(&self) -> Position {
        self.tree.tip_position()
    }

    pub fn tip_hash(&self) -> Option<Hash> {
        self.tree.tip_hash()
    }

    pub fn tip_total_work(&self) -> Option<Work> {
        self.tree
            .tip_height()
            .and_then(|h| self.tree.chain_value_at(h))
            .map(|ctx| ctx.total_work)
    }

    pub fn get(&self, position: Position) -> Option<&HeaderContext<H>> {
        self.tree.get(position)
    }

    pub fn validation_view(&self) -> ValidationView<'_, H> {
        ValidationView { timechain: self }
    }

    /// Locates a header's parent by `ctx.header.previous_hash()`,
    /// falling back to a bounded linear scan (`Search`), then inserts.
    pub fn add(&mut self, ctx: HeaderContext<H>) -> Result<AddResult, AddError> {
        let parent_hash = ctx.header.previous_hash();
        let parent = if self.tree.is_empty() {
            Position::Invalid
        } else {
            self.search(&parent_hash)
                .ok_or(AddError::ParentNotFound(crate::error::ParentNotFound))?
        };
        self.add_with_parent(parent, ctx)
    }

    /// Inserts `ctx` as a child of `parent`, validating `parent.hash ==
    /// ctx.header.previous_hash()` first. Triggers a reorg iff
    /// `ctx.total_work` strictly exceeds the current tip's.
    pub fn add_with_parent(
        &mut self,
        parent: Position,
        ctx: HeaderContext<H>,
    ) -> Result<AddResult, AddError> {
        if let Some(parent_hash) = self.tree.hash_at(parent) {
            if parent_hash != ctx.header.previous_hash() {
                return Err(crate::error::InvalidParent(
                    "parent hash does not match header's previous_hash".into(),
                )
                .into());
            }
        } else if parent.is_valid() {
            return Err(crate::error::InvalidParent("parent position does not resolve".into()).into());
        }

        let hash = ctx.hash;
        let height = ctx.height;
        let total_work = ctx.total_work;
        let position = self.tree.add(parent, height, hash, ctx)?;
        debug!("accepted header {hash:?} at height {height}, total_work={total_work}");

        let tip_work = self.tip_total_work_excluding(position);
        let mut moved_from_chain = Vec::new();

        if let Some(tip_work) = tip_work {
            if total_work > tip_work {
                moved_from_chain = self.promote(position)?;
                info!(
                    "reorg: new tip {hash:?} at height {height}, {} header(s) demoted",
                    moved_from_chain.len()
                );
            }
        }

        self.tree.prune_forest(self.max_keep_depth);

        Ok(AddResult {
            position: self.tree.find_in_tip_or_forest(&hash),
            moved_from_chain,
        })
    }

    /// The current tip's total work, as it stood before `just_inserted`
    /// was added (so a freshly-inserted in-chain extension — which is
    /// already the new tip — is correctly treated as "no reorg needed").
    fn tip_total_work_excluding(&self, just_inserted: Position) -> Option<Work> {
        match just_inserted {
            Position::InChain(h) => {
                if h == 0 {
                    None
                } else {
                    self.tree.chain_value_at(h - 1).map(|ctx| ctx.total_work)
                }
            }
            _ => self
                .tree
                .tip_height()
                .and_then(|h| self.tree.chain_value_at(h))
                .map(|ctx| ctx.total_work),
        }
    }

    fn promote(&mut self, tip: Position) -> Result<Vec<Hash>, AddError> {
        let root_height = match self.tree.forest_root_height(tip) {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let tip_height = self
            .tree
            .tip_height()
            .expect("promote: chain cannot be empty when promoting a forest branch");

        // Oldest (closest to the fork) first, matching PromoteBranch's
        // expected ordering.
        let old_chain_hashes: Vec<Hash> = (root_height..=tip_height)
            .filter_map(|h| self.tree.chain_hash_at(h))
            .collect();

        self.tree
            .promote_branch(tip, &old_chain_hashes)
            .map_err(|e| match e {
                crate::error::ChainTreeError::InvalidParent(e) => AddError::InvalidParent(e),
                crate::error::ChainTreeError::ForestContractViolation(e) => {
                    panic!("forest contract violation during reorg: {e}")
                }
            })?;

        Ok(old_chain_hashes)
    }

    /// Checks tip and forest first, then scans the linear chain backward
    /// up to `max_search_depth` elements (a hard cutoff, per the Open
    /// Question resolution — a match beyond it is permanently missed).
    pub fn search(&self, hash: &Hash) -> Option<Position> {
        let found = self.tree.find_in_tip_or_forest(hash);
        if found.is_valid() {
            return Some(found);
        }
        let tip_height = self.tree.tip_height()?;
        let floor = (tip_height - self.max_search_depth).max(0);
        for h in (floor..=tip_height).rev() {
            if self.tree.chain_hash_at(h) == Some(*hash) {
                return Some(Position::InChain(h));
            }
        }
        warn!("search: hash not found within max_search_depth={}", self.max_search_depth);
        None
    }

    /// Validates both height and hash; returns `Locator::ByHeight` if the
    /// chain carries that hash at that height, `Locator::ByHash` if the
    /// forest holds it at that same height, else `None`.
    pub fn make_locator(&self, height: i32, hash: Hash) -> Option<Locator> {
        if self.tree.chain_hash_at(height) == Some(hash) {
            return Some(Locator::ByHeight(height));
        }
        let position = self.tree.find_in_tip_or_forest(&hash);
        if let Position::InForest(_) = position {
            if self.tree.height_at(position) == Some(height) {
                return Some(Locator::ByHash(hash));
            }
        }
        None
    }

    /// Resolves a `Key` to a position, requiring height and hash to
    /// agree with current state.
    pub fn find_stable(&self, key: Key) -> Position {
        self.tree.resolve_key(key)
    }

    pub fn resolve_locator(&self, locator: Locator) -> Position {
        self.tree.resolve_locator(locator)
    }

    pub fn ancestor_at_height(&self, position: Position, height: i32) -> Option<&HeaderContext<H>> {
        self.tree.ancestor_at_height(position, height)
    }

    pub fn forest_len(&self) -> usize {
        self.tree.forest_len()
    }

    /// Replays every accepted header, parent-before-child, as
    /// `(parent_locator, child_hash)` pairs — the chain first, then the
    /// forest in its natural insertion order. Used by `AddSidecar` (spec
    /// §6) to bring a newly registered sidecar's topology up to date.
    pub fn for_each<F: FnMut(Locator, Hash)>(&self, mut visitor: F) {
        for h in 0..self.tree.chain_len() as i32 {
            let hash = self
                .tree
                .chain_hash_at(h)
                .expect("for_each: chain hash missing within bounds");
            let parent = if h == 0 {
                Locator::ByHeight(-1)
            } else {
                Locator::ByHeight(h - 1)
            };
            visitor(parent, hash);
        }
        for (parent_position, hash) in self.tree.forest_replay_order() {
            visitor(self.position_to_locator(parent_position), hash);
        }
    }

    fn position_to_locator(&self, position: Position) -> Locator {
        match position {
            Position::InChain(h) => Locator::ByHeight(h),
            Position::InForest(_) => {
                Locator::ByHash(self.tree.hash_at(position).expect("position_to_locator: dangling forest position"))
            }
            Position::Invalid => Locator::ByHeight(-1),
        }
    }
}

impl<H: RawHeader + Clone> Default for HeaderTimechain<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestHeader {
        previous_hash: Hash,
        timestamp: u32,
    }

    impl RawHeader for TestHeader {
        fn previous_hash(&self) -> Hash {
            self.previous_hash
        }
        fn timestamp(&self) -> u32 {
            self.timestamp
        }
    }

    fn h(byte: u8) -> Hash {
        Hash::repeat_byte(byte)
    }

    fn ctx(prev: Hash, hash: Hash, height: i32, total_work: u64, ts: u32) -> HeaderContext<TestHeader> {
        HeaderContext::new(
            TestHeader {
                previous_hash: prev,
                timestamp: ts,
            },
            hash,
            Work::from(1u64),
            Work::from(total_work),
            height,
        )
    }

    #[test]
    fn s1_linear_growth() {
        let mut tc: HeaderTimechain<TestHeader> = HeaderTimechain::new();
        let genesis = ctx(Hash::zero(), h(0xAA), 0, 1, 100);
        let r0 = tc.add(genesis).unwrap();
        assert!(r0.moved_from_chain.is_empty());

        let one = ctx(h(0xAA), h(0xBB), 1, 3, 101);
        let r1 = tc.add(one).unwrap();
        assert!(r1.moved_from_chain.is_empty());

        let two = ctx(h(0xBB), h(0xCC), 2, 6, 102);
        let r2 = tc.add(two).unwrap();
        assert!(r2.moved_from_chain.is_empty());

        assert_eq!(tc.chain_len(), 3);
        assert_eq!(tc.tip_hash(), Some(h(0xCC)));
        assert_eq!(tc.forest_len(), 0);
    }

    #[test]
    fn s2_rejected_fork_then_s3_accepted_reorg() {
        let mut tc: HeaderTimechain<TestHeader> = HeaderTimechain::new();
        tc.add(ctx(Hash::zero(), h(0xAA), 0, 1, 100)).unwrap();
        tc.add(ctx(h(0xAA), h(0xBB), 1, 3, 101)).unwrap();
        tc.add(ctx(h(0xBB), h(0xCC), 2, 6, 102)).unwrap();

        // S2: rejected fork (lower work than tip).
        let r_dd = tc.add(ctx(h(0xBB), h(0xDD), 2, 5, 103)).unwrap();
        assert_eq!(tc.tip_hash(), Some(h(0xCC)));
        assert!(r_dd.moved_from_chain.is_empty());
        assert!(matches!(r_dd.position, Position::InForest(_)));

        // S3: extend the fork past the tip's work, triggering a reorg.
        let r_ee = tc.add(ctx(h(0xDD), h(0xEE), 3, 8, 104)).unwrap();
        assert_eq!(tc.chain_len(), 4);
        assert_eq!(tc.tip_hash(), Some(h(0xEE)));
        assert_eq!(r_ee.moved_from_chain, vec![h(0xCC)]);

        let displaced = tc.search(&h(0xCC)).unwrap();
        assert!(matches!(displaced, Position::InForest(_)));
    }

    #[test]
    fn parent_not_found_is_recoverable() {
        let mut tc: HeaderTimechain<TestHeader> = HeaderTimechain::new();
        tc.add(ctx(Hash::zero(), h(0xAA), 0, 1, 100)).unwrap();
        let orphan = ctx(h(0xFF), h(0xBB), 1, 3, 101);
        let err = tc.add(orphan).unwrap_err();
        assert!(matches!(err, AddError::ParentNotFound(_)));
    }

    #[test]
    fn median_time_past_uses_eleven_samples() {
        let mut tc: HeaderTimechain<TestHeader> = HeaderTimechain::new();
        let mut prev = Hash::zero();
        for height in 0..20 {
            let hash = h(height as u8 + 1);
            tc.add(ctx(prev, hash, height, height as u64 + 1, 1000 + height as u32))
                .unwrap();
            prev = hash;
        }
        let view = tc.validation_view();
        let samples = view.last_n_timestamps(11);
        assert_eq!(samples.len(), 11);
        assert_eq!(samples, (1009..=1019).collect::<Vec<_>>());
        assert_eq!(view.median_time_past(), Some(1014));
    }

    #[test]
    fn make_locator_validates_height_and_hash() {
        let mut tc: HeaderTimechain<TestHeader> = HeaderTimechain::new();
        tc.add(ctx(Hash::zero(), h(0xAA), 0, 1, 100)).unwrap();
        tc.add(ctx(h(0xAA), h(0xBB), 1, 3, 101)).unwrap();

        assert_eq!(tc.make_locator(1, h(0xBB)), Some(Locator::ByHeight(1)));
        assert_eq!(tc.make_locator(1, h(0xFF)), None);
    }

    #[test]
    fn make_locator_rejects_height_mismatch_against_forest_hash() {
        let mut tc: HeaderTimechain<TestHeader> = HeaderTimechain::new();
        tc.add(ctx(Hash::zero(), h(0xAA), 0, 1, 100)).unwrap();
        tc.add(ctx(h(0xAA), h(0xBB), 1, 3, 101)).unwrap();
        // A same-height, lower-work fork: stashed in the forest at height 1.
        tc.add(ctx(h(0xAA), h(0xCC), 1, 2, 102)).unwrap();

        assert_eq!(tc.make_locator(1, h(0xCC)), Some(Locator::ByHash(h(0xCC))));
        assert_eq!(tc.make_locator(5, h(0xCC)), None);
    }
}
