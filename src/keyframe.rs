//! `KeyframeSidecar<T>` (spec §4.4.2): a `Sidecar` specialised for
//! piecewise-constant payloads. The linear region is stored as a sorted
//! run-length vector of keyframes instead of one value per height; the
//! fork region stays an explicit `HashedForest<NodeData<T>>`, same as
//! `ChainTree`'s own forest.

use crate::chain_tree::Locator;
use crate::forest::{HashedForest, NodeKey};
use crate::hash::Hash;
use log::debug;

#[derive(Clone)]
struct ForestNode<T> {
    value: T,
    height: i32,
}

/// A `(start_height, value)` pair: the run extends until the next
/// keyframe's `start_height`, or `length`, whichever comes first.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Keyframe<T> {
    start_height: i32,
    value: T,
}

pub struct KeyframeSidecar<T: Clone + PartialEq> {
    default: T,
    length: i32,
    keyframes: Vec<Keyframe<T>>,
    forest: HashedForest<ForestNode<T>>,
}

impl<T: Clone + PartialEq> KeyframeSidecar<T> {
    pub fn new(default: T) -> Self {
        KeyframeSidecar {
            default,
            length: 0,
            keyframes: Vec::new(),
            forest: HashedForest::new(),
        }
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    /// Index of the keyframe covering `height`, or `None` if `height` is
    /// out of the linear region's bounds.
    fn keyframe_index_for(&self, height: i32) -> Option<usize> {
        if height < 0 || height >= self.length || self.keyframes.is_empty() {
            return None;
        }
        // Greatest keyframe with start_height <= height.
        match self
            .keyframes
            .binary_search_by(|k| k.start_height.cmp(&height))
        {
            Ok(idx) => Some(idx),
            Err(0) => None,
            Err(idx) => Some(idx - 1),
        }
    }

    fn keyframe_end(&self, idx: usize) -> i32 {
        self.keyframes
            .get(idx + 1)
            .map(|k| k.start_height)
            .unwrap_or(self.length)
    }

    pub fn get(&self, locator: Locator) -> Option<&T> {
        match locator {
            Locator::ByHeight(h) => self.keyframe_index_for(h).map(|idx| &self.keyframes[idx].value),
            Locator::ByHash(hash) => self.forest.find(&hash).map(|k| &self.forest.get(k).unwrap().value),
        }
    }

    /// Writes `v` at `ByHeight(h)`, re-establishing the "no two adjacent
    /// keyframes share a value" invariant via split/merge as needed.
    /// Panics if `h` is out of bounds, per the Open Question resolution
    /// classifying an unresolvable write as fatal.
    pub fn set(&mut self, locator: Locator, v: T) {
        match locator {
            Locator::ByHeight(h) => self.set_by_height(h, v),
            Locator::ByHash(hash) => {
                let key = self
                    .forest
                    .find(&hash)
                    .expect("KeyframeSidecar::set: unresolved ByHash locator");
                let node = self.forest.get_mut(key).expect("set: node vanished");
                node.value = v;
            }
        }
    }

    fn set_by_height(&mut self, h: i32, v: T) {
        let idx = self
            .keyframe_index_for(h)
            .expect("KeyframeSidecar::set: unresolved ByHeight locator");

        if self.keyframes[idx].value == v {
            return;
        }

        let start = self.keyframes[idx].start_height;
        let end = self.keyframe_end(idx);

        if start == h && end == h + 1 {
            // Single-height keyframe: overwrite in place, then coalesce.
            self.keyframes[idx].value = v;
            self.coalesce_around(idx);
        } else if h == start {
            // h is the first height of a multi-height keyframe: shrink it
            // to start one later, and either extend the previous
            // keyframe (if its value already matches v) or insert a new
            // singleton keyframe before it.
            self.keyframes[idx].start_height = h + 1;
            if idx > 0 && self.keyframes[idx - 1].value == v {
                // Previous keyframe's run silently extends to cover h.
            } else {
                self.keyframes.insert(
                    idx,
                    Keyframe {
                        start_height: h,
                        value: v,
                    },
                );
            }
        } else {
            // h strictly inside a multi-height run: split into prefix,
            // singleton, and (if anything remains) suffix.
            let old_value = self.keyframes[idx].value.clone();
            let mut insert_at = idx + 1;
            self.keyframes.insert(
                insert_at,
                Keyframe {
                    start_height: h,
                    value: v,
                },
            );
            insert_at += 1;
            if h + 1 < end {
                self.keyframes.insert(
                    insert_at,
                    Keyframe {
                        start_height: h + 1,
                        value: old_value,
                    },
                );
            }
        }
        self.assert_no_adjacent_duplicates();
    }

    /// After an in-place overwrite at `idx`, merges with either/both
    /// neighbours that now carry the same value.
    fn coalesce_around(&mut self, idx: usize) {
        let mut idx = idx;
        if idx + 1 < self.keyframes.len() && self.keyframes[idx].value == self.keyframes[idx + 1].value {
            self.keyframes.remove(idx + 1);
        }
        if idx > 0 && self.keyframes[idx - 1].value == self.keyframes[idx].value {
            self.keyframes.remove(idx);
            idx -= 1;
        }
        let _ = idx;
    }

    fn assert_no_adjacent_duplicates(&self) {
        for pair in self.keyframes.windows(2) {
            debug_assert!(
                pair[0].value != pair[1].value,
                "KeyframeSidecar: adjacent keyframes share a value after Set"
            );
        }
    }

    /// Applies one `AddSync`. A tip extension implicitly grows the final
    /// keyframe's coverage (or starts a new one, if the final keyframe's
    /// value differs from `default`); anything else attaches to the
    /// forest at `parent_height + 1` with the default value.
    pub fn add_sync(&mut self, sync: &crate::sidecar::AddSync) {
        match sync.parent {
            Locator::ByHeight(h) if h == self.length - 1 => {
                let new_height = self.length;
                match self.keyframes.last() {
                    Some(last) if last.value == self.default => {
                        // Implicit extension: no new keyframe needed.
                    }
                    _ => self.keyframes.push(Keyframe {
                        start_height: new_height,
                        value: self.default.clone(),
                    }),
                }
                self.length += 1;
            }
            Locator::ByHeight(h) => {
                // Fork off a mid-chain position: a new forest root.
                self.forest.add_child(
                    None,
                    sync.hash,
                    ForestNode {
                        value: self.default.clone(),
                        height: h + 1,
                    },
                );
            }
            Locator::ByHash(parent_hash) => {
                let parent_key = self
                    .forest
                    .find(&parent_hash)
                    .expect("KeyframeSidecar::add_sync: forest parent not found");
                let height = self
                    .forest
                    .get(parent_key)
                    .expect("add_sync: parent vanished")
                    .height
                    + 1;
                self.forest.add_child(
                    Some(parent_key),
                    sync.hash,
                    ForestNode {
                        value: self.default.clone(),
                        height,
                    },
                );
            }
        }

        if !sync.moved_from_chain.is_empty() {
            self.replay_promotion(sync);
        }
        debug!("keyframe sidecar: applied add_sync for {:?}", sync.hash);
    }

    /// Replays the timechain's `PromoteBranch` against this sidecar's own
    /// storage: creates forest nodes for the demoted chain tail (reading
    /// each value via `Get` before truncating), truncates the linear
    /// region, then repopulates the keyframe vector by replaying the
    /// promoted branch (already attached to the forest by `add_sync`,
    /// above) root-to-leaf.
    ///
    /// `sync.moved_from_chain` is oldest-demoted-first, matching the
    /// convention used throughout `ChainTree::promote_branch`.
    fn replay_promotion(&mut self, sync: &crate::sidecar::AddSync) {
        let new_length = self.length - sync.moved_from_chain.len() as i32;

        // Snapshot demoted values before truncating, oldest (closest to
        // the fork) first.
        let demoted: Vec<T> = (new_length..self.length)
            .map(|h| {
                self.get(Locator::ByHeight(h))
                    .cloned()
                    .unwrap_or_else(|| self.default.clone())
            })
            .collect();

        // Collect the promoted branch's nodes, leaf to root, while the
        // forest still holds them (added by `add_sync` just above).
        let leaf_key = self
            .forest
            .find(&sync.hash)
            .expect("replay_promotion: promoted leaf not found in forest");
        let branch: Vec<NodeKey> = self.forest.up_from(leaf_key).collect();

        self.length = new_length;
        self.keyframes.retain(|k| k.start_height < new_length);

        // Build forest nodes for the demoted tail, chained parent to
        // child, the first becoming a forest root (its real parent lives
        // on the linear chain, not the forest).
        let mut parent_key: Option<NodeKey> = None;
        for (i, (hash, value)) in sync.moved_from_chain.iter().zip(demoted.iter()).enumerate() {
            let key = self.forest.add_child(
                parent_key,
                *hash,
                ForestNode {
                    value: value.clone(),
                    height: new_length + i as i32,
                },
            );
            parent_key = Some(key);
        }

        // Replay the promoted branch back onto the linear region,
        // root-to-leaf, re-establishing the no-adjacent-duplicates
        // invariant as we go.
        for key in branch.iter().rev() {
            let value = self
                .forest
                .get(*key)
                .expect("replay_promotion: branch node vanished mid-walk")
                .value
                .clone();
            let height = self.length;
            self.length += 1;
            match self.keyframes.last() {
                Some(last) if last.value == value => {}
                _ => self.keyframes.push(Keyframe {
                    start_height: height,
                    value,
                }),
            }
        }

        self.forest.erase_chain(leaf_key);
        self.assert_no_adjacent_duplicates();
    }

    pub fn forest_len(&self) -> usize {
        self.forest.len()
    }

    #[cfg(test)]
    fn keyframe_starts(&self) -> Vec<i32> {
        self.keyframes.iter().map(|k| k.start_height).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_keyframe_split() {
        let mut ks: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
        for h in 0..5 {
            ks.add_sync(
                &crate::sidecar::AddSync {
                    parent: Locator::ByHeight(h - 1),
                    hash: Hash::repeat_byte(h as u8 + 1),
                    moved_from_chain: vec![],
                },
            );
        }
        assert_eq!(ks.keyframe_starts(), vec![0]);

        ks.set(Locator::ByHeight(2), 5);
        assert_eq!(ks.keyframe_starts(), vec![0, 2, 3]);
        assert_eq!(ks.get(Locator::ByHeight(0)), Some(&0));
        assert_eq!(ks.get(Locator::ByHeight(1)), Some(&0));
        assert_eq!(ks.get(Locator::ByHeight(2)), Some(&5));
        assert_eq!(ks.get(Locator::ByHeight(3)), Some(&0));
        assert_eq!(ks.get(Locator::ByHeight(4)), Some(&0));
    }

    #[test]
    fn s5_keyframe_merge() {
        let mut ks: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
        for h in 0..5 {
            ks.add_sync(
                &crate::sidecar::AddSync {
                    parent: Locator::ByHeight(h - 1),
                    hash: Hash::repeat_byte(h as u8 + 1),
                    moved_from_chain: vec![],
                },
            );
        }
        ks.set(Locator::ByHeight(2), 5);
        ks.set(Locator::ByHeight(2), 0);
        assert_eq!(ks.keyframe_starts(), vec![0]);
        for h in 0..5 {
            assert_eq!(ks.get(Locator::ByHeight(h)), Some(&0));
        }
    }

    #[test]
    fn set_is_idempotent_with_no_change() {
        let mut ks: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
        ks.add_sync(
            &crate::sidecar::AddSync {
                parent: Locator::ByHeight(-1),
                hash: Hash::repeat_byte(1),
                moved_from_chain: vec![],
            },
        );
        let before = ks.keyframe_starts();
        ks.set(Locator::ByHeight(0), 0);
        assert_eq!(ks.keyframe_starts(), before);
    }

    #[test]
    #[should_panic(expected = "unresolved")]
    fn set_out_of_bounds_panics() {
        let mut ks: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
        ks.set(Locator::ByHeight(0), 1);
    }

    #[test]
    fn reorg_replays_promoted_branch_onto_keyframes() {
        let mut ks: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
        let aa = Hash::repeat_byte(0xAA);
        let bb = Hash::repeat_byte(0xBB);
        let cc = Hash::repeat_byte(0xCC);
        let dd = Hash::repeat_byte(0xDD);
        let ee = Hash::repeat_byte(0xEE);

        ks.add_sync(&crate::sidecar::AddSync {
            parent: Locator::ByHeight(-1),
            hash: aa,
            moved_from_chain: vec![],
        });
        ks.add_sync(&crate::sidecar::AddSync {
            parent: Locator::ByHeight(0),
            hash: bb,
            moved_from_chain: vec![],
        });
        ks.add_sync(&crate::sidecar::AddSync {
            parent: Locator::ByHeight(1),
            hash: cc,
            moved_from_chain: vec![],
        });
        ks.add_sync(&crate::sidecar::AddSync {
            parent: Locator::ByHeight(1),
            hash: dd,
            moved_from_chain: vec![],
        });
        assert_eq!(ks.forest_len(), 1);

        ks.add_sync(&crate::sidecar::AddSync {
            parent: Locator::ByHash(dd),
            hash: ee,
            moved_from_chain: vec![cc],
        });

        assert_eq!(ks.length(), 4);
        assert_eq!(ks.keyframe_starts(), vec![0]);
        assert_eq!(ks.forest_len(), 1);
        assert_eq!(ks.get(Locator::ByHash(cc)), Some(&0));
    }
}
