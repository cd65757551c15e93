//! The sidecar family (spec §4.4): auxiliary payload stores that mirror
//! the timechain's topology one-to-one, kept in sync via `AddSync`
//! events emitted on every accepted header.

use crate::chain_tree::{ChainTree, Locator, Position};
use crate::hash::Hash;
use log::debug;
use std::any::Any;

/// The event broadcast to every registered sidecar on each accepted
/// header (spec §6): the locator of the parent it attaches to, the
/// child's hash, and — non-empty only on a reorg — the hashes demoted
/// from the linear chain, oldest-demoted-first.
#[derive(Clone, Debug)]
pub struct AddSync {
    pub parent: Locator,
    pub hash: Hash,
    pub moved_from_chain: Vec<Hash>,
}

/// One payload store mirroring a timechain's topology, one value of `T`
/// per node. No adapter type is required on top of `ChainTree<T>` — see
/// SPEC_FULL.md's Open Question resolution: the tree already tracks
/// hash/height independently of the payload.
pub struct Sidecar<T: Clone> {
    tree: ChainTree<T>,
    default: T,
}

impl<T: Clone> Sidecar<T> {
    pub fn new(default: T) -> Self {
        Sidecar {
            tree: ChainTree::new(),
            default,
        }
    }

    pub fn get(&self, locator: Locator) -> Option<&T> {
        let position = self.tree.resolve_locator(locator);
        self.tree.get(position)
    }

    /// Overwrites the value at `locator` in place. A no-op if the
    /// locator does not currently resolve — spec classifies plain
    /// `Sidecar` as the lenient variant; `KeyframeSidecar::Set` is the
    /// fatal one.
    pub fn set(&mut self, locator: Locator, value: T) {
        let position = self.tree.resolve_locator(locator);
        if let Some(slot) = self.tree.get_mut(position) {
            *slot = value;
        }
    }

    /// Applies one `AddSync`: locates the parent, inserts a node
    /// carrying the default payload (a genuinely new header is always
    /// "unknown" to a sidecar until its owner calls `Set`), and replays
    /// a promotion if the timechain itself just reorged.
    pub fn add_sync(&mut self, sync: &AddSync) {
        let parent = self.tree.resolve_locator(sync.parent);
        let height = self
            .tree
            .height_at(parent)
            .map(|h| h + 1)
            .unwrap_or(0);
        let position = self
            .tree
            .add(parent, height, sync.hash, self.default.clone())
            .expect("Sidecar::add_sync: structural mismatch with timechain topology");

        if !sync.moved_from_chain.is_empty() {
            self.tree
                .promote_branch(position, &sync.moved_from_chain)
                .expect("Sidecar::add_sync: promote_branch mismatch with timechain topology");
        }
        debug!("sidecar: applied add_sync for {:?}", sync.hash);
    }

    pub fn forest_len(&self) -> usize {
        self.tree.forest_len()
    }

    pub fn chain_len(&self) -> usize {
        self.tree.chain_len()
    }
}

/// An opaque, typed reference to a registration slot inside a
/// `SidecarSet` — carries the payload type so `Get`/`Set` remain
/// statically checked even though the set itself is heterogeneous.
pub struct Handle<T> {
    pub(crate) slot: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Handle<T> {
    fn new(slot: usize) -> Self {
        Handle {
            slot,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Handle::new(self.slot)
    }
}
impl<T> Copy for Handle<T> {}

/// Object-safe surface every sidecar kind supports, so `SidecarSet` can
/// hold a heterogeneous collection and still broadcast `add_sync` to
/// each entry — the tagged-sum-type alternative to a virtual base class
/// (design note §9). `as_any`/`as_any_mut` back the typed `Handle<T>`
/// downcast in `get`/`set`.
trait AnySidecar: Send {
    fn add_sync(&mut self, sync: &AddSync);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Clone + Send + 'static> AnySidecar for Sidecar<T> {
    fn add_sync(&mut self, sync: &AddSync) {
        Sidecar::add_sync(self, sync)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Clone + PartialEq + Send + 'static> AnySidecar for crate::keyframe::KeyframeSidecar<T> {
    fn add_sync(&mut self, sync: &AddSync) {
        crate::keyframe::KeyframeSidecar::add_sync(self, sync)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A typed reference to a registered `KeyframeSidecar<T>`, distinct from
/// `Handle<T>` since a `KeyframeSidecar` exposes a different `Get`/`Set`
/// surface than plain `Sidecar<T>` — the "sum type of known sidecar
/// kinds" design note (§9) realised as two handle kinds sharing one
/// dispatch table.
pub struct KeyframeHandle<T> {
    pub(crate) slot: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T> KeyframeHandle<T> {
    fn new(slot: usize) -> Self {
        KeyframeHandle {
            slot,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Clone for KeyframeHandle<T> {
    fn clone(&self) -> Self {
        KeyframeHandle::new(self.slot)
    }
}
impl<T> Copy for KeyframeHandle<T> {}

/// A heterogeneous collection of sidecar stores, each fed the same
/// `AddSync` stream as the timechain mutates.
#[derive(Default)]
pub struct SidecarSet {
    entries: Vec<Box<dyn AnySidecar>>,
}

impl SidecarSet {
    pub fn new() -> Self {
        SidecarSet {
            entries: Vec::new(),
        }
    }

    /// Registers a sidecar store and returns a typed handle. Replaying
    /// the current topology into it is the caller's responsibility
    /// (typically the owning `ConcurrentTimechain`, which alone knows
    /// the full header sequence to replay).
    pub fn register<T: Clone + Send + 'static>(&mut self, store: Sidecar<T>) -> Handle<T> {
        let slot = self.entries.len();
        self.entries.push(Box::new(store));
        Handle::new(slot)
    }

    pub fn get<T: Clone + Send + 'static>(&self, handle: Handle<T>, locator: Locator) -> Option<T> {
        let entry = self.entries.get(handle.slot)?;
        let sidecar = entry
            .as_any()
            .downcast_ref::<Sidecar<T>>()
            .expect("Handle<T> type mismatch with registered sidecar");
        sidecar.get(locator).cloned()
    }

    pub fn set<T: Clone + Send + 'static>(&mut self, handle: Handle<T>, locator: Locator, value: T) {
        let Some(entry) = self.entries.get_mut(handle.slot) else {
            return;
        };
        let sidecar = entry
            .as_any_mut()
            .downcast_mut::<Sidecar<T>>()
            .expect("Handle<T> type mismatch with registered sidecar");
        sidecar.set(locator, value);
    }

    /// Registers a `KeyframeSidecar<T>`, returning its distinct handle
    /// kind.
    pub fn register_keyframe<T: Clone + PartialEq + Send + 'static>(
        &mut self,
        store: crate::keyframe::KeyframeSidecar<T>,
    ) -> KeyframeHandle<T> {
        let slot = self.entries.len();
        self.entries.push(Box::new(store));
        KeyframeHandle::new(slot)
    }

    pub fn get_keyframe<T: Clone + PartialEq + Send + 'static>(
        &self,
        handle: KeyframeHandle<T>,
        locator: Locator,
    ) -> Option<T> {
        let entry = self.entries.get(handle.slot)?;
        let sidecar = entry
            .as_any()
            .downcast_ref::<crate::keyframe::KeyframeSidecar<T>>()
            .expect("KeyframeHandle<T> type mismatch with registered sidecar");
        sidecar.get(locator).cloned()
    }

    pub fn set_keyframe<T: Clone + PartialEq + Send + 'static>(
        &mut self,
        handle: KeyframeHandle<T>,
        locator: Locator,
        value: T,
    ) {
        let Some(entry) = self.entries.get_mut(handle.slot) else {
            return;
        };
        let sidecar = entry
            .as_any_mut()
            .downcast_mut::<crate::keyframe::KeyframeSidecar<T>>()
            .expect("KeyframeHandle<T> type mismatch with registered sidecar");
        sidecar.set(locator, value);
    }

    pub fn broadcast(&mut self, sync: &AddSync) {
        for entry in &mut self.entries {
            entry.add_sync(sync);
        }
    }

    /// Feeds one `AddSync` to a single slot, identified by its raw index
    /// (taken from a `Handle<T>`/`KeyframeHandle<T>`). Used to replay
    /// history into a sidecar just after it registers, without
    /// re-applying that history to every other already-current sidecar.
    pub(crate) fn replay_one(&mut self, slot: usize, sync: &AddSync) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.add_sync(sync);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash {
        Hash::repeat_byte(byte)
    }

    #[test]
    fn sidecar_mirrors_linear_growth() {
        let mut sc: Sidecar<i32> = Sidecar::new(0);
        sc.add_sync(&AddSync {
            parent: Locator::ByHeight(-1),
            hash: h(1),
            moved_from_chain: vec![],
        });
        assert_eq!(sc.chain_len(), 1);
        assert_eq!(sc.get(Locator::ByHeight(0)), Some(&0));
    }

    #[test]
    fn sidecar_set_and_get_round_trip() {
        let mut sc: Sidecar<i32> = Sidecar::new(0);
        sc.add_sync(&AddSync {
            parent: Locator::ByHeight(-1),
            hash: h(1),
            moved_from_chain: vec![],
        });
        sc.set(Locator::ByHeight(0), 42);
        assert_eq!(sc.get(Locator::ByHeight(0)), Some(&42));
    }

    #[test]
    fn sidecar_set_noop_on_unresolved_locator() {
        let mut sc: Sidecar<i32> = Sidecar::new(0);
        sc.set(Locator::ByHeight(5), 42);
        assert_eq!(sc.get(Locator::ByHeight(5)), None);
    }

    #[test]
    fn sidecar_add_sync_reorg_mirrors_promotion() {
        let mut sc: Sidecar<i32> = Sidecar::new(0);
        sc.add_sync(&AddSync {
            parent: Locator::ByHeight(-1),
            hash: h(0xAA),
            moved_from_chain: vec![],
        });
        sc.add_sync(&AddSync {
            parent: Locator::ByHeight(0),
            hash: h(0xBB),
            moved_from_chain: vec![],
        });
        sc.add_sync(&AddSync {
            parent: Locator::ByHeight(1),
            hash: h(0xCC),
            moved_from_chain: vec![],
        });
        sc.add_sync(&AddSync {
            parent: Locator::ByHeight(1),
            hash: h(0xDD),
            moved_from_chain: vec![],
        });
        sc.add_sync(&AddSync {
            parent: Locator::ByHash(h(0xDD)),
            hash: h(0xEE),
            moved_from_chain: vec![h(0xCC)],
        });
        assert_eq!(sc.chain_len(), 4);
        assert_eq!(sc.get(Locator::ByHeight(3)), Some(&0));
        assert!(sc.get(Locator::ByHash(h(0xCC))).is_some());
    }

    #[test]
    fn sidecar_set_handle_roundtrips_through_set() {
        let mut set = SidecarSet::new();
        let handle = set.register(Sidecar::<i32>::new(0));
        set.broadcast(&AddSync {
            parent: Locator::ByHeight(-1),
            hash: h(1),
            moved_from_chain: vec![],
        });
        set.set(handle, Locator::ByHeight(0), 7);
        assert_eq!(set.get(handle, Locator::ByHeight(0)), Some(7));
    }
}
