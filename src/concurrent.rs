//! `ConcurrentTimechain<H>` (spec §5): ties `HeaderTimechain` + `SidecarSet`
//! to the two-latch concurrency model. `structure_mutex` guards the
//! header tree's shape; `metadata_mutex` guards sidecar payloads and
//! registration. Always acquired in that order — `structure` then
//! `metadata` — never the reverse.

use crate::chain_tree::{Key, Locator, Position};
use crate::error::AddError;
use crate::hash::Hash;
use crate::keyframe::KeyframeSidecar;
use crate::latch::PrioritySharedMutex;
use crate::sidecar::{AddSync, Handle, KeyframeHandle, Sidecar, SidecarSet};
use crate::timechain::{AddResult, HeaderContext, HeaderTimechain, RawHeader};
use log::info;

pub struct ConcurrentTimechain<H: RawHeader + Clone> {
    structure: PrioritySharedMutex<HeaderTimechain<H>>,
    metadata: PrioritySharedMutex<SidecarSet>,
}

impl<H: RawHeader + Clone> ConcurrentTimechain<H> {
    pub fn new() -> Self {
        ConcurrentTimechain {
            structure: PrioritySharedMutex::new(HeaderTimechain::new()),
            metadata: PrioritySharedMutex::new(SidecarSet::new()),
        }
    }

    /// `AddHeader`: exclusive on `structure_mutex` for the insertion
    /// (and any reorg it triggers), then exclusive on `metadata_mutex`
    /// to fan the resulting `AddSync` out to every sidecar — all before
    /// either lock is released, so a reader can never observe a header
    /// accepted but not yet mirrored into its sidecars.
    pub fn add_header(&self, ctx: HeaderContext<H>) -> Result<AddResult, AddError> {
        let mut timechain = self.structure.write();

        let parent_hash = ctx.header.previous_hash();
        let parent_locator = if timechain.is_empty() {
            Locator::ByHeight(-1)
        } else {
            let parent_position = timechain
                .search(&parent_hash)
                .ok_or(AddError::ParentNotFound(crate::error::ParentNotFound))?;
            Self::locator_for(&timechain, parent_position)
        };

        let hash = ctx.hash;
        let result = timechain.add(ctx)?;

        let sync = AddSync {
            parent: parent_locator,
            hash,
            moved_from_chain: result.moved_from_chain.clone(),
        };
        let mut sidecars = self.metadata.write();
        sidecars.broadcast(&sync);
        info!("add_header: accepted {hash:?}, {} sidecar(s) notified", sidecars.len());

        Ok(result)
    }

    fn locator_for(timechain: &HeaderTimechain<H>, position: Position) -> Locator {
        match position {
            Position::InChain(h) => Locator::ByHeight(h),
            Position::InForest(_) => Locator::ByHash(
                timechain
                    .get(position)
                    .expect("locator_for: dangling forest position")
                    .hash,
            ),
            Position::Invalid => Locator::ByHeight(-1),
        }
    }

    /// `AddSidecar<T>`: exclusive on both latches for the duration of
    /// registration and replay, so no header can be accepted mid-replay
    /// and the new sidecar is never observably behind the timechain.
    pub fn add_sidecar<T: Clone + Send + 'static>(&self, default: T) -> Handle<T> {
        let timechain = self.structure.write();
        let mut sidecars = self.metadata.write();
        let handle = sidecars.register(Sidecar::new(default));
        self.replay_into(&timechain, &mut sidecars, handle.slot);
        handle
    }

    pub fn add_keyframe_sidecar<T: Clone + PartialEq + Send + 'static>(
        &self,
        default: T,
    ) -> KeyframeHandle<T> {
        let timechain = self.structure.write();
        let mut sidecars = self.metadata.write();
        let handle = sidecars.register_keyframe(KeyframeSidecar::new(default));
        self.replay_into(&timechain, &mut sidecars, handle.slot);
        handle
    }

    fn replay_into(&self, timechain: &HeaderTimechain<H>, sidecars: &mut SidecarSet, slot: usize) {
        let mut entries = Vec::new();
        timechain.for_each(|parent, hash| entries.push((parent, hash)));
        for (parent, hash) in entries {
            sidecars.replay_one(
                slot,
                &AddSync {
                    parent,
                    hash,
                    moved_from_chain: Vec::new(),
                },
            );
        }
    }

    /// `Get<T>`: shared on `structure_mutex`, then shared on
    /// `metadata_mutex`.
    pub fn get<T: Clone + Send + 'static>(&self, handle: Handle<T>, locator: Locator) -> Option<T> {
        let _structure = self.structure.read();
        let sidecars = self.metadata.read();
        sidecars.get(handle, locator)
    }

    pub fn get_keyframe<T: Clone + PartialEq + Send + 'static>(
        &self,
        handle: KeyframeHandle<T>,
        locator: Locator,
    ) -> Option<T> {
        let _structure = self.structure.read();
        let sidecars = self.metadata.read();
        sidecars.get_keyframe(handle, locator)
    }

    /// `Set<T>`: shared on `structure_mutex` (the header tree's shape is
    /// unaffected), then exclusive on `metadata_mutex`.
    pub fn set<T: Clone + Send + 'static>(&self, handle: Handle<T>, locator: Locator, value: T) {
        let _structure = self.structure.read();
        let mut sidecars = self.metadata.write();
        sidecars.set(handle, locator, value);
    }

    pub fn set_keyframe<T: Clone + PartialEq + Send + 'static>(
        &self,
        handle: KeyframeHandle<T>,
        locator: Locator,
        value: T,
    ) {
        let _structure = self.structure.read();
        let mut sidecars = self.metadata.write();
        sidecars.set_keyframe(handle, locator, value);
    }

    pub fn find_stable(&self, key: Key) -> Position {
        self.structure.read().find_stable(key)
    }

    pub fn chain_len(&self) -> usize {
        self.structure.read().chain_len()
    }

    pub fn tip_hash(&self) -> Option<Hash> {
        self.structure.read().tip_hash()
    }

    pub fn forest_len(&self) -> usize {
        self.structure.read().forest_len()
    }
}

impl<H: RawHeader + Clone> Default for ConcurrentTimechain<H> {
    fn default() -> Self {
        Self::new()
    }
}
