//! An in-memory, reorg-aware header timechain plus synchronized sidecar
//! stores (spec §1-§2): the data-plane core of a node, independent of
//! wire format, consensus validation, and storage.
//!
//! The timechain itself is a linear `Vec` of the best-work chain backed
//! by a forest of not-currently-best branches (spec §4.2-§4.3). Sidecars
//! (spec §4.4) mirror that topology one-to-one, carrying per-node or
//! run-length-encoded payloads. `ConcurrentTimechain` (spec §5) wraps
//! both behind a writer-preferring shared/exclusive latch pair.

pub mod atomic_vector;
pub mod chain_tree;
pub mod concurrent;
pub mod error;
pub mod forest;
pub mod hash;
pub mod keyframe;
pub mod latch;
pub mod sidecar;
pub mod timechain;

pub use atomic_vector::{AtomicVector, SingleWriter};
pub use chain_tree::{ChainTree, Key, Locator, Position};
pub use concurrent::ConcurrentTimechain;
pub use error::{AddError, ChainTreeError, InvalidParent, ParentNotFound};
pub use forest::{HashedForest, NodeKey};
pub use hash::{Hash, Work};
pub use keyframe::KeyframeSidecar;
pub use latch::PrioritySharedMutex;
pub use sidecar::{AddSync, Handle, KeyframeHandle, Sidecar, SidecarSet};
pub use timechain::{AddResult, HeaderContext, HeaderTimechain, RawHeader, ValidationView};

/// Mainnet network magic, reused by callers wiring up a `RawHeader`
/// impl's message framing. The core never inspects this itself.
pub const MAGIC_MAIN: u32 = 0xD9B4_BEF9;
/// Testnet3 network magic.
pub const MAGIC_TESTNET: u32 = 0x0709_110B;
/// Signet network magic.
pub const MAGIC_SIGNET: u32 = 0x40CF_030A;
