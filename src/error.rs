//! Error taxonomy at the core's boundary (spec §7).
//!
//! Recoverable conditions (`ParentNotFound`, `LocatorUnresolved`) are
//! ordinary `Result`/`Option` values callers are expected to handle.
//! Invariant violations (`InvalidParent`, `ForestContractViolation`,
//! `WorkMonotonicityViolation`) are fatal: continuing risks corrupting the
//! chain image, so they panic rather than return a value a caller might
//! paper over.

use std::fmt;

/// A header's parent could not be located in the tip, the forest, or the
/// bounded chain scan.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ParentNotFound;

impl fmt::Display for ParentNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parent header not found")
    }
}

impl std::error::Error for ParentNotFound {}

/// `Add(parent, ctx)` received an inconsistent parent: wrong height, wrong
/// hash, or a structurally invalid insertion (e.g. a non-genesis insertion
/// into an empty tree). A programmer error in the caller, not a recoverable
/// network condition.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InvalidParent(pub String);

impl fmt::Display for InvalidParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid parent: {}", self.0)
    }
}

impl std::error::Error for InvalidParent {}

/// Internal invariant breach inside `HashedForest` (`EraseChain` called on
/// a non-leaf, or a missing parent backlink). Always fatal.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ForestContractViolation(pub String);

impl fmt::Display for ForestContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "forest contract violation: {}", self.0)
    }
}

impl std::error::Error for ForestContractViolation {}

/// `total_work` failed to be non-decreasing along a parent -> child edge.
/// Should never arise if callers construct `HeaderContext`s correctly; the
/// validator upstream is expected to catch this before it reaches the core.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WorkMonotonicityViolation {
    pub parent_total_work: String,
    pub child_total_work: String,
}

impl fmt::Display for WorkMonotonicityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total_work not monotonic: parent={} child={}",
            self.parent_total_work, self.child_total_work
        )
    }
}

impl std::error::Error for WorkMonotonicityViolation {}

/// Errors returned from `ChainTree`-level operations.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ChainTreeError {
    InvalidParent(InvalidParent),
    ForestContractViolation(ForestContractViolation),
}

impl fmt::Display for ChainTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainTreeError::InvalidParent(e) => e.fmt(f),
            ChainTreeError::ForestContractViolation(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ChainTreeError {}

impl From<InvalidParent> for ChainTreeError {
    fn from(e: InvalidParent) -> Self {
        ChainTreeError::InvalidParent(e)
    }
}

impl From<ForestContractViolation> for ChainTreeError {
    fn from(e: ForestContractViolation) -> Self {
        ChainTreeError::ForestContractViolation(e)
    }
}

/// Errors returned from `HeaderTimechain::add`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AddError {
    ParentNotFound(ParentNotFound),
    InvalidParent(InvalidParent),
}

impl fmt::Display for AddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::ParentNotFound(e) => e.fmt(f),
            AddError::InvalidParent(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for AddError {}

impl From<ChainTreeError> for AddError {
    fn from(e: ChainTreeError) -> Self {
        match e {
            ChainTreeError::InvalidParent(e) => AddError::InvalidParent(e),
            ChainTreeError::ForestContractViolation(e) => {
                panic!("forest contract violation during header add: {e}")
            }
        }
    }
}
