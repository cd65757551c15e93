//! Content hashes and cumulative proof-of-work, as opaque values.
//!
//! The crate never computes either of these: a validated header's hash and
//! work contribution are supplied by the caller (the SHA-256 / target-math
//! layer is out of scope, see spec §1).

use primitive_types::{H256, U256};
use std::fmt;

/// A 32-byte content hash. Equality and hashing are byte-wise.
pub type Hash = H256;

/// A non-negative 256-bit accumulator of expected hashes-to-target.
///
/// `Work` only ever grows monotonically along a parent-to-child path
/// (invariant 4); addition therefore panics on overflow rather than
/// wrapping or saturating, since overflow can only mean a caller handed
/// the core a corrupt `total_work`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Work(U256);

impl Work {
    pub const ZERO: Work = Work(U256::zero());

    pub fn from_u256(value: U256) -> Self {
        Work(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// `self + other`, panicking on overflow.
    pub fn checked_add(&self, other: Work) -> Option<Work> {
        self.0.checked_add(other.0).map(Work)
    }

    /// `self - other`, panicking on underflow.
    pub fn checked_sub(&self, other: Work) -> Option<Work> {
        self.0.checked_sub(other.0).map(Work)
    }
}

impl std::ops::Add for Work {
    type Output = Work;
    fn add(self, rhs: Work) -> Work {
        self.checked_add(rhs)
            .expect("Work addition overflowed 256 bits")
    }
}

impl std::ops::Sub for Work {
    type Output = Work;
    fn sub(self, rhs: Work) -> Work {
        self.checked_sub(rhs)
            .expect("Work subtraction underflowed below zero")
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Work({})", self.0)
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Work {
    fn from(value: u64) -> Self {
        Work(U256::from(value))
    }
}
