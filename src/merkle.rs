// Copyright (c) 2025 - Cowboy AI, Inc.
//! Merkle tree over the event log
//!
//! The engine keeps a single root hash per store as a compact integrity
//! fingerprint of the append-only log. Leaf `i` is the SHA-256 of the
//! canonical encoding of event `i`; pairs of nodes are concatenated as
//! raw bytes and hashed again; an odd node at any level is carried up
//! unchanged. The root is recomputed on every append and persisted
//! atomically with the event.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain::FormSubmission;
use crate::errors::EngineResult;

/// A SHA-256 node hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MerkleHash([u8; 32]);

impl MerkleHash {
    /// The length of a node hash in bytes
    pub const LEN: usize = 32;

    /// Hash arbitrary bytes into a leaf
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    /// Hash the concatenation of two child nodes
    #[must_use]
    pub fn combine(left: &MerkleHash, right: &MerkleHash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Self(hasher.finalize().into())
    }

    /// Raw bytes of this hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding of this hash
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode a hash from its hex encoding
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != Self::LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MerkleHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Root of the tree over an empty log
///
/// Defined as the hash of the empty byte string so that a fresh store
/// still has a well-defined fingerprint.
pub fn empty_root() -> MerkleHash {
    MerkleHash::compute(&[])
}

/// Build the root over pre-hashed leaves
///
/// Pairs are combined left to right; an odd node at any level is
/// carried up unchanged to the next level.
pub fn root_from_leaves(leaves: &[MerkleHash]) -> MerkleHash {
    if leaves.is_empty() {
        return empty_root();
    }

    let mut level: Vec<MerkleHash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => next.push(MerkleHash::combine(left, right)),
                [odd] => next.push(*odd),
                _ => unreachable!(),
            }
        }
        level = next;
    }
    level[0]
}

/// Hash one event into its leaf
pub fn event_leaf(event: &FormSubmission) -> EngineResult<MerkleHash> {
    Ok(MerkleHash::compute(&event.canonical_bytes()?))
}

/// Compute the root over an ordered event log
pub fn root_from_events(events: &[FormSubmission]) -> EngineResult<MerkleHash> {
    let leaves = events
        .iter()
        .map(event_leaf)
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(root_from_leaves(&leaves))
}
