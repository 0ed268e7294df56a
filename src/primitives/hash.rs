// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::{Decode, Encode};
use merkletree::hash::{Algorithm, Hashable};
use merkletree::merkle::Element;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash as HashTrait;
use std::hash::Hasher;
use zeroize::Zeroize;

const HASH_KEY_PREFIX: &str = "latticecoin.hash.32.";

/// 256-bit entity hash. All hashing in the engine is keyed blake3 where the
/// key is derived from the hashing domain.
#[derive(
    PartialEq,
    Eq,
    Encode,
    Decode,
    Clone,
    HashTrait,
    Zeroize,
    PartialOrd,
    Ord,
    Default,
    Copy,
    Serialize,
    Deserialize,
)]
pub struct Hash256(pub [u8; 32]);

/// Block hashes are plain entity hashes.
pub type BlockHash = Hash256;

impl Hash256 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[inline]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T, key: &str) -> Self {
        let mut out_hash = Hash256([0; 32]);
        let key = format!("{HASH_KEY_PREFIX}{key}");
        let mut hasher = blake3::Hasher::new_derive_key(&key);
        hasher.update(slice.as_ref());
        let mut out = hasher.finalize_xof();
        out.fill(&mut out_hash.0);
        out_hash
    }

    /// The two low-order bytes as a little-endian word. Used to derive the
    /// chain index of a block hash.
    #[must_use]
    pub fn low_u16(&self) -> u16 {
        u16::from_le_bytes([self.0[30], self.0[31]])
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(v: [u8; 32]) -> Self {
        Self(v)
    }
}

impl From<Vec<u8>> for Hash256 {
    fn from(v: Vec<u8>) -> Self {
        debug_assert_eq!(v.len(), 32);
        let mut h: Self = Default::default();
        h.0.copy_from_slice(&v);
        h
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&self.to_hex()).finish()
    }
}

impl Element for Hash256 {
    fn byte_len() -> usize {
        32
    }

    fn from_slice(bytes: &[u8]) -> Self {
        assert!(bytes.len() == Self::byte_len(), "invalid slice len");

        let mut out = [0; 32];
        out.copy_from_slice(bytes);
        Self(out)
    }

    fn copy_to_slice(&self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0);
    }
}

impl<H: Hasher> Hashable<H> for Hash256 {
    fn hash(&self, state: &mut H) {
        Hashable::hash(&self.0, state);
    }
}

/// Merkle tree hasher over [`Hash256`] leaves.
#[derive(Default)]
pub struct Hash256Algo(Vec<u8>);

impl Hasher for Hash256Algo {
    #[inline]
    fn write(&mut self, msg: &[u8]) {
        self.0.extend_from_slice(msg);
    }

    #[inline]
    fn finish(&self) -> u64 {
        unimplemented!()
    }
}

impl Algorithm<Hash256> for Hash256Algo {
    #[inline]
    fn hash(&mut self) -> Hash256 {
        Hash256::hash_from_slice(&self.0, "latticecoin.generichasher.32")
    }

    #[inline]
    fn reset(&mut self) {
        self.0.clear();
    }
}
