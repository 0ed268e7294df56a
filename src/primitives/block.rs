// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Target;
use crate::primitives::{Hash256, Hash256Algo, Transaction};
use bincode::{Decode, Encode};
use merkletree::merkle::MerkleTree;
use merkletree::store::VecStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a chain in the `G x G` grid: carries transactions moving
/// value from group `from` to group `to`.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChainIndex {
    pub from: u16,
    pub to: u16,
}

impl ChainIndex {
    #[must_use]
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    /// Derive the chain index of a block hash from its two low-order bytes
    /// modulo `G^2`.
    #[must_use]
    pub fn from_hash(hash: &Hash256, groups: u16) -> Self {
        let flat = hash.low_u16() % (groups * groups);
        Self {
            from: flat / groups,
            to: flat % groups,
        }
    }

    #[must_use]
    pub fn flat_index(&self, groups: u16) -> usize {
        usize::from(self.from) * usize::from(groups) + usize::from(self.to)
    }

    #[must_use]
    pub fn is_intra_group(&self) -> bool {
        self.from == self.to
    }

    #[must_use]
    pub fn is_valid(&self, groups: u16) -> bool {
        self.from < groups && self.to < groups
    }

    /// All chain indexes of a `groups`-sized grid, row-major.
    pub fn all(groups: u16) -> impl Iterator<Item = ChainIndex> {
        (0..groups).flat_map(move |from| (0..groups).map(move |to| ChainIndex::new(from, to)))
    }
}

impl fmt::Debug for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainIndex({}, {})", self.from, self.to)
    }
}

/// The `2 G - 1` predecessor hashes committed in a block header. The first
/// `G - 1` slots are the intra-group deps: for every group `i` other than
/// the block's from-group, the observed tip of chain `(i, i)`. The last `G`
/// slots are the inter-group deps: the observed tips of chains
/// `(from, 0) .. (from, G - 1)`. The slot for the block's own chain is its
/// parent.
#[derive(Clone, PartialEq, Eq, Hash, Encode, Decode, Debug)]
pub struct BlockDeps {
    deps: Vec<Hash256>,
}

impl BlockDeps {
    pub fn new(deps: Vec<Hash256>, groups: u16) -> Result<Self, InvalidDepsLen> {
        if deps.len() != Self::expected_len(groups) {
            return Err(InvalidDepsLen {
                got: deps.len(),
                expected: Self::expected_len(groups),
            });
        }
        Ok(Self { deps })
    }

    /// All-zero deps vector, used by genesis headers.
    #[must_use]
    pub fn genesis(groups: u16) -> Self {
        Self {
            deps: vec![Hash256::zero(); Self::expected_len(groups)],
        }
    }

    #[must_use]
    pub fn expected_len(groups: u16) -> usize {
        2 * usize::from(groups) - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// The intra-group dep observed for group `group`. `group` must differ
    /// from the header's from-group; slots skip it.
    #[must_use]
    pub fn intra_dep(&self, group: u16, from_group: u16) -> Hash256 {
        debug_assert_ne!(group, from_group);
        let slot = if group < from_group { group } else { group - 1 };
        self.deps[usize::from(slot)]
    }

    /// The inter-group dep observed for chain `(from, to_group)`.
    #[must_use]
    pub fn inter_dep(&self, to_group: u16, groups: u16) -> Hash256 {
        self.deps[usize::from(groups) - 1 + usize::from(to_group)]
    }

    /// The parent slot of a block in chain `(from, to)`.
    #[must_use]
    pub fn parent(&self, to_group: u16, groups: u16) -> Hash256 {
        self.inter_dep(to_group, groups)
    }

    /// Chain index each dep slot refers to, given the owning block's
    /// from-group.
    pub fn slots(&self, from_group: u16, groups: u16) -> impl Iterator<Item = (ChainIndex, Hash256)> + '_ {
        let intra = (0..groups).filter(move |g| *g != from_group).map(move |g| {
            (ChainIndex::new(g, g), self.intra_dep(g, from_group))
        });
        let inter = (0..groups).map(move |to| {
            (
                ChainIndex::new(from_group, to),
                self.inter_dep(to, groups),
            )
        });
        intra.chain(inter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDepsLen {
    pub got: usize,
    pub expected: usize,
}

/// Header of a block. The header hash commits to every field; a header is
/// genesis iff its parent slot is the zero hash.
#[derive(Clone, Eq, Debug)]
pub struct BlockHeader {
    /// Header version.
    pub version: u16,

    /// Cross-chain dependency vector.
    pub deps: BlockDeps,

    /// Root of the world-state this block's transactions execute against.
    pub dep_state_hash: Hash256,

    /// Merkle root of the transaction list.
    pub txs_hash: Hash256,

    /// Block timestamp in millis.
    pub timestamp: u64,

    /// Compact mining target.
    pub bits: u32,

    /// Proof of work solution.
    pub nonce: u64,

    /// Cached block hash.
    pub hash: Option<Hash256>,
}

/// The cached hash is derived state and stays out of equality.
impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.deps == other.deps
            && self.dep_state_hash == other.dep_state_hash
            && self.txs_hash == other.txs_hash
            && self.timestamp == other.timestamp
            && self.bits == other.bits
            && self.nonce == other.nonce
    }
}

impl BlockHeader {
    pub fn compute_hash(&mut self, key: &str) {
        let encoded = crate::codec::encode_to_vec(self).unwrap();
        self.hash = Some(Hash256::hash_from_slice(encoded, key));
    }

    #[must_use]
    pub fn hash(&self) -> Option<&Hash256> {
        self.hash.as_ref()
    }

    #[must_use]
    pub fn chain_index(&self, groups: u16) -> ChainIndex {
        ChainIndex::from_hash(self.hash().expect("header hash not computed"), groups)
    }

    /// Expanded mining target. `None` for malformed compact bits.
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        Target::from_compact(self.bits)
    }

    #[must_use]
    pub fn parent(&self, groups: u16) -> Hash256 {
        let to = self.chain_index(groups).to;
        self.deps.parent(to, groups)
    }

    #[must_use]
    pub fn is_genesis(&self, groups: u16) -> bool {
        self.parent(groups).is_zero()
    }

    /// Whether the cached hash satisfies the declared target.
    #[must_use]
    pub fn pow_checked(&self) -> bool {
        match (self.hash(), self.target()) {
            (Some(hash), Some(target)) => target.meets(hash),
            _ => false,
        }
    }

    /// Deterministic genesis header for the given chain. Grinds the nonce
    /// until the header hash lands in the wanted chain; the expected number
    /// of attempts is `G^2`.
    #[must_use]
    pub fn genesis(chain_index: ChainIndex, groups: u16, key: &str) -> Self {
        let mut header = Self {
            version: 0,
            deps: BlockDeps::genesis(groups),
            dep_state_hash: Hash256::zero(),
            txs_hash: Hash256::zero(),
            timestamp: 0,
            bits: Target::max_mining_target().to_compact(),
            nonce: 0,
            hash: None,
        };

        loop {
            header.compute_hash(key);
            if ChainIndex::from_hash(header.hash().unwrap(), groups) == chain_index {
                return header;
            }
            header.nonce += 1;
            header.hash = None;
        }
    }

    /// Increment nonce. Returns `None` if the nonce overflows.
    pub fn increment_nonce(&mut self) -> Option<u64> {
        self.nonce = self.nonce.checked_add(1)?;
        self.hash = None;
        Some(self.nonce)
    }

    /// Seed for the pseudo-random transaction execution order. Commits to
    /// everything the miner fixes before the nonce search, so the order is
    /// stable under grinding while transaction authors cannot pre-compute
    /// their slot.
    #[must_use]
    pub fn exec_seed(&self) -> Hash256 {
        let mut buf = crate::codec::encode_to_vec(&self.deps).unwrap();
        buf.extend_from_slice(self.txs_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        Hash256::hash_from_slice(buf, "latticecoin.execseed")
    }
}

impl Encode for BlockHeader {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.version, encoder)?;
        bincode::Encode::encode(&self.deps, encoder)?;
        bincode::Encode::encode(&self.dep_state_hash, encoder)?;
        bincode::Encode::encode(&self.txs_hash, encoder)?;
        crate::codec::encode_fixed_u64(self.timestamp, encoder)?;
        crate::codec::encode_fixed_u32(self.bits, encoder)?;
        crate::codec::encode_fixed_u64(self.nonce, encoder)?;
        Ok(())
    }
}

impl Decode for BlockHeader {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            version: bincode::Decode::decode(decoder)?,
            deps: bincode::Decode::decode(decoder)?,
            dep_state_hash: bincode::Decode::decode(decoder)?,
            txs_hash: bincode::Decode::decode(decoder)?,
            timestamp: crate::codec::decode_fixed_u64(decoder)?,
            bits: crate::codec::decode_fixed_u32(decoder)?,
            nonce: crate::codec::decode_fixed_u64(decoder)?,
            hash: None,
        })
    }
}

/// A block: header plus transaction list, coinbase last.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    #[must_use]
    pub fn hash(&self) -> Option<&Hash256> {
        self.header.hash()
    }

    #[must_use]
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    #[must_use]
    pub fn non_coinbase(&self) -> &[Transaction] {
        match self.transactions.len() {
            0 => &[],
            n => &self.transactions[..n - 1],
        }
    }

    /// Merkle root over the transaction ids, as committed by `txs_hash`.
    #[must_use]
    pub fn compute_txs_hash(&self, key: &str) -> Hash256 {
        let hashes: Vec<Hash256> = self
            .transactions
            .iter()
            .map(|tx| *tx.hash().expect("tx hash not computed"))
            .collect();
        txs_merkle_root(&hashes, key)
    }
}

/// Merkle root of a transaction id list. Leaves are padded to the next
/// power of two by repeating the final id, so the root is total over any
/// non-empty list; the empty list hashes to a domain constant.
#[must_use]
pub fn txs_merkle_root(hashes: &[Hash256], key: &str) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::hash_from_slice([], key);
    }

    let mut leaves = hashes.to_vec();
    let padded = leaves.len().next_power_of_two().max(2);
    while leaves.len() < padded {
        leaves.push(*leaves.last().unwrap());
    }

    let mt: MerkleTree<Hash256, Hash256Algo, VecStore<Hash256>> =
        MerkleTree::from_data::<Hash256, _>(leaves).unwrap();
    mt.root()
}
