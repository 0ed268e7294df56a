// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{Column, KvStore, KvStoreErr, WriteBatch};
use crate::consensus::{Weight, MAX_SYNC_HASHES};
use crate::primitives::{Block, BlockHeader, ChainIndex, Hash256};
use bincode::{Decode, Encode};
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Persisted per-hash bookkeeping of a chain tree.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct BlockState {
    pub height: u64,
    pub weight: Weight,
    pub chain_weight: Weight,
    pub timestamp: u64,
    pub is_canonical: bool,
    pub parent: Hash256,
}

/// Outcome of appending a block: the canonical tip after the append and the
/// reorg it caused, if any.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TipUpdate {
    pub tip: Hash256,
    pub tip_changed: bool,
    pub reorg: Option<Reorg>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reorg {
    /// Previously canonical hashes, newest first.
    pub removed: Vec<Hash256>,

    /// Newly canonical hashes, oldest first.
    pub added: Vec<Hash256>,
}

/// Append-only DAG of one chain with reorg bookkeeping: height index,
/// canonical flags and the tip set. Mutation is serialized by the owner;
/// this type itself is single-writer.
pub struct ChainTree<S: KvStore> {
    store: S,
    chain_index: ChainIndex,
    states: HashMap<Hash256, BlockState>,
    children: HashMap<Hash256, Vec<Hash256>>,
    height_index: HashMap<u64, Vec<Hash256>>,
    tips: HashSet<Hash256>,
    canonical_tip: Hash256,
    genesis_hash: Hash256,
    max_height: u64,
    max_chain_weight: Weight,
}

impl<S: KvStore> ChainTree<S> {
    /// Bootstrap a tree containing only the given genesis block.
    pub fn new(store: S, chain_index: ChainIndex, genesis: &Block) -> Result<Self, ChainErr> {
        let genesis_hash = *genesis
            .hash()
            .ok_or(ChainErr::Invariant("genesis hash not computed"))?;

        let mut tree = Self {
            store,
            chain_index,
            states: HashMap::new(),
            children: HashMap::new(),
            height_index: HashMap::new(),
            tips: HashSet::new(),
            canonical_tip: genesis_hash,
            genesis_hash,
            max_height: 0,
            max_chain_weight: Weight::zero(),
        };

        let state = BlockState {
            height: 0,
            weight: Weight::zero(),
            chain_weight: Weight::zero(),
            timestamp: genesis.header.timestamp,
            is_canonical: true,
            parent: Hash256::zero(),
        };

        let mut batch = WriteBatch::new();
        tree.persist_block(&mut batch, genesis, &state)?;
        tree.persist_height_row(&mut batch, 0, &[genesis_hash])?;
        tree.persist_anchors(&mut batch)?;
        tree.store.commit(batch)?;

        tree.states.insert(genesis_hash, state);
        tree.height_index.insert(0, vec![genesis_hash]);
        tree.tips.insert(genesis_hash);
        Ok(tree)
    }

    /// Reload a tree persisted by a previous run, walking the height index
    /// from genesis.
    pub fn open(store: S, chain_index: ChainIndex) -> Result<Self, ChainErr> {
        let max_height: u64 = store
            .get(Column::NodeState, &Self::max_height_key(chain_index))?
            .ok_or(ChainErr::NotFound)?;
        let canonical_tip: Hash256 = store
            .get(Column::NodeState, &Self::tip_key(chain_index))?
            .ok_or(ChainErr::NotFound)?;

        let mut tree = Self {
            store,
            chain_index,
            states: HashMap::new(),
            children: HashMap::new(),
            height_index: HashMap::new(),
            tips: HashSet::new(),
            canonical_tip,
            genesis_hash: Hash256::zero(),
            max_height,
            max_chain_weight: Weight::zero(),
        };

        let mut non_tips: HashSet<Hash256> = HashSet::new();
        for height in 0..=max_height {
            let row: Vec<Hash256> = tree
                .store
                .get(Column::HeightIndex, &tree.height_key(height))?
                .ok_or_else(|| ChainErr::Corruption(format!("missing height row {height}")))?;
            for hash in &row {
                let state: BlockState = tree
                    .store
                    .get(Column::ChainState, &tree.state_key(hash))?
                    .ok_or_else(|| {
                        ChainErr::Corruption(format!("missing block state {}", hash.to_hex()))
                    })?;
                if !state.parent.is_zero() {
                    tree.children.entry(state.parent).or_default().push(*hash);
                    non_tips.insert(state.parent);
                } else {
                    tree.genesis_hash = *hash;
                }
                tree.max_chain_weight =
                    std::cmp::max(tree.max_chain_weight, state.chain_weight);
                tree.states.insert(*hash, state);
            }
            tree.height_index.insert(height, row);
        }

        tree.tips = tree
            .states
            .keys()
            .filter(|h| !non_tips.contains(h))
            .copied()
            .collect();

        if tree.genesis_hash.is_zero() {
            return Err(ChainErr::Corruption("no genesis in height index".to_owned()));
        }
        Ok(tree)
    }

    #[must_use]
    pub fn chain_index(&self) -> ChainIndex {
        self.chain_index
    }

    #[must_use]
    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis_hash
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.states.contains_key(hash)
    }

    fn state(&self, hash: &Hash256) -> Result<&BlockState, ChainErr> {
        self.states.get(hash).ok_or(ChainErr::NotFound)
    }

    pub fn get_header(&self, hash: &Hash256) -> Result<BlockHeader, ChainErr> {
        let mut header: BlockHeader = self
            .store
            .get(Column::Headers, hash.as_bytes())?
            .ok_or(ChainErr::NotFound)?;
        header.hash = Some(*hash);
        Ok(header)
    }

    pub fn get(&self, hash: &Hash256) -> Result<Block, ChainErr> {
        let header = self.get_header(hash)?;
        let transactions = self
            .store
            .get(Column::Bodies, hash.as_bytes())?
            .ok_or(ChainErr::NotFound)?;
        Ok(Block {
            header,
            transactions,
        })
    }

    pub fn get_state(&self, hash: &Hash256) -> Result<BlockState, ChainErr> {
        self.state(hash).map(Clone::clone)
    }

    pub fn get_height(&self, hash: &Hash256) -> Result<u64, ChainErr> {
        Ok(self.state(hash)?.height)
    }

    pub fn get_weight(&self, hash: &Hash256) -> Result<Weight, ChainErr> {
        Ok(self.state(hash)?.weight)
    }

    pub fn get_chain_weight(&self, hash: &Hash256) -> Result<Weight, ChainErr> {
        Ok(self.state(hash)?.chain_weight)
    }

    pub fn get_timestamp(&self, hash: &Hash256) -> Result<u64, ChainErr> {
        Ok(self.state(hash)?.timestamp)
    }

    pub fn get_parent(&self, hash: &Hash256) -> Result<Hash256, ChainErr> {
        Ok(self.state(hash)?.parent)
    }

    pub fn is_canonical(&self, hash: &Hash256) -> Result<bool, ChainErr> {
        Ok(self.state(hash)?.is_canonical)
    }

    #[must_use]
    pub fn is_tip(&self, hash: &Hash256) -> bool {
        self.tips.contains(hash)
    }

    #[must_use]
    pub fn get_all_tips(&self) -> Vec<Hash256> {
        self.tips.iter().copied().collect()
    }

    /// The tip of maximum chain weight. "Unsafe" because it assumes the tree
    /// holds at least its genesis, which `new`/`open` guarantee.
    #[must_use]
    pub fn get_best_tip_unsafe(&self) -> Hash256 {
        self.canonical_tip
    }

    #[must_use]
    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    #[must_use]
    pub fn max_chain_weight(&self) -> Weight {
        self.max_chain_weight
    }

    /// Canonical hash at the given height, when one exists.
    pub fn canonical_hash_at(&self, height: u64) -> Result<Hash256, ChainErr> {
        self.height_index
            .get(&height)
            .and_then(|row| row.first())
            .copied()
            .ok_or(ChainErr::NotFound)
    }

    /// All hashes at the given height; head is canonical.
    #[must_use]
    pub fn hashes_at(&self, height: u64) -> Vec<Hash256> {
        self.height_index.get(&height).cloned().unwrap_or_default()
    }

    /// Append a block. Precondition: the block is absent and its parent is
    /// present; `weight` is the block's own target weight.
    pub fn add(
        &mut self,
        block: &Block,
        parent: &Hash256,
        weight: Weight,
    ) -> Result<TipUpdate, ChainErr> {
        self.add_with_batch(block, parent, weight, WriteBatch::new())
    }

    /// Append a block, committing `batch` (e.g. staged world-state nodes)
    /// atomically with the tree bookkeeping.
    pub fn add_with_batch(
        &mut self,
        block: &Block,
        parent: &Hash256,
        weight: Weight,
        mut batch: WriteBatch,
    ) -> Result<TipUpdate, ChainErr> {
        let hash = *block
            .hash()
            .ok_or(ChainErr::Invariant("block hash not computed"))?;
        if self.contains(&hash) {
            return Err(ChainErr::Invariant("block already present"));
        }
        let parent_state = self.states.get(parent).ok_or(ChainErr::NotFound)?.clone();

        let state = BlockState {
            height: parent_state.height + 1,
            weight,
            chain_weight: parent_state
                .chain_weight
                .checked_add(weight)
                .ok_or(ChainErr::Invariant("chain weight overflow"))?,
            timestamp: block.header.timestamp,
            is_canonical: false,
            parent: *parent,
        };

        self.persist_block(&mut batch, block, &state)?;

        self.children.entry(*parent).or_default().push(hash);
        self.height_index.entry(state.height).or_default().push(hash);
        self.tips.remove(parent);
        self.tips.insert(hash);
        self.max_height = std::cmp::max(self.max_height, state.height);
        self.states.insert(hash, state.clone());

        let update = if state.chain_weight > self.max_chain_weight {
            let reorg = self.reorg_to(&hash)?;
            self.max_chain_weight = state.chain_weight;
            self.canonical_tip = hash;
            TipUpdate {
                tip: hash,
                tip_changed: true,
                reorg,
            }
        } else {
            TipUpdate {
                tip: self.canonical_tip,
                tip_changed: false,
                reorg: None,
            }
        };

        // Persist every state and height row the append touched.
        let mut dirty_heights: HashSet<u64> = HashSet::new();
        dirty_heights.insert(state.height);
        let mut dirty_hashes: Vec<Hash256> = vec![hash];
        if let Some(reorg) = &update.reorg {
            for h in reorg.removed.iter().chain(reorg.added.iter()) {
                dirty_hashes.push(*h);
                dirty_heights.insert(self.state(h)?.height);
            }
        }
        for h in dirty_hashes {
            let s = self.state(&h)?.clone();
            batch.put(Column::ChainState, self.state_key(&h), &s)?;
        }
        for height in dirty_heights {
            let row = self.hashes_at(height);
            self.persist_height_row(&mut batch, height, &row)?;
        }
        self.persist_anchors(&mut batch)?;
        self.store.commit(batch)?;

        Ok(update)
    }

    /// Make `new_tip` canonical. Walks up from the new tip flagging blocks
    /// and moving them to the head of their height row, stopping at the
    /// first already-canonical ancestor; then clears flags down the old
    /// branch. Ties at equal weight never reach here: the incumbent stays.
    fn reorg_to(&mut self, new_tip: &Hash256) -> Result<Option<Reorg>, ChainErr> {
        let old_tip = self.canonical_tip;

        let mut added: Vec<Hash256> = vec![];
        let mut cursor = *new_tip;
        while !self.state(&cursor)?.is_canonical {
            let state = self
                .states
                .get_mut(&cursor)
                .ok_or(ChainErr::NotFound)?;
            state.is_canonical = true;
            let (height, parent) = (state.height, state.parent);
            let row = self.height_index.entry(height).or_default();
            if let Some(pos) = row.iter().position(|h| h == &cursor) {
                row.remove(pos);
            }
            row.insert(0, cursor);
            added.push(cursor);
            cursor = parent;
        }
        added.reverse();

        // `cursor` now sits on the fork point, still canonical on both paths.
        let fork = cursor;
        let fork_height = self.state(&fork)?.height;
        let mut removed: Vec<Hash256> = vec![];
        let mut cursor = old_tip;
        while cursor != fork && self.state(&cursor)?.height > fork_height {
            let state = self
                .states
                .get_mut(&cursor)
                .ok_or(ChainErr::NotFound)?;
            state.is_canonical = false;
            let parent = state.parent;
            removed.push(cursor);
            cursor = parent;
        }

        if added.len() == 1 && removed.is_empty() {
            // Plain canonical growth, not a reorg.
            return Ok(None);
        }

        debug!(
            "chain {:?} reorg: removed {} added {}",
            self.chain_index,
            removed.len(),
            added.len()
        );
        Ok(Some(Reorg { removed, added }))
    }

    /// Ancestors of `hash` down to height `height_until + 1` inclusive,
    /// oldest first, ending with `hash` itself.
    pub fn chain_back(&self, hash: &Hash256, height_until: u64) -> Result<Vec<Hash256>, ChainErr> {
        let mut out = vec![];
        let mut cursor = *hash;
        loop {
            let state = self.state(&cursor)?;
            if state.height <= height_until {
                break;
            }
            out.push(cursor);
            if state.parent.is_zero() {
                break;
            }
            cursor = state.parent;
        }
        out.reverse();
        Ok(out)
    }

    /// Genesis-to-`hash` path, inclusive on both ends.
    pub fn get_block_hash_slice(&self, hash: &Hash256) -> Result<Vec<Hash256>, ChainErr> {
        let mut out = vec![];
        let mut cursor = *hash;
        loop {
            let state = self.state(&cursor)?;
            out.push(cursor);
            if state.parent.is_zero() {
                break;
            }
            cursor = state.parent;
        }
        out.reverse();
        Ok(out)
    }

    /// All descendants of `hash` in breadth-first DAG order.
    pub fn get_hashes_after(&self, hash: &Hash256) -> Result<Vec<Hash256>, ChainErr> {
        if !self.contains(hash) {
            return Err(ChainErr::NotFound);
        }
        let mut out = vec![];
        let mut queue: VecDeque<Hash256> = VecDeque::new();
        queue.push_back(*hash);
        while let Some(cursor) = queue.pop_front() {
            if let Some(kids) = self.children.get(&cursor) {
                for kid in kids {
                    out.push(*kid);
                    queue.push_back(*kid);
                }
            }
        }
        Ok(out)
    }

    /// Path from `older` (exclusive) to `newer` (inclusive), oldest first.
    /// Fails when `older` is not an ancestor of `newer`.
    pub fn get_block_hashes_between(
        &self,
        newer: &Hash256,
        older: &Hash256,
    ) -> Result<Vec<Hash256>, ChainErr> {
        let older_height = self.get_height(older)?;
        let newer_height = self.get_height(newer)?;
        if older_height > newer_height {
            return Err(ChainErr::Invariant("older above newer"));
        }

        let path = self.chain_back(newer, older_height)?;
        if older_height == newer_height {
            return if older == newer {
                Ok(vec![])
            } else {
                Err(ChainErr::Invariant("not an ancestor"))
            };
        }

        let first = path.first().ok_or(ChainErr::Invariant("empty path"))?;
        if &self.state(first)?.parent != older {
            return Err(ChainErr::Invariant("not an ancestor"));
        }
        Ok(path)
    }

    /// Difference between two tips along their lowest common ancestor:
    /// hashes to drop from `older`'s branch (newest first) and hashes to
    /// apply from `newer`'s branch (oldest first). Either side may be empty.
    pub fn cal_hash_diff(
        &self,
        newer: &Hash256,
        older: &Hash256,
    ) -> Result<(Vec<Hash256>, Vec<Hash256>), ChainErr> {
        let mut to_remove = vec![];
        let mut to_add = vec![];

        let mut a = *older;
        let mut b = *newer;
        let mut height_a = self.get_height(&a)?;
        let mut height_b = self.get_height(&b)?;

        while height_a > height_b {
            to_remove.push(a);
            a = self.state(&a)?.parent;
            height_a -= 1;
        }
        while height_b > height_a {
            to_add.push(b);
            b = self.state(&b)?.parent;
            height_b -= 1;
        }
        while a != b {
            to_remove.push(a);
            to_add.push(b);
            a = self.state(&a)?.parent;
            b = self.state(&b)?.parent;
            if a.is_zero() || b.is_zero() {
                return Err(ChainErr::Invariant("no common ancestor"));
            }
        }

        to_add.reverse();
        Ok((to_remove, to_add))
    }

    /// Whether `a` is a proper ancestor of `b`.
    pub fn is_before(&self, a: &Hash256, b: &Hash256) -> Result<bool, ChainErr> {
        let height_a = self.get_height(a)?;
        let height_b = self.get_height(b)?;
        if height_a >= height_b {
            return Ok(false);
        }
        let mut cursor = *b;
        for _ in height_a..height_b {
            cursor = self.state(&cursor)?.parent;
        }
        Ok(&cursor == a)
    }

    /// Sync support: given a descending locator list, return up to
    /// [`MAX_SYNC_HASHES`] canonical hashes after the most recent locator
    /// found canonical. Unknown locators fall back to the genesis slice.
    pub fn get_sync_data(&self, locators: &[Hash256]) -> Result<Vec<Hash256>, ChainErr> {
        let mut start_height = 0;
        for locator in locators {
            if let Some(state) = self.states.get(locator) {
                if state.is_canonical {
                    start_height = state.height + 1;
                    break;
                }
            }
        }

        let mut out = vec![];
        let mut height = start_height;
        while out.len() < MAX_SYNC_HASHES && height <= self.max_height {
            match self.canonical_hash_at(height) {
                Ok(hash) => out.push(hash),
                Err(_) => break,
            }
            height += 1;
        }
        Ok(out)
    }

    fn persist_block(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        state: &BlockState,
    ) -> Result<(), ChainErr> {
        let hash = block.hash().ok_or(ChainErr::Invariant("hash missing"))?;
        batch.put(Column::Headers, hash.as_bytes().to_vec(), &block.header)?;
        batch.put(Column::Bodies, hash.as_bytes().to_vec(), &block.transactions)?;
        batch.put(Column::ChainState, self.state_key(hash), state)?;
        Ok(())
    }

    fn persist_height_row(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        row: &[Hash256],
    ) -> Result<(), ChainErr> {
        batch.put(Column::HeightIndex, self.height_key(height), &row.to_vec())?;
        Ok(())
    }

    fn persist_anchors(&self, batch: &mut WriteBatch) -> Result<(), ChainErr> {
        batch.put(
            Column::NodeState,
            Self::tip_key(self.chain_index),
            &self.canonical_tip,
        )?;
        batch.put(
            Column::NodeState,
            Self::max_height_key(self.chain_index),
            &self.max_height,
        )?;
        Ok(())
    }

    fn chain_prefix(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out[..2].copy_from_slice(&self.chain_index.from.to_le_bytes());
        out[2..].copy_from_slice(&self.chain_index.to.to_le_bytes());
        out
    }

    fn state_key(&self, hash: &Hash256) -> Vec<u8> {
        let mut key = self.chain_prefix().to_vec();
        key.extend_from_slice(hash.as_bytes());
        key
    }

    fn height_key(&self, height: u64) -> Vec<u8> {
        let mut key = self.chain_prefix().to_vec();
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    fn tip_key(chain_index: ChainIndex) -> Vec<u8> {
        format!("tip.{}.{}", chain_index.from, chain_index.to).into_bytes()
    }

    fn max_height_key(chain_index: ChainIndex) -> Vec<u8> {
        format!("max_height.{}.{}", chain_index.from, chain_index.to).into_bytes()
    }
}

#[derive(Debug)]
pub enum ChainErr {
    /// Entity expected present is missing.
    NotFound,

    /// On-disk state is inconsistent.
    Corruption(String),

    /// Storage fault.
    IoFailure(String),

    /// An operation precondition or internal invariant was violated.
    Invariant(&'static str),
}

impl fmt::Display for ChainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainErr::NotFound => write!(f, "not found"),
            ChainErr::Corruption(err) => write!(f, "corruption: {err}"),
            ChainErr::IoFailure(err) => write!(f, "io failure: {err}"),
            ChainErr::Invariant(err) => write!(f, "invariant violated: {err}"),
        }
    }
}

impl From<KvStoreErr> for ChainErr {
    fn from(other: KvStoreErr) -> Self {
        match other {
            KvStoreErr::NotFound => ChainErr::NotFound,
            KvStoreErr::Corruption(err) => ChainErr::Corruption(err),
            KvStoreErr::Io(err) => ChainErr::IoFailure(err),
            KvStoreErr::Invariant(err) => ChainErr::Invariant(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::backend::MemoryKv;
    use crate::consensus::Target;
    use crate::primitives::{BlockDeps, U256};

    pub(crate) const TEST_GROUPS: u16 = 2;

    /// A throwaway block whose parent slot points at `parent`. Chain-index
    /// derivation is irrelevant for tree tests; deps are placed for chain
    /// (0, 0).
    pub(crate) fn test_block(parent: Hash256, seed: u64, timestamp: u64) -> Block {
        let mut deps = vec![Hash256::zero(); BlockDeps::expected_len(TEST_GROUPS)];
        // Parent slot of chain (0, 0) in a 2-group grid.
        deps[1] = parent;
        let mut header = crate::primitives::BlockHeader {
            version: 0,
            deps: BlockDeps::new(deps, TEST_GROUPS).unwrap(),
            dep_state_hash: Hash256::zero(),
            txs_hash: Hash256::hash_from_slice(seed.to_le_bytes(), "test"),
            timestamp,
            bits: Target::max_mining_target().to_compact(),
            nonce: seed,
            hash: None,
        };
        header.compute_hash("test");
        Block::new(header, vec![])
    }

    pub(crate) fn genesis_block() -> Block {
        test_block(Hash256::zero(), 0, 0)
    }

    fn new_tree() -> (ChainTree<MemoryKv>, Hash256) {
        let genesis = genesis_block();
        let hash = *genesis.hash().unwrap();
        let tree = ChainTree::new(MemoryKv::new(), ChainIndex::new(0, 0), &genesis).unwrap();
        (tree, hash)
    }

    fn w(n: u64) -> Weight {
        U256::from_u64(n)
    }

    #[test]
    fn single_chain_growth() {
        let (mut tree, genesis) = new_tree();

        let mut parent = genesis;
        let mut hashes = vec![];
        for i in 1..=4u64 {
            let block = test_block(parent, i, i * 1_000);
            let hash = *block.hash().unwrap();
            tree.add(&block, &parent, w(i)).unwrap();
            hashes.push(hash);
            parent = hash;
        }

        assert_eq!(tree.max_height(), 4);
        assert_eq!(tree.max_chain_weight(), w(10));
        assert_eq!(tree.get_best_tip_unsafe(), hashes[3]);
        assert_eq!(
            tree.get_block_hashes_between(&hashes[3], &genesis).unwrap(),
            hashes
        );
        assert_eq!(tree.get_weight(&hashes[2]).unwrap(), w(3));
        assert_eq!(tree.get_chain_weight(&hashes[2]).unwrap(), w(6));
        assert_eq!(tree.get_timestamp(&hashes[0]).unwrap(), 1_000);
    }

    #[test]
    fn reorg_moves_canonical_path() {
        let (mut tree, genesis) = new_tree();

        // Short fork of two blocks.
        let short1 = test_block(genesis, 1, 1_000);
        let short2 = test_block(*short1.hash().unwrap(), 2, 2_000);
        tree.add(&short1, &genesis, w(1)).unwrap();
        tree.add(&short2, short1.hash().unwrap(), w(1)).unwrap();

        // Longer fork of three blocks off the same genesis.
        let long1 = test_block(genesis, 11, 1_100);
        let long2 = test_block(*long1.hash().unwrap(), 12, 2_100);
        let long3 = test_block(*long2.hash().unwrap(), 13, 3_100);
        tree.add(&long1, &genesis, w(1)).unwrap();
        tree.add(&long2, long1.hash().unwrap(), w(1)).unwrap();
        let update = tree.add(&long3, long2.hash().unwrap(), w(1)).unwrap();

        assert!(update.tip_changed);
        let reorg = update.reorg.unwrap();
        assert_eq!(reorg.removed.len(), 2);
        assert_eq!(reorg.added.len(), 3);

        assert_eq!(tree.get_best_tip_unsafe(), *long3.hash().unwrap());
        for (height, long) in [(1u64, &long1), (2, &long2)] {
            assert_eq!(tree.hashes_at(height)[0], *long.hash().unwrap());
        }
        for block in [&long1, &long2, &long3] {
            assert!(tree.is_canonical(block.hash().unwrap()).unwrap());
        }
        for block in [&short1, &short2] {
            assert!(!tree.is_canonical(block.hash().unwrap()).unwrap());
        }
    }

    #[test]
    fn tie_keeps_incumbent_tip() {
        let (mut tree, genesis) = new_tree();

        let a = test_block(genesis, 1, 1_000);
        let b = test_block(genesis, 2, 1_001);
        tree.add(&a, &genesis, w(5)).unwrap();
        let update = tree.add(&b, &genesis, w(5)).unwrap();

        assert!(!update.tip_changed);
        assert_eq!(tree.get_best_tip_unsafe(), *a.hash().unwrap());
        assert!(tree.is_canonical(a.hash().unwrap()).unwrap());
        assert!(!tree.is_canonical(b.hash().unwrap()).unwrap());
    }

    #[test]
    fn reorg_is_monotone_in_weight() {
        let (mut tree, genesis) = new_tree();
        let mut best = Weight::zero();
        let mut parent = genesis;
        for i in 1..=16u64 {
            // Alternate between extending and forking.
            let base = if i % 3 == 0 { genesis } else { parent };
            let block = test_block(base, i, i * 500);
            tree.add(&block, &base, w(i)).unwrap();
            assert!(tree.max_chain_weight() >= best);
            best = tree.max_chain_weight();
            parent = *block.hash().unwrap();
        }
    }

    #[test]
    fn canonical_iff_on_best_slice() {
        let (mut tree, genesis) = new_tree();
        let a = test_block(genesis, 1, 1_000);
        let b = test_block(*a.hash().unwrap(), 2, 2_000);
        let c = test_block(genesis, 3, 1_500);
        tree.add(&a, &genesis, w(2)).unwrap();
        tree.add(&b, a.hash().unwrap(), w(2)).unwrap();
        tree.add(&c, &genesis, w(1)).unwrap();

        let slice = tree
            .get_block_hash_slice(&tree.get_best_tip_unsafe())
            .unwrap();
        for hash in tree.states.keys() {
            assert_eq!(
                tree.is_canonical(hash).unwrap(),
                slice.contains(hash),
                "canonical flag disagrees with best slice for {hash:?}"
            );
        }
    }

    #[test]
    fn hash_diff_reconstructs_ancestry() {
        let (mut tree, genesis) = new_tree();
        let a1 = test_block(genesis, 1, 1_000);
        let a2 = test_block(*a1.hash().unwrap(), 2, 2_000);
        let b1 = test_block(genesis, 3, 1_100);
        let b2 = test_block(*b1.hash().unwrap(), 4, 2_100);
        let b3 = test_block(*b2.hash().unwrap(), 5, 3_100);
        for (block, parent, weight) in [
            (&a1, genesis, 1),
            (&a2, *a1.hash().unwrap(), 1),
            (&b1, genesis, 1),
            (&b2, *b1.hash().unwrap(), 1),
            (&b3, *b2.hash().unwrap(), 1),
        ] {
            tree.add(block, &parent, w(weight)).unwrap();
        }

        let newer = *b3.hash().unwrap();
        let older = *a2.hash().unwrap();
        let (to_remove, to_add) = tree.cal_hash_diff(&newer, &older).unwrap();

        assert_eq!(to_remove, vec![*a2.hash().unwrap(), *a1.hash().unwrap()]);
        assert_eq!(
            to_add,
            vec![*b1.hash().unwrap(), *b2.hash().unwrap(), *b3.hash().unwrap()]
        );
        let removed: HashSet<_> = to_remove.iter().collect();
        assert!(to_add.iter().all(|h| !removed.contains(h)));

        // Diff between a tip and its own ancestor has an empty remove side.
        let (to_remove, to_add) = tree.cal_hash_diff(&newer, b1.hash().unwrap()).unwrap();
        assert!(to_remove.is_empty());
        assert_eq!(to_add.len(), 2);
    }

    #[test]
    fn is_before_is_proper_ancestry() {
        let (mut tree, genesis) = new_tree();
        let a = test_block(genesis, 1, 1_000);
        let b = test_block(*a.hash().unwrap(), 2, 2_000);
        let c = test_block(genesis, 3, 1_100);
        tree.add(&a, &genesis, w(1)).unwrap();
        tree.add(&b, a.hash().unwrap(), w(1)).unwrap();
        tree.add(&c, &genesis, w(1)).unwrap();

        assert!(tree.is_before(&genesis, b.hash().unwrap()).unwrap());
        assert!(tree.is_before(a.hash().unwrap(), b.hash().unwrap()).unwrap());
        assert!(!tree.is_before(b.hash().unwrap(), b.hash().unwrap()).unwrap());
        assert!(!tree.is_before(c.hash().unwrap(), b.hash().unwrap()).unwrap());
        assert!(!tree.is_before(b.hash().unwrap(), a.hash().unwrap()).unwrap());
    }

    #[test]
    fn hashes_after_returns_descendants() {
        let (mut tree, genesis) = new_tree();
        let a = test_block(genesis, 1, 1_000);
        let b = test_block(*a.hash().unwrap(), 2, 2_000);
        let c = test_block(genesis, 3, 1_100);
        tree.add(&a, &genesis, w(1)).unwrap();
        tree.add(&b, a.hash().unwrap(), w(1)).unwrap();
        tree.add(&c, &genesis, w(1)).unwrap();

        let after = tree.get_hashes_after(&genesis).unwrap();
        assert_eq!(after.len(), 3);
        let after_a = tree.get_hashes_after(a.hash().unwrap()).unwrap();
        assert_eq!(after_a, vec![*b.hash().unwrap()]);
    }

    #[test]
    fn sync_data_follows_locators() {
        let (mut tree, genesis) = new_tree();
        let mut parent = genesis;
        let mut hashes = vec![];
        for i in 1..=5u64 {
            let block = test_block(parent, i, i * 1_000);
            tree.add(&block, &parent, w(1)).unwrap();
            parent = *block.hash().unwrap();
            hashes.push(parent);
        }

        // Locator list newest-first; the first canonical match wins.
        let unknown = Hash256::hash_from_slice("nope", "test");
        let sync = tree.get_sync_data(&[unknown, hashes[2], hashes[0]]).unwrap();
        assert_eq!(sync, vec![hashes[3], hashes[4]]);

        // No canonical locator falls back to the genesis slice.
        let sync = tree.get_sync_data(&[unknown]).unwrap();
        assert_eq!(sync.len(), 6);
        assert_eq!(sync[0], genesis);
    }

    #[test]
    fn reopen_restores_tree() {
        let kv = MemoryKv::new();
        let genesis = genesis_block();
        let genesis_hash = *genesis.hash().unwrap();
        let mut tree =
            ChainTree::new(kv.clone(), ChainIndex::new(0, 0), &genesis).unwrap();

        let a = test_block(genesis_hash, 1, 1_000);
        let b = test_block(*a.hash().unwrap(), 2, 2_000);
        tree.add(&a, &genesis_hash, w(3)).unwrap();
        tree.add(&b, a.hash().unwrap(), w(4)).unwrap();

        let reopened = ChainTree::open(kv, ChainIndex::new(0, 0)).unwrap();
        assert_eq!(reopened.get_best_tip_unsafe(), *b.hash().unwrap());
        assert_eq!(reopened.max_height(), 2);
        assert_eq!(reopened.max_chain_weight(), w(7));
        assert!(reopened.is_tip(b.hash().unwrap()));
        assert!(reopened.is_canonical(a.hash().unwrap()).unwrap());
        assert_eq!(reopened.get_header(&genesis_hash).unwrap(), genesis.header);
    }
}
