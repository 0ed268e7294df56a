// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::KvStore;
use crate::chain::cache::FlowCache;
use crate::chain::tree::{ChainErr, ChainTree, TipUpdate};
use crate::chain::ChainConfig;
use crate::consensus::{next_target, Target, POW_AVERAGING_WINDOW};
use crate::node::{BlockOrigin, ChainEvent, EventBus};
use crate::primitives::{
    Block, BlockDeps, BlockHeader, ChainIndex, Hash256, TxOutputRef,
};
use crate::state::{StateErr, WorldState, WorldStateCached};
use crate::validation::{self, InvalidBlock};
use dashmap::DashMap;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use triomphe::Arc;

/// Result of handing a block to the flow.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AddBlockResult {
    /// Committed; carries the owning chain and its tip update.
    Added {
        chain_index: ChainIndex,
        hash: Hash256,
        tip: TipUpdate,
    },

    /// Already known; replaying is safe and does nothing.
    Duplicate,

    /// Dependencies missing; the block is parked and the missing hashes
    /// should be fetched from peers.
    Parked { missing: Vec<Hash256> },
}

/// The `G x G` cross-chain view: one [`ChainTree`] per chain behind a flat
/// index, composed into a globally consistent ledger through the dependency
/// vectors committed in block headers.
pub struct BlockFlow<S: KvStore> {
    config: ChainConfig,
    store: S,
    trees: Vec<RwLock<ChainTree<S>>>,
    cache: FlowCache,
    events: Arc<EventBus>,
    parked: DashMap<Hash256, Block>,
}

impl<S: KvStore> BlockFlow<S> {
    /// Bootstrap the grid: one genesis block per chain.
    pub fn new(
        store: S,
        config: ChainConfig,
        cache: FlowCache,
        events: Arc<EventBus>,
    ) -> Result<Self, FlowErr> {
        let groups = config.groups();
        let header_key = config.header_key();
        let mut trees = Vec::with_capacity(usize::from(groups) * usize::from(groups));
        for index in ChainIndex::all(groups) {
            let header = crate::global::get_cached_genesis(index, groups, &header_key);
            let genesis = Block::new(header.as_ref().clone(), vec![]);
            trees.push(RwLock::new(ChainTree::new(store.clone(), index, &genesis)?));
        }
        Ok(Self {
            config,
            store,
            trees,
            cache,
            events,
            parked: DashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &FlowCache {
        &self.cache
    }

    fn tree(&self, index: ChainIndex) -> &RwLock<ChainTree<S>> {
        &self.trees[index.flat_index(self.config.groups())]
    }

    /// Execute `f` under the read lock of one chain's tree.
    pub fn with_tree<R>(&self, index: ChainIndex, f: impl FnOnce(&ChainTree<S>) -> R) -> R {
        f(&self.tree(index).read())
    }

    #[must_use]
    pub fn contains_block(&self, hash: &Hash256) -> bool {
        let index = ChainIndex::from_hash(hash, self.config.groups());
        self.tree(index).read().contains(hash)
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block, ChainErr> {
        if let Some(block) = self.cache.get_block(hash) {
            return Ok(block);
        }
        let index = ChainIndex::from_hash(hash, self.config.groups());
        let block = self.tree(index).read().get(hash)?;
        self.cache.put_block(index, block.clone());
        Ok(block)
    }

    pub fn get_header(&self, hash: &Hash256) -> Result<BlockHeader, ChainErr> {
        if let Some(header) = self.cache.get_header(hash) {
            return Ok(header);
        }
        let index = ChainIndex::from_hash(hash, self.config.groups());
        let header = self.tree(index).read().get_header(hash)?;
        self.cache.put_header(header.clone());
        Ok(header)
    }

    /// Best-tip hash per chain, indexed row-major. The joint view used to
    /// assemble new dependency vectors.
    #[must_use]
    pub fn best_tips(&self) -> Vec<Hash256> {
        self.trees
            .iter()
            .map(|t| t.read().get_best_tip_unsafe())
            .collect()
    }

    /// Assemble the dependency vector a new block in `chain_index` should
    /// carry: the current best tips, positions encoding groups.
    pub fn best_deps(&self, chain_index: ChainIndex) -> Result<BlockDeps, FlowErr> {
        let groups = self.config.groups();
        let tips = self.best_tips();
        let tip_of = |c: ChainIndex| tips[c.flat_index(groups)];

        let mut deps = Vec::with_capacity(BlockDeps::expected_len(groups));
        for g in 0..groups {
            if g != chain_index.from {
                deps.push(tip_of(ChainIndex::new(g, g)));
            }
        }
        for to in 0..groups {
            deps.push(tip_of(ChainIndex::new(chain_index.from, to)));
        }
        BlockDeps::new(deps, groups).map_err(|_| FlowErr::Chain(ChainErr::Invariant("deps length")))
    }

    fn resolve_or_genesis(&self, chain: ChainIndex, hash: &Hash256) -> Hash256 {
        if hash.is_zero() {
            self.tree(chain).read().genesis_hash()
        } else {
            *hash
        }
    }

    /// The inter-group tip of `chain (i, to)` as seen by the given block of
    /// chain `(i, i)`. Zero slots resolve to the genesis of the target
    /// chain.
    fn seen_inter_tip(
        &self,
        intra_hash: &Hash256,
        i: u16,
        to: u16,
    ) -> Result<Hash256, FlowErr> {
        let chain = ChainIndex::new(i, i);
        let tree = self.tree(chain).read();
        if *intra_hash == tree.genesis_hash() {
            drop(tree);
            return Ok(self.resolve_or_genesis(ChainIndex::new(i, to), &Hash256::zero()));
        }
        let header = tree.get_header(intra_hash)?;
        drop(tree);
        let seen = header.deps.inter_dep(to, self.config.groups());
        Ok(self.resolve_or_genesis(ChainIndex::new(i, to), &seen))
    }

    /// Blocks of `chain` after `older` up to and including `newer`.
    fn blocks_between(
        &self,
        chain: ChainIndex,
        newer: &Hash256,
        older: &Hash256,
    ) -> Result<Vec<Block>, FlowErr> {
        if newer == older {
            return Ok(vec![]);
        }
        let hashes = self
            .tree(chain)
            .read()
            .get_block_hashes_between(newer, older)?;
        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            blocks.push(self.get_block(&hash)?);
        }
        Ok(blocks)
    }

    /// The unfolded sibling blocks of a deps vector for `from_group`: for
    /// every chain `(from, j)`, the blocks the deps observe past what the
    /// intra-group anchor has already folded into its state root.
    fn unfolded_outgoing(
        &self,
        from_group: u16,
        deps: &BlockDeps,
    ) -> Result<Vec<Block>, FlowErr> {
        let groups = self.config.groups();
        let anchor_chain = ChainIndex::new(from_group, from_group);
        let anchor =
            self.resolve_or_genesis(anchor_chain, &deps.inter_dep(from_group, groups));
        let anchor_header = self.get_header(&anchor)?;
        let anchor_is_genesis = anchor == self.tree(anchor_chain).read().genesis_hash();

        let mut out = vec![];
        for j in 0..groups {
            if j == from_group {
                continue;
            }
            let chain = ChainIndex::new(from_group, j);
            let newer = self.resolve_or_genesis(chain, &deps.inter_dep(j, groups));
            let older = if anchor_is_genesis {
                self.resolve_or_genesis(chain, &Hash256::zero())
            } else {
                self.resolve_or_genesis(chain, &anchor_header.deps.inter_dep(j, groups))
            };
            out.extend(self.blocks_between(chain, &newer, &older)?);
        }
        Ok(out)
    }

    /// The unfolded incoming blocks: for every other group `i`, the blocks
    /// of chain `(i, from)` newly visible through the intra-group dep of
    /// `i`, past what the anchor had already seen.
    fn unfolded_incoming(
        &self,
        from_group: u16,
        deps: &BlockDeps,
    ) -> Result<Vec<Block>, FlowErr> {
        let groups = self.config.groups();
        let anchor_chain = ChainIndex::new(from_group, from_group);
        let anchor =
            self.resolve_or_genesis(anchor_chain, &deps.inter_dep(from_group, groups));
        let anchor_header = self.get_header(&anchor)?;
        let anchor_is_genesis = anchor == self.tree(anchor_chain).read().genesis_hash();

        let mut out = vec![];
        for i in 0..groups {
            if i == from_group {
                continue;
            }
            let chain = ChainIndex::new(i, from_group);
            let intra_new =
                self.resolve_or_genesis(ChainIndex::new(i, i), &deps.intra_dep(i, from_group));
            let newer = self.seen_inter_tip(&intra_new, i, from_group)?;

            let older = if anchor_is_genesis {
                self.resolve_or_genesis(chain, &Hash256::zero())
            } else {
                let intra_old = self.resolve_or_genesis(
                    ChainIndex::new(i, i),
                    &anchor_header.deps.intra_dep(i, from_group),
                );
                self.seen_inter_tip(&intra_old, i, from_group)?
            };

            // The anchor may have seen further than the new deps on some
            // incoming chain; nothing to fold then.
            let tree = self.tree(chain).read();
            if newer == older || tree.is_before(&newer, &older)? {
                continue;
            }
            drop(tree);
            out.extend(self.blocks_between(chain, &newer, &older)?);
        }
        Ok(out)
    }

    /// Copy-on-write view of group `from_group`'s world-state as implied by
    /// `deps`: the anchor's committed root plus the surface effects of every
    /// dependency block not yet folded into it.
    pub fn get_mutable_group_view(
        &self,
        from_group: u16,
        deps: &BlockDeps,
    ) -> Result<WorldStateCached<S>, FlowErr> {
        let groups = self.config.groups();
        let anchor_chain = ChainIndex::new(from_group, from_group);
        let anchor =
            self.resolve_or_genesis(anchor_chain, &deps.inter_dep(from_group, groups));
        let root = self.get_header(&anchor)?.dep_state_hash;

        let world = WorldState::new(self.store.clone(), root);
        let mut view = world.cached();

        // Outgoing siblings spend this group's outputs and return change.
        for block in self.unfolded_outgoing(from_group, deps)? {
            for tx in &block.transactions {
                for spent in tx.spent_refs() {
                    if let TxOutputRef::Asset(r) = spent {
                        view.remove_asset(&r);
                    }
                }
                for (r, output) in tx.fixed_output_refs() {
                    if output.lockup.group_index(groups) == from_group {
                        view.put_asset(&r, output)?;
                    }
                }
            }
        }

        // Incoming blocks credit outputs owned by this group.
        for block in self.unfolded_incoming(from_group, deps)? {
            for tx in &block.transactions {
                for (r, output) in tx.fixed_output_refs() {
                    if output.lockup.group_index(groups) == from_group {
                        view.put_asset(&r, output)?;
                    }
                }
            }
        }

        Ok(view)
    }

    /// Output refs spent by blocks reachable through `deps` but not folded
    /// into the anchor state. Used by the block-flow double-spend check.
    pub fn flow_spent_set(
        &self,
        from_group: u16,
        deps: &BlockDeps,
    ) -> Result<HashSet<TxOutputRef>, FlowErr> {
        let mut spent = HashSet::new();
        for block in self.unfolded_outgoing(from_group, deps)? {
            for tx in &block.transactions {
                spent.extend(tx.spent_refs());
            }
        }
        Ok(spent)
    }

    /// `checkFlowTxs`: no input of `block` is spent by any other block
    /// reachable through its deps.
    pub fn check_flow_txs(&self, block: &Block) -> Result<bool, FlowErr> {
        let chain_index = block
            .header
            .chain_index(self.config.groups());
        let spent = self.flow_spent_set(chain_index.from, &block.header.deps)?;
        for tx in &block.transactions {
            for r in tx.spent_refs() {
                if spent.contains(&r) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// The flow rule: every tip referenced by the deps vector, directly or
    /// through a dependency's own header, must agree on a single ancestry
    /// per chain, with the new block's own slots the most recent.
    fn check_flow_deps(&self, header: &BlockHeader) -> Result<bool, FlowErr> {
        let groups = self.config.groups();
        let chain_index = header.chain_index(groups);
        let from = chain_index.from;

        let mut primary: HashMap<ChainIndex, Hash256> = HashMap::new();
        for (chain, hash) in header.deps.slots(from, groups) {
            primary.insert(chain, self.resolve_or_genesis(chain, &hash));
        }

        let mut claims: HashMap<ChainIndex, Vec<Hash256>> = HashMap::new();
        for (chain, hash) in header.deps.slots(from, groups) {
            let hash = self.resolve_or_genesis(chain, &hash);
            let dep_header = self.get_header(&hash)?;
            if dep_header.is_genesis(groups) {
                continue;
            }
            for (claim_chain, claim) in dep_header.deps.slots(chain.from, groups) {
                let claim = self.resolve_or_genesis(claim_chain, &claim);
                claims.entry(claim_chain).or_default().push(claim);
            }
        }

        for (chain, claimed) in claims {
            let tree = self.tree(chain).read();
            if let Some(primary_tip) = primary.get(&chain) {
                for claim in claimed {
                    if claim != *primary_tip && !tree.is_before(&claim, primary_tip)? {
                        return Ok(false);
                    }
                }
            } else {
                for (i, a) in claimed.iter().enumerate() {
                    for b in &claimed[i + 1..] {
                        if a != b && !tree.is_before(a, b)? && !tree.is_before(b, a)? {
                            return Ok(false);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    /// Missing dependencies of a header, if any.
    fn missing_deps(&self, header: &BlockHeader) -> Vec<Hash256> {
        let groups = self.config.groups();
        let chain_index = header.chain_index(groups);
        header
            .deps
            .slots(chain_index.from, groups)
            .filter(|(chain, hash)| {
                !hash.is_zero() && !self.tree(*chain).read().contains(hash)
            })
            .map(|(_, hash)| hash)
            .collect()
    }

    /// Mining target a block extending `parent` must declare, per the
    /// difficulty window of its chain.
    pub fn expected_target(
        &self,
        chain_index: ChainIndex,
        parent: &Hash256,
    ) -> Result<Target, FlowErr> {
        let tree = self.tree(chain_index).read();
        let parent_header = tree.get_header(parent)?;
        let parent_target = parent_header
            .target()
            .ok_or(FlowErr::Chain(ChainErr::Corruption(
                "unparseable parent target".to_owned(),
            )))?;

        let parent_height = tree.get_height(parent)?;
        let window = POW_AVERAGING_WINDOW;
        if parent_height < window + 1 {
            return Ok(parent_target);
        }

        let mut ancestor = *parent;
        for _ in 0..window + 1 {
            ancestor = tree.get_parent(&ancestor)?;
        }
        let span = tree
            .get_timestamp(parent)?
            .saturating_sub(tree.get_timestamp(&ancestor)?);
        Ok(next_target(parent_target, span))
    }

    /// Process one block to completion: validate, commit, update the tip,
    /// publish events, and retry any parked blocks it unblocks. Idempotent;
    /// replaying a known block reports [`AddBlockResult::Duplicate`].
    pub fn add_and_update_view(&self, mut block: Block, now_ms: u64) -> Result<AddBlockResult, FlowErr> {
        if block.header.hash().is_none() {
            block.header.compute_hash(&self.config.header_key());
        }
        let hash = *block.header.hash().expect("hash just computed");
        let groups = self.config.groups();
        if block.header.deps.len() != crate::primitives::BlockDeps::expected_len(groups) {
            return Err(FlowErr::Invalid(InvalidBlock::InvalidDeps));
        }
        let chain_index = block.header.chain_index(groups);

        if !chain_index.is_valid(groups) || !self.config.contains_chain(chain_index) {
            return Err(FlowErr::Invalid(InvalidBlock::InvalidGroup));
        }
        if self.tree(chain_index).read().contains(&hash) {
            return Ok(AddBlockResult::Duplicate);
        }

        // Tier three: park until the deps arrive.
        let missing = self.missing_deps(&block.header);
        if !missing.is_empty() {
            self.parked.insert(hash, block);
            return Ok(AddBlockResult::Parked { missing });
        }

        let parent = self.resolve_or_genesis(
            chain_index,
            &block.header.deps.parent(chain_index.to, groups),
        );

        // Header validation against its chain context.
        let expected_target = self.expected_target(chain_index, &parent)?;
        let parent_ts = self.tree(chain_index).read().get_timestamp(&parent)?;
        validation::check_header(&block.header, expected_target, parent_ts, now_ms)
            .map_err(FlowErr::Invalid)?;

        if !self.check_flow_deps(&block.header)? {
            return Err(FlowErr::Invalid(InvalidBlock::InvalidFlowTxs));
        }

        // Full body validation against the dependent group view.
        let parent_height = self.tree(chain_index).read().get_height(&parent)?;
        let mut view = self.get_mutable_group_view(chain_index.from, &block.header.deps)?;
        let flow_spent = self.flow_spent_set(chain_index.from, &block.header.deps)?;
        validation::check_block(
            &block,
            chain_index,
            &self.config,
            &mut view,
            &flow_spent,
            parent_height + 1,
        )
        .map_err(FlowErr::Invalid)?;

        // The committed root must match the header's claim.
        let mut batch = crate::chain::backend::WriteBatch::new();
        let root = view.commit(&mut batch)?;
        if root != block.header.dep_state_hash {
            return Err(FlowErr::Invalid(InvalidBlock::InvalidDepStateHash));
        }

        let weight = block
            .header
            .target()
            .expect("target validated")
            .work();
        let tip = self
            .tree(chain_index)
            .write()
            .add_with_batch(&block, &parent, weight, batch)?;

        self.cache.put_block(chain_index, block.clone());
        self.cache.put_header(block.header.clone());
        if let Ok(state) = self.tree(chain_index).read().get_state(&hash) {
            self.cache.put_state(hash, state);
        }
        info!(
            "chain ({}, {}) accepted block {} at tip weight {:?}",
            chain_index.from,
            chain_index.to,
            hash.to_hex(),
            self.tree(chain_index).read().max_chain_weight()
        );

        if tip.tip_changed {
            self.events.publish(ChainEvent::NewTip {
                chain_index,
                hash: tip.tip,
                weight: self.tree(chain_index).read().max_chain_weight(),
            });
        }
        if let Some(reorg) = &tip.reorg {
            self.events.publish(ChainEvent::Reorg {
                chain_index,
                removed: reorg.removed.clone(),
                added: reorg.added.clone(),
            });
        }
        self.events.publish(ChainEvent::BroadcastBlock {
            block,
            origin: BlockOrigin::Relayed,
        });

        self.retry_parked(now_ms);
        Ok(AddBlockResult::Added {
            chain_index,
            hash,
            tip,
        })
    }

    /// Re-run parked blocks whose dependencies may have arrived.
    fn retry_parked(&self, now_ms: u64) {
        let candidates: Vec<(Hash256, Block)> = self
            .parked
            .iter()
            .filter(|entry| self.missing_deps(&entry.value().header).is_empty())
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (hash, block) in candidates {
            self.parked.remove(&hash);
            match self.add_and_update_view(block, now_ms) {
                Ok(_) => {}
                Err(err) => warn!("parked block {} rejected: {err}", hash.to_hex()),
            }
        }
    }

    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }
}

#[derive(Debug)]
pub enum FlowErr {
    Chain(ChainErr),
    State(StateErr),
    Invalid(InvalidBlock),
}

impl fmt::Display for FlowErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowErr::Chain(err) => write!(f, "chain: {err}"),
            FlowErr::State(err) => write!(f, "state: {err}"),
            FlowErr::Invalid(err) => write!(f, "invalid block: {err:?}"),
        }
    }
}

impl From<ChainErr> for FlowErr {
    fn from(other: ChainErr) -> Self {
        Self::Chain(other)
    }
}

impl From<StateErr> for FlowErr {
    fn from(other: StateErr) -> Self {
        Self::State(other)
    }
}
