// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Candidate-block assembly for external miners, plus a nonce-search
//! helper to drive it in tests and the built-in CPU miner.

use crate::chain::backend::{KvStore, WriteBatch};
use crate::chain::{BlockFlow, FlowErr};
use crate::consensus::{
    mining_reward, total_reward, Target, MAX_GAS_PER_BLOCK, MAX_TXS_PER_BLOCK, MINIMAL_GAS,
};
use crate::node::Mempool;
use crate::primitives::{
    Block, BlockDeps, BlockHeader, ChainIndex, Hash256, LockupScript, Transaction, U256,
};
use crate::validation;
use crate::vm::{non_coinbase_execution_order, BlockEnv};
use crossbeam_channel::{Receiver, Sender};
use log::debug;

/// Everything an external miner needs to grind a block: the fixed header
/// fields and the transaction list. Only the nonce is searched.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub chain_index: ChainIndex,
    pub deps: BlockDeps,
    pub dep_state_hash: Hash256,
    pub txs_hash: Hash256,
    pub target: Target,
    pub height: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

impl BlockTemplate {
    /// Materialize the template with the given nonce.
    #[must_use]
    pub fn into_block(&self, nonce: u64, header_key: &str) -> Block {
        let mut header = BlockHeader {
            version: 0,
            deps: self.deps.clone(),
            dep_state_hash: self.dep_state_hash,
            txs_hash: self.txs_hash,
            timestamp: self.timestamp,
            bits: self.target.to_compact(),
            nonce,
            hash: None,
        };
        header.compute_hash(header_key);
        Block::new(header, self.transactions.clone())
    }
}

/// Assemble a candidate block for `chain_index`: current best deps, mempool
/// transactions by non-increasing gas price under the block caps, a
/// deterministic coinbase, and the post-state root the block commits to.
pub fn prepare_block_flow<S: KvStore>(
    flow: &BlockFlow<S>,
    chain_index: ChainIndex,
    miner_lockup: LockupScript,
    mempool: &Mempool,
    now_ms: u64,
) -> Result<BlockTemplate, FlowErr> {
    let config = flow.config();
    let groups = config.groups();
    let deps = flow.best_deps(chain_index)?;
    let parent = deps.parent(chain_index.to, groups);
    let target = flow.expected_target(chain_index, &parent)?;
    let (parent_height, parent_ts) = flow.with_tree(chain_index, |tree| {
        Ok::<_, FlowErr>((tree.get_height(&parent)?, tree.get_timestamp(&parent)?))
    })?;
    let height = parent_height + 1;
    let timestamp = std::cmp::max(now_ms, parent_ts + 1);

    let block_env = BlockEnv {
        timestamp,
        bits: target.to_compact(),
        network_id: config.network_id(),
    };

    // First pass: pick candidates by descending gas price under the caps,
    // dropping any that fail against the group view.
    let flow_spent = flow
        .flow_spent_set(chain_index.from, &deps)
        .unwrap_or_default();
    let candidates = mempool
        .collect_desc(chain_index.from, MAX_TXS_PER_BLOCK - 1)
        .unwrap_or_default();

    let mut selected: Vec<Transaction> = vec![];
    let mut total_gas = MINIMAL_GAS;
    {
        let mut view = flow.get_mutable_group_view(chain_index.from, &deps)?;
        for tx in candidates {
            if selected.len() + 1 >= MAX_TXS_PER_BLOCK {
                break;
            }
            if total_gas + tx.unsigned.gas_amount > MAX_GAS_PER_BLOCK {
                continue;
            }
            if tx.spent_refs().any(|r| flow_spent.contains(&r)) {
                continue;
            }
            match validation::check_tx(&tx, chain_index, config, &mut view, &block_env) {
                Ok(_) => {
                    total_gas += tx.unsigned.gas_amount;
                    selected.push(tx);
                }
                Err(err) => {
                    debug!("template drops tx: {err:?}");
                    // The failed run may have dirtied the view; rebuild it
                    // and replay the accepted set.
                    view = flow.get_mutable_group_view(chain_index.from, &deps)?;
                    for kept in &selected {
                        validation::check_tx(kept, chain_index, config, &mut view, &block_env)
                            .map_err(|_| {
                                FlowErr::Chain(crate::chain::tree::ChainErr::Invariant(
                                    "replay of accepted tx failed",
                                ))
                            })?;
                    }
                }
            }
        }
    }

    // Second pass: execute the final set in the committed execution order
    // until it runs clean, so the post-state root matches what validation
    // will recompute.
    loop {
        let gas_fee: U256 = selected
            .iter()
            .fold(U256::zero(), |acc, tx| acc.wrapping_add(tx.gas_fee()));
        let coinbase = Transaction::coinbase(
            chain_index,
            miner_lockup,
            total_reward(gas_fee, mining_reward(height)),
            timestamp,
            config.network_id(),
        );

        let mut transactions = selected.clone();
        transactions.push(coinbase);
        let tx_hashes: Vec<Hash256> = transactions
            .iter()
            .map(|tx| *tx.hash().expect("tx hash computed"))
            .collect();
        let txs_hash =
            crate::primitives::txs_merkle_root(&tx_hashes, config.get_chain_key(chain_index));

        let probe = BlockHeader {
            version: 0,
            deps: deps.clone(),
            dep_state_hash: Hash256::zero(),
            txs_hash,
            timestamp,
            bits: target.to_compact(),
            nonce: 0,
            hash: None,
        };
        let order = non_coinbase_execution_order(&probe.exec_seed(), selected.len());

        let mut view = flow.get_mutable_group_view(chain_index.from, &deps)?;
        let mut failed: Option<usize> = None;
        for idx in &order {
            let tx = &selected[*idx];
            if validation::check_tx(tx, chain_index, config, &mut view, &block_env).is_err() {
                failed = Some(*idx);
                break;
            }
        }

        if let Some(idx) = failed {
            debug!("template drops order-dependent tx at index {idx}");
            selected.remove(idx);
            continue;
        }

        let coinbase = transactions.last().expect("coinbase appended");
        validation::apply_outputs(coinbase, chain_index, config, &mut view).map_err(|_| {
            FlowErr::Chain(crate::chain::tree::ChainErr::Invariant(
                "coinbase outputs failed to apply",
            ))
        })?;

        let mut scratch = WriteBatch::new();
        let dep_state_hash = view.commit(&mut scratch)?;
        drop(scratch);

        return Ok(BlockTemplate {
            chain_index,
            deps,
            dep_state_hash,
            txs_hash,
            target,
            height,
            timestamp,
            transactions,
        });
    }
}

/// Grind the template's nonce until the header hash lands in the wanted
/// chain and satisfies the target. Returns `None` when `max_iterations`
/// runs out.
#[must_use]
pub fn solve_template(
    template: &BlockTemplate,
    header_key: &str,
    groups: u16,
    max_iterations: u64,
) -> Option<Block> {
    for nonce in 0..max_iterations {
        let block = template.into_block(nonce, header_key);
        let hash = block.hash().expect("hash computed");
        if ChainIndex::from_hash(hash, groups) == template.chain_index
            && template.target.meets(hash)
        {
            return Some(block);
        }
    }
    None
}

/// Background nonce search over a channel of templates. Solved blocks are
/// sent back on the returned receiver; the worker stops when the template
/// sender disconnects.
pub fn spawn_solver(
    header_key: String,
    groups: u16,
    templates: Receiver<BlockTemplate>,
) -> (Receiver<Block>, std::thread::JoinHandle<()>) {
    let (block_tx, block_rx): (Sender<Block>, Receiver<Block>) = crossbeam_channel::unbounded();
    let handle = std::thread::spawn(move || {
        while let Ok(template) = templates.recv() {
            if let Some(block) = solve_template(&template, &header_key, groups, u64::MAX) {
                if block_tx.send(block).is_err() {
                    return;
                }
            }
        }
    });
    (block_rx, handle)
}
