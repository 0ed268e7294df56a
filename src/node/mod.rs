// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! The node context: the block-flow, mempool and event bus wired together
//! behind the typed command surface the collaborators drive.

use crate::chain::backend::KvStore;
use crate::chain::{AddBlockResult, BlockFlow, ChainConfig, FlowCache, FlowErr};
use crate::consensus::MAX_TXS_PER_BLOCK;
use crate::miner::{prepare_block_flow, BlockTemplate};
use crate::primitives::{
    AssetOutput, AssetOutputRef, Block, ChainIndex, Hash256, LockupScript, Transaction, U256,
};
use crate::state::WorldState;
use log::warn;
use parking_lot::RwLock;
use triomphe::Arc;

mod events;
mod mempool;
mod sync;
mod wire;

pub use events::*;
pub use mempool::*;
pub use sync::*;
pub use wire::*;

/// Commands the core consumes from its collaborators.
#[derive(Clone, Debug)]
pub enum Command {
    AddBlock(Block),
    AddTx(Transaction),
    GetTemplate {
        chain_index: ChainIndex,
        miner_lockup: LockupScript,
    },
    GetBalance {
        lockup: LockupScript,
        utxos_limit: usize,
    },
    GetTxStatus {
        tx_id: Hash256,
        chain_index: ChainIndex,
    },
}

/// Typed responses to [`Command`]s.
#[derive(Debug)]
pub enum CommandResponse {
    BlockAdded(AddBlockResult),
    TxAdded,
    Template(Box<BlockTemplate>),
    Balance {
        total: U256,
        utxos: Vec<(AssetOutputRef, AssetOutput)>,
    },
    TxStatus(TxStatus),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TxStatus {
    Confirmed {
        block_hash: Hash256,
        height: u64,
    },
    MemPooled,
    NotFound,
}

#[derive(Debug)]
pub enum NodeErr {
    Flow(FlowErr),
    Mempool(MempoolErr),
    UnroutableTx,
}

impl From<FlowErr> for NodeErr {
    fn from(other: FlowErr) -> Self {
        Self::Flow(other)
    }
}

impl From<MempoolErr> for NodeErr {
    fn from(other: MempoolErr) -> Self {
        Self::Mempool(other)
    }
}

/// The assembled core of one node.
pub struct Node<S: KvStore> {
    flow: Arc<BlockFlow<S>>,
    mempool: RwLock<Mempool>,
    events: Arc<EventBus>,
    store: S,
}

impl<S: KvStore> Node<S> {
    pub fn new(
        store: S,
        config: ChainConfig,
        cache: FlowCache,
        shared_pool_capacity: usize,
        pending_pool_capacity: usize,
    ) -> Result<Self, FlowErr> {
        let events = Arc::new(EventBus::new());
        let flow = Arc::new(BlockFlow::new(
            store.clone(),
            config,
            cache,
            events.clone(),
        )?);
        let mempool = RwLock::new(Mempool::new(
            flow.config().broker_groups(),
            shared_pool_capacity,
            pending_pool_capacity,
        ));
        Ok(Self {
            flow,
            mempool,
            events,
            store,
        })
    }

    #[must_use]
    pub fn flow(&self) -> &Arc<BlockFlow<S>> {
        &self.flow
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[must_use]
    pub fn mempool(&self) -> &RwLock<Mempool> {
        &self.mempool
    }

    /// Group a transaction is routed to: the group of its first input's
    /// owner, recovered from the output reference hint.
    fn tx_group(&self, tx: &Transaction) -> Result<u16, NodeErr> {
        let groups = self.flow.config().groups();
        tx.unsigned
            .inputs
            .first()
            .map(|i| i.output_ref.group_index(groups))
            .ok_or(NodeErr::UnroutableTx)
    }

    pub fn handle_command(&self, command: Command, now_ms: u64) -> Result<CommandResponse, NodeErr> {
        match command {
            Command::AddBlock(block) => {
                let result = self.flow.add_and_update_view(block, now_ms)?;
                if let AddBlockResult::Added {
                    chain_index, hash, ..
                } = &result
                {
                    // Confirmed transactions leave the pools.
                    let hashes: Vec<Hash256> = self
                        .flow
                        .with_tree(*chain_index, |tree| {
                            tree.get(hash).map(|b| {
                                b.transactions
                                    .iter()
                                    .filter_map(|tx| tx.hash().copied())
                                    .collect()
                            })
                        })
                        .unwrap_or_default();
                    let mut mempool = self.mempool.write();
                    if let Err(err) = mempool.remove(chain_index.from, &hashes) {
                        warn!("mempool eviction after block failed: {err}");
                    }
                }
                Ok(CommandResponse::BlockAdded(result))
            }
            Command::AddTx(tx) => {
                let group = self.tx_group(&tx)?;
                let hash = *tx.hash().ok_or(NodeErr::Mempool(MempoolErr::MissingHash))?;
                self.mempool.write().add(group, tx, now_ms)?;
                self.events.publish(ChainEvent::BroadcastTx(vec![hash]));
                Ok(CommandResponse::TxAdded)
            }
            Command::GetTemplate {
                chain_index,
                miner_lockup,
            } => {
                let mempool = self.mempool.read();
                let template =
                    prepare_block_flow(&self.flow, chain_index, miner_lockup, &mempool, now_ms)?;
                Ok(CommandResponse::Template(Box::new(template)))
            }
            Command::GetBalance {
                lockup,
                utxos_limit,
            } => {
                let group = lockup.group_index(self.flow.config().groups());
                let chain = ChainIndex::new(group, group);
                let root = self
                    .flow
                    .with_tree(chain, |tree| {
                        tree.get_header(&tree.get_best_tip_unsafe())
                            .map(|h| h.dep_state_hash)
                    })
                    .map_err(|err| NodeErr::Flow(FlowErr::Chain(err)))?;
                let world = WorldState::new(self.store.clone(), root);
                let utxos = world
                    .assets_of(&lockup, utxos_limit)
                    .map_err(|err| NodeErr::Flow(FlowErr::State(err)))?;
                let total = utxos
                    .iter()
                    .fold(U256::zero(), |acc, (_, o)| acc.wrapping_add(o.amount));
                Ok(CommandResponse::Balance { total, utxos })
            }
            Command::GetTxStatus { tx_id, chain_index } => {
                let status = self.tx_status(&tx_id, chain_index)?;
                Ok(CommandResponse::TxStatus(status))
            }
        }
    }

    fn tx_status(&self, tx_id: &Hash256, chain_index: ChainIndex) -> Result<TxStatus, NodeErr> {
        // Walk the canonical chain looking for the transaction, newest
        // blocks first.
        let found = self.flow.with_tree(chain_index, |tree| {
            let tip = tree.get_best_tip_unsafe();
            let slice = tree.get_block_hash_slice(&tip)?;
            for hash in slice.iter().rev() {
                let block = tree.get(hash)?;
                if block.transactions.iter().any(|tx| tx.hash() == Some(tx_id)) {
                    return Ok(Some(TxStatus::Confirmed {
                        block_hash: *hash,
                        height: tree.get_height(hash)?,
                    }));
                }
            }
            Ok::<_, crate::chain::tree::ChainErr>(None)
        });

        match found {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                let mempool = self.mempool.read();
                for group in self.flow.config().broker_groups() {
                    if mempool.contains(group, tx_id).unwrap_or(false) {
                        return Ok(TxStatus::MemPooled);
                    }
                }
                Ok(TxStatus::NotFound)
            }
            Err(err) => Err(NodeErr::Flow(FlowErr::Chain(err))),
        }
    }

    /// Collect up to [`MAX_TXS_PER_BLOCK`] ready transactions for relay.
    pub fn relay_candidates(&self, group: u16) -> Vec<Transaction> {
        self.mempool
            .read()
            .collect_desc(group, MAX_TXS_PER_BLOCK)
            .unwrap_or_default()
    }

    /// Periodic mempool cleaning, driven by the configured maximum age.
    pub fn clean_mempool(&self) -> Vec<Hash256> {
        let max_age = crate::settings::SETTINGS.mempool.clean_after_ms;
        self.mempool.write().clean(now_ms(), max_age)
    }
}

/// Wall-clock in millis, the timestamp domain of the whole engine.
#[must_use]
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
