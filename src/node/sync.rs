// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::KvStore;
use crate::chain::{AddBlockResult, FlowErr};
use crate::node::{
    ChainEvent, Command, CommandResponse, Message, MisbehaviorKind, Node, NodeErr,
};
use crate::primitives::Hash256;
use log::debug;

/// Outcome of handling one peer message: an optional reply for the same
/// peer. Misbehavior is published on the event bus.
pub type SyncReply = Option<Message>;

/// The sync/relay half of the port: map incoming wire messages onto core
/// commands and produce the protocol replies. Connection management and
/// handshakes stay with the network collaborator.
pub fn handle_peer_message<S: KvStore>(
    node: &Node<S>,
    peer: &str,
    message: Message,
    now_ms: u64,
) -> Result<SyncReply, NodeErr> {
    match message {
        // The collaborator negotiates handshakes; a Hello reaching the core
        // is just acknowledged.
        Message::Hello(_) => Ok(None),

        Message::Ping {
            request_id,
            timestamp,
        } => Ok(Some(Message::Pong {
            request_id,
            timestamp,
        })),
        Message::Pong { .. } => Ok(None),

        Message::NewBlock(block) => {
            match node.handle_command(Command::AddBlock(block), now_ms) {
                Ok(CommandResponse::BlockAdded(AddBlockResult::Parked { missing })) => {
                    // Tier three: ask the peer for the chain holding the
                    // first missing dep, anchored at our canonical tip.
                    let chain_index = crate::primitives::ChainIndex::from_hash(
                        &missing[0],
                        node.flow().config().groups(),
                    );
                    let locators = node
                        .flow()
                        .with_tree(chain_index, |tree| vec![tree.get_best_tip_unsafe()]);
                    Ok(Some(Message::GetBlocks {
                        chain_index,
                        locators,
                    }))
                }
                Ok(_) => Ok(None),
                // Tier two: the block is rejected and the peer penalized.
                // Storage faults are tier one and escalate instead.
                Err(NodeErr::Flow(FlowErr::Invalid(err))) => {
                    debug!("peer {peer} sent invalid block: {err:?}");
                    node.events().publish(ChainEvent::PeerMisbehavior {
                        kind: MisbehaviorKind::InvalidBlock,
                        address: peer.to_owned(),
                    });
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        }

        Message::NewBlockHash(hash) => {
            if node.flow().contains_block(&hash) {
                Ok(None)
            } else {
                let chain_index =
                    crate::primitives::ChainIndex::from_hash(&hash, node.flow().config().groups());
                Ok(Some(Message::GetBlocks {
                    chain_index,
                    locators: node
                        .flow()
                        .with_tree(chain_index, |tree| {
                            vec![tree.get_best_tip_unsafe()]
                        }),
                }))
            }
        }

        Message::GetBlocks {
            chain_index,
            locators,
        } => {
            if !chain_index.is_valid(node.flow().config().groups()) {
                node.events().publish(ChainEvent::PeerMisbehavior {
                    kind: MisbehaviorKind::Spam,
                    address: peer.to_owned(),
                });
                return Ok(None);
            }
            let hashes = node
                .flow()
                .with_tree(chain_index, |tree| tree.get_sync_data(&locators))
                .unwrap_or_default();
            let mut blocks = Vec::with_capacity(hashes.len());
            for hash in hashes {
                match node.flow().get_block(&hash) {
                    Ok(block) => blocks.push(block),
                    Err(err) => {
                        debug!("sync data fetch failed for {}: {err}", hash.to_hex());
                        break;
                    }
                }
            }
            Ok(Some(Message::Blocks(blocks)))
        }

        Message::Blocks(blocks) => {
            // A short batch means the peer has nothing more for us.
            if blocks.len() < crate::consensus::MAX_SYNC_HASHES {
                node.events().publish(ChainEvent::SyncedStatus(true));
            }
            for block in blocks {
                match node.handle_command(Command::AddBlock(block), now_ms) {
                    Ok(_) => {}
                    Err(NodeErr::Flow(FlowErr::Invalid(err))) => {
                        debug!("peer {peer} sync block rejected: {err:?}");
                        node.events().publish(ChainEvent::PeerMisbehavior {
                            kind: MisbehaviorKind::InvalidBlock,
                            address: peer.to_owned(),
                        });
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(None)
        }

        Message::NewTxHashes(hashes) => {
            let unknown: Vec<Hash256> = {
                let mempool = node.mempool().read();
                let groups = node.flow().config().broker_groups();
                hashes
                    .into_iter()
                    .filter(|h| {
                        !groups
                            .clone()
                            .any(|g| mempool.contains(g, h).unwrap_or(false))
                    })
                    .collect()
            };
            if unknown.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Message::GetTxs(unknown)))
            }
        }

        Message::GetTxs(hashes) => {
            let mut txs = vec![];
            for group in node.flow().config().broker_groups() {
                for tx in node.relay_candidates(group) {
                    if tx.hash().map(|h| hashes.contains(h)).unwrap_or(false) {
                        txs.push(tx);
                    }
                }
            }
            Ok(Some(Message::Txs(txs)))
        }

        Message::Txs(txs) => {
            for tx in txs {
                match node.handle_command(Command::AddTx(tx), now_ms) {
                    Ok(_) => {}
                    Err(NodeErr::Mempool(err)) => {
                        debug!("peer {peer} tx dropped: {err}");
                    }
                    Err(NodeErr::UnroutableTx) => {
                        node.events().publish(ChainEvent::PeerMisbehavior {
                            kind: MisbehaviorKind::InvalidTx,
                            address: peer.to_owned(),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(None)
        }
    }
}
