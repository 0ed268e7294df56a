// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::Weight;
use crate::primitives::{Block, BlockHash, ChainIndex, Hash256};
use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;

/// Peer behaviour the core flags for the network collaborator.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MisbehaviorKind {
    WrongWireVersion,
    InvalidBlock,
    InvalidTx,
    Spam,
}

/// Where a broadcast block came from.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BlockOrigin {
    Mined,
    Relayed,
}

/// Events the core emits for its collaborators.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    NewTip {
        chain_index: ChainIndex,
        hash: BlockHash,
        weight: Weight,
    },
    Reorg {
        chain_index: ChainIndex,
        removed: Vec<BlockHash>,
        added: Vec<BlockHash>,
    },
    SyncedStatus(bool),
    PeerMisbehavior {
        kind: MisbehaviorKind,
        address: String,
    },
    BroadcastBlock {
        block: Block,
        origin: BlockOrigin,
    },
    BroadcastTx(Vec<Hash256>),
}

/// Publish/subscribe bus for [`ChainEvent`]s. Subscribers that fall behind
/// or disconnect are dropped on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<ChainEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.write().push(tx);
        rx
    }

    pub fn publish(&self, event: ChainEvent) {
        let mut dead = vec![];
        {
            let subscribers = self.subscribers.read();
            for (i, sub) in subscribers.iter().enumerate() {
                if let Err(TrySendError::Disconnected(_)) = sub.try_send(event.clone()) {
                    dead.push(i);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for i in dead.into_iter().rev() {
                if i < subscribers.len() {
                    subscribers.remove(i);
                }
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.publish(ChainEvent::SyncedStatus(true));

        for rx in [rx1, rx2] {
            match rx.try_recv().unwrap() {
                ChainEvent::SyncedStatus(true) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(ChainEvent::SyncedStatus(false));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
