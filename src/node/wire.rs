// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::WIRE_VERSION;
use crate::primitives::{Block, BlockHash, ChainIndex, Hash256, Transaction};
use bincode::{Decode, Encode};
use std::fmt;

/// Handshake payload: who the peer is and which slice of the grid it
/// serves.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct HelloInfo {
    pub clique_id: Hash256,
    pub broker_num: u16,
    pub broker_id: u16,
}

/// Messages exchanged with network peers. The TCP transport itself lives in
/// the network collaborator; this codec is byte-exact and must round-trip.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum Message {
    Hello(HelloInfo),
    Ping {
        request_id: u64,
        timestamp: u64,
    },
    Pong {
        request_id: u64,
        timestamp: u64,
    },
    NewBlock(Block),
    NewBlockHash(BlockHash),
    GetBlocks {
        chain_index: ChainIndex,
        locators: Vec<BlockHash>,
    },
    Blocks(Vec<Block>),
    NewTxHashes(Vec<Hash256>),
    GetTxs(Vec<Hash256>),
    Txs(Vec<Transaction>),
}

impl Message {
    /// Length-prefixed frame: `u32` payload length, `u32` wire version,
    /// then the canonical message encoding.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireErr> {
        let payload = crate::codec::encode_to_vec(self).map_err(|err| WireErr::Codec(err.to_string()))?;
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&WIRE_VERSION.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode one frame. A wrong wire version in `Hello` is the peer's
    /// misbehavior; anywhere else it is a plain decode failure.
    pub fn from_frame(frame: &[u8]) -> Result<Message, WireErr> {
        if frame.len() < 8 {
            return Err(WireErr::Truncated);
        }
        let len = u32::from_le_bytes(frame[..4].try_into().expect("4 bytes")) as usize;
        let version = u32::from_le_bytes(frame[4..8].try_into().expect("4 bytes"));
        if frame.len() != 8 + len {
            return Err(WireErr::Truncated);
        }

        let message: Message = crate::codec::decode(&frame[8..])
            .map_err(|err| WireErr::Codec(err.to_string()))?;
        if version != WIRE_VERSION {
            return match message {
                Message::Hello(_) => Err(WireErr::WrongVersion(version)),
                _ => Err(WireErr::Codec(format!("unexpected wire version {version}"))),
            };
        }
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireErr {
    Truncated,
    WrongVersion(u32),
    Codec(String),
}

impl fmt::Display for WireErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireErr::Truncated => write!(f, "truncated frame"),
            WireErr::WrongVersion(v) => write!(f, "wrong wire version {v}"),
            WireErr::Codec(err) => write!(f, "codec: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tree::tests::test_block;

    fn roundtrip(message: Message) {
        let frame = message.to_frame().unwrap();
        let decoded = Message::from_frame(&frame).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn every_message_kind_roundtrips() {
        roundtrip(Message::Hello(HelloInfo {
            clique_id: Hash256::hash_from_slice("clique", "test"),
            broker_num: 2,
            broker_id: 1,
        }));
        roundtrip(Message::Ping {
            request_id: 7,
            timestamp: 1_000,
        });
        roundtrip(Message::Pong {
            request_id: 7,
            timestamp: 1_001,
        });
        roundtrip(Message::NewBlock(test_block(Hash256::zero(), 1, 500)));
        roundtrip(Message::NewBlockHash(Hash256::hash_from_slice("b", "test")));
        roundtrip(Message::GetBlocks {
            chain_index: ChainIndex::new(1, 0),
            locators: vec![Hash256::hash_from_slice("l", "test")],
        });
        roundtrip(Message::Blocks(vec![test_block(Hash256::zero(), 2, 600)]));
        roundtrip(Message::NewTxHashes(vec![Hash256::hash_from_slice(
            "t", "test",
        )]));
        roundtrip(Message::GetTxs(vec![Hash256::hash_from_slice("t", "test")]));
        roundtrip(Message::Txs(vec![]));
    }

    #[test]
    fn frame_is_length_prefixed() {
        let frame = Message::Ping {
            request_id: 1,
            timestamp: 2,
        }
        .to_frame()
        .unwrap();
        let len = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(frame.len(), 8 + len);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let frame = Message::Ping {
            request_id: 1,
            timestamp: 2,
        }
        .to_frame()
        .unwrap();
        assert_eq!(
            Message::from_frame(&frame[..frame.len() - 1]),
            Err(WireErr::Truncated)
        );
        assert_eq!(Message::from_frame(&[0, 0]), Err(WireErr::Truncated));
    }

    #[test]
    fn wrong_version_in_hello_is_misbehavior() {
        let mut frame = Message::Hello(HelloInfo {
            clique_id: Hash256::zero(),
            broker_num: 1,
            broker_id: 0,
        })
        .to_frame()
        .unwrap();
        frame[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(Message::from_frame(&frame), Err(WireErr::WrongVersion(99)));
    }
}
