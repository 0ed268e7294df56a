// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::error::EncodeError as BincodeEncodeErr;
use std::fmt;

pub mod disk;
pub mod memory;

pub use disk::DiskKv;
pub use memory::MemoryKv;

/// Storage column families. Keys are hashes; values are canonical-serialized
/// entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Block headers by hash.
    Headers,

    /// Block bodies (transaction lists) by hash.
    Bodies,

    /// Per-chain per-hash block state (height, weight, canonical flag).
    ChainState,

    /// Chain height -> ordered hash list.
    HeightIndex,

    /// World-state trie nodes by node hash.
    TrieNodes,

    /// Node-local bookkeeping (tips, anchors, sync cursors).
    NodeState,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Headers,
        Column::Bodies,
        Column::ChainState,
        Column::HeightIndex,
        Column::TrieNodes,
        Column::NodeState,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Column::Headers => "headers",
            Column::Bodies => "bodies",
            Column::ChainState => "chain_state",
            Column::HeightIndex => "height_index",
            Column::TrieNodes => "trie_nodes",
            Column::NodeState => "node_state",
        }
    }
}

/// A batch of writes committed atomically at block commit.
#[derive(Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<BatchOp>,
}

pub(crate) enum BatchOp {
    Put {
        cf: Column,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: Column,
        key: Vec<u8>,
    },
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<V: bincode::Encode>(
        &mut self,
        cf: Column,
        key: Vec<u8>,
        value: &V,
    ) -> Result<(), KvStoreErr> {
        let value = crate::codec::encode_to_vec(value)?;
        self.put_raw(cf, key, value);
        Ok(())
    }

    pub fn put_raw(&mut self, cf: Column, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { cf, key, value });
    }

    pub fn delete(&mut self, cf: Column, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { cf, key });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Interface to the underlying column-family store. Writes go through
/// [`WriteBatch`] and are crash-safe per commit.
pub trait KvStore: Clone + Send + Sync {
    fn get_raw(&self, cf: Column, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreErr>;

    fn commit(&self, batch: WriteBatch) -> Result<(), KvStoreErr>;

    fn get<V: bincode::Decode>(&self, cf: Column, key: &[u8]) -> Result<Option<V>, KvStoreErr> {
        match self.get_raw(cf, key)? {
            Some(bytes) => {
                let v = crate::codec::decode(&bytes)
                    .map_err(|err| KvStoreErr::Corruption(err.to_string()))?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    fn put<V: bincode::Encode>(&self, cf: Column, key: Vec<u8>, value: &V) -> Result<(), KvStoreErr> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key, value)?;
        self.commit(batch)
    }

    fn exists(&self, cf: Column, key: &[u8]) -> Result<bool, KvStoreErr> {
        Ok(self.get_raw(cf, key)?.is_some())
    }
}

#[derive(Debug)]
pub enum KvStoreErr {
    /// Entity expected present is missing.
    NotFound,

    /// On-disk state does not decode.
    Corruption(String),

    /// Underlying storage fault.
    Io(String),

    /// An internal consistency check failed.
    Invariant(&'static str),
}

impl fmt::Display for KvStoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvStoreErr::NotFound => write!(f, "not found"),
            KvStoreErr::Corruption(err) => write!(f, "corruption: {err}"),
            KvStoreErr::Io(err) => write!(f, "io: {err}"),
            KvStoreErr::Invariant(err) => write!(f, "invariant violated: {err}"),
        }
    }
}

impl From<BincodeEncodeErr> for KvStoreErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::Corruption(other.to_string())
    }
}
