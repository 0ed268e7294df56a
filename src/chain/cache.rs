// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::tree::BlockState;
use crate::primitives::{Block, BlockHeader, ChainIndex, Hash256};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Read-through, write-through cache of hot blocks, headers and block
/// states, keyed by block hash. Blocks are bounded per chain with
/// oldest-in-chain eviction; headers and states are bounded globally with
/// minimum-timestamp eviction. Reads share the lock, writes exclude.
pub struct FlowCache {
    blocks: RwLock<BlockCache>,
    headers: RwLock<TimestampCache<BlockHeader>>,
    states: RwLock<TimestampCache<BlockState>>,
}

struct BlockCache {
    capacity_per_chain: usize,
    by_hash: HashMap<Hash256, Block>,
    fifo: HashMap<ChainIndex, VecDeque<Hash256>>,
}

struct TimestampCache<V> {
    capacity: usize,
    entries: HashMap<Hash256, (u64, V)>,
}

impl<V> TimestampCache<V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn put(&mut self, hash: Hash256, timestamp: u64, value: V) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&hash) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (ts, _))| *ts)
                .map(|(h, _)| *h)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(hash, (timestamp, value));
    }

    fn get(&self, hash: &Hash256) -> Option<&V> {
        self.entries.get(hash).map(|(_, v)| v)
    }
}

impl FlowCache {
    #[must_use]
    pub fn new(block_capacity_per_chain: usize, header_capacity: usize, state_capacity: usize) -> Self {
        Self {
            blocks: RwLock::new(BlockCache {
                capacity_per_chain: block_capacity_per_chain,
                by_hash: HashMap::new(),
                fifo: HashMap::new(),
            }),
            headers: RwLock::new(TimestampCache::new(header_capacity)),
            states: RwLock::new(TimestampCache::new(state_capacity)),
        }
    }

    pub fn put_block(&self, chain_index: ChainIndex, block: Block) {
        let Some(hash) = block.hash().copied() else {
            return;
        };
        let mut cache = self.blocks.write();
        let capacity = cache.capacity_per_chain;
        if capacity == 0 {
            return;
        }
        if cache.by_hash.contains_key(&hash) {
            return;
        }
        let evicted = {
            let fifo = cache.fifo.entry(chain_index).or_default();
            let evicted = if fifo.len() >= capacity {
                fifo.pop_front()
            } else {
                None
            };
            fifo.push_back(hash);
            evicted
        };
        if let Some(old) = evicted {
            cache.by_hash.remove(&old);
        }
        cache.by_hash.insert(hash, block);
    }

    #[must_use]
    pub fn get_block(&self, hash: &Hash256) -> Option<Block> {
        self.blocks.read().by_hash.get(hash).cloned()
    }

    pub fn put_header(&self, header: BlockHeader) {
        let Some(hash) = header.hash().copied() else {
            return;
        };
        let timestamp = header.timestamp;
        self.headers.write().put(hash, timestamp, header);
    }

    #[must_use]
    pub fn get_header(&self, hash: &Hash256) -> Option<BlockHeader> {
        self.headers.read().get(hash).cloned()
    }

    pub fn put_state(&self, hash: Hash256, state: BlockState) {
        let timestamp = state.timestamp;
        self.states.write().put(hash, timestamp, state);
    }

    #[must_use]
    pub fn get_state(&self, hash: &Hash256) -> Option<BlockState> {
        self.states.read().get(hash).cloned()
    }

    /// Number of cached blocks across all chains.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.read().by_hash.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tree::tests::test_block;
    use crate::consensus::Weight;

    fn block(seed: u64) -> Block {
        test_block(Hash256::zero(), seed, seed * 100)
    }

    #[test]
    fn put_then_get_returns_same_block() {
        let cache = FlowCache::new(4, 4, 4);
        let b = block(1);
        let hash = *b.hash().unwrap();
        cache.put_block(ChainIndex::new(0, 0), b.clone());
        assert_eq!(cache.get_block(&hash), Some(b));
    }

    #[test]
    fn block_eviction_is_per_chain_fifo() {
        let cache = FlowCache::new(2, 8, 8);
        let blocks: Vec<Block> = (1..=3).map(block).collect();
        for b in &blocks {
            cache.put_block(ChainIndex::new(0, 0), b.clone());
        }

        // The first insert is evicted; the last two stay.
        assert_eq!(cache.get_block(blocks[0].hash().unwrap()), None);
        assert!(cache.get_block(blocks[1].hash().unwrap()).is_some());
        assert!(cache.get_block(blocks[2].hash().unwrap()).is_some());

        // Another chain has its own capacity.
        let other = block(9);
        cache.put_block(ChainIndex::new(1, 1), other.clone());
        assert!(cache.get_block(other.hash().unwrap()).is_some());
        assert_eq!(cache.block_count(), 3);
    }

    #[test]
    fn header_eviction_removes_min_timestamp() {
        let cache = FlowCache::new(2, 2, 2);
        let old = block(1).header;
        let mid = block(2).header;
        let new = block(3).header;
        cache.put_header(mid.clone());
        cache.put_header(old.clone());
        cache.put_header(new.clone());

        assert_eq!(cache.get_header(old.hash().unwrap()), None);
        assert!(cache.get_header(mid.hash().unwrap()).is_some());
        assert!(cache.get_header(new.hash().unwrap()).is_some());
    }

    #[test]
    fn state_cache_roundtrip() {
        let cache = FlowCache::new(2, 2, 2);
        let hash = Hash256::hash_from_slice("h", "test");
        let state = BlockState {
            height: 3,
            weight: Weight::from_u64(1),
            chain_weight: Weight::from_u64(6),
            timestamp: 1_000,
            is_canonical: true,
            parent: Hash256::zero(),
        };
        cache.put_state(hash, state.clone());
        assert_eq!(cache.get_state(&hash), Some(state));
    }
}
