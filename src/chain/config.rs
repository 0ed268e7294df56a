// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::GROUPS;
use crate::primitives::ChainIndex;
use std::collections::HashMap;
use std::ops::Range;

/// Node-wide chain configuration: the grid dimensions, this broker's slice
/// of it, and the per-chain hashing keys.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    network_name: String,
    network_id: u8,
    groups: u16,
    broker_num: u16,
    broker_id: u16,
    chain_keys: HashMap<ChainIndex, String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new("testnet", 0, GROUPS, 1, 0)
    }
}

impl ChainConfig {
    pub fn new(
        network_name: &str,
        network_id: u8,
        groups: u16,
        broker_num: u16,
        broker_id: u16,
    ) -> Self {
        assert!(groups > 0, "need at least one group");
        assert!(broker_num > 0, "need at least one broker");
        assert!(groups % broker_num == 0, "brokers must partition groups");
        assert!(broker_id < broker_num, "broker id out of range");

        let mut chain_keys = HashMap::with_capacity(usize::from(groups) * usize::from(groups));
        for index in ChainIndex::all(groups) {
            chain_keys.insert(
                index,
                format!("{network_name}.chain.{}.{}", index.from, index.to),
            );
        }

        Self {
            network_name: network_name.to_owned(),
            network_id,
            groups,
            broker_num,
            broker_id,
            chain_keys,
        }
    }

    /// Configuration from the loaded settings file.
    #[must_use]
    pub fn from_settings() -> Self {
        let s = &crate::settings::SETTINGS.node;
        Self::new(
            &s.network_name,
            s.network_id,
            s.groups,
            s.broker_num,
            s.broker_id,
        )
    }

    #[must_use]
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    #[must_use]
    pub fn network_id(&self) -> u8 {
        self.network_id
    }

    #[must_use]
    pub fn groups(&self) -> u16 {
        self.groups
    }

    #[must_use]
    pub fn broker_num(&self) -> u16 {
        self.broker_num
    }

    #[must_use]
    pub fn broker_id(&self) -> u16 {
        self.broker_id
    }

    /// Hashing key of the given chain.
    pub fn get_chain_key(&self, index: ChainIndex) -> &str {
        self.chain_keys.get(&index).expect("chain index in grid")
    }

    /// Network-level header hashing key. Headers cannot be keyed per chain:
    /// the chain index is derived from the header hash.
    #[must_use]
    pub fn header_key(&self) -> String {
        format!("{}.header", self.network_name)
    }

    /// Contiguous range of from-groups this broker is responsible for.
    #[must_use]
    pub fn broker_groups(&self) -> Range<u16> {
        let span = self.groups / self.broker_num;
        let start = self.broker_id * span;
        start..start + span
    }

    /// Whether the chain's from-group belongs to this broker.
    #[must_use]
    pub fn contains_chain(&self, index: ChainIndex) -> bool {
        self.broker_groups().contains(&index.from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_groups_partition_the_grid() {
        let a = ChainConfig::new("testnet", 0, 4, 2, 0);
        let b = ChainConfig::new("testnet", 0, 4, 2, 1);
        assert_eq!(a.broker_groups(), 0..2);
        assert_eq!(b.broker_groups(), 2..4);
        assert!(a.contains_chain(ChainIndex::new(1, 3)));
        assert!(!a.contains_chain(ChainIndex::new(2, 0)));
        assert!(b.contains_chain(ChainIndex::new(2, 0)));
    }

    #[test]
    fn chain_keys_are_distinct() {
        let config = ChainConfig::new("testnet", 0, 3, 1, 0);
        let mut keys: Vec<&str> = ChainIndex::all(3)
            .map(|i| config.get_chain_key(i))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 9);
    }

    #[test]
    #[should_panic(expected = "brokers must partition groups")]
    fn brokers_must_divide_groups() {
        let _ = ChainConfig::new("testnet", 0, 4, 3, 0);
    }
}
