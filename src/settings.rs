// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::GROUPS;
use config::{Config, ConfigError, File};
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use std::fs::{metadata, File as FsFile};
use std::io::Write;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap_or_default();
}

/// Node settings loaded from `config.toml` with `LATTICECOIN_*` environment
/// overrides. Consensus parameters are protocol constants and live in the
/// consensus module; everything here is node-local tuning.
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Node identity and grid slice.
    pub node: Node,

    /// Mempool bounds.
    pub mempool: MempoolSettings,

    /// Flow cache capacities.
    pub cache: CacheSettings,

    /// Limits handed to the network collaborator.
    pub network: NetworkSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Node {
    pub network_name: String,
    pub network_id: u8,
    pub data_dir: String,
    pub groups: u16,
    pub broker_num: u16,
    pub broker_id: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct MempoolSettings {
    pub shared_capacity: usize,
    pub pending_capacity: usize,
    pub clean_after_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct CacheSettings {
    pub block_capacity_per_chain: usize,
    pub header_capacity: usize,
    pub state_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct NetworkSettings {
    pub max_outbound_connections_per_group: u16,
    pub max_inbound_connections_per_group: u16,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            network_name: "testnet".to_owned(),
            network_id: 0,
            data_dir: ".latticecoin".to_owned(),
            groups: GROUPS,
            broker_num: 1,
            broker_id: 0,
        }
    }
}

impl Default for MempoolSettings {
    fn default() -> Self {
        Self {
            shared_capacity: 8_192,
            pending_capacity: 2_048,
            clean_after_ms: 30 * 60 * 1_000,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            block_capacity_per_chain: 128,
            header_capacity: 4_096,
            state_capacity: 1_024,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_outbound_connections_per_group: 8,
            max_inbound_connections_per_group: 32,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node: Node::default(),
            mempool: MempoolSettings::default(),
            cache: CacheSettings::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut config_path = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        config_path.push("Latticecoin");
        config_path.push("config.toml");
        let defaults = Settings::default();

        // Write the default configuration on first run; a failure falls
        // back to environment variables.
        if metadata(&config_path).is_err() {
            if let Some(parent) = config_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let settings_str = toml::to_string_pretty(&defaults).unwrap();
            match FsFile::create(&config_path) {
                Ok(mut file) => {
                    file.write_all(settings_str.as_bytes()).unwrap_or(());
                }
                Err(err) => {
                    error!("Failed to create configuration! Reason: {err:#?}");
                }
            }
        }

        let mut s = Config::builder().add_source(
            File::with_name(&config_path.to_string_lossy()).required(false),
        );

        s = s
            .set_default("node.network_name", defaults.node.network_name.as_str())?
            .set_default("node.network_id", i64::from(defaults.node.network_id))?
            .set_default("node.data_dir", defaults.node.data_dir.as_str())?
            .set_default("node.groups", i64::from(defaults.node.groups))?
            .set_default("node.broker_num", i64::from(defaults.node.broker_num))?
            .set_default("node.broker_id", i64::from(defaults.node.broker_id))?
            .set_default(
                "mempool.shared_capacity",
                defaults.mempool.shared_capacity as i64,
            )?
            .set_default(
                "mempool.pending_capacity",
                defaults.mempool.pending_capacity as i64,
            )?
            .set_default(
                "mempool.clean_after_ms",
                defaults.mempool.clean_after_ms as i64,
            )?
            .set_default(
                "cache.block_capacity_per_chain",
                defaults.cache.block_capacity_per_chain as i64,
            )?
            .set_default(
                "cache.header_capacity",
                defaults.cache.header_capacity as i64,
            )?
            .set_default(
                "cache.state_capacity",
                defaults.cache.state_capacity as i64,
            )?
            .set_default(
                "network.max_outbound_connections_per_group",
                i64::from(defaults.network.max_outbound_connections_per_group),
            )?
            .set_default(
                "network.max_inbound_connections_per_group",
                i64::from(defaults.network.max_inbound_connections_per_group),
            )?;

        // LATTICECOIN_NODE_GROUPS=8 style overrides.
        s = s.add_source(
            config::Environment::with_prefix("latticecoin")
                .separator("_")
                .try_parsing(true),
        );

        s.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let settings = Settings::default();
        assert_eq!(settings.node.groups, GROUPS);
        assert!(settings.node.broker_id < settings.node.broker_num);
        assert!(settings.mempool.shared_capacity > 0);
        assert!(settings.cache.header_capacity > 0);
    }

    #[test]
    fn defaults_serialize_to_toml() {
        let settings = Settings::default();
        let rendered = toml::to_string_pretty(&settings).unwrap();
        assert!(rendered.contains("network_name"));
        assert!(rendered.contains("max_outbound_connections_per_group"));
    }
}
