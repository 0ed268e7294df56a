// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{BlockHeader, ChainIndex};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::collections::HashMap;
use triomphe::Arc;

type GenesisCache = RwLock<HashMap<(String, ChainIndex), Arc<BlockHeader>>>;

lazy_static! {
    /// Genesis headers are ground per chain index; cache them per network.
    static ref GENESIS_CACHE: GenesisCache = RwLock::new(HashMap::new());
}

/// Genesis header of a chain, computed once per network and chain index.
pub fn get_cached_genesis(
    chain_index: ChainIndex,
    groups: u16,
    header_key: &str,
) -> Arc<BlockHeader> {
    let cache_key = (header_key.to_owned(), chain_index);
    if let Some(header) = GENESIS_CACHE.read().get(&cache_key) {
        return header.clone();
    }

    let header = Arc::new(BlockHeader::genesis(chain_index, groups, header_key));
    let mut cache = GENESIS_CACHE.write();
    cache.entry(cache_key).or_insert_with(|| header.clone());
    cache
        .get(&(header_key.to_owned(), chain_index))
        .expect("just inserted")
        .clone()
}
