// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{KvStore, KvStoreErr};
use crate::primitives::{
    AssetOutput, AssetOutputRef, ContractId, ContractOutput, ContractOutputRef, Hash256,
};
use crate::vm::{Contract, Val};
use bincode::{Decode, Encode};
use std::fmt;

mod cached;
mod trie;

pub use cached::WorldStateCached;
pub use trie::{Trie, TrieNode};

/// Live state of a deployed contract.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct ContractState {
    /// Mutable field vector, indexed by the contract's load/store
    /// instructions.
    pub fields: Vec<Val>,

    /// Hash of the immutable contract code.
    pub code_hash: Hash256,

    /// The contract's current asset output.
    pub asset_output_ref: ContractOutputRef,
}

/// Key tags for the single authenticated map backing the world-state.
const KEY_ASSET: u8 = 0x00;
const KEY_CONTRACT: u8 = 0x01;
const KEY_CONTRACT_OUTPUT: u8 = 0x02;
const KEY_CODE: u8 = 0x03;

pub(crate) fn asset_key(r: &AssetOutputRef) -> Vec<u8> {
    let mut out = vec![KEY_ASSET];
    out.extend(crate::codec::encode_to_vec(r).unwrap());
    out
}

pub(crate) fn contract_key(id: &ContractId) -> Vec<u8> {
    let mut out = vec![KEY_CONTRACT];
    out.extend_from_slice(id.as_bytes());
    out
}

pub(crate) fn contract_output_key(r: &ContractOutputRef) -> Vec<u8> {
    let mut out = vec![KEY_CONTRACT_OUTPUT];
    out.extend(crate::codec::encode_to_vec(r).unwrap());
    out
}

pub(crate) fn code_key(code_hash: &Hash256) -> Vec<u8> {
    let mut out = vec![KEY_CODE];
    out.extend_from_slice(code_hash.as_bytes());
    out
}

/// Read view of the ledger at a fixed state root: the UTXO set, contract
/// states and contract outputs behind `dep_state_hash`.
#[derive(Clone)]
pub struct WorldState<S: KvStore> {
    store: S,
    root: Hash256,
}

impl<S: KvStore> WorldState<S> {
    pub fn new(store: S, root: Hash256) -> Self {
        Self { store, root }
    }

    #[must_use]
    pub fn root(&self) -> Hash256 {
        self.root
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateErr> {
        let trie = Trie::new(&self.store);
        trie.get(&self.root, key)
    }

    fn get_decoded<V: bincode::Decode>(&self, key: &[u8]) -> Result<Option<V>, StateErr> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(
                crate::codec::decode(&bytes).map_err(|err| StateErr::Corruption(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn get_asset(&self, r: &AssetOutputRef) -> Result<Option<AssetOutput>, StateErr> {
        self.get_decoded(&asset_key(r))
    }

    pub fn get_contract(&self, id: &ContractId) -> Result<Option<ContractState>, StateErr> {
        self.get_decoded(&contract_key(id))
    }

    pub fn get_contract_output(
        &self,
        r: &ContractOutputRef,
    ) -> Result<Option<ContractOutput>, StateErr> {
        self.get_decoded(&contract_output_key(r))
    }

    pub fn get_code(&self, code_hash: &Hash256) -> Result<Option<Contract>, StateErr> {
        self.get_decoded(&code_key(code_hash))
    }

    /// Copy-on-write overlay for executing a block's transactions.
    #[must_use]
    pub fn cached(&self) -> WorldStateCached<S> {
        WorldStateCached::new(self.clone())
    }

    /// Unspent asset outputs owned by `lockup`, capped at `limit`.
    pub fn assets_of(
        &self,
        lockup: &crate::primitives::LockupScript,
        limit: usize,
    ) -> Result<Vec<(AssetOutputRef, AssetOutput)>, StateErr> {
        let trie = Trie::new(&self.store);
        let mut out: Vec<(AssetOutputRef, AssetOutput)> = vec![];
        let mut decode_failure = false;
        trie.for_each_leaf(&self.root, &mut |key, value| {
            if key.first() != Some(&KEY_ASSET) {
                return true;
            }
            let Ok(r) = crate::codec::decode::<AssetOutputRef>(&key[1..]) else {
                decode_failure = true;
                return false;
            };
            let Ok(output) = crate::codec::decode::<AssetOutput>(value) else {
                decode_failure = true;
                return false;
            };
            if &output.lockup == lockup {
                out.push((r, output));
            }
            out.len() < limit
        })?;
        if decode_failure {
            return Err(StateErr::Corruption("undecodable asset entry".to_owned()));
        }
        Ok(out)
    }
}

#[derive(Debug)]
pub enum StateErr {
    /// Storage fault underneath the trie.
    Kv(KvStoreErr),

    /// A referenced trie node is missing.
    MissingNode(Hash256),

    /// Stored bytes fail to decode.
    Corruption(String),
}

impl fmt::Display for StateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateErr::Kv(err) => write!(f, "kv: {err}"),
            StateErr::MissingNode(hash) => write!(f, "missing trie node {}", hash.to_hex()),
            StateErr::Corruption(err) => write!(f, "corruption: {err}"),
        }
    }
}

impl From<KvStoreErr> for StateErr {
    fn from(other: KvStoreErr) -> Self {
        Self::Kv(other)
    }
}
