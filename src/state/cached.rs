// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{KvStore, WriteBatch};
use crate::primitives::{
    AssetOutput, AssetOutputRef, ContractId, ContractOutput, ContractOutputRef, Hash256,
};
use crate::state::{
    asset_key, code_key, contract_key, contract_output_key, ContractState, StateErr, Trie,
    WorldState,
};
use crate::vm::Contract;
use std::collections::BTreeMap;

/// Copy-on-write overlay over a [`WorldState`]. All mutations stay in the
/// overlay until [`WorldStateCached::commit`]; dropping the overlay discards
/// them without side effect.
pub struct WorldStateCached<S: KvStore> {
    base: WorldState<S>,

    /// Staged raw mutations, keyed by trie key. `None` marks a deletion.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<S: KvStore> WorldStateCached<S> {
    pub(crate) fn new(base: WorldState<S>) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn base_root(&self) -> Hash256 {
        self.base.root()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateErr> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        let trie = Trie::new(self.base.store());
        trie.get(&self.base.root(), key)
    }

    fn get_decoded<V: bincode::Decode>(&self, key: &[u8]) -> Result<Option<V>, StateErr> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(
                crate::codec::decode(&bytes).map_err(|err| StateErr::Corruption(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn stage<V: bincode::Encode>(&mut self, key: Vec<u8>, value: &V) -> Result<(), StateErr> {
        let bytes = crate::codec::encode_to_vec(value)
            .map_err(|err| StateErr::Corruption(err.to_string()))?;
        self.pending.insert(key, Some(bytes));
        Ok(())
    }

    pub fn get_asset(&self, r: &AssetOutputRef) -> Result<Option<AssetOutput>, StateErr> {
        self.get_decoded(&asset_key(r))
    }

    pub fn contains_asset(&self, r: &AssetOutputRef) -> Result<bool, StateErr> {
        Ok(self.get_raw(&asset_key(r))?.is_some())
    }

    pub fn put_asset(&mut self, r: &AssetOutputRef, output: &AssetOutput) -> Result<(), StateErr> {
        self.stage(asset_key(r), output)
    }

    pub fn remove_asset(&mut self, r: &AssetOutputRef) {
        self.pending.insert(asset_key(r), None);
    }

    pub fn get_contract(&self, id: &ContractId) -> Result<Option<ContractState>, StateErr> {
        self.get_decoded(&contract_key(id))
    }

    pub fn put_contract(&mut self, id: &ContractId, state: &ContractState) -> Result<(), StateErr> {
        self.stage(contract_key(id), state)
    }

    pub fn remove_contract(&mut self, id: &ContractId) {
        self.pending.insert(contract_key(id), None);
    }

    pub fn get_contract_output(
        &self,
        r: &ContractOutputRef,
    ) -> Result<Option<ContractOutput>, StateErr> {
        self.get_decoded(&contract_output_key(r))
    }

    pub fn put_contract_output(
        &mut self,
        r: &ContractOutputRef,
        output: &ContractOutput,
    ) -> Result<(), StateErr> {
        self.stage(contract_output_key(r), output)
    }

    pub fn remove_contract_output(&mut self, r: &ContractOutputRef) {
        self.pending.insert(contract_output_key(r), None);
    }

    pub fn get_code(&self, code_hash: &Hash256) -> Result<Option<Contract>, StateErr> {
        self.get_decoded(&code_key(code_hash))
    }

    pub fn put_code(&mut self, code_hash: &Hash256, code: &Contract) -> Result<(), StateErr> {
        self.stage(code_key(code_hash), code)
    }

    /// Fold the overlay into the trie and stage every new node into `batch`.
    /// Returns the new state root. The overlay is consumed; the base state
    /// is untouched until the batch commits.
    pub fn commit(self, batch: &mut WriteBatch) -> Result<Hash256, StateErr> {
        let mut trie = Trie::new(self.base.store());
        let mut root = self.base.root();

        for (key, staged) in &self.pending {
            root = match staged {
                Some(value) => trie.insert(&root, key, value.clone())?,
                None => trie.remove(&root, key)?,
            };
        }

        trie.stage(batch)?;
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::{Column, KvStore, MemoryKv};
    use crate::primitives::{LockupScript, U256};

    fn asset_ref(n: u8) -> AssetOutputRef {
        AssetOutputRef::new(
            &LockupScript::P2pkh(Hash256::hash_from_slice([n], "test")),
            &Hash256::hash_from_slice("tx", "test"),
            u32::from(n),
        )
    }

    fn asset(amount: u64) -> AssetOutput {
        AssetOutput::plain(
            U256::from_u64(amount),
            LockupScript::P2pkh(Hash256::hash_from_slice("addr", "test")),
        )
    }

    #[test]
    fn overlay_reads_through_to_base() {
        let kv = MemoryKv::new();
        let base = WorldState::new(kv.clone(), Hash256::zero());
        let mut cached = base.cached();
        cached.put_asset(&asset_ref(1), &asset(100)).unwrap();

        let mut batch = WriteBatch::new();
        let root = cached.commit(&mut batch).unwrap();
        kv.commit(batch).unwrap();

        let world = WorldState::new(kv, root);
        let cached = world.cached();
        assert_eq!(
            cached.get_asset(&asset_ref(1)).unwrap(),
            Some(asset(100))
        );
    }

    #[test]
    fn overlay_mutations_shadow_base() {
        let kv = MemoryKv::new();
        let base = WorldState::new(kv.clone(), Hash256::zero());
        let mut cached = base.cached();
        cached.put_asset(&asset_ref(1), &asset(100)).unwrap();
        let mut batch = WriteBatch::new();
        let root = cached.commit(&mut batch).unwrap();
        kv.commit(batch).unwrap();

        let world = WorldState::new(kv, root);
        let mut cached = world.cached();
        cached.remove_asset(&asset_ref(1));
        assert_eq!(cached.get_asset(&asset_ref(1)).unwrap(), None);
        // The base is unaffected until commit.
        assert!(world.get_asset(&asset_ref(1)).unwrap().is_some());
    }

    #[test]
    fn discarded_overlay_leaves_no_side_effect() {
        let kv = MemoryKv::new();
        let world = WorldState::new(kv.clone(), Hash256::zero());
        {
            let mut cached = world.cached();
            cached.put_asset(&asset_ref(2), &asset(5)).unwrap();
            assert!(cached.is_dirty());
            // Dropped without commit.
        }
        assert!(kv.is_empty(Column::TrieNodes));
        assert_eq!(world.get_asset(&asset_ref(2)).unwrap(), None);
    }

    #[test]
    fn commit_root_is_deterministic() {
        let kv_a = MemoryKv::new();
        let kv_b = MemoryKv::new();

        let mut roots = vec![];
        for kv in [&kv_a, &kv_b] {
            let world = WorldState::new(kv.clone(), Hash256::zero());
            let mut cached = world.cached();
            for n in 0..8u8 {
                cached.put_asset(&asset_ref(n), &asset(u64::from(n) * 10)).unwrap();
            }
            cached.remove_asset(&asset_ref(3));
            let mut batch = WriteBatch::new();
            roots.push(cached.commit(&mut batch).unwrap());
            kv.commit(batch).unwrap();
        }
        assert_eq!(roots[0], roots[1]);
    }
}
