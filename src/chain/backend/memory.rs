// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{BatchOp, Column, KvStore, KvStoreErr, WriteBatch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use triomphe::Arc;

type ColumnStore = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-process store, used by tests and memory-only nodes. Commits are atomic
/// under a single write lock.
#[derive(Clone, Default)]
pub struct MemoryKv {
    cfs: Arc<RwLock<HashMap<Column, ColumnStore>>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        let mut cfs = HashMap::with_capacity(Column::ALL.len());
        for cf in Column::ALL {
            cfs.insert(cf, ColumnStore::new());
        }
        Self {
            cfs: Arc::new(RwLock::new(cfs)),
        }
    }

    /// Number of live keys in a column.
    #[must_use]
    pub fn len(&self, cf: Column) -> usize {
        self.cfs.read().get(&cf).map_or(0, ColumnStore::len)
    }

    #[must_use]
    pub fn is_empty(&self, cf: Column) -> bool {
        self.len(cf) == 0
    }
}

impl KvStore for MemoryKv {
    fn get_raw(&self, cf: Column, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreErr> {
        let cfs = self.cfs.read();
        let store = cfs
            .get(&cf)
            .ok_or(KvStoreErr::Invariant("unknown column family"))?;
        Ok(store.get(key).cloned())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KvStoreErr> {
        let mut cfs = self.cfs.write();
        for op in batch.ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    cfs.get_mut(&cf)
                        .ok_or(KvStoreErr::Invariant("unknown column family"))?
                        .insert(key, value);
                }
                BatchOp::Delete { cf, key } => {
                    cfs.get_mut(&cf)
                        .ok_or(KvStoreErr::Invariant("unknown column family"))?
                        .remove(&key);
                }
            }
        }
        Ok(())
    }
}
