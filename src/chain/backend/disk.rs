// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{BatchOp, Column, KvStore, KvStoreErr, WriteBatch};
use rocksdb::{
    ColumnFamilyDescriptor, Error as RocksDBErr, LogLevel, MultiThreaded, Options, TransactionDB,
    TransactionDBOptions,
};
use std::path::Path;
use triomphe::Arc;

pub type DB = TransactionDB<MultiThreaded>;

/// RocksDB-backed store. One transaction per committed batch.
#[derive(Clone)]
pub struct DiskKv {
    db: Arc<DB>,
}

impl DiskKv {
    /// Open (or create) the database with all column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KvStoreErr> {
        let mut cf_opts = Options::default();
        cf_opts.set_max_write_buffer_number(3);
        let cfs: Vec<ColumnFamilyDescriptor> = Column::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        db_opts.set_log_level(LogLevel::Warn);
        db_opts.set_keep_log_file_num(1);

        let db = DB::open_cf_descriptors(&db_opts, &TransactionDBOptions::default(), path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for DiskKv {
    fn get_raw(&self, cf: Column, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreErr> {
        let handle = self
            .db
            .cf_handle(cf.name())
            .ok_or(KvStoreErr::Invariant("missing column family"))?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KvStoreErr> {
        if batch.is_empty() {
            return Ok(());
        }

        let txn = self.db.transaction();
        for op in &batch.ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = self
                        .db
                        .cf_handle(cf.name())
                        .ok_or(KvStoreErr::Invariant("missing column family"))?;
                    txn.put_cf(&handle, key, value)?;
                }
                BatchOp::Delete { cf, key } => {
                    let handle = self
                        .db
                        .cf_handle(cf.name())
                        .ok_or(KvStoreErr::Invariant("missing column family"))?;
                    txn.delete_cf(&handle, key)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}

impl From<RocksDBErr> for KvStoreErr {
    fn from(other: RocksDBErr) -> Self {
        Self::Io(other.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn temp_db() -> DiskKv {
        let mut path = std::env::temp_dir();
        path.push(hex::encode(rand::thread_rng().gen::<[u8; 16]>()));
        path.push("latticecoin-test");
        DiskKv::open(path).unwrap()
    }

    #[test]
    fn put_then_get_roundtrips() {
        let kv = temp_db();
        kv.put(Column::Headers, b"k".to_vec(), &7u64).unwrap();
        let got: Option<u64> = kv.get(Column::Headers, b"k").unwrap();
        assert_eq!(got, Some(7));
    }

    #[test]
    fn batch_commit_is_atomic() {
        let kv = temp_db();
        let mut batch = WriteBatch::new();
        batch.put(Column::Headers, b"a".to_vec(), &1u32).unwrap();
        batch.put(Column::Bodies, b"b".to_vec(), &2u32).unwrap();
        kv.commit(batch).unwrap();

        let a: Option<u32> = kv.get(Column::Headers, b"a").unwrap();
        let b: Option<u32> = kv.get(Column::Bodies, b"b").unwrap();
        assert_eq!((a, b), (Some(1), Some(2)));
    }
}
