// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{Hash256, Transaction};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A transaction admitted to a pool.
#[derive(Clone, Debug)]
struct MempoolTx {
    tx: Transaction,
    seq: u64,
    added_at_ms: u64,
}

/// Price-ordered pool. Iteration is non-increasing by gas price; within a
/// price tier, first arrival first. Bounded: admitting past capacity evicts
/// the oldest entry of the lowest price tier.
struct Pool {
    capacity: usize,
    by_hash: HashMap<Hash256, MempoolTx>,
    ordered: BTreeMap<(u64, Reverse<u64>), Hash256>,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_hash: HashMap::new(),
            ordered: BTreeMap::new(),
        }
    }

    fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    fn len(&self) -> usize {
        self.by_hash.len()
    }

    fn insert(&mut self, entry: MempoolTx) -> Option<Hash256> {
        let hash = *entry.tx.hash().expect("mempool tx hash computed");
        let price = entry.tx.unsigned.gas_price;

        let mut evicted = None;
        if self.by_hash.len() >= self.capacity {
            // Oldest entry of the lowest price tier goes first.
            let lowest_price = match self.ordered.keys().next() {
                Some((price, _)) => *price,
                None => return None,
            };
            if price < lowest_price {
                // The candidate itself is the worst entry.
                return Some(hash);
            }
            let victim_key = self
                .ordered
                .range((lowest_price, Reverse(u64::MAX))..=(lowest_price, Reverse(0)))
                .next_back()
                .map(|(k, _)| *k)
                .expect("non-empty tier");
            if let Some(victim) = self.ordered.remove(&victim_key) {
                self.by_hash.remove(&victim);
                evicted = Some(victim);
            }
        }

        self.ordered.insert((price, Reverse(entry.seq)), hash);
        self.by_hash.insert(hash, entry);
        evicted
    }

    fn remove(&mut self, hash: &Hash256) -> Option<Transaction> {
        let entry = self.by_hash.remove(hash)?;
        self.ordered
            .remove(&(entry.tx.unsigned.gas_price, Reverse(entry.seq)));
        Some(entry.tx)
    }

    /// Hashes in non-increasing gas-price order.
    fn iter_desc(&self) -> impl Iterator<Item = &Hash256> {
        self.ordered.iter().rev().map(|(_, h)| h)
    }

    fn expired(&self, now_ms: u64, max_age_ms: u64) -> Vec<Hash256> {
        self.by_hash
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.added_at_ms) > max_age_ms)
            .map(|(h, _)| *h)
            .collect()
    }
}

/// The pools of one broker group: a shared pool of ready transactions and a
/// pending pool for those whose dependencies are still missing.
struct GroupPool {
    shared: Pool,
    pending: Pool,
}

/// Per-broker-group mempool.
pub struct Mempool {
    groups: HashMap<u16, GroupPool>,
    seq: u64,
}

impl Mempool {
    #[must_use]
    pub fn new(
        groups: impl Iterator<Item = u16>,
        shared_capacity: usize,
        pending_capacity: usize,
    ) -> Self {
        let groups = groups
            .map(|g| {
                (
                    g,
                    GroupPool {
                        shared: Pool::new(shared_capacity),
                        pending: Pool::new(pending_capacity),
                    },
                )
            })
            .collect();
        Self { groups, seq: 0 }
    }

    fn group_mut(&mut self, group: u16) -> Result<&mut GroupPool, MempoolErr> {
        self.groups.get_mut(&group).ok_or(MempoolErr::UnknownGroup)
    }

    fn group(&self, group: u16) -> Result<&GroupPool, MempoolErr> {
        self.groups.get(&group).ok_or(MempoolErr::UnknownGroup)
    }

    pub fn contains(&self, group: u16, hash: &Hash256) -> Result<bool, MempoolErr> {
        let pool = self.group(group)?;
        Ok(pool.shared.contains(hash) || pool.pending.contains(hash))
    }

    /// Admit a ready transaction into the shared pool. Returns the evicted
    /// hash, if admission pushed one out.
    pub fn add(
        &mut self,
        group: u16,
        tx: Transaction,
        now_ms: u64,
    ) -> Result<Option<Hash256>, MempoolErr> {
        let hash = *tx.hash().ok_or(MempoolErr::MissingHash)?;
        if self.contains(group, &hash)? {
            return Err(MempoolErr::AlreadyPresent);
        }
        self.seq += 1;
        let entry = MempoolTx {
            tx,
            seq: self.seq,
            added_at_ms: now_ms,
        };
        Ok(self.group_mut(group)?.shared.insert(entry))
    }

    /// Park a transaction whose dependencies are missing.
    pub fn add_pending(
        &mut self,
        group: u16,
        tx: Transaction,
        now_ms: u64,
    ) -> Result<Option<Hash256>, MempoolErr> {
        let hash = *tx.hash().ok_or(MempoolErr::MissingHash)?;
        if self.contains(group, &hash)? {
            return Err(MempoolErr::AlreadyPresent);
        }
        self.seq += 1;
        let entry = MempoolTx {
            tx,
            seq: self.seq,
            added_at_ms: now_ms,
        };
        Ok(self.group_mut(group)?.pending.insert(entry))
    }

    /// Move a parked transaction to the shared pool once its dependencies
    /// arrived.
    pub fn promote(&mut self, group: u16, hash: &Hash256, now_ms: u64) -> Result<(), MempoolErr> {
        let pool = self.group_mut(group)?;
        let tx = pool.pending.remove(hash).ok_or(MempoolErr::NotFound)?;
        self.add(group, tx, now_ms).map(|_| ())
    }

    /// Drop confirmed or invalidated transactions from both pools.
    pub fn remove(&mut self, group: u16, hashes: &[Hash256]) -> Result<usize, MempoolErr> {
        let pool = self.group_mut(group)?;
        let mut removed = 0;
        for hash in hashes {
            if pool.shared.remove(hash).is_some() || pool.pending.remove(hash).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Ready transactions in non-increasing gas-price order.
    pub fn collect_desc(&self, group: u16, limit: usize) -> Result<Vec<Transaction>, MempoolErr> {
        let pool = self.group(group)?;
        Ok(pool
            .shared
            .iter_desc()
            .take(limit)
            .map(|h| pool.shared.by_hash[h].tx.clone())
            .collect())
    }

    /// Periodic cleaning: drop entries older than `max_age_ms` from both
    /// pools of every group. Returns the dropped hashes.
    pub fn clean(&mut self, now_ms: u64, max_age_ms: u64) -> Vec<Hash256> {
        let mut dropped = vec![];
        for pool in self.groups.values_mut() {
            for hash in pool.shared.expired(now_ms, max_age_ms) {
                pool.shared.remove(&hash);
                dropped.push(hash);
            }
            for hash in pool.pending.expired(now_ms, max_age_ms) {
                pool.pending.remove(&hash);
                dropped.push(hash);
            }
        }
        dropped
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.groups
            .values()
            .map(|p| p.shared.len() + p.pending.len())
            .sum()
    }

    pub fn shared_len(&self, group: u16) -> Result<usize, MempoolErr> {
        Ok(self.group(group)?.shared.len())
    }

    pub fn pending_len(&self, group: u16) -> Result<usize, MempoolErr> {
        Ok(self.group(group)?.pending.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MempoolErr {
    AlreadyPresent,
    NotFound,
    UnknownGroup,
    MissingHash,
}

impl fmt::Display for MempoolErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
