// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{Column, KvStore, WriteBatch};
use crate::primitives::Hash256;
use crate::state::StateErr;
use bincode::{Decode, Encode};
use std::collections::HashMap;

const TRIE_HASH_KEY: &str = "latticecoin.trie";

/// Node of the authenticated hexary trie. Leaves compress their remaining
/// nibble path; there are no extension nodes.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum TrieNode {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Branch {
        children: Vec<Option<Hash256>>,
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    fn hash(&self) -> Hash256 {
        let encoded = crate::codec::encode_to_vec(self).unwrap();
        Hash256::hash_from_slice(encoded, TRIE_HASH_KEY)
    }

    fn empty_branch() -> Self {
        TrieNode::Branch {
            children: vec![None; 16],
            value: None,
        }
    }
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for byte in key {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

fn from_nibbles(nibbles: &[u8]) -> Vec<u8> {
    debug_assert!(nibbles.len() % 2 == 0);
    nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect()
}

/// Content-addressed trie over the `TrieNodes` column. Mutations build new
/// nodes in memory; [`Trie::stage`] moves them into a write batch at block
/// commit. The zero hash is the empty root.
pub struct Trie<'a, S: KvStore> {
    store: &'a S,
    fresh: HashMap<Hash256, TrieNode>,
}

impl<'a, S: KvStore> Trie<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            fresh: HashMap::new(),
        }
    }

    fn node(&self, hash: &Hash256) -> Result<TrieNode, StateErr> {
        if let Some(node) = self.fresh.get(hash) {
            return Ok(node.clone());
        }
        self.store
            .get::<TrieNode>(Column::TrieNodes, hash.as_bytes())?
            .ok_or(StateErr::MissingNode(*hash))
    }

    fn put_node(&mut self, node: TrieNode) -> Hash256 {
        let hash = node.hash();
        self.fresh.insert(hash, node);
        hash
    }

    pub fn get(&self, root: &Hash256, key: &[u8]) -> Result<Option<Vec<u8>>, StateErr> {
        if root.is_zero() {
            return Ok(None);
        }
        self.get_at(root, &to_nibbles(key))
    }

    fn get_at(&self, node_hash: &Hash256, path: &[u8]) -> Result<Option<Vec<u8>>, StateErr> {
        match self.node(node_hash)? {
            TrieNode::Leaf { path: lpath, value } => {
                if lpath == path {
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            TrieNode::Branch { children, value } => {
                if path.is_empty() {
                    return Ok(value);
                }
                match &children[usize::from(path[0])] {
                    Some(child) => self.get_at(child, &path[1..]),
                    None => Ok(None),
                }
            }
        }
    }

    /// Insert or replace `key`. Returns the new root.
    pub fn insert(
        &mut self,
        root: &Hash256,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<Hash256, StateErr> {
        let node = if root.is_zero() { None } else { Some(*root) };
        self.insert_at(node, &to_nibbles(key), value)
    }

    fn insert_at(
        &mut self,
        node_hash: Option<Hash256>,
        path: &[u8],
        value: Vec<u8>,
    ) -> Result<Hash256, StateErr> {
        let Some(node_hash) = node_hash else {
            return Ok(self.put_node(TrieNode::Leaf {
                path: path.to_vec(),
                value,
            }));
        };

        match self.node(&node_hash)? {
            TrieNode::Leaf {
                path: lpath,
                value: lvalue,
            } => {
                if lpath == path {
                    return Ok(self.put_node(TrieNode::Leaf {
                        path: path.to_vec(),
                        value,
                    }));
                }

                // Split the leaf into a branch, then retry the insert on it.
                let mut branch = TrieNode::empty_branch();
                {
                    let TrieNode::Branch { children, value } = &mut branch else {
                        unreachable!()
                    };
                    if lpath.is_empty() {
                        *value = Some(lvalue);
                    } else {
                        let child = self.insert_at(None, &lpath[1..], lvalue)?;
                        children[usize::from(lpath[0])] = Some(child);
                    }
                }
                let branch_hash = self.put_node(branch);
                self.insert_at(Some(branch_hash), path, value)
            }
            TrieNode::Branch {
                mut children,
                value: bvalue,
            } => {
                if path.is_empty() {
                    return Ok(self.put_node(TrieNode::Branch {
                        children,
                        value: Some(value),
                    }));
                }
                let slot = usize::from(path[0]);
                let child = self.insert_at(children[slot], &path[1..], value)?;
                children[slot] = Some(child);
                Ok(self.put_node(TrieNode::Branch {
                    children,
                    value: bvalue,
                }))
            }
        }
    }

    /// Remove `key` if present. Returns the new root; the zero hash when the
    /// trie becomes empty.
    pub fn remove(&mut self, root: &Hash256, key: &[u8]) -> Result<Hash256, StateErr> {
        if root.is_zero() {
            return Ok(*root);
        }
        match self.remove_at(root, &to_nibbles(key))? {
            Some(new_root) => Ok(new_root),
            None => Ok(Hash256::zero()),
        }
    }

    fn remove_at(&mut self, node_hash: &Hash256, path: &[u8]) -> Result<Option<Hash256>, StateErr> {
        match self.node(node_hash)? {
            TrieNode::Leaf { path: lpath, .. } => {
                if lpath == path {
                    Ok(None)
                } else {
                    Ok(Some(*node_hash))
                }
            }
            TrieNode::Branch {
                mut children,
                mut value,
            } => {
                if path.is_empty() {
                    value = None;
                } else {
                    let slot = usize::from(path[0]);
                    match children[slot] {
                        Some(child) => {
                            children[slot] = self.remove_at(&child, &path[1..])?;
                        }
                        None => return Ok(Some(*node_hash)),
                    }
                }

                let live: Vec<usize> = (0..16).filter(|i| children[*i].is_some()).collect();
                if value.is_none() && live.is_empty() {
                    return Ok(None);
                }

                // Collapse a lone leaf child back into this position.
                if value.is_none() && live.len() == 1 {
                    let slot = live[0];
                    let child = children[slot].unwrap();
                    if let TrieNode::Leaf {
                        path: mut cpath,
                        value: cvalue,
                    } = self.node(&child)?
                    {
                        cpath.insert(0, slot as u8);
                        return Ok(Some(self.put_node(TrieNode::Leaf {
                            path: cpath,
                            value: cvalue,
                        })));
                    }
                }

                Ok(Some(self.put_node(TrieNode::Branch { children, value })))
            }
        }
    }

    /// Move every freshly built node into the batch. Superseded intermediate
    /// nodes are content-addressed garbage collected by pruning.
    pub fn stage(self, batch: &mut WriteBatch) -> Result<(), StateErr> {
        for (hash, node) in self.fresh {
            batch.put(Column::TrieNodes, hash.as_bytes().to_vec(), &node)?;
        }
        Ok(())
    }

    /// Visit every key/value pair under `root`. Keys are rebuilt from the
    /// nibble path walked.
    pub fn for_each_leaf(
        &self,
        root: &Hash256,
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StateErr> {
        if root.is_zero() {
            return Ok(());
        }
        let mut prefix = vec![];
        self.visit_leaves(root, &mut prefix, f)?;
        Ok(())
    }

    fn visit_leaves(
        &self,
        node_hash: &Hash256,
        prefix: &mut Vec<u8>,
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<bool, StateErr> {
        match self.node(node_hash)? {
            TrieNode::Leaf { path, value } => {
                let mut nibbles = prefix.clone();
                nibbles.extend_from_slice(&path);
                Ok(f(&from_nibbles(&nibbles), &value))
            }
            TrieNode::Branch { children, value } => {
                if let Some(value) = value {
                    if !f(&from_nibbles(prefix), &value) {
                        return Ok(false);
                    }
                }
                for (i, child) in children.iter().enumerate() {
                    if let Some(child) = child {
                        prefix.push(i as u8);
                        let keep_going = self.visit_leaves(child, prefix, f)?;
                        prefix.pop();
                        if !keep_going {
                            return Ok(false);
                        }
                    }
                }
                Ok(true)
            }
        }
    }

    /// Delete nodes reachable from `old_root` but not from any root in
    /// `live_roots`. Used to prune superseded state roots.
    pub fn prune(
        &self,
        old_root: &Hash256,
        live_roots: &[Hash256],
        batch: &mut WriteBatch,
    ) -> Result<usize, StateErr> {
        let mut live = std::collections::HashSet::new();
        for root in live_roots {
            self.collect_reachable(root, &mut live)?;
        }

        let mut dead = std::collections::HashSet::new();
        self.collect_reachable(old_root, &mut dead)?;

        let mut pruned = 0;
        for hash in dead {
            if !live.contains(&hash) {
                batch.delete(Column::TrieNodes, hash.as_bytes().to_vec());
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn collect_reachable(
        &self,
        root: &Hash256,
        out: &mut std::collections::HashSet<Hash256>,
    ) -> Result<(), StateErr> {
        if root.is_zero() || !out.insert(*root) {
            return Ok(());
        }
        if let TrieNode::Branch { children, .. } = self.node(root)? {
            for child in children.into_iter().flatten() {
                self.collect_reachable(&child, out)?;
            }
        }
        Ok(())
    }
}
