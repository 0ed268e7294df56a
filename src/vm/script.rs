// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::Hash256;
use crate::vm::Instr;
use bincode::{Decode, Encode};

const CODE_HASH_KEY: &str = "latticecoin.code";

/// A single method of a script or contract.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Method {
    /// Whether external callers may enter this method.
    pub is_public: bool,

    /// Whether this method may touch assets.
    pub is_payable: bool,

    /// Number of local slots, zero-initialized on entry.
    pub local_count: u16,

    pub instrs: Vec<Instr>,
}

impl Method {
    #[must_use]
    pub fn public(instrs: Vec<Instr>) -> Self {
        Self {
            is_public: true,
            is_payable: false,
            local_count: 0,
            instrs,
        }
    }

    #[must_use]
    pub fn payable(mut self) -> Self {
        self.is_payable = true;
        self
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }

    #[must_use]
    pub fn with_locals(mut self, local_count: u16) -> Self {
        self.local_count = local_count;
        self
    }
}

/// Transaction script: executed once per carrying transaction, entry is
/// method zero.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Script {
    pub methods: Vec<Method>,
}

impl Script {
    #[must_use]
    pub fn new(methods: Vec<Method>) -> Self {
        Self { methods }
    }

    #[must_use]
    pub fn single(instrs: Vec<Instr>) -> Self {
        Self {
            methods: vec![Method::public(instrs)],
        }
    }
}

/// Deployed contract code: a declared field count plus methods.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct Contract {
    pub field_count: u16,
    pub methods: Vec<Method>,
}

impl Contract {
    #[must_use]
    pub fn new(field_count: u16, methods: Vec<Method>) -> Self {
        Self {
            field_count,
            methods,
        }
    }

    #[must_use]
    pub fn code_hash(&self) -> Hash256 {
        let encoded = crate::codec::encode_to_vec(self).unwrap();
        Hash256::hash_from_slice(encoded, CODE_HASH_KEY)
    }

    #[must_use]
    pub fn method(&self, index: u8) -> Option<&Method> {
        self.methods.get(usize::from(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_hash_commits_to_methods() {
        let a = Contract::new(1, vec![Method::public(vec![Instr::Return])]);
        let b = Contract::new(1, vec![Method::public(vec![Instr::Pop, Instr::Return])]);
        assert_ne!(a.code_hash(), b.code_hash());
        assert_eq!(a.code_hash(), a.clone().code_hash());
    }

    #[test]
    fn script_codec_roundtrip() {
        let script = Script::single(vec![Instr::ConstTrue, Instr::Assert, Instr::Return]);
        let bytes = crate::codec::encode_to_vec(&script).unwrap();
        let decoded: Script = crate::codec::decode(&bytes).unwrap();
        assert_eq!(decoded, script);
    }
}
