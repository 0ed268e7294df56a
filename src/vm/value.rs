// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{Hash256, LockupScript, I256, U256};
use crate::vm::ExeFailure;
use bincode::{Decode, Encode};

/// Runtime value of the stack machine.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum Val {
    Bool(bool),
    I256(I256),
    U256(U256),
    ByteVec(Vec<u8>),
    Address(LockupScript),
}

impl Val {
    /// Default value per type, used to seed locals and contract fields.
    #[must_use]
    pub fn zero_u256() -> Self {
        Val::U256(U256::zero())
    }

    /// Approximate in-memory footprint, charged against VM memory.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Val::Bool(_) => 1,
            Val::I256(_) | Val::U256(_) => 32,
            Val::ByteVec(v) => 4 + v.len(),
            Val::Address(_) => 33,
        }
    }

    pub fn as_bool(&self) -> Result<bool, ExeFailure> {
        match self {
            Val::Bool(v) => Ok(*v),
            _ => Err(ExeFailure::InvalidValType),
        }
    }

    pub fn as_u256(&self) -> Result<U256, ExeFailure> {
        match self {
            Val::U256(v) => Ok(*v),
            _ => Err(ExeFailure::InvalidValType),
        }
    }

    pub fn as_i256(&self) -> Result<I256, ExeFailure> {
        match self {
            Val::I256(v) => Ok(*v),
            _ => Err(ExeFailure::InvalidValType),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], ExeFailure> {
        match self {
            Val::ByteVec(v) => Ok(v),
            _ => Err(ExeFailure::InvalidValType),
        }
    }

    pub fn as_address(&self) -> Result<&LockupScript, ExeFailure> {
        match self {
            Val::Address(v) => Ok(v),
            _ => Err(ExeFailure::InvalidValType),
        }
    }

    pub fn as_hash(&self) -> Result<Hash256, ExeFailure> {
        let bytes = self.as_bytes()?;
        if bytes.len() != 32 {
            return Err(ExeFailure::InvalidValType);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Hash256(out))
    }
}
