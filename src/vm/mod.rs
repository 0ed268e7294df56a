// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::Hash256;
use crate::state::StateErr;
use std::fmt;

mod frame;
mod instr;
mod runner;
mod script;
mod value;

pub use frame::*;
pub use instr::*;
pub use runner::*;
pub use script::*;
pub use value::*;

/// Failure kinds of a script run. Surfaced to validation as
/// `TxScriptExeFailed`; the enclosing block is rejected.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExeFailure {
    StackOverflow,
    OutOfGas,
    AssertionFailed,
    InvalidSignature,
    AbsoluteLockTimeVerificationFailed,
    RelativeLockTimeVerificationFailed,
    InvalidTxInputIndex,
    EmptyContractAsset,
    InvalidFieldLength,
    InvalidAddressTypeInContractDestroy,
    ExternalPrivateMethodCall,
    InvalidValType,
    InvalidInstrOffset,
    NotEnoughBalance,
    NonPayableFrame,
    MethodNotFound,
    ContractNotFound,
    ContractOutputNotFound,
    ContractFrameExpected,
    InvalidContractCode,
    BalanceOverflow,
    StateFailure(String),
}

impl fmt::Display for ExeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExeFailure::ContractOutputNotFound => write!(f, "contract output not found"),
            ExeFailure::StateFailure(err) => write!(f, "state failure: {err}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<StateErr> for ExeFailure {
    fn from(other: StateErr) -> Self {
        Self::StateFailure(other.to_string())
    }
}

/// Gas counter decremented per instruction.
#[derive(Clone, Copy, Debug)]
pub struct GasCounter {
    remaining: u64,
}

impl GasCounter {
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self { remaining: budget }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), ExeFailure> {
        if amount > self.remaining {
            self.remaining = 0;
            return Err(ExeFailure::OutOfGas);
        }
        self.remaining -= amount;
        Ok(())
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

/// Pseudo-random execution order for a block's non-coinbase transactions,
/// derived deterministically from the header's execution seed: honest nodes
/// agree while transaction authors cannot pre-compute their slot.
#[must_use]
pub fn non_coinbase_execution_order(seed: &Hash256, count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..count).collect();
    if count < 2 {
        return order;
    }

    let mut hasher = blake3::Hasher::new_derive_key("latticecoin.execorder");
    hasher.update(seed.as_bytes());
    let mut stream = hasher.finalize_xof();

    for i in (1..count).rev() {
        let mut buf = [0u8; 8];
        stream.fill(&mut buf);
        let j = (u64::from_le_bytes(buf) % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}
