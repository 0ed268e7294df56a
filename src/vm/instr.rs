// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{LockupScript, I256, U256};
use bincode::{Decode, Encode};

/// Instruction set of the stateful VM. Jump offsets are relative to the
/// instruction after the jump.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum Instr {
    // Constants and stack manipulation.
    ConstTrue,
    ConstFalse,
    U256Const(U256),
    I256Const(I256),
    BytesConst(Vec<u8>),
    AddressConst(LockupScript),
    Pop,
    Dup,
    Swap,

    // Local storage of the current frame.
    LoadLocal(u16),
    StoreLocal(u16),

    // Checked arithmetic; overflow fails the script.
    U256Add,
    U256Sub,
    U256Mul,
    U256Div,
    U256Mod,
    I256Add,
    I256Sub,
    I256Mul,
    I256Div,
    I256Mod,
    I256Neg,

    // Modular arithmetic by 2^256.
    U256ModAdd,
    U256ModSub,
    U256ModMul,

    // Bitwise.
    U256BitAnd,
    U256BitOr,
    U256Xor,
    U256Shl,
    U256Shr,

    // Comparisons. `Eq`/`Neq` compare any two values of the same type.
    U256Lt,
    U256Le,
    U256Gt,
    U256Ge,
    I256Lt,
    I256Le,
    I256Gt,
    I256Ge,
    Eq,
    Neq,

    // Boolean logic. Short-circuiting is compiled to jumps.
    BoolNot,
    BoolAnd,
    BoolOr,

    // Control flow.
    Jump(i16),
    IfTrue(i16),
    IfFalse(i16),
    Assert,
    Return,

    // Byte vectors.
    ByteVecConcat,
    ByteVecSize,

    // Contract state.
    LoadField(u16),
    StoreField(u16),

    // Asset approval and transfers.
    ApproveAlf,
    ApproveToken,
    TransferAlf,
    TransferAlfFromSelf,
    TransferAlfToSelf,
    TransferToken,
    TransferTokenFromSelf,
    TransferTokenToSelf,

    // Environment queries.
    BlockTimestamp,
    BlockTarget,
    NetworkId,
    TxId,
    TxInputAddress,
    TxInputsSize,
    CallerContractId,
    CallerAddress,
    CallerInitialStateHash,
    IsCalledFromTxScript,
    SelfAddress,
    SelfContractId,

    // Hashes.
    Blake2b,
    Keccak256,
    Sha256,
    Sha3,

    // Signature verification over a 32-byte prehash.
    VerifySecP256K1,
    VerifyEd25519,

    // Time locks.
    VerifyAbsoluteLocktime,
    VerifyRelativeLocktime,

    // Contract lifecycle.
    CallLocal(u8),
    CallExternal(u8),
    CreateContract,
    CopyCreateContract,
    DestroySelf,
}

impl Instr {
    /// Gas charged before executing the instruction.
    #[must_use]
    pub fn gas(&self) -> u64 {
        use Instr::*;
        match self {
            ConstTrue | ConstFalse | Pop | Dup | Swap => 2,
            U256Const(_) | I256Const(_) | AddressConst(_) => 2,
            BytesConst(v) => 2 + v.len() as u64 / 32,
            LoadLocal(_) | StoreLocal(_) => 3,
            U256Add | U256Sub | I256Add | I256Sub | I256Neg | U256ModAdd | U256ModSub => 3,
            U256Mul | U256Div | U256Mod | I256Mul | I256Div | I256Mod | U256ModMul => 5,
            U256BitAnd | U256BitOr | U256Xor | U256Shl | U256Shr => 3,
            U256Lt | U256Le | U256Gt | U256Ge | I256Lt | I256Le | I256Gt | I256Ge | Eq | Neq => 3,
            BoolNot | BoolAnd | BoolOr => 2,
            Jump(_) | IfTrue(_) | IfFalse(_) => 4,
            Assert => 3,
            Return => 2,
            ByteVecConcat => 6,
            ByteVecSize => 2,
            LoadField(_) | StoreField(_) => 5,
            ApproveAlf | ApproveToken => 10,
            TransferAlf | TransferAlfFromSelf | TransferAlfToSelf | TransferToken
            | TransferTokenFromSelf | TransferTokenToSelf => 20,
            BlockTimestamp | BlockTarget | NetworkId | TxId | TxInputsSize => 2,
            TxInputAddress => 4,
            CallerContractId | CallerAddress | CallerInitialStateHash | IsCalledFromTxScript
            | SelfAddress | SelfContractId => 3,
            Blake2b | Sha256 | Keccak256 | Sha3 => 60,
            VerifySecP256K1 | VerifyEd25519 => 2_000,
            VerifyAbsoluteLocktime | VerifyRelativeLocktime => 5,
            CallLocal(_) | CallExternal(_) => 200,
            CreateContract | CopyCreateContract => 32_000,
            DestroySelf => 2_000,
        }
    }
}
