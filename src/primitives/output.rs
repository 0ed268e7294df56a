// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{ContractId, Hash256, LockupScript, TokenId, U256};
use bincode::{Decode, Encode};
use std::hash::Hash as HashTrait;

/// Spendable output holding native value, optional tokens, and an optional
/// absolute time-lock in millis.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AssetOutput {
    pub amount: U256,
    pub lockup: LockupScript,
    pub lock_time: Option<u64>,
    pub tokens: Vec<(TokenId, U256)>,
    pub additional_data: Vec<u8>,
}

impl AssetOutput {
    #[must_use]
    pub fn plain(amount: U256, lockup: LockupScript) -> Self {
        Self {
            amount,
            lockup,
            lock_time: None,
            tokens: vec![],
            additional_data: vec![],
        }
    }

    /// Whether the time-lock allows spending at `now_ms`.
    #[must_use]
    pub fn unlocked_at(&self, now_ms: u64) -> bool {
        match self.lock_time {
            Some(lock) => now_ms >= lock,
            None => true,
        }
    }

    #[must_use]
    pub fn token_amount(&self, token: &TokenId) -> U256 {
        self.tokens
            .iter()
            .find(|(id, _)| id == token)
            .map(|(_, amount)| *amount)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }
}

impl Encode for AssetOutput {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        let flags: u8 = u8::from(self.lock_time.is_some());
        bincode::Encode::encode(&flags, encoder)?;
        bincode::Encode::encode(&self.amount, encoder)?;
        bincode::Encode::encode(&self.lockup, encoder)?;
        if let Some(lock_time) = self.lock_time {
            crate::codec::encode_fixed_u64(lock_time, encoder)?;
        }
        bincode::Encode::encode(&self.tokens, encoder)?;
        bincode::Encode::encode(&self.additional_data, encoder)?;
        Ok(())
    }
}

impl Decode for AssetOutput {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let flags: u8 = bincode::Decode::decode(decoder)?;
        if flags > 1 {
            return Err(bincode::error::DecodeError::OtherString(
                "invalid asset output flags".to_owned(),
            ));
        }
        let amount = bincode::Decode::decode(decoder)?;
        let lockup = bincode::Decode::decode(decoder)?;
        let lock_time = if flags == 1 {
            Some(crate::codec::decode_fixed_u64(decoder)?)
        } else {
            None
        };
        let tokens = bincode::Decode::decode(decoder)?;
        let additional_data = bincode::Decode::decode(decoder)?;
        Ok(Self {
            amount,
            lockup,
            lock_time,
            tokens,
            additional_data,
        })
    }
}

/// Output held by a live contract; always locked to the contract itself.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct ContractOutput {
    pub amount: U256,
    pub contract_id: ContractId,
    pub tokens: Vec<(TokenId, U256)>,
}

impl ContractOutput {
    #[must_use]
    pub fn lockup(&self) -> LockupScript {
        LockupScript::P2c(self.contract_id)
    }

    #[must_use]
    pub fn token_amount(&self, token: &TokenId) -> U256 {
        self.tokens
            .iter()
            .find(|(id, _)| id == token)
            .map(|(_, amount)| *amount)
            .unwrap_or_default()
    }
}

/// Reference to an output: a tagged lookup hint plus the 32-byte world-state
/// key derived from the creating transaction.
#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode, Debug, PartialOrd, Ord)]
pub struct AssetOutputRef {
    pub hint: u32,
    pub key: Hash256,
}

#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode, Debug, PartialOrd, Ord)]
pub struct ContractOutputRef {
    pub hint: u32,
    pub key: Hash256,
}

#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode, Debug, PartialOrd, Ord)]
pub enum TxOutputRef {
    Asset(AssetOutputRef),
    Contract(ContractOutputRef),
}

fn output_key(tx_id: &Hash256, index: u32) -> Hash256 {
    let mut buf = Vec::with_capacity(36);
    buf.extend_from_slice(tx_id.as_bytes());
    buf.extend_from_slice(&index.to_le_bytes());
    Hash256::hash_from_slice(buf, "latticecoin.outputref")
}

/// The hint carries the tail of the lockup hash, so the owner's group is
/// recoverable from the reference alone.
fn lockup_hint(lockup: &LockupScript) -> u32 {
    u32::from_le_bytes(
        lockup.script_hint().as_bytes()[28..]
            .try_into()
            .expect("hash is 32 bytes"),
    )
}

impl AssetOutputRef {
    #[must_use]
    pub fn new(lockup: &LockupScript, tx_id: &Hash256, index: u32) -> Self {
        Self {
            hint: lockup_hint(lockup),
            key: output_key(tx_id, index),
        }
    }

    /// Group of the referenced output's owner, recovered from the hint.
    #[must_use]
    pub fn group_index(&self, groups: u16) -> u16 {
        ((self.hint >> 16) as u16) % groups
    }
}

impl ContractOutputRef {
    #[must_use]
    pub fn new(contract_id: &ContractId, tx_id: &Hash256, index: u32) -> Self {
        Self {
            hint: lockup_hint(&LockupScript::P2c(*contract_id)),
            key: output_key(tx_id, index),
        }
    }
}

impl TxOutputRef {
    #[must_use]
    pub fn key(&self) -> &Hash256 {
        match self {
            Self::Asset(r) => &r.key,
            Self::Contract(r) => &r.key,
        }
    }

    #[must_use]
    pub fn is_asset(&self) -> bool {
        matches!(self, Self::Asset(_))
    }
}

impl From<AssetOutputRef> for TxOutputRef {
    fn from(r: AssetOutputRef) -> Self {
        Self::Asset(r)
    }
}

impl From<ContractOutputRef> for TxOutputRef {
    fn from(r: ContractOutputRef) -> Self {
        Self::Contract(r)
    }
}

/// Payload carried in the additional data of the first coinbase output,
/// binding the coinbase to its block.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Debug)]
pub struct CoinbaseData {
    pub from_group: u16,
    pub to_group: u16,
    pub block_ts: u64,
}

impl CoinbaseData {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        crate::codec::decode(bytes)
    }
}
