// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{COINBASE_LOCKUP_PERIOD_MS, MINIMAL_GAS, MINIMAL_GAS_PRICE};
use crate::primitives::{
    AssetOutput, AssetOutputRef, ChainIndex, CoinbaseData, ContractOutput, ContractOutputRef,
    Hash256, LockupScript, Signature, TokenId, TxOutputRef, UnlockScript, U256,
};
use crate::vm::Script;
use bincode::{Decode, Encode};
use std::collections::HashMap;

/// Domain key for transaction ids.
const TX_HASH_KEY: &str = "latticecoin.tx";

/// A spending input: the output it consumes and the witness unlocking it.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub struct TxInput {
    pub output_ref: AssetOutputRef,
    pub unlock: UnlockScript,
}

/// The signed-over portion of a transaction. The transaction id is the hash
/// of this encoding.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnsignedTx {
    /// Network this transaction is valid on.
    pub network_id: u8,

    /// Optional script executed by the stateful VM.
    pub script: Option<Script>,

    /// Gas budget.
    pub gas_amount: u64,

    /// Price per unit of gas, in smallest units.
    pub gas_price: u64,

    /// Consumed asset outputs.
    pub inputs: Vec<TxInput>,

    /// Outputs fixed at signing time.
    pub fixed_outputs: Vec<AssetOutput>,
}

impl Encode for UnsignedTx {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.network_id, encoder)?;
        bincode::Encode::encode(&self.script, encoder)?;
        crate::codec::encode_fixed_u64(self.gas_amount, encoder)?;
        crate::codec::encode_fixed_u64(self.gas_price, encoder)?;
        bincode::Encode::encode(&self.inputs, encoder)?;
        bincode::Encode::encode(&self.fixed_outputs, encoder)?;
        Ok(())
    }
}

impl Decode for UnsignedTx {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            network_id: bincode::Decode::decode(decoder)?,
            script: bincode::Decode::decode(decoder)?,
            gas_amount: crate::codec::decode_fixed_u64(decoder)?,
            gas_price: crate::codec::decode_fixed_u64(decoder)?,
            inputs: bincode::Decode::decode(decoder)?,
            fixed_outputs: bincode::Decode::decode(decoder)?,
        })
    }
}

/// An output produced by script execution, asset or contract.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum TxOutput {
    Asset(AssetOutput),
    Contract(ContractOutput),
}

impl TxOutput {
    #[must_use]
    pub fn amount(&self) -> U256 {
        match self {
            Self::Asset(o) => o.amount,
            Self::Contract(o) => o.amount,
        }
    }
}

/// Full transaction envelope.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub unsigned: UnsignedTx,

    /// Contract outputs consumed by the script.
    pub contract_inputs: Vec<ContractOutputRef>,

    /// Outputs generated by script execution.
    pub generated_outputs: Vec<TxOutput>,

    /// One signature per distinct input key.
    pub input_signatures: Vec<Signature>,

    /// Signatures authorized by contracts.
    pub contract_signatures: Vec<Signature>,

    /// Cached transaction id.
    pub hash: Option<Hash256>,
}

impl Transaction {
    #[must_use]
    pub fn from_unsigned(unsigned: UnsignedTx) -> Self {
        let mut tx = Self {
            unsigned,
            contract_inputs: vec![],
            generated_outputs: vec![],
            input_signatures: vec![],
            contract_signatures: vec![],
            hash: None,
        };
        tx.compute_hash();
        tx
    }

    /// The transaction id commits to the unsigned portion only.
    pub fn compute_hash(&mut self) {
        let encoded = crate::codec::encode_to_vec(&self.unsigned).unwrap();
        self.hash = Some(Hash256::hash_from_slice(encoded, TX_HASH_KEY));
    }

    #[must_use]
    pub fn hash(&self) -> Option<&Hash256> {
        self.hash.as_ref()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    /// Total gas fee offered, `gas_amount * gas_price`.
    #[must_use]
    pub fn gas_fee(&self) -> U256 {
        U256::from_u128(u128::from(self.unsigned.gas_amount) * u128::from(self.unsigned.gas_price))
    }

    /// Every output reference this transaction spends, asset then contract.
    pub fn spent_refs(&self) -> impl Iterator<Item = TxOutputRef> + '_ {
        self.unsigned
            .inputs
            .iter()
            .map(|i| TxOutputRef::Asset(i.output_ref))
            .chain(
                self.contract_inputs
                    .iter()
                    .map(|r| TxOutputRef::Contract(*r)),
            )
    }

    /// References of the fixed outputs, indexed from zero.
    pub fn fixed_output_refs(&self) -> impl Iterator<Item = (AssetOutputRef, &AssetOutput)> {
        let tx_id = *self.hash().expect("tx hash not computed");
        self.unsigned
            .fixed_outputs
            .iter()
            .enumerate()
            .map(move |(i, out)| (AssetOutputRef::new(&out.lockup, &tx_id, i as u32), out))
    }

    /// Index base for generated outputs, which follow the fixed ones.
    #[must_use]
    pub fn generated_output_base(&self) -> u32 {
        self.unsigned.fixed_outputs.len() as u32
    }

    /// Sum of native value carried by all outputs.
    #[must_use]
    pub fn output_amount(&self) -> U256 {
        let fixed = self
            .unsigned
            .fixed_outputs
            .iter()
            .fold(U256::zero(), |acc, o| acc.wrapping_add(o.amount));
        self.generated_outputs
            .iter()
            .fold(fixed, |acc, o| acc.wrapping_add(o.amount()))
    }

    /// Per-token sums over all outputs.
    #[must_use]
    pub fn output_tokens(&self) -> HashMap<TokenId, U256> {
        let mut sums: HashMap<TokenId, U256> = HashMap::new();
        let mut add = |tokens: &[(TokenId, U256)]| {
            for (id, amount) in tokens {
                let entry = sums.entry(*id).or_default();
                *entry = entry.wrapping_add(*amount);
            }
        };
        for out in &self.unsigned.fixed_outputs {
            add(&out.tokens);
        }
        for out in &self.generated_outputs {
            match out {
                TxOutput::Asset(o) => add(&o.tokens),
                TxOutput::Contract(o) => add(&o.tokens),
            }
        }
        sums
    }

    /// Verify each input signature against the transaction id.
    #[must_use]
    pub fn signatures_valid(&self) -> bool {
        let Some(tx_id) = self.hash() else {
            return false;
        };
        if self.input_signatures.len() != self.unsigned.inputs.len() {
            return false;
        }
        self.unsigned
            .inputs
            .iter()
            .zip(self.input_signatures.iter())
            .all(|(input, sig)| input.unlock.public_key().verify(tx_id, sig))
    }

    /// Build the deterministic coinbase of a block: no script, minimal gas,
    /// a single time-locked miner output whose additional data binds the
    /// chain index and block timestamp.
    #[must_use]
    pub fn coinbase(
        chain_index: ChainIndex,
        miner_lockup: LockupScript,
        amount: U256,
        block_ts: u64,
        network_id: u8,
    ) -> Self {
        let data = CoinbaseData {
            from_group: chain_index.from,
            to_group: chain_index.to,
            block_ts,
        };
        let output = AssetOutput {
            amount,
            lockup: miner_lockup,
            lock_time: Some(block_ts + COINBASE_LOCKUP_PERIOD_MS),
            tokens: vec![],
            additional_data: data.to_bytes(),
        };
        Self::from_unsigned(UnsignedTx {
            network_id,
            script: None,
            gas_amount: MINIMAL_GAS,
            gas_price: MINIMAL_GAS_PRICE,
            inputs: vec![],
            fixed_outputs: vec![output],
        })
    }
}

impl Encode for Transaction {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.unsigned, encoder)?;
        bincode::Encode::encode(&self.contract_inputs, encoder)?;
        bincode::Encode::encode(&self.generated_outputs, encoder)?;
        bincode::Encode::encode(&self.input_signatures, encoder)?;
        bincode::Encode::encode(&self.contract_signatures, encoder)?;
        Ok(())
    }
}

impl Decode for Transaction {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let mut tx = Self {
            unsigned: bincode::Decode::decode(decoder)?,
            contract_inputs: bincode::Decode::decode(decoder)?,
            generated_outputs: bincode::Decode::decode(decoder)?,
            input_signatures: bincode::Decode::decode(decoder)?,
            contract_signatures: bincode::Decode::decode(decoder)?,
            hash: None,
        };
        tx.compute_hash();
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_unsigned(gas_price: u64) -> UnsignedTx {
        UnsignedTx {
            network_id: 0,
            script: None,
            gas_amount: MINIMAL_GAS,
            gas_price,
            inputs: vec![],
            fixed_outputs: vec![AssetOutput::plain(
                U256::from_u64(500),
                LockupScript::P2pkh(Hash256::hash_from_slice("addr", "test")),
            )],
        }
    }

    #[test]
    fn tx_id_commits_to_unsigned_only() {
        let mut a = Transaction::from_unsigned(test_unsigned(MINIMAL_GAS_PRICE));
        let b = Transaction::from_unsigned(test_unsigned(MINIMAL_GAS_PRICE));
        assert_eq!(a.hash(), b.hash());

        a.input_signatures.push(Signature::zero());
        a.compute_hash();
        assert_eq!(a.hash(), b.hash());

        let c = Transaction::from_unsigned(test_unsigned(MINIMAL_GAS_PRICE + 1));
        assert_ne!(c.hash(), b.hash());
    }

    #[test]
    fn codec_roundtrip_restores_hash() {
        let tx = Transaction::from_unsigned(test_unsigned(MINIMAL_GAS_PRICE));
        let bytes = tx.to_bytes();
        let decoded: Transaction = crate::codec::decode(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn gas_fee_multiplies_amount_and_price() {
        let tx = Transaction::from_unsigned(test_unsigned(3));
        assert_eq!(tx.gas_fee(), U256::from_u64(MINIMAL_GAS * 3));
    }

    #[test]
    fn coinbase_shape() {
        let cb = Transaction::coinbase(
            ChainIndex::new(1, 2),
            LockupScript::P2pkh(Hash256::hash_from_slice("miner", "test")),
            U256::from_u64(100),
            1_000,
            0,
        );
        assert!(cb.unsigned.script.is_none());
        assert!(cb.unsigned.inputs.is_empty());
        assert_eq!(cb.unsigned.gas_amount, MINIMAL_GAS);
        assert_eq!(cb.unsigned.gas_price, MINIMAL_GAS_PRICE);
        assert_eq!(cb.unsigned.fixed_outputs.len(), 1);

        let out = &cb.unsigned.fixed_outputs[0];
        assert_eq!(out.lock_time, Some(1_000 + COINBASE_LOCKUP_PERIOD_MS));
        let data = CoinbaseData::from_bytes(&out.additional_data).unwrap();
        assert_eq!(data.from_group, 1);
        assert_eq!(data.to_group, 2);
        assert_eq!(data.block_ts, 1_000);
    }

    #[test]
    fn output_token_sums() {
        let token = Hash256::hash_from_slice("token", "test");
        let mut unsigned = test_unsigned(MINIMAL_GAS_PRICE);
        unsigned.fixed_outputs[0].tokens = vec![(token, U256::from_u64(4))];
        let mut tx = Transaction::from_unsigned(unsigned);
        tx.generated_outputs.push(TxOutput::Asset(AssetOutput {
            amount: U256::from_u64(1),
            lockup: LockupScript::P2pkh(Hash256::zero()),
            lock_time: None,
            tokens: vec![(token, U256::from_u64(6))],
            additional_data: vec![],
        }));
        assert_eq!(tx.output_tokens().get(&token), Some(&U256::from_u64(10)));
        assert_eq!(tx.output_amount(), U256::from_u64(501));
    }
}
