// Copyright (c) 2024 The Latticecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::Hash256;
use bincode::{Decode, Encode};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use std::fmt;
use std::hash::Hash as HashTrait;

/// Contract ids are derived hashes of the creating transaction.
pub type ContractId = Hash256;

/// Token ids are the contract id of the issuing contract.
pub type TokenId = Hash256;

/// Compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode)]
pub struct PublicKey(pub [u8; 33]);

impl PublicKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 33])
    }

    /// Hash of the key used by pay-to-pubkey-hash lockups.
    #[must_use]
    pub fn to_lockup_hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.0, "latticecoin.address")
    }

    /// Verify an ECDSA signature over a prehashed 32-byte message.
    #[must_use]
    pub fn verify(&self, msg_hash: &Hash256, signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = EcdsaSignature::from_slice(&signature.0) else {
            return false;
        };
        key.verify_prehash(msg_hash.as_bytes(), &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// Raw 64-byte ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    #[must_use]
    pub fn zero() -> Self {
        Self([0; 64])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Encode for Signature {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.0, encoder)?;
        Ok(())
    }
}

impl Decode for Signature {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let bytes: [u8; 64] = bincode::Decode::decode(decoder)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// Spending predicate attached to an output.
#[derive(Clone, Copy, PartialEq, Eq, HashTrait, Encode, Decode, Debug)]
pub enum LockupScript {
    /// Pay to the hash of a public key.
    P2pkh(Hash256),

    /// Owned by a contract.
    P2c(ContractId),
}

impl LockupScript {
    #[must_use]
    pub fn p2pkh(key: &PublicKey) -> Self {
        Self::P2pkh(key.to_lockup_hash())
    }

    /// The burn sink: nothing hashes to all-zeroes.
    #[must_use]
    pub fn burn() -> Self {
        Self::P2pkh(Hash256::zero())
    }

    #[must_use]
    pub fn is_asset(&self) -> bool {
        matches!(self, Self::P2pkh(_))
    }

    #[must_use]
    pub fn is_contract(&self) -> bool {
        matches!(self, Self::P2c(_))
    }

    #[must_use]
    pub fn script_hint(&self) -> Hash256 {
        match self {
            Self::P2pkh(h) => *h,
            Self::P2c(id) => *id,
        }
    }

    /// Group an output locked by this script belongs to.
    #[must_use]
    pub fn group_index(&self, groups: u16) -> u16 {
        debug_assert!(groups > 0);
        self.script_hint().low_u16() % groups
    }
}

/// Witness data on a spending input, matched against the output's lockup.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Debug)]
pub enum UnlockScript {
    /// Reveal the public key hashing to the lockup.
    P2pkh(PublicKey),
}

impl UnlockScript {
    /// Whether this witness satisfies the given lockup. Signature checks
    /// happen separately against the transaction id.
    #[must_use]
    pub fn unlocks(&self, lockup: &LockupScript) -> bool {
        match (self, lockup) {
            (Self::P2pkh(key), LockupScript::P2pkh(hash)) => &key.to_lockup_hash() == hash,
            (Self::P2pkh(_), LockupScript::P2c(_)) => false,
        }
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Self::P2pkh(key) => key,
        }
    }
}
