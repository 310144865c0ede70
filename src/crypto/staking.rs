//! Staking-key signatures ("Single" signing mode, and the staking half
//! of "Combined" mode).
//!
//! Ed25519 via `ed25519-dalek`. Ed25519 signatures don't algebraically
//! aggregate, so a "staking aggregate" here is a bitmap-style
//! aggregate: an ordered list of individual signatures, one per
//! signer, verified independently and carried together.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::HotStuffError;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct StakingPublicKey(#[serde(with = "pk_bytes")] VerifyingKey);

mod pk_bytes {
    use ed25519_dalek::VerifyingKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &VerifyingKey, s: S) -> Result<S::Ok, S::Error> {
        key.to_bytes().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VerifyingKey, D::Error> {
        let bytes = <[u8; 32]>::deserialize(d)?;
        VerifyingKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl StakingPublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, HotStuffError> {
        VerifyingKey::from_bytes(bytes)
            .map(StakingPublicKey)
            .map_err(|e| HotStuffError::Crypto(format!("invalid staking public key: {e}")))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &StakingSignature) -> bool {
        self.0.verify(message, &signature.0).is_ok()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct StakingSignature(#[serde(with = "sig_bytes")] DalekSignature);

mod sig_bytes {
    use ed25519_dalek::Signature;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(sig: &Signature, s: S) -> Result<S::Ok, S::Error> {
        sig.to_bytes().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Signature, D::Error> {
        let bytes = <[u8; 64]>::deserialize(d)?;
        Ok(Signature::from_bytes(&bytes))
    }
}

impl StakingSignature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(DalekSignature::from_bytes(bytes))
    }
}

/// A staking keypair held by a single replica.
pub struct StakingKeyPair {
    signing_key: SigningKey,
    public_key: StakingPublicKey,
}

impl StakingKeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let public_key = StakingPublicKey(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &StakingPublicKey {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> StakingSignature {
        StakingSignature(self.signing_key.sign(message))
    }
}

/// An ordered collection of individually-verified staking signatures,
/// the "aggregate" that the staking half of a combined QC carries.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct StakingAggregate {
    pub entries: Vec<(crate::types::NodeId, StakingSignature)>,
}

impl StakingAggregate {
    pub fn new(entries: Vec<(crate::types::NodeId, StakingSignature)>) -> Self {
        Self { entries }
    }

    /// Verify that every entry is a valid signature over `message` under the
    /// corresponding identity's public key.
    pub fn verify_all(
        &self,
        message: &[u8],
        lookup: impl Fn(&crate::types::NodeId) -> Option<StakingPublicKey>,
    ) -> bool {
        self.entries.iter().all(|(id, sig)| {
            lookup(id)
                .map(|pk| pk.verify(message, sig))
                .unwrap_or(false)
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HotStuffError> {
        bincode::serialize(self).map_err(HotStuffError::Serialization)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HotStuffError> {
        bincode::deserialize(bytes).map_err(HotStuffError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_and_verify_roundtrip() {
        let mut rng = OsRng;
        let kp = StakingKeyPair::generate(&mut rng);
        let sig = kp.sign(b"hello");
        assert!(kp.public_key().verify(b"hello", &sig));
        assert!(!kp.public_key().verify(b"goodbye", &sig));
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let mut rng = OsRng;
        let kp = StakingKeyPair::generate(&mut rng);
        let bytes = kp.public_key().to_bytes();
        let recovered = StakingPublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(kp.public_key(), &recovered);
    }
}
