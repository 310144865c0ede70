//! Random-beacon threshold signatures ("Combined" signing mode).
//!
//! A trusted dealer shares the beacon secret via Shamir secret
//! sharing over the BLS12-381 scalar field; each replica signs with
//! its share, and any threshold-sized subset of partial signatures
//! reconstructs the group signature via Lagrange interpolation at
//! `x = 0`. Verification is a standard BLS pairing check against the
//! group public key, so a reconstructed signature is indistinguishable
//! from one produced by a single full key.

use std::collections::HashMap;

use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HotStuffError;

fn hash_to_g1(message: &[u8]) -> G1Projective {
    let mut hasher = Sha256::new();
    hasher.update(message);
    let hash = hasher.finalize();

    let scalar = Scalar::from_bytes_wide(&{
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&hash);
        if message.len() >= 32 {
            wide[32..].copy_from_slice(&message[..32]);
        } else {
            wide[32..32 + message.len()].copy_from_slice(message);
        }
        wide
    });

    G1Projective::generator() * scalar
}

/// A partial signature produced by a single share-holder.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BeaconSignatureShare {
    pub index: u64,
    point: G1Affine,
}

impl BeaconSignatureShare {
    pub fn to_bytes(&self) -> [u8; 48] {
        self.point.to_compressed()
    }

    /// Parses a partial signature's point, pairing it with a share
    /// index supplied out-of-band (the wire format for a vote's
    /// `sig_data` carries the point only; the signer's committee
    /// position supplies the index).
    pub fn from_indexed_bytes(index: u64, bytes: &[u8]) -> Result<Self, HotStuffError> {
        if bytes.len() != 48 {
            return Err(HotStuffError::Crypto("invalid beacon share length".to_string()));
        }
        let mut arr = [0u8; 48];
        arr.copy_from_slice(bytes);
        let point = Option::from(G1Affine::from_compressed(&arr))
            .ok_or_else(|| HotStuffError::Crypto("invalid beacon share point".to_string()))?;
        Ok(Self { index, point })
    }
}

/// The combined threshold signature: a single G1 point, verifiable
/// against the group public key exactly like an individual BLS signature.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BeaconSignature(#[serde(with = "g1_bytes")] G1Affine);

mod g1_bytes {
    use bls12_381::G1Affine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(point: &G1Affine, s: S) -> Result<S::Ok, S::Error> {
        point.to_compressed().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<G1Affine, D::Error> {
        let bytes = <[u8; 48]>::deserialize(d)?;
        Option::from(G1Affine::from_compressed(&bytes))
            .ok_or_else(|| serde::de::Error::custom("invalid G1 point"))
    }
}

impl BeaconSignature {
    pub fn to_bytes(&self) -> [u8; 48] {
        self.0.to_compressed()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HotStuffError> {
        if bytes.len() != 48 {
            return Err(HotStuffError::Crypto("invalid beacon signature length".to_string()));
        }
        let mut arr = [0u8; 48];
        arr.copy_from_slice(bytes);
        let point = Option::from(G1Affine::from_compressed(&arr))
            .ok_or_else(|| HotStuffError::Crypto("invalid beacon signature point".to_string()))?;
        Ok(Self(point))
    }

    pub fn verify(&self, message: &[u8], group_public_key: &BeaconPublicKey) -> bool {
        let lhs = pairing(&hash_to_g1(message).to_affine(), &group_public_key.0);
        let rhs = pairing(&self.0, &G2Affine::generator());
        lhs == rhs
    }
}

/// A public key: either an individual share's public key or the group's.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BeaconPublicKey(#[serde(with = "g2_bytes")] G2Affine);

mod g2_bytes {
    use bls12_381::G2Affine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(point: &G2Affine, s: S) -> Result<S::Ok, S::Error> {
        point.to_compressed().to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<G2Affine, D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(d)?;
        if bytes.len() != 96 {
            return Err(serde::de::Error::custom("invalid G2 point length"));
        }
        let mut arr = [0u8; 96];
        arr.copy_from_slice(&bytes);
        Option::from(G2Affine::from_compressed(&arr))
            .ok_or_else(|| serde::de::Error::custom("invalid G2 point"))
    }
}

impl BeaconPublicKey {
    pub fn to_bytes(&self) -> [u8; 96] {
        self.0.to_compressed()
    }
}

/// A single replica's share of the beacon secret.
#[derive(Clone)]
pub struct BeaconSecretKeyShare {
    pub index: u64,
    scalar: Scalar,
}

impl BeaconSecretKeyShare {
    pub fn sign(&self, message: &[u8]) -> BeaconSignatureShare {
        let point = (hash_to_g1(message) * self.scalar).to_affine();
        BeaconSignatureShare {
            index: self.index,
            point,
        }
    }

    pub fn public_share(&self) -> BeaconPublicKey {
        BeaconPublicKey((G2Projective::generator() * self.scalar).to_affine())
    }
}

/// Trusted-dealer Shamir sharing of a random beacon secret: a
/// degree-`threshold - 1` polynomial over the scalar field, shares are
/// `f(1), f(2), ..., f(n)`, and the group public key commits to `f(0)`.
pub struct BeaconKeyGen;

impl BeaconKeyGen {
    /// Returns `(group_public_key, shares)`. `shares[i]` belongs to
    /// participant index `i + 1` (Shamir shares are conventionally
    /// 1-indexed so that `x = 0` is reserved for the secret itself).
    pub fn generate<R: RngCore + CryptoRng>(
        threshold: usize,
        total: usize,
        rng: &mut R,
    ) -> Result<(BeaconPublicKey, Vec<BeaconSecretKeyShare>), HotStuffError> {
        if threshold == 0 || threshold > total {
            return Err(HotStuffError::Crypto(format!(
                "invalid threshold {threshold} for {total} participants"
            )));
        }

        let coefficients: Vec<Scalar> = (0..threshold).map(|_| Scalar::random(&mut *rng)).collect();
        let secret = coefficients[0];
        let group_public_key = BeaconPublicKey((G2Projective::generator() * secret).to_affine());

        let shares = (1..=total as u64)
            .map(|index| {
                let x = Scalar::from(index);
                let mut acc = Scalar::zero();
                let mut power = Scalar::one();
                for coeff in &coefficients {
                    acc += *coeff * power;
                    power *= x;
                }
                BeaconSecretKeyShare { index, scalar: acc }
            })
            .collect();

        Ok((group_public_key, shares))
    }
}

/// Reconstructs the group signature from at least `threshold` shares
/// via Lagrange interpolation at `x = 0`.
pub fn combine_shares(
    shares: &[BeaconSignatureShare],
    threshold: usize,
) -> Result<BeaconSignature, HotStuffError> {
    if shares.len() < threshold {
        return Err(HotStuffError::ThresholdCombinationFailed(format!(
            "have {} shares, need {threshold}",
            shares.len()
        )));
    }

    let mut seen = HashMap::new();
    for share in shares {
        seen.entry(share.index).or_insert(share);
    }
    let used: Vec<&BeaconSignatureShare> = seen.into_values().take(threshold).collect();
    if used.len() < threshold {
        return Err(HotStuffError::ThresholdCombinationFailed(
            "duplicate share indices leave fewer than threshold distinct shares".to_string(),
        ));
    }

    let xs: Vec<Scalar> = used.iter().map(|s| Scalar::from(s.index)).collect();
    let mut acc = G1Projective::identity();
    for (i, share) in used.iter().enumerate() {
        let mut numerator = Scalar::one();
        let mut denominator = Scalar::one();
        for (j, xj) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator *= *xj;
            denominator *= *xj - xs[i];
        }
        let inv = Option::<Scalar>::from(denominator.invert()).ok_or_else(|| {
            HotStuffError::ThresholdCombinationFailed("degenerate Lagrange denominator".to_string())
        })?;
        let lambda = numerator * inv;
        acc += G1Projective::from(share.point) * lambda;
    }

    Ok(BeaconSignature(acc.to_affine()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    #[test]
    fn threshold_reconstruction_matches_direct_signing() {
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        let (group_pk, shares) = BeaconKeyGen::generate(3, 5, &mut rng).unwrap();
        let message = b"view 42 block abc";

        let partials: Vec<_> = shares[..3].iter().map(|s| s.sign(message)).collect();
        let combined = combine_shares(&partials, 3).unwrap();
        assert!(combined.verify(message, &group_pk));

        // A different 3-of-5 subset reconstructs the identical signature.
        let other_partials: Vec<_> = shares[2..].iter().map(|s| s.sign(message)).collect();
        let other_combined = combine_shares(&other_partials, 3).unwrap();
        assert_eq!(combined, other_combined);
    }

    #[test]
    fn below_threshold_is_rejected() {
        let mut rng = ChaCha20Rng::from_seed([8u8; 32]);
        let (_group_pk, shares) = BeaconKeyGen::generate(3, 5, &mut rng).unwrap();
        let partials: Vec<_> = shares[..2].iter().map(|s| s.sign(b"msg")).collect();
        assert!(combine_shares(&partials, 3).is_err());
    }
}
