//! Packs the staking and beacon halves of a "Combined" signature mode
//! vote into the single opaque `sig_data` blob the wire format
//! carries, and splits it back apart on the receiving end.

use crate::error::HotStuffError;

/// Joins two byte blobs as `u32_LE(len(a)) ‖ a ‖ b`.
pub struct Combiner;

impl Combiner {
    pub fn join(staking_part: &[u8], beacon_part: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + staking_part.len() + beacon_part.len());
        out.extend_from_slice(&(staking_part.len() as u32).to_le_bytes());
        out.extend_from_slice(staking_part);
        out.extend_from_slice(beacon_part);
        out
    }

    /// Inverse of [`Combiner::join`]. Returns `(staking_part, beacon_part)`.
    pub fn split(sig_data: &[u8]) -> Result<(&[u8], &[u8]), HotStuffError> {
        if sig_data.len() < 4 {
            return Err(HotStuffError::Crypto("sig_data too short for length prefix".to_string()));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&sig_data[..4]);
        let staking_len = u32::from_le_bytes(len_bytes) as usize;

        let rest = &sig_data[4..];
        if staking_len > rest.len() {
            return Err(HotStuffError::Crypto(
                "sig_data length prefix overruns buffer".to_string(),
            ));
        }
        Ok(rest.split_at(staking_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_split_round_trips() {
        let staking = b"staking-aggregate-bytes";
        let beacon = b"beacon-signature-bytes";
        let combined = Combiner::join(staking, beacon);
        let (recovered_staking, recovered_beacon) = Combiner::split(&combined).unwrap();
        assert_eq!(recovered_staking, staking);
        assert_eq!(recovered_beacon, beacon);
    }

    #[test]
    fn join_then_split_handles_empty_parts() {
        let combined = Combiner::join(&[], &[]);
        let (staking, beacon) = Combiner::split(&combined).unwrap();
        assert!(staking.is_empty());
        assert!(beacon.is_empty());
    }

    #[test]
    fn split_rejects_truncated_input() {
        assert!(Combiner::split(&[1, 0]).is_err());
        assert!(Combiner::split(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
