//! Wire-level message envelope and the fixed byte layout for consensus
//! messages: a small tagged enum carrying the two message kinds this
//! core emits between replicas.

use serde::{Deserialize, Serialize};

use crate::error::HotStuffError;
use crate::types::{Block, Hash, NodeId, Proposal, QuorumCert, Timestamp, Vote};

/// Everything exchanged between replicas. `Network::broadcast`/`send`
/// transport this opaquely; only the EventLoop interprets it.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum WireMessage {
    Proposal(Proposal),
    Vote(Vote),
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, HotStuffError> {
        bincode::serialize(self).map_err(HotStuffError::Serialization)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HotStuffError> {
        bincode::deserialize(bytes).map_err(HotStuffError::Serialization)
    }
}

/// Canonical fixed-layout header encoding, independent of the
/// `bincode`/`serde` envelope above: `view: u64 LE, parent_view: u64
/// LE, parent_id: 32B, proposer_id: 32B, payload_hash: 32B, timestamp:
/// i64 LE ns, parent_voter_ids: Vec<32B>, parent_voter_sig: opaque
/// bytes`. Used where a stable cross-implementation byte format
/// matters more than Rust-side convenience (e.g. signing over the
/// header, audit tooling).
pub fn encode_block_header(block: &Block) -> Vec<u8> {
    let qc = &block.qc_for_parent;
    let mut out = Vec::with_capacity(8 + 8 + 32 * 3 + 8 + 4 + qc.signer_ids.len() * 32 + 4 + qc.sig_data.len());
    out.extend_from_slice(&block.view.to_le_bytes());
    out.extend_from_slice(&qc.view.to_le_bytes());
    out.extend_from_slice(block.parent_id.as_bytes());
    out.extend_from_slice(block.proposer_id.as_bytes());
    out.extend_from_slice(block.payload_hash.as_bytes());
    out.extend_from_slice(&block.timestamp.as_nanos().to_le_bytes());
    out.extend_from_slice(&(qc.signer_ids.len() as u32).to_le_bytes());
    for signer in &qc.signer_ids {
        out.extend_from_slice(signer.as_bytes());
    }
    out.extend_from_slice(&(qc.sig_data.len() as u32).to_le_bytes());
    out.extend_from_slice(&qc.sig_data);
    out
}

pub fn decode_block_header(bytes: &[u8]) -> Result<(u64, Hash, NodeId, Hash, Timestamp, QuorumCert), HotStuffError> {
    let mut cursor = 0usize;
    let take = |cursor: &mut usize, n: usize| -> Result<&[u8], HotStuffError> {
        let slice = bytes
            .get(*cursor..*cursor + n)
            .ok_or_else(|| HotStuffError::Serialization(bincode::ErrorKind::SizeLimit.into()))?;
        *cursor += n;
        Ok(slice)
    };

    let view = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
    let parent_view = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
    let parent_id = Hash::from(<[u8; 32]>::try_from(take(&mut cursor, 32)?).unwrap());
    let proposer_id = NodeId::from_bytes(<[u8; 32]>::try_from(take(&mut cursor, 32)?).unwrap());
    let payload_hash = Hash::from(<[u8; 32]>::try_from(take(&mut cursor, 32)?).unwrap());
    let timestamp = Timestamp::from_nanos(i64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap()));

    let signer_count = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
    let mut signer_ids = Vec::with_capacity(signer_count);
    for _ in 0..signer_count {
        signer_ids.push(NodeId::from_bytes(<[u8; 32]>::try_from(take(&mut cursor, 32)?).unwrap()));
    }

    let sig_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
    let sig_data = take(&mut cursor, sig_len)?.to_vec();

    let qc = QuorumCert::new(parent_view, parent_id, signer_ids, sig_data);
    Ok((view, parent_id, proposer_id, payload_hash, timestamp, qc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId as NId;

    #[test]
    fn block_header_round_trips() {
        let qc = QuorumCert::new(
            4,
            Hash::from_bytes(b"parent"),
            vec![NId::from_bytes([1u8; 32]), NId::from_bytes([2u8; 32])],
            vec![9, 9, 9],
        );
        let block = Block::new(
            5,
            Hash::from_bytes(b"parent"),
            NId::from_bytes([7u8; 32]),
            Hash::from_bytes(b"payload"),
            Timestamp::from_nanos(42),
            qc,
        );

        let encoded = encode_block_header(&block);
        let (view, parent_id, proposer_id, payload_hash, timestamp, qc) =
            decode_block_header(&encoded).unwrap();

        assert_eq!(view, block.view);
        assert_eq!(parent_id, block.parent_id);
        assert_eq!(proposer_id, block.proposer_id);
        assert_eq!(payload_hash, block.payload_hash);
        assert_eq!(timestamp, block.timestamp);
        assert_eq!(qc, block.qc_for_parent);
    }

    #[test]
    fn wire_message_round_trips_through_bincode() {
        let vote = Vote::new(1, Hash::zero(), NId::from_bytes([3u8; 32]), vec![1, 2, 3]);
        let msg = WireMessage::Vote(vote.clone());
        let bytes = msg.encode().unwrap();
        match WireMessage::decode(&bytes).unwrap() {
            WireMessage::Vote(decoded) => assert_eq!(decoded, vote),
            _ => panic!("expected a vote"),
        }
    }
}
