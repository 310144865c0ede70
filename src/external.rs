//! Traits for the collaborators the core consumes but does not own:
//! durable header storage, the peer transport, and payload assembly.
//! Defined with `async_trait` since the EventLoop must not block
//! waiting on I/O or the network while these are invoked.

use async_trait::async_trait;

use crate::error::HotStuffError;
use crate::types::{Block, Hash, NodeId};

/// Durable header storage. The core treats blocks as immutable once
/// inserted; `by_id` is the only read path it needs.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn put(&self, block: &Block) -> Result<(), HotStuffError>;
    async fn by_id(&self, id: &Hash) -> Result<Option<Block>, HotStuffError>;
}

/// Best-effort, unordered message transport between replicas.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(&self, target: NodeId, bytes: Vec<u8>) -> Result<(), HotStuffError>;
    async fn broadcast(&self, targets: &[NodeId], bytes: Vec<u8>) -> Result<(), HotStuffError>;
}

/// Assembles a payload on top of a known parent. The core supplies
/// `parent_id`; the Builder is free to take as long as it needs,
/// provided it does so off the event loop's suspension points.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build_on(&self, parent_id: Hash) -> Result<Hash, HotStuffError>;
}
