pub mod block;
pub mod hash;
pub mod identity;
pub mod proposal;
pub mod quorum_cert;
pub mod timestamp;
pub mod vote;

pub use block::Block;
pub use hash::Hash;
pub use identity::{Identity, NodeId};
pub use proposal::Proposal;
pub use quorum_cert::QuorumCert;
pub use timestamp::Timestamp;
pub use vote::Vote;

/// Monotonic, gap-allowed logical time unit; each view has one leader.
///
/// Kept as a plain integer rather than a newtype: views are compared,
/// added to, and formatted into logs and wire headers so often that a
/// wrapper buys no safety a reader wouldn't already get from the name.
pub type View = u64;
