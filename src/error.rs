//! Error taxonomy for the consensus core.
//!
//! Every variant maps to one of the five kinds the EventHandler
//! dispatch loop needs to decide what to do with a failed input: drop
//! it silently, buffer it, report it to the notifier, or shut the
//! whole loop down.

use thiserror::Error;

/// Severity/handling class for a `HotStuffError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// References a view at or below the pruned/finalised watermark. Drop silently.
    Stale,
    /// Cryptographically or structurally bad. Report via notifier, do not retry.
    Invalid,
    /// References a block not yet known. Buffer until the ancestor arrives or is pruned away.
    Missing,
    /// Double-proposal or double-vote. Report via notifier; both observations are retained.
    Equivocation,
    /// Not enough stake yet to form a QC. Not an error to the caller; keep waiting.
    Threshold,
    /// Persistence failure or invariant violation. The event loop shuts down.
    Fatal,
}

#[derive(Error, Debug)]
pub enum HotStuffError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("signer {0} is not a staked member of the committee for this block")]
    InvalidSigner(crate::types::NodeId),

    #[error("signature uses domain tag for a different purpose: {0}")]
    IncorrectDomain(String),

    #[error("insufficient aggregated stake to form a quorum certificate")]
    InsufficientStake,

    #[error("input references view {view} at or below the pruned/finalised watermark {floor}")]
    StaleView { view: View, floor: View },

    #[error("block {0} is not yet known")]
    MissingBlock(crate::types::Hash),

    #[error("equivocation detected: {0}")]
    Equivocation(String),

    #[error("double vote detected: signer cast conflicting votes at the same view")]
    DoubleVote(Box<(crate::types::Vote, crate::types::Vote)>),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("invalid quorum certificate: {0}")]
    InvalidQc(String),

    #[error("invalid fork choice: no QC strictly below current view {0}")]
    InvalidForkChoice(View),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("threshold combination failed: {0}")]
    ThresholdCombinationFailed(String),

    #[error("event loop is shutting down")]
    Shutdown,
}

use crate::types::View;

impl HotStuffError {
    /// Classify this error into one of the five handling kinds.
    pub fn classify(&self) -> ErrorKind {
        match self {
            HotStuffError::StaleView { .. } => ErrorKind::Stale,
            HotStuffError::MissingBlock(_) => ErrorKind::Missing,
            HotStuffError::Equivocation(_) | HotStuffError::DoubleVote(_) => ErrorKind::Equivocation,
            HotStuffError::InsufficientStake => ErrorKind::Threshold,
            HotStuffError::Io(_)
            | HotStuffError::Persistence(_)
            | HotStuffError::InvariantViolation(_)
            | HotStuffError::Shutdown => ErrorKind::Fatal,
            _ => ErrorKind::Invalid,
        }
    }
}
