pub mod error;
pub mod config;
pub mod metrics;
pub mod types;
pub mod crypto;
pub mod wire;
pub mod committee;
pub mod persister;
pub mod signer;
pub mod validator;
pub mod forks;
pub mod vote_aggregator;
pub mod pacemaker;
pub mod block_producer;
pub mod notifier;
pub mod external;
pub mod event_handler;
pub mod event_loop;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{ErrorKind, HotStuffError};
pub use types::{Block, Hash, Identity, Proposal, QuorumCert, View, Vote};

pub use event_handler::EventHandler;
pub use event_loop::EventLoop;
