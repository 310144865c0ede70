//! Observability fan-out.
//!
//! A small trait plus a distributor holding a vector of trait objects,
//! registered once before the event loop starts. This replaces a
//! mutable-list-behind-a-lock pattern with something that needs no
//! lock on the hot path: registration happens at startup, dispatch
//! only ever reads the vector.

use std::sync::Arc;

use crate::types::{Block, QuorumCert, Vote};

/// One observer of consensus-internal events. Every method has a
/// default no-op body so implementors only override what they need.
/// Implementations must be non-blocking and tolerant of repeated calls
/// with the same arguments.
pub trait Notifier: Send + Sync {
    fn on_entering_view(&self, _view: crate::types::View) {}
    fn on_starting_timeout(&self, _view: crate::types::View, _duration: std::time::Duration) {}
    fn on_reached_timeout(&self, _view: crate::types::View) {}
    fn on_skipped_ahead(&self, _view: crate::types::View) {}
    fn on_qc_incorporated(&self, _qc: &QuorumCert) {}
    fn on_fork_choice_generated(&self, _qc: &QuorumCert) {}
    fn on_block_incorporated(&self, _block: &Block) {}
    fn on_finalized_block(&self, _block: &Block) {}
    fn on_double_propose_detected(&self, _a: &Block, _b: &Block) {}
    fn on_double_voting_detected(&self, _a: &Vote, _b: &Vote) {}
    fn on_invalid_vote_detected(&self, _vote: &Vote, _reason: &str) {}
}

/// Fans every event out to a fixed list of observers, registered once
/// before the loop starts.
#[derive(Default)]
pub struct NotifierDistributor {
    observers: Vec<Arc<dyn Notifier>>,
}

impl NotifierDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Takes an `Arc` rather than a `Box` so
    /// callers (tests, in particular) can retain a handle to inspect
    /// recorded state after registration hands the trait object to
    /// the distributor.
    pub fn register(&mut self, observer: Arc<dyn Notifier>) {
        self.observers.push(observer);
    }
}

impl Notifier for NotifierDistributor {
    fn on_entering_view(&self, view: crate::types::View) {
        for o in &self.observers {
            o.on_entering_view(view);
        }
    }

    fn on_starting_timeout(&self, view: crate::types::View, duration: std::time::Duration) {
        for o in &self.observers {
            o.on_starting_timeout(view, duration);
        }
    }

    fn on_reached_timeout(&self, view: crate::types::View) {
        for o in &self.observers {
            o.on_reached_timeout(view);
        }
    }

    fn on_skipped_ahead(&self, view: crate::types::View) {
        for o in &self.observers {
            o.on_skipped_ahead(view);
        }
    }

    fn on_qc_incorporated(&self, qc: &QuorumCert) {
        for o in &self.observers {
            o.on_qc_incorporated(qc);
        }
    }

    fn on_fork_choice_generated(&self, qc: &QuorumCert) {
        for o in &self.observers {
            o.on_fork_choice_generated(qc);
        }
    }

    fn on_block_incorporated(&self, block: &Block) {
        for o in &self.observers {
            o.on_block_incorporated(block);
        }
    }

    fn on_finalized_block(&self, block: &Block) {
        for o in &self.observers {
            o.on_finalized_block(block);
        }
    }

    fn on_double_propose_detected(&self, a: &Block, b: &Block) {
        for o in &self.observers {
            o.on_double_propose_detected(a, b);
        }
    }

    fn on_double_voting_detected(&self, a: &Vote, b: &Vote) {
        for o in &self.observers {
            o.on_double_voting_detected(a, b);
        }
    }

    fn on_invalid_vote_detected(&self, vote: &Vote, reason: &str) {
        for o in &self.observers {
            o.on_invalid_vote_detected(vote, reason);
        }
    }
}

/// A notifier that forwards every event into `tracing`, matching the
/// density of structured logging used elsewhere in the crate.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn on_entering_view(&self, view: crate::types::View) {
        tracing::debug!(view, "entering view");
    }

    fn on_starting_timeout(&self, view: crate::types::View, duration: std::time::Duration) {
        tracing::trace!(view, ?duration, "starting timeout");
    }

    fn on_reached_timeout(&self, view: crate::types::View) {
        tracing::warn!(view, "timeout reached without progress");
    }

    fn on_skipped_ahead(&self, view: crate::types::View) {
        tracing::info!(view, "skipped ahead via QC");
    }

    fn on_qc_incorporated(&self, qc: &QuorumCert) {
        tracing::debug!(%qc, "qc incorporated");
    }

    fn on_fork_choice_generated(&self, qc: &QuorumCert) {
        tracing::trace!(%qc, "fork choice generated");
    }

    fn on_block_incorporated(&self, block: &Block) {
        tracing::debug!(%block, "block incorporated");
    }

    fn on_finalized_block(&self, block: &Block) {
        tracing::info!(%block, "block finalized");
    }

    fn on_double_propose_detected(&self, a: &Block, b: &Block) {
        tracing::error!(%a, %b, "double propose detected");
    }

    fn on_double_voting_detected(&self, a: &Vote, b: &Vote) {
        tracing::error!(%a, %b, "double voting detected");
    }

    fn on_invalid_vote_detected(&self, vote: &Vote, reason: &str) {
        tracing::warn!(%vote, reason, "invalid vote detected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash, NodeId, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingObserver(Arc<AtomicUsize>);

    impl Notifier for CountingObserver {
        fn on_finalized_block(&self, _block: &Block) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn distributor_fans_out_to_every_registered_observer() {
        let counter_a = Arc::new(AtomicUsize::new(0));
        let counter_b = Arc::new(AtomicUsize::new(0));

        let mut distributor = NotifierDistributor::new();
        distributor.register(Arc::new(CountingObserver(counter_a.clone())));
        distributor.register(Arc::new(CountingObserver(counter_b.clone())));

        let block = Block::new(
            1,
            Hash::zero(),
            NodeId::from_bytes([1u8; 32]),
            Hash::zero(),
            Timestamp::from_nanos(0),
            QuorumCert::genesis(),
        );
        distributor.on_finalized_block(&block);

        assert_eq!(counter_a.load(Ordering::SeqCst), 1);
        assert_eq!(counter_b.load(Ordering::SeqCst), 1);
    }
}
