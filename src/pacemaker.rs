//! View tracking and timeout scheduling.
//!
//! `PaceMaker` is a plain synchronous state machine: it decides what
//! view the replica should be in and how long the next timer should
//! run for, but owns no timer itself — the actual `tokio::time::Sleep`
//! lives in the event loop, which asks this type for a `Duration` each
//! time it (re)arms.

use std::time::Duration;

use crate::config::ConsensusConfig;
use crate::error::HotStuffError;
use crate::forks::Forks;
use crate::persister::Persister;
use crate::types::View;

/// What kind of timeout should currently be running for the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Ordinary replica timeout: no QC has progressed this view yet.
    Replica,
    /// Shorter leader-side timeout while actively collecting votes for
    /// a proposal this replica already made.
    VoteCollection,
}

/// Outcome of feeding an event into the PaceMaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    /// View did not change.
    None,
    /// View advanced by exactly one.
    Advanced(View),
    /// View jumped ahead by more than one, driven by a QC far in the future.
    SkippedAhead(View),
}

pub struct PaceMaker {
    cur_view: View,
    current_timeout: Duration,
    config: ConsensusConfig,
}

impl PaceMaker {
    /// Recovers initial state from the highest view known at start-up
    /// (the max of the Persister's last-started view and whatever
    /// Forks already has on disk/in memory).
    pub fn new(config: ConsensusConfig, recovered_view: View) -> Result<Self, HotStuffError> {
        config.validate()?;
        Ok(Self {
            cur_view: recovered_view,
            current_timeout: config.initial_timeout(),
            config,
        })
    }

    /// Builds a `PaceMaker` whose initial view is the highest one known
    /// at start-up: the Persister's durable `{last_voted_view,
    /// last_started_view}` and whatever Forks already holds (its
    /// highest known QC's view), whichever is greatest. This is the
    /// entry point real replica bootstrap should use instead of `new`
    /// directly, so a restart never re-enters a view it already left.
    pub fn recover(
        config: ConsensusConfig,
        persister: &dyn Persister,
        forks: &Forks,
    ) -> Result<Self, HotStuffError> {
        let recovered_view = persister
            .last_started_view()?
            .max(persister.last_voted_view()?)
            .max(forks.highest_qc().view);
        Self::new(config, recovered_view)
    }

    pub fn current_view(&self) -> View {
        self.cur_view
    }

    pub fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    /// A QC advances the view to `qc_view + 1`; if that is more than
    /// one past the current view, this is a skip-ahead.
    pub fn advance_on_qc(&mut self, qc_view: View) -> ViewChange {
        if qc_view < self.cur_view {
            return ViewChange::None;
        }
        let next = qc_view.saturating_add(1);
        self.progress(next)
    }

    /// A timeout fires at exactly `cur_view`; it only ever moves the
    /// view forward by one, and multiplicatively backs off `T`.
    pub fn advance_on_timeout(&mut self) -> ViewChange {
        self.current_timeout = scale(self.current_timeout, self.config.timeout_increase_factor)
            .max(self.config.min_timeout());
        let next = self.cur_view.saturating_add(1);
        self.progress(next)
    }

    fn progress(&mut self, next: View) -> ViewChange {
        if next <= self.cur_view {
            return ViewChange::None;
        }
        let skipped = next > self.cur_view + 1;
        self.cur_view = next;
        if skipped {
            ViewChange::SkippedAhead(next)
        } else {
            ViewChange::Advanced(next)
        }
    }

    /// Called once a QC forms for the current view: rewards progress
    /// by multiplicatively shrinking `T`, clamped at the floor.
    pub fn record_progress(&mut self) {
        self.current_timeout = scale(self.current_timeout, self.config.timeout_decrease_factor)
            .max(self.config.min_timeout());
    }

    /// The duration the next timer should run for, and which kind of
    /// timeout it is: a leader already holding the parent QC gets the
    /// shorter vote-collection window instead of the full replica timeout.
    pub fn next_timeout(&self, is_leader_with_parent_qc: bool) -> (Duration, TimeoutKind) {
        if is_leader_with_parent_qc {
            let fraction = self.config.vote_aggregation_timeout_fraction;
            let millis = (self.current_timeout.as_millis() as f64 * fraction) as u64;
            (Duration::from_millis(millis).max(self.config.min_timeout()), TimeoutKind::VoteCollection)
        } else {
            (self.current_timeout, TimeoutKind::Replica)
        }
    }

    pub fn block_rate_delay(&self) -> Duration {
        self.config.block_rate_delay()
    }
}

fn scale(duration: Duration, factor: f64) -> Duration {
    let millis = (duration.as_millis() as f64 * factor).round();
    if millis <= 0.0 {
        Duration::from_millis(0)
    } else if millis >= u64::MAX as f64 {
        Duration::from_millis(u64::MAX)
    } else {
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persister::{InMemoryPersister, Persister};
    use crate::types::{Block, Hash, NodeId, QuorumCert, Timestamp};

    fn genesis() -> Block {
        Block::new(
            0,
            Hash::zero(),
            NodeId::from_bytes([0u8; 32]),
            Hash::zero(),
            Timestamp::from_nanos(0),
            QuorumCert::genesis(),
        )
    }

    #[test]
    fn qc_far_ahead_is_reported_as_a_skip() {
        let mut pm = PaceMaker::new(ConsensusConfig::default(), 3).unwrap();
        let change = pm.advance_on_qc(12);
        assert_eq!(change, ViewChange::SkippedAhead(13));
        assert_eq!(pm.current_view(), 13);
    }

    #[test]
    fn consecutive_qc_is_a_plain_advance() {
        let mut pm = PaceMaker::new(ConsensusConfig::default(), 3).unwrap();
        let change = pm.advance_on_qc(3);
        assert_eq!(change, ViewChange::Advanced(4));
    }

    #[test]
    fn timeout_increases_then_progress_decreases() {
        let mut pm = PaceMaker::new(ConsensusConfig::default(), 0).unwrap();
        let initial = pm.current_timeout();
        pm.advance_on_timeout();
        assert!(pm.current_timeout() > initial);

        let after_timeout = pm.current_timeout();
        pm.record_progress();
        assert!(pm.current_timeout() < after_timeout);
    }

    #[test]
    fn timeout_never_drops_below_the_configured_floor() {
        let mut config = ConsensusConfig::default();
        config.initial_timeout_ms = 300;
        config.min_timeout_ms = 250;
        config.timeout_decrease_factor = 0.1;
        let mut pm = PaceMaker::new(config, 0).unwrap();
        for _ in 0..10 {
            pm.record_progress();
        }
        assert!(pm.current_timeout() >= Duration::from_millis(250));
    }

    #[test]
    fn stale_qc_view_does_not_move_the_view_backwards() {
        let mut pm = PaceMaker::new(ConsensusConfig::default(), 10).unwrap();
        let change = pm.advance_on_qc(2);
        assert_eq!(change, ViewChange::None);
        assert_eq!(pm.current_view(), 10);
    }

    #[test]
    fn recover_picks_the_highest_of_persister_and_forks() {
        let persister = InMemoryPersister::new();
        persister.put_started_view(7).unwrap();
        persister.put_voted_view(4).unwrap();
        let forks = Forks::new(genesis());

        let pm = PaceMaker::recover(ConsensusConfig::default(), &persister, &forks).unwrap();
        assert_eq!(pm.current_view(), 7);
    }

    #[test]
    fn recover_falls_back_to_forks_when_it_leads_the_persister() {
        let persister = InMemoryPersister::new();
        persister.put_started_view(1).unwrap();
        let mut forks = Forks::new(genesis());

        let b1 = Block::new(
            5,
            genesis().block_id,
            NodeId::from_bytes([1u8; 32]),
            Hash::from_bytes(b"payload-1"),
            Timestamp::from_nanos(1),
            QuorumCert::genesis(),
        );
        forks.add_block(b1.clone()).unwrap();
        let qc_for_b1 = QuorumCert::new(b1.view, b1.block_id, vec![NodeId::from_bytes([1u8; 32])], vec![1, 2, 3]);
        forks.add_qc(qc_for_b1).unwrap();

        let pm = PaceMaker::recover(ConsensusConfig::default(), &persister, &forks).unwrap();
        assert_eq!(pm.current_view(), 5, "forks' highest QC (view 5) must win when it exceeds the persisted view");
    }

    #[test]
    fn recover_starts_from_zero_on_a_fresh_replica() {
        let persister = InMemoryPersister::new();
        let forks = Forks::new(genesis());
        let pm = PaceMaker::recover(ConsensusConfig::default(), &persister, &forks).unwrap();
        assert_eq!(pm.current_view(), 0);
    }
}
