//! Observability counters for the consensus core.
//!
//! Trimmed to the events the EventLoop actually produces — no network,
//! storage or transaction-pool metrics, since those belong to external
//! collaborators. Kept the teacher's event-channel/collector shape
//! (`MetricEvent` fed through an mpsc channel into a single writer
//! task) so recording a metric from inside the hot loop never blocks
//! on a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusMetrics {
    pub blocks_proposed: u64,
    pub blocks_finalized: u64,
    pub votes_sent: u64,
    pub votes_received: u64,
    pub qcs_formed: u64,
    pub timeouts: u64,
    pub view_changes: u64,
    pub views_skipped: u64,
    pub double_proposals_detected: u64,
    pub double_votes_detected: u64,
    pub current_view: u64,
    pub current_timeout_ms: u64,
    pub last_update_unix_secs: u64,
}

#[derive(Debug, Clone)]
pub enum MetricEvent {
    BlockProposed,
    BlockFinalized,
    VoteSent,
    VoteReceived,
    QcFormed,
    Timeout,
    ViewChange { new_view: u64 },
    ViewSkipped,
    TimeoutRescheduled { new_timeout_ms: u64 },
    DoubleProposalDetected,
    DoubleVoteDetected,
}

/// Records events into an in-memory snapshot, asynchronously, off the
/// EventLoop's hot path.
pub struct MetricsCollector {
    metrics: Arc<RwLock<ConsensusMetrics>>,
    sender: mpsc::Sender<MetricEvent>,
    receiver: Option<mpsc::Receiver<MetricEvent>>,
    blocks_proposed: Arc<AtomicU64>,
    blocks_finalized: Arc<AtomicU64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(1024);
        Self {
            metrics: Arc::new(RwLock::new(ConsensusMetrics::default())),
            sender,
            receiver: Some(receiver),
            blocks_proposed: Arc::new(AtomicU64::new(0)),
            blocks_finalized: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<MetricEvent> {
        self.sender.clone()
    }

    /// Spawns the background task draining events into the shared snapshot.
    /// Call once; subsequent calls are a no-op since the receiver is consumed.
    pub fn start(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        let metrics = self.metrics.clone();
        let blocks_proposed = self.blocks_proposed.clone();
        let blocks_finalized = self.blocks_finalized.clone();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let mut m = metrics.write().await;
                match event {
                    MetricEvent::BlockProposed => {
                        blocks_proposed.fetch_add(1, Ordering::Relaxed);
                        m.blocks_proposed = blocks_proposed.load(Ordering::Relaxed);
                    }
                    MetricEvent::BlockFinalized => {
                        blocks_finalized.fetch_add(1, Ordering::Relaxed);
                        m.blocks_finalized = blocks_finalized.load(Ordering::Relaxed);
                    }
                    MetricEvent::VoteSent => m.votes_sent += 1,
                    MetricEvent::VoteReceived => m.votes_received += 1,
                    MetricEvent::QcFormed => m.qcs_formed += 1,
                    MetricEvent::Timeout => m.timeouts += 1,
                    MetricEvent::ViewChange { new_view } => {
                        m.view_changes += 1;
                        m.current_view = new_view;
                    }
                    MetricEvent::ViewSkipped => m.views_skipped += 1,
                    MetricEvent::TimeoutRescheduled { new_timeout_ms } => {
                        m.current_timeout_ms = new_timeout_ms;
                    }
                    MetricEvent::DoubleProposalDetected => m.double_proposals_detected += 1,
                    MetricEvent::DoubleVoteDetected => m.double_votes_detected += 1,
                }
                m.last_update_unix_secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
            }
        });
    }

    pub async fn snapshot(&self) -> ConsensusMetrics {
        self.metrics.read().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
pub mod prometheus_exporter {
    use prometheus::{IntGauge, Registry};

    use super::ConsensusMetrics;
    use crate::error::HotStuffError;

    /// Mirrors a [`ConsensusMetrics`] snapshot as gauges against a
    /// caller-supplied registry; the caller owns serving `/metrics`.
    /// Gauges rather than counters because the snapshot is
    /// periodically overwritten wholesale, not incremented in place.
    pub struct PrometheusExporter {
        blocks_proposed: IntGauge,
        blocks_finalized: IntGauge,
        qcs_formed: IntGauge,
        timeouts: IntGauge,
        current_view: IntGauge,
    }

    impl PrometheusExporter {
        pub fn register(registry: &Registry) -> Result<Self, HotStuffError> {
            let gauge = |name: &str, help: &str| -> Result<IntGauge, HotStuffError> {
                let gauge = IntGauge::new(name, help)
                    .map_err(|e| HotStuffError::Configuration(e.to_string()))?;
                registry
                    .register(Box::new(gauge.clone()))
                    .map_err(|e| HotStuffError::Configuration(e.to_string()))?;
                Ok(gauge)
            };

            Ok(Self {
                blocks_proposed: gauge("hotstuff2_blocks_proposed", "blocks proposed")?,
                blocks_finalized: gauge("hotstuff2_blocks_finalized", "blocks finalized")?,
                qcs_formed: gauge("hotstuff2_qcs_formed", "quorum certificates formed")?,
                timeouts: gauge("hotstuff2_timeouts", "pacemaker timeouts fired")?,
                current_view: gauge("hotstuff2_current_view", "current pacemaker view")?,
            })
        }

        pub fn update(&self, snapshot: &ConsensusMetrics) {
            self.blocks_proposed.set(snapshot.blocks_proposed as i64);
            self.blocks_finalized.set(snapshot.blocks_finalized as i64);
            self.qcs_formed.set(snapshot.qcs_formed as i64);
            self.timeouts.set(snapshot.timeouts as i64);
            self.current_view.set(snapshot.current_view as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_accumulate_into_snapshot() {
        let mut collector = MetricsCollector::new();
        collector.start();
        let sender = collector.sender();

        sender.send(MetricEvent::BlockProposed).await.unwrap();
        sender.send(MetricEvent::QcFormed).await.unwrap();
        sender
            .send(MetricEvent::ViewChange { new_view: 5 })
            .await
            .unwrap();

        // Give the background task a turn to drain the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.blocks_proposed, 1);
        assert_eq!(snapshot.qcs_formed, 1);
        assert_eq!(snapshot.current_view, 5);
    }
}
