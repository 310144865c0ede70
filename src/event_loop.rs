//! The single cooperative task that serialises every consensus input.
//!
//! Three channels feed it: locally-produced proposals/votes, remote
//! ones arriving over the network, and timeout ticks from the
//! PaceMaker's timer. `tokio::select!` with `biased;` drains them in
//! that priority order so a flood of remote traffic can never starve
//! local progress or timeout handling.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ErrorKind, HotStuffError};
use crate::event_handler::EventHandler;
use crate::types::{Proposal, Vote};
use crate::wire::WireMessage;

pub enum LocalInput {
    Proposal(Proposal),
    Vote(Vote),
}

pub enum RemoteInput {
    Message(WireMessage),
}

/// Handles to feed inputs into a running [`EventLoop`] from other tasks.
#[derive(Clone)]
pub struct EventLoopHandle {
    local_tx: mpsc::Sender<LocalInput>,
    remote_tx: mpsc::Sender<RemoteInput>,
    shutdown_tx: mpsc::Sender<()>,
}

impl EventLoopHandle {
    pub async fn submit_local_proposal(&self, proposal: Proposal) -> Result<(), HotStuffError> {
        self.local_tx
            .send(LocalInput::Proposal(proposal))
            .await
            .map_err(|_| HotStuffError::Shutdown)
    }

    pub async fn submit_local_vote(&self, vote: Vote) -> Result<(), HotStuffError> {
        self.local_tx.send(LocalInput::Vote(vote)).await.map_err(|_| HotStuffError::Shutdown)
    }

    pub async fn submit_remote_message(&self, message: WireMessage) -> Result<(), HotStuffError> {
        self.remote_tx
            .send(RemoteInput::Message(message))
            .await
            .map_err(|_| HotStuffError::Shutdown)
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

pub struct EventLoop {
    handler: EventHandler,
    local_rx: mpsc::Receiver<LocalInput>,
    remote_rx: mpsc::Receiver<RemoteInput>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl EventLoop {
    pub fn new(handler: EventHandler, channel_capacity: usize) -> (Self, EventLoopHandle) {
        let (local_tx, local_rx) = mpsc::channel(channel_capacity);
        let (remote_tx, remote_rx) = mpsc::channel(channel_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                handler,
                local_rx,
                remote_rx,
                shutdown_rx,
            },
            EventLoopHandle {
                local_tx,
                remote_tx,
                shutdown_tx,
            },
        )
    }

    /// Runs until a shutdown signal arrives or every sender handle is
    /// dropped. Returns the error that caused a `Fatal`-classified
    /// shutdown, if any. The initial timer is armed from the
    /// handler's own view of the current view/timeout rather than a
    /// caller-supplied duration, so recovery after a restart picks up
    /// the right schedule immediately.
    pub async fn run(mut self) -> Option<HotStuffError> {
        let (mut timeout_duration, _) = self.handler.timer_directive();
        let mut timer = Box::pin(tokio::time::sleep(timeout_duration));

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    return None;
                }

                local = self.local_rx.recv() => {
                    match local {
                        Some(input) => {
                            if let Some(err) = self.dispatch_local(input).await {
                                return Some(err);
                            }
                            if let Some(err) = self.drain_own_proposals().await {
                                return Some(err);
                            }
                            (timeout_duration, _) = self.handler.timer_directive();
                            timer.as_mut().reset(Instant::now() + timeout_duration);
                        }
                        None => return None,
                    }
                }

                _ = &mut timer => {
                    if let Err(e) = self.handler.on_local_timeout().await {
                        if e.classify() == ErrorKind::Fatal {
                            return Some(e);
                        }
                    }
                    if let Some(err) = self.drain_own_proposals().await {
                        return Some(err);
                    }
                    (timeout_duration, _) = self.handler.timer_directive();
                    timer.as_mut().reset(Instant::now() + timeout_duration);
                }

                remote = self.remote_rx.recv() => {
                    match remote {
                        Some(input) => {
                            if let Some(err) = self.dispatch_remote(input).await {
                                return Some(err);
                            }
                            if let Some(err) = self.drain_own_proposals().await {
                                return Some(err);
                            }
                            (timeout_duration, _) = self.handler.timer_directive();
                            timer.as_mut().reset(Instant::now() + timeout_duration);
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    async fn dispatch_local(&mut self, input: LocalInput) -> Option<HotStuffError> {
        let result = match input {
            LocalInput::Proposal(p) => self.handler.on_receive_proposal(p).await,
            LocalInput::Vote(v) => self.handler.on_receive_vote(v).await,
        };
        self.classify_and_maybe_fail(result)
    }

    async fn dispatch_remote(&mut self, input: RemoteInput) -> Option<HotStuffError> {
        let RemoteInput::Message(message) = input;
        let result = match message {
            WireMessage::Proposal(p) => self.handler.on_receive_proposal(p).await,
            WireMessage::Vote(v) => self.handler.on_receive_vote(v).await,
        };
        self.classify_and_maybe_fail(result)
    }

    /// Feeds back every proposal the handler produced for itself while
    /// handling the input just dispatched. Iterative, not recursive:
    /// each self-proposal can enqueue another (e.g. a committee of one
    /// forming its own QC instantly and moving straight to the next
    /// view), so this keeps draining until the queue runs dry.
    async fn drain_own_proposals(&mut self) -> Option<HotStuffError> {
        loop {
            let batch = self.handler.take_own_proposals();
            if batch.is_empty() {
                return None;
            }
            for proposal in batch {
                let result = self.handler.on_receive_proposal(proposal).await;
                if let Some(err) = self.classify_and_maybe_fail(result) {
                    return Some(err);
                }
            }
        }
    }

    fn classify_and_maybe_fail(&self, result: Result<(), HotStuffError>) -> Option<HotStuffError> {
        match result {
            Ok(()) => None,
            Err(e) if e.classify() == ErrorKind::Fatal => Some(e),
            Err(_) => None,
        }
    }
}
