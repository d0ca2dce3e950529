//! # Background Worker
//!
//! The worker owns every long-running task of a node: the mining loop (or
//! its PoA variant), peer discovery, transaction broadcast, and resync.
//! [`NodeState`] never spawns anything itself; it nudges the worker through
//! [`Signals`], a set of bounded channels that are cheap to clone.
//!
//! ## Acknowledged cancellation
//!
//! A peer block must never be applied while a local proof search could still
//! commit its own block. The requester and the mining loop therefore meet
//! at a rendezvous:
//!
//! ```text
//! requester                      mining loop
//!    │  CancelRequest{ack,release}   │
//!    ├──────────────────────────────▶│ cancel token, wait for miner
//!    │                          ack  │
//!    │◀──────────────────────────────┤
//!    │  validate + apply peer block  │ (parked)
//!    │  drop MiningPause → release   │
//!    ├──────────────────────────────▶│ resume
//! ```
//!
//! Until the [`MiningPause`] guard drops, the loop starts nothing new.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::network::consensus::ConsensusKind;
use crate::network::node::NodeState;
use crate::network::peers::Peer;
use crate::network::rpc::{PeerClient, PeerError};
use crate::transaction::BlockTx;

// ---------------------------------------------------------------------------
// Rendezvous
// ---------------------------------------------------------------------------

/// A demand that the mining loop stop and stay stopped until released.
#[derive(Debug)]
pub struct CancelRequest {
    ack: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

impl CancelRequest {
    /// Acknowledges the request, then parks until the requester lets go.
    pub(crate) async fn honor(self) {
        let _ = self.ack.send(());
        // An error means the requester dropped its guard; either way we
        // are released.
        let _ = self.release.await;
    }
}

/// Held by whoever paused mining. Dropping it lets the mining loop resume.
#[derive(Debug)]
#[must_use = "mining resumes as soon as the pause is dropped"]
pub struct MiningPause {
    release: Option<oneshot::Sender<()>>,
}

impl Drop for MiningPause {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Sending half of the worker's channels.
#[derive(Clone, Debug)]
pub struct Signals {
    start_mining: mpsc::Sender<()>,
    cancel_mining: mpsc::Sender<CancelRequest>,
    share_tx: mpsc::Sender<BlockTx>,
    resync: mpsc::Sender<()>,
    miner_attached: Arc<AtomicBool>,
}

/// Receiving half, consumed by [`Worker::run`].
#[derive(Debug)]
pub struct WorkerChannels {
    pub(crate) start_mining: mpsc::Receiver<()>,
    pub(crate) cancel_mining: mpsc::Receiver<CancelRequest>,
    pub(crate) share_tx: mpsc::Receiver<BlockTx>,
    pub(crate) resync: mpsc::Receiver<()>,
}

/// Creates a linked signal/channel pair. `share_capacity` bounds the
/// broadcast queue.
pub fn channels(share_capacity: usize) -> (Signals, WorkerChannels) {
    let (start_tx, start_rx) = mpsc::channel(1);
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    let (share_tx, share_rx) = mpsc::channel(share_capacity.max(1));
    let (resync_tx, resync_rx) = mpsc::channel(1);

    (
        Signals {
            start_mining: start_tx,
            cancel_mining: cancel_tx,
            share_tx,
            resync: resync_tx,
            miner_attached: Arc::new(AtomicBool::new(false)),
        },
        WorkerChannels {
            start_mining: start_rx,
            cancel_mining: cancel_rx,
            share_tx: share_rx,
            resync: resync_rx,
        },
    )
}

impl Signals {
    /// Asks the miner to look at the mempool. Coalesces with a pending
    /// request.
    pub fn start_mining(&self) {
        let _ = self.start_mining.try_send(());
    }

    /// Stops any in-flight mining and waits for the miner to confirm.
    ///
    /// Returns at once when no mining loop is attached.
    pub async fn pause_mining(&self) -> MiningPause {
        if !self.miner_attached.load(Ordering::Acquire) {
            return MiningPause { release: None };
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let request = CancelRequest {
            ack: ack_tx,
            release: release_rx,
        };

        if self.cancel_mining.send(request).await.is_err() {
            debug!("mining loop gone; pause granted");
            return MiningPause { release: None };
        }
        // A dropped request (loop shut down) counts as an acknowledgement.
        let _ = ack_rx.await;

        MiningPause {
            release: Some(release_tx),
        }
    }

    /// Queues `tx` for broadcast. Best effort: dropped when the queue is full.
    pub fn share_tx(&self, tx: BlockTx) {
        if let Err(mpsc::error::TrySendError::Full(tx)) = self.share_tx.try_send(tx) {
            warn!(key = %tx.unique_key(), "broadcast queue full; transaction not shared");
        }
    }

    /// Asks the worker to resync from peers.
    pub fn request_resync(&self) {
        let _ = self.resync.try_send(());
    }

    pub(crate) fn attach_miner(&self) -> MinerAttachment {
        self.miner_attached.store(true, Ordering::Release);
        MinerAttachment {
            flag: self.miner_attached.clone(),
        }
    }
}

/// Marks a mining loop as running for as long as it lives.
#[derive(Debug)]
pub(crate) struct MinerAttachment {
    flag: Arc<AtomicBool>,
}

impl Drop for MinerAttachment {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Drives a [`NodeState`] against its peers.
pub struct Worker {
    pub(crate) state: Arc<NodeState>,
    pub(crate) client: Arc<dyn PeerClient>,
}

impl Worker {
    pub fn new(state: Arc<NodeState>, client: Arc<dyn PeerClient>) -> Self {
        Self { state, client }
    }

    /// Runs one call to `peer` under the configured request timeout. A call
    /// that outlives it fails with [`PeerError::Timeout`].
    pub(crate) async fn bounded<T>(
        &self,
        peer: &Peer,
        call: impl Future<Output = Result<T, PeerError>>,
    ) -> Result<T, PeerError> {
        let limit = self.state.config().peer_request_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| {
                Err(PeerError::Timeout {
                    host: peer.host.clone(),
                })
            })
    }

    /// Spawns every background loop and returns their handles.
    ///
    /// Mining stays disabled until the first resync completes. Every loop
    /// exits once `shutdown` flips to `true` or its sender drops.
    pub fn run(
        state: Arc<NodeState>,
        channels: WorkerChannels,
        client: Arc<dyn PeerClient>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        state.begin_resync();

        let WorkerChannels {
            start_mining,
            cancel_mining,
            share_tx,
            resync,
        } = channels;

        let consensus = state.config().consensus;
        let attachment = state.signals().attach_miner();
        let worker = Arc::new(Worker::new(state, client));

        info!(
            host = %worker.state.host(),
            %consensus,
            strategy = %worker.state.config().strategy,
            "worker starting"
        );

        let miner = match consensus {
            ConsensusKind::Pow => tokio::spawn(worker.clone().mining_loop(
                start_mining,
                cancel_mining,
                shutdown.clone(),
                attachment,
            )),
            ConsensusKind::Poa => {
                tokio::spawn(worker.clone().poa_loop(cancel_mining, shutdown.clone(), attachment))
            }
        };

        vec![
            miner,
            tokio::spawn(worker.clone().discovery_loop(shutdown.clone())),
            tokio::spawn(worker.clone().share_tx_loop(share_tx, shutdown.clone())),
            tokio::spawn(worker.resync_loop(resync, shutdown)),
        ]
    }
}

/// Whether `shutdown` has been requested.
pub(crate) fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pause_without_miner_is_immediate() {
        let (signals, _channels) = channels(4);
        let pause = tokio::time::timeout(Duration::from_secs(1), signals.pause_mining()).await;
        assert!(pause.is_ok());
    }

    #[tokio::test]
    async fn pause_waits_for_ack_and_release_follows_drop() {
        let (signals, mut channels) = channels(4);
        let _attached = signals.attach_miner();

        let requester = {
            let signals = signals.clone();
            tokio::spawn(async move {
                let pause = signals.pause_mining().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(pause);
            })
        };

        let request = channels.cancel_mining.recv().await.unwrap();
        // honor() returns only after the requester dropped its guard.
        tokio::time::timeout(Duration::from_secs(2), request.honor())
            .await
            .unwrap();
        requester.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_request_still_grants_pause() {
        let (signals, mut channels) = channels(4);
        let _attached = signals.attach_miner();

        let loop_side = tokio::spawn(async move {
            // Loop shutting down: drop the request unanswered.
            drop(channels.cancel_mining.recv().await);
        });

        let pause = tokio::time::timeout(Duration::from_secs(1), signals.pause_mining()).await;
        assert!(pause.is_ok());
        loop_side.await.unwrap();
    }

    #[test]
    fn attachment_clears_on_drop() {
        let (signals, _channels) = channels(1);
        {
            let _attached = signals.attach_miner();
            assert!(signals.miner_attached.load(Ordering::Acquire));
        }
        assert!(!signals.miner_attached.load(Ordering::Acquire));
    }

    #[test]
    fn start_mining_coalesces() {
        let (signals, mut channels) = channels(1);
        signals.start_mining();
        signals.start_mining();
        assert!(channels.start_mining.try_recv().is_ok());
        assert!(channels.start_mining.try_recv().is_err());
    }
}
