//! Peer discovery.
//!
//! On a fixed interval the node asks every known peer for its status. A peer
//! that answers shares its own peer list, which is merged into ours, and is
//! told that we exist. A peer that does not answer is dropped; it comes back
//! the next time someone who still knows it reports it.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::network::worker::{is_shutdown, Worker};

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub reachable: usize,
    pub removed: usize,
    pub added: usize,
}

impl Worker {
    pub(crate) async fn discovery_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.state.config().peer_update_interval;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "peer discovery started");

        loop {
            if is_shutdown(&shutdown) {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || is_shutdown(&shutdown) {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_peer_operation().await;
                }
            }
        }

        info!("peer discovery stopped");
    }

    /// Polls every known peer once.
    pub async fn run_peer_operation(&self) -> DiscoveryReport {
        let peers = self.state.known_external_peers();
        let statuses = join_all(
            peers
                .iter()
                .map(|peer| async move { (peer, self.bounded(peer, self.client.status(peer)).await) }),
        )
        .await;

        let mut report = DiscoveryReport::default();
        let mut reachable = Vec::new();
        for (peer, result) in statuses {
            match result {
                Ok(status) => {
                    report.reachable += 1;
                    for reported in status.known_peers {
                        if self.state.add_known_peer(reported) {
                            report.added += 1;
                        }
                    }
                    reachable.push(peer);
                }
                Err(err) => {
                    warn!(host = %peer.host, %err, "peer unreachable");
                    if self.state.remove_known_peer(peer) {
                        report.removed += 1;
                    }
                }
            }
        }

        let me = self.state.as_peer();
        let me = &me;
        let announcements = join_all(
            reachable
                .into_iter()
                .map(|peer| async move { (peer, self.bounded(peer, self.client.announce(peer, me)).await) }),
        )
        .await;
        for (peer, result) in announcements {
            if let Err(err) = result {
                debug!(host = %peer.host, %err, "announcement failed");
            }
        }

        debug!(?report, "peer discovery pass complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::network::node::tests::{fixture, setup_with, setup_with_peer_timeout, Unresponsive};
    use crate::network::peers::Peer;
    use crate::network::rpc::{Acknowledgement, PeerClient, PeerError, PeerStatus};
    use crate::storage::block::Block;
    use crate::transaction::BlockTx;

    /// Answers status for the hosts in `peer_lists`; others are down.
    #[derive(Default)]
    struct Directory {
        peer_lists: HashMap<String, Vec<Peer>>,
        announced: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PeerClient for Directory {
        async fn status(&self, peer: &Peer) -> Result<PeerStatus, PeerError> {
            match self.peer_lists.get(&peer.host) {
                Some(known) => Ok(PeerStatus {
                    latest_block_hash: format!("0x{}", "0".repeat(64)),
                    latest_block_number: 0,
                    known_peers: known.clone(),
                }),
                None => Err(PeerError::Unreachable {
                    host: peer.host.clone(),
                    reason: "connection refused".into(),
                }),
            }
        }
        async fn mempool(&self, _peer: &Peer) -> Result<Vec<BlockTx>, PeerError> {
            Ok(vec![])
        }
        async fn blocks_from(&self, _peer: &Peer, _from: u64) -> Result<Vec<Block>, PeerError> {
            Ok(vec![])
        }
        async fn propose_block(&self, _peer: &Peer, _block: &Block) -> Result<Acknowledgement, PeerError> {
            Ok(Acknowledgement::accepted())
        }
        async fn submit_transaction(&self, _peer: &Peer, _tx: &BlockTx) -> Result<Acknowledgement, PeerError> {
            Ok(Acknowledgement::accepted())
        }
        async fn announce(&self, peer: &Peer, me: &Peer) -> Result<Acknowledgement, PeerError> {
            self.announced.lock().push((peer.host.clone(), me.host.clone()));
            Ok(Acknowledgement::accepted())
        }
    }

    #[tokio::test]
    async fn merges_peer_lists_and_drops_the_unreachable() {
        let f = fixture();
        let state = setup_with(&f);
        state.add_known_peer(Peer::new("a:1"));
        state.add_known_peer(Peer::new("dead:1"));

        let mut peer_lists = HashMap::new();
        // "a" knows us and "b"; we must not add ourselves.
        peer_lists.insert(
            "a:1".to_string(),
            vec![Peer::new("127.0.0.1:9080"), Peer::new("b:1")],
        );
        let directory = Arc::new(Directory {
            peer_lists,
            ..Default::default()
        });
        let worker = Worker::new(state.clone(), directory.clone());

        let report = worker.run_peer_operation().await;

        assert_eq!(report, DiscoveryReport { reachable: 1, removed: 1, added: 1 });
        assert_eq!(
            state.known_external_peers(),
            vec![Peer::new("a:1"), Peer::new("b:1")]
        );
        assert_eq!(
            *directory.announced.lock(),
            vec![("a:1".to_string(), "127.0.0.1:9080".to_string())]
        );
    }

    #[tokio::test]
    async fn nothing_known_nothing_done() {
        let f = fixture();
        let worker = Worker::new(setup_with(&f), Arc::new(Directory::default()));
        assert_eq!(worker.run_peer_operation().await, DiscoveryReport::default());
    }

    #[tokio::test]
    async fn silent_peer_is_dropped_after_the_request_timeout() {
        let f = fixture();
        let state = setup_with_peer_timeout(&f, std::time::Duration::from_millis(100));
        state.add_known_peer(Peer::new("silent:1"));
        let worker = Worker::new(state.clone(), Arc::new(Unresponsive));

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), worker.run_peer_operation())
            .await
            .expect("discovery pass must not hang on a silent peer");

        assert_eq!(report, DiscoveryReport { reachable: 0, removed: 1, added: 0 });
        assert!(state.known_external_peers().is_empty());
    }
}
