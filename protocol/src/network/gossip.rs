//! # Gossip
//!
//! Pushes new transactions and freshly mined blocks to every known peer.
//! Propagation is single-hop: a peer that receives a relayed transaction
//! admits it with [`NodeState::upsert_node_transaction`] and does not pass
//! it on, so there is nothing to deduplicate and no TTL to track.
//!
//! All sends to one message's peers run concurrently. Failures are logged
//! and otherwise ignored; unreachable peers are pruned by discovery, not
//! here.
//!
//! [`NodeState::upsert_node_transaction`]: crate::network::node::NodeState::upsert_node_transaction

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::network::rpc::Acknowledgement;
use crate::network::worker::{is_shutdown, Worker};
use crate::storage::block::Block;
use crate::transaction::BlockTx;

/// How many peers took a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl Delivery {
    fn record(&mut self, host: &str, what: &str, result: Result<Acknowledgement, impl std::fmt::Display>) {
        match result {
            Ok(ack) if ack.accepted => self.accepted += 1,
            Ok(ack) => {
                self.rejected += 1;
                debug!(%host, reason = ?ack.reason, "{what} rejected by peer");
            }
            Err(err) => {
                self.failed += 1;
                debug!(%host, %err, "{what} not delivered");
            }
        }
    }
}

impl Worker {
    pub(crate) async fn share_tx_loop(
        self: Arc<Self>,
        mut share_rx: mpsc::Receiver<BlockTx>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("transaction broadcast loop started");

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
                tx = share_rx.recv() => {
                    let Some(tx) = tx else { break };
                    self.share_transaction(&tx).await;
                }
            }
        }

        info!("transaction broadcast loop stopped");
    }

    /// Sends `tx` to every known peer.
    pub async fn share_transaction(&self, tx: &BlockTx) -> Delivery {
        let peers = self.state.known_external_peers();
        let results = join_all(peers.iter().map(|peer| async move {
            (peer, self.bounded(peer, self.client.submit_transaction(peer, tx)).await)
        }))
        .await;

        let mut delivery = Delivery::default();
        for (peer, result) in results {
            delivery.record(&peer.host, "transaction", result);
        }
        debug!(key = %tx.unique_key(), ?delivery, "transaction shared");
        delivery
    }

    /// Sends a newly mined block to every known peer.
    pub async fn propose_block(&self, block: &Block) -> Delivery {
        let peers = self.state.known_external_peers();
        let results = join_all(peers.iter().map(|peer| async move {
            (peer, self.bounded(peer, self.client.propose_block(peer, block)).await)
        }))
        .await;

        let mut delivery = Delivery::default();
        for (peer, result) in results {
            delivery.record(&peer.host, "block", result);
        }

        if delivery.rejected + delivery.failed > 0 {
            warn!(number = block.number(), ?delivery, "block proposal incomplete");
        } else {
            debug!(number = block.number(), ?delivery, "block proposed");
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::network::node::tests::{
        fixture, make_tx, setup_with, setup_with_peer_timeout, Unresponsive,
    };
    use crate::network::peers::Peer;
    use crate::network::rpc::{PeerClient, PeerError, PeerStatus};

    /// Accepts everything from `good` hosts, is unreachable elsewhere.
    #[derive(Default)]
    struct Recorder {
        good: Vec<String>,
        blocks: Mutex<Vec<(String, u64)>>,
        txs: Mutex<Vec<(String, String)>>,
    }

    impl Recorder {
        fn reach(&self, peer: &Peer) -> Result<(), PeerError> {
            if self.good.contains(&peer.host) {
                Ok(())
            } else {
                Err(PeerError::Timeout {
                    host: peer.host.clone(),
                })
            }
        }
    }

    #[async_trait]
    impl PeerClient for Recorder {
        async fn status(&self, peer: &Peer) -> Result<PeerStatus, PeerError> {
            Err(PeerError::Timeout { host: peer.host.clone() })
        }
        async fn mempool(&self, _peer: &Peer) -> Result<Vec<BlockTx>, PeerError> {
            Ok(vec![])
        }
        async fn blocks_from(&self, _peer: &Peer, _from: u64) -> Result<Vec<Block>, PeerError> {
            Ok(vec![])
        }
        async fn propose_block(&self, peer: &Peer, block: &Block) -> Result<Acknowledgement, PeerError> {
            self.reach(peer)?;
            self.blocks.lock().push((peer.host.clone(), block.number()));
            Ok(Acknowledgement::accepted())
        }
        async fn submit_transaction(&self, peer: &Peer, tx: &BlockTx) -> Result<Acknowledgement, PeerError> {
            self.reach(peer)?;
            self.txs.lock().push((peer.host.clone(), tx.unique_key()));
            Ok(Acknowledgement::rejected("already known"))
        }
        async fn announce(&self, _peer: &Peer, _me: &Peer) -> Result<Acknowledgement, PeerError> {
            Ok(Acknowledgement::accepted())
        }
    }

    fn setup(good: &[&str], peers: &[&str]) -> (Worker, Arc<Recorder>, crate::network::node::tests::Fixture) {
        let f = fixture();
        let state = setup_with(&f);
        for host in peers {
            state.add_known_peer(Peer::new(*host));
        }
        let recorder = Arc::new(Recorder {
            good: good.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        });
        (Worker::new(state, recorder.clone()), recorder, f)
    }

    #[tokio::test]
    async fn block_goes_to_every_peer() {
        let (worker, recorder, f) = setup(&["a:1", "b:1"], &["a:1", "b:1", "c:1"]);
        worker
            .state
            .upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10))
            .unwrap();
        let block = worker.state.mine_new_block(&CancellationToken::new()).await.unwrap();

        let delivery = worker.propose_block(&block).await;

        assert_eq!(delivery, Delivery { accepted: 2, rejected: 0, failed: 1 });
        let mut seen = recorder.blocks.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![("a:1".to_string(), 1), ("b:1".to_string(), 1)]);
    }

    #[tokio::test]
    async fn rejections_are_counted_not_fatal() {
        let (worker, recorder, f) = setup(&["a:1"], &["a:1"]);
        let tx = worker
            .state
            .upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10))
            .unwrap();

        let delivery = worker.share_transaction(&tx).await;

        assert_eq!(delivery.rejected, 1);
        assert_eq!(recorder.txs.lock()[0], ("a:1".to_string(), tx.unique_key()));
    }

    #[tokio::test]
    async fn no_peers_no_sends() {
        let (worker, recorder, f) = setup(&[], &[]);
        let tx = worker
            .state
            .upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10))
            .unwrap();
        assert_eq!(worker.share_transaction(&tx).await, Delivery::default());
        assert!(recorder.txs.lock().is_empty());
    }

    #[tokio::test]
    async fn silent_peers_count_as_failed() {
        let f = fixture();
        let state = setup_with_peer_timeout(&f, std::time::Duration::from_millis(100));
        state.add_known_peer(Peer::new("silent:1"));
        state.add_known_peer(Peer::new("silent:2"));
        let tx = state
            .upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10))
            .unwrap();
        let worker = Worker::new(state, Arc::new(Unresponsive));

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(5), worker.share_transaction(&tx))
            .await
            .expect("broadcast must not hang on silent peers");

        assert_eq!(delivery, Delivery { accepted: 0, rejected: 0, failed: 2 });
    }
}
