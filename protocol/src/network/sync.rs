//! # Chain Synchronization
//!
//! Brings a node up to date with its peers. It runs once at startup, before
//! mining is allowed, and again whenever a reorganization asks for it.
//!
//! For each known peer, in host order:
//!
//! 1. Fetch its status. Drop the peer if it does not answer.
//! 2. Merge its mempool. Transactions we cannot admit are skipped.
//! 3. If its head is ahead of ours, fetch every block past our head and
//!    apply them one by one through the normal peer-block path. The first
//!    block that fails ends the sync with that peer.
//!
//! Mining is re-enabled when the pass is over, whatever the outcome.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::network::worker::{is_shutdown, Worker};

/// What one sync pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_contacted: usize,
    pub blocks_applied: usize,
    pub transactions_merged: usize,
}

impl Worker {
    pub(crate) async fn resync_loop(
        self: Arc<Self>,
        mut resync_rx: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.resync().await;

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
                signal = resync_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    self.resync().await;
                }
            }
        }

        debug!("resync loop stopped");
    }

    /// Syncs with every peer, then re-enables mining.
    pub async fn resync(&self) -> SyncReport {
        self.state.begin_resync();
        let report = self.sync_with_peers().await;
        self.state.finish_resync();
        info!(
            peers = report.peers_contacted,
            blocks = report.blocks_applied,
            transactions = report.transactions_merged,
            "sync pass complete"
        );
        report
    }

    /// One pass over every known peer. Does not touch the mining flag.
    pub async fn sync_with_peers(&self) -> SyncReport {
        let mut report = SyncReport::default();

        for peer in self.state.known_external_peers() {
            let status = match self.bounded(&peer, self.client.status(&peer)).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(host = %peer.host, %err, "peer unreachable during sync");
                    self.state.remove_known_peer(&peer);
                    continue;
                }
            };
            report.peers_contacted += 1;

            match self.bounded(&peer, self.client.mempool(&peer)).await {
                Ok(txs) => {
                    for tx in txs {
                        match self.state.upsert_node_transaction(tx) {
                            Ok(_) => report.transactions_merged += 1,
                            Err(err) => debug!(host = %peer.host, %err, "skipping peer transaction"),
                        }
                    }
                }
                Err(err) => warn!(host = %peer.host, %err, "could not fetch peer mempool"),
            }

            let local = self.state.latest_block().number();
            if status.latest_block_number <= local {
                continue;
            }

            debug!(
                host = %peer.host,
                local,
                remote = status.latest_block_number,
                "fetching missing blocks"
            );
            let blocks = match self
                .bounded(&peer, self.client.blocks_from(&peer, local + 1))
                .await {
                Ok(blocks) => blocks,
                Err(err) => {
                    warn!(host = %peer.host, %err, "could not fetch peer blocks");
                    continue;
                }
            };
            for block in blocks {
                let number = block.number();
                if let Err(err) = self.state.mine_peer_block(block).await {
                    warn!(host = %peer.host, number, %err, "stopping sync with peer");
                    break;
                }
                report.blocks_applied += 1;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::network::node::tests::{
        fixture, make_tx, setup_with, setup_with_peer_timeout, Unresponsive,
    };
    use crate::network::node::NodeState;
    use crate::network::peers::Peer;
    use crate::network::rpc::{Acknowledgement, PeerClient, PeerError, PeerStatus};
    use crate::storage::block::Block;
    use crate::transaction::BlockTx;

    /// Serves one node's chain and mempool under the host "source:1".
    struct Source(Arc<NodeState>);

    fn not_source(peer: &Peer) -> Option<PeerError> {
        (peer.host != "source:1").then(|| PeerError::Unreachable {
            host: peer.host.clone(),
            reason: "no route".into(),
        })
    }

    #[async_trait]
    impl PeerClient for Source {
        async fn status(&self, peer: &Peer) -> Result<PeerStatus, PeerError> {
            not_source(peer).map_or_else(|| Ok(self.0.status()), Err)
        }
        async fn mempool(&self, _peer: &Peer) -> Result<Vec<BlockTx>, PeerError> {
            Ok(self.0.mempool())
        }
        async fn blocks_from(&self, _peer: &Peer, from: u64) -> Result<Vec<Block>, PeerError> {
            Ok(self.0.query_blocks_by_number(from, None).unwrap())
        }
        async fn propose_block(&self, _peer: &Peer, _block: &Block) -> Result<Acknowledgement, PeerError> {
            Ok(Acknowledgement::accepted())
        }
        async fn submit_transaction(&self, _peer: &Peer, _tx: &BlockTx) -> Result<Acknowledgement, PeerError> {
            Ok(Acknowledgement::accepted())
        }
        async fn announce(&self, _peer: &Peer, _me: &Peer) -> Result<Acknowledgement, PeerError> {
            Ok(Acknowledgement::accepted())
        }
    }

    #[tokio::test]
    async fn catches_up_blocks_and_mempool() {
        let f = fixture();
        let source = setup_with(&f);
        for nonce in 1..=3 {
            source.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, nonce, 10)).unwrap();
            source.mine_new_block(&CancellationToken::new()).await.unwrap();
        }
        source.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 4, 10)).unwrap();

        let fresh = setup_with(&f);
        fresh.add_known_peer(Peer::new("source:1"));
        fresh.add_known_peer(Peer::new("gone:1"));
        let worker = Worker::new(fresh.clone(), Arc::new(Source(source.clone())));

        let report = worker.resync().await;

        assert_eq!(
            report,
            SyncReport {
                peers_contacted: 1,
                blocks_applied: 3,
                transactions_merged: 1,
            }
        );
        assert_eq!(fresh.latest_block(), source.latest_block());
        assert_eq!(fresh.accounts(), source.accounts());
        assert_eq!(fresh.mempool_count(), 1);
        assert_eq!(fresh.known_external_peers(), vec![Peer::new("source:1")]);
        assert!(fresh.is_mining_allowed());
    }

    #[tokio::test]
    async fn peer_behind_us_sends_nothing() {
        let f = fixture();
        let ahead = setup_with(&f);
        ahead.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10)).unwrap();
        ahead.mine_new_block(&CancellationToken::new()).await.unwrap();

        let behind = setup_with(&f);
        ahead.add_known_peer(Peer::new("source:1"));
        let worker = Worker::new(ahead.clone(), Arc::new(Source(behind)));

        let report = worker.sync_with_peers().await;
        assert_eq!(report.peers_contacted, 1);
        assert_eq!(report.blocks_applied, 0);
        assert_eq!(ahead.latest_block().number(), 1);
    }

    #[tokio::test]
    async fn resync_reenables_mining_without_peers() {
        let f = fixture();
        let state = setup_with(&f);
        state.begin_resync();
        let worker = Worker::new(state.clone(), Arc::new(Source(setup_with(&f))));

        assert_eq!(worker.resync().await, SyncReport::default());
        assert!(state.is_mining_allowed());
    }

    #[tokio::test]
    async fn silent_peer_does_not_block_mining_forever() {
        let f = fixture();
        let state = setup_with_peer_timeout(&f, std::time::Duration::from_millis(100));
        state.add_known_peer(Peer::new("silent:1"));
        let worker = Worker::new(state.clone(), Arc::new(Unresponsive));

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), worker.resync())
            .await
            .expect("resync must not hang on a silent peer");

        assert_eq!(report, SyncReport::default());
        assert!(state.is_mining_allowed());
        assert!(state.known_external_peers().is_empty());
    }
}
