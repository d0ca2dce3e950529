//! # Mining Loops
//!
//! The heartbeat of a mining node. Under PoW the loop sleeps until someone
//! signals that the mempool is worth a look; under PoA it wakes on every
//! cycle boundary and mines only when it is the leader.
//!
//! ## One mining attempt
//!
//! 1. Skip if mining is disabled (resync) or the pool is empty.
//! 2. Honor any pause requests that queued up while idle.
//! 3. Run two tasks under one cancellation token until both finish:
//!    - the **canceller** waits for a pause request or for the token;
//!    - the **miner** runs [`NodeState::mine_new_block`], then cancels the
//!      token so the canceller stops waiting.
//! 4. If the canceller caught a request, acknowledge it and stay parked
//!    until the requester is done with the chain.
//! 5. Hand a freshly mined block to the peers.
//!
//! ## Shutdown
//!
//! Both loops watch a `tokio::sync::watch` channel and exit when it flips to
//! `true` or its sender drops. Shutdown cancels an attempt in flight the same
//! way a pause request does.
//!
//! [`NodeState::mine_new_block`]: crate::network::node::NodeState::mine_new_block

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::network::consensus::next_cycle_delay;
use crate::network::node::ErrorCategory;
use crate::network::worker::{is_shutdown, CancelRequest, MinerAttachment, Worker};

impl Worker {
    /// PoW: mine whenever signalled.
    pub(crate) async fn mining_loop(
        self: Arc<Self>,
        mut start_rx: mpsc::Receiver<()>,
        mut cancel_rx: mpsc::Receiver<CancelRequest>,
        mut shutdown: watch::Receiver<bool>,
        _attachment: MinerAttachment,
    ) {
        info!("mining loop started");

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
                Some(request) = cancel_rx.recv() => {
                    debug!("pause requested while idle");
                    request.honor().await;
                }
                signal = start_rx.recv() => {
                    if signal.is_none() || is_shutdown(&shutdown) {
                        break;
                    }
                    self.run_mining_operation(&mut cancel_rx, &mut shutdown).await;
                }
            }
        }

        info!("mining loop stopped");
    }

    /// PoA: on every cycle boundary, mine if this node is the leader.
    pub(crate) async fn poa_loop(
        self: Arc<Self>,
        mut cancel_rx: mpsc::Receiver<CancelRequest>,
        mut shutdown: watch::Receiver<bool>,
        _attachment: MinerAttachment,
    ) {
        let cycle = self.state.config().poa_cycle;
        info!(cycle_ms = cycle.as_millis() as u64, "poa loop started");

        loop {
            if is_shutdown(&shutdown) {
                break;
            }
            let since_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let delay = next_cycle_delay(since_epoch, cycle);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || is_shutdown(&shutdown) {
                        break;
                    }
                }
                Some(request) = cancel_rx.recv() => {
                    request.honor().await;
                }
                _ = tokio::time::sleep(delay) => {
                    match self.state.poa_leader() {
                        Some(leader) if leader == self.state.host() => {
                            debug!("leader for this cycle");
                            self.run_mining_operation(&mut cancel_rx, &mut shutdown).await;
                        }
                        leader => debug!(?leader, "not the leader this cycle"),
                    }
                }
            }
        }

        info!("poa loop stopped");
    }

    async fn run_mining_operation(
        self: &Arc<Self>,
        cancel_rx: &mut mpsc::Receiver<CancelRequest>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        if !self.state.is_mining_allowed() || self.state.mempool_count() == 0 {
            return;
        }

        // Requests that arrived before this attempt get served first.
        while let Ok(request) = cancel_rx.try_recv() {
            request.honor().await;
        }

        let token = CancellationToken::new();

        let canceller = async {
            tokio::select! {
                request = cancel_rx.recv() => {
                    token.cancel();
                    request
                }
                _ = shutdown.changed() => {
                    token.cancel();
                    None
                }
                _ = token.cancelled() => None,
            }
        };

        let miner = async {
            let result = self.state.mine_new_block(&token).await;
            token.cancel();
            result
        };

        let (pending, result) = tokio::join!(canceller, miner);

        let retry = match &result {
            Ok(block) => {
                debug!(number = block.number(), "mining attempt succeeded");
                true
            }
            Err(err) => match err.category() {
                ErrorCategory::Cancellation => {
                    debug!("mining attempt cancelled");
                    true
                }
                ErrorCategory::Resource => {
                    debug!(%err, "nothing to mine");
                    false
                }
                _ => {
                    warn!(%err, "mining attempt failed");
                    false
                }
            },
        };

        if let Some(request) = pending {
            request.honor().await;
        }

        if let Ok(block) = result {
            // Off the mining task: a peer answering the proposal may need
            // to pause its own miner, which in turn may be proposing to us.
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.propose_block(&block).await });
        }

        if retry && !is_shutdown(shutdown) && self.state.mempool_count() > 0 {
            self.state.signals().start_mining();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::events::NodeEvent;
    use crate::network::node::tests::{fixture, make_tx, node_args};
    use crate::network::node::NodeState;
    use crate::network::peers::Peer;
    use crate::network::rpc::{Acknowledgement, PeerClient, PeerError, PeerStatus};
    use crate::storage::block::Block;
    use crate::transaction::BlockTx;

    /// A network where every peer is down.
    struct Offline;

    fn down(peer: &Peer) -> PeerError {
        PeerError::Unreachable {
            host: peer.host.clone(),
            reason: "offline".into(),
        }
    }

    #[async_trait]
    impl PeerClient for Offline {
        async fn status(&self, peer: &Peer) -> Result<PeerStatus, PeerError> {
            Err(down(peer))
        }
        async fn mempool(&self, peer: &Peer) -> Result<Vec<BlockTx>, PeerError> {
            Err(down(peer))
        }
        async fn blocks_from(&self, peer: &Peer, _from: u64) -> Result<Vec<Block>, PeerError> {
            Err(down(peer))
        }
        async fn propose_block(&self, peer: &Peer, _block: &Block) -> Result<Acknowledgement, PeerError> {
            Err(down(peer))
        }
        async fn submit_transaction(&self, peer: &Peer, _tx: &BlockTx) -> Result<Acknowledgement, PeerError> {
            Err(down(peer))
        }
        async fn announce(&self, peer: &Peer, _me: &Peer) -> Result<Acknowledgement, PeerError> {
            Err(down(peer))
        }
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<NodeEvent>,
        wanted: impl Fn(&NodeEvent) -> bool,
    ) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                match events.recv().await {
                    Ok(event) if wanted(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("event did not arrive in time")
    }

    async fn stop(shutdown: watch::Sender<bool>, handles: Vec<tokio::task::JoinHandle<()>>) {
        shutdown.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("loop did not stop")
                .unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mines_once_the_pool_fills() {
        let f = fixture();
        let (state, channels) = NodeState::new(node_args(&f, "127.0.0.1:9080")).unwrap();
        let mut events = state.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = Worker::run(state.clone(), channels, Arc::new(Offline), shutdown_rx);

        // trans_per_block is 2.
        state.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10)).unwrap();
        state.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 2, 10)).unwrap();

        wait_for(&mut events, |e| matches!(e, NodeEvent::BlockMined { .. })).await;
        assert_eq!(state.latest_block().number(), 1);
        assert_eq!(state.mempool_count(), 0);

        stop(shutdown_tx, handles).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn peer_block_preempts_local_mining() {
        let f = fixture();
        let (local, channels) =
            NodeState::new_unsolvable_miner(node_args(&f, "127.0.0.1:9080")).unwrap();
        let remote = NodeState::new(node_args(&f, "127.0.0.1:9081")).unwrap().0;
        let mut events = local.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = Worker::run(local.clone(), channels, Arc::new(Offline), shutdown_rx);

        let signed = make_tx(&f.alice, &f.bob, 1, 10);
        for state in [&local, &remote] {
            state.upsert_wallet_transaction(signed.clone()).unwrap();
        }
        local.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 2, 10)).unwrap();

        // The local proof search is now running and will never finish.
        wait_for(&mut events, |e| matches!(e, NodeEvent::MiningStarted { .. })).await;

        let block = remote.mine_new_block(&CancellationToken::new()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), local.process_proposed_block(block.clone()))
            .await
            .expect("rendezvous with the miner timed out")
            .unwrap();

        // Exactly one block landed: the peer's.
        assert_eq!(local.latest_block(), block);
        assert_eq!(local.total_supply(), 1_000_000 + u128::from(f.genesis.mining_reward));
        assert_eq!(local.mempool_count(), 1);

        stop(shutdown_tx, handles).await;
        assert_eq!(local.latest_block().number(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn poa_leader_mines_on_cycle() {
        let f = fixture();
        let mut args = node_args(&f, "127.0.0.1:9080");
        args.config.consensus = crate::network::consensus::ConsensusKind::Poa;
        args.config.poa_cycle = Duration::from_millis(200);
        let (state, channels) = NodeState::new(args).unwrap();
        let mut events = state.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = Worker::run(state.clone(), channels, Arc::new(Offline), shutdown_rx);

        state.upsert_wallet_transaction(make_tx(&f.alice, &f.bob, 1, 10)).unwrap();

        wait_for(&mut events, |e| matches!(e, NodeEvent::BlockAccepted { .. })).await;
        let head = state.latest_block();
        assert_eq!(head.number(), 1);
        assert_eq!(head.header.difficulty, 0);

        stop(shutdown_tx, handles).await;
    }
}
