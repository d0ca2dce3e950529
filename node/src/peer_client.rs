//! # HTTP Peer Client
//!
//! [`PeerClient`] over plain HTTP/JSON with `reqwest`. Each peer is addressed
//! as `http://{host}` and every request carries the node's configured
//! timeout, so one slow peer cannot stall a loop.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ember_protocol::network::peers::Peer;
use ember_protocol::network::rpc::{
    self, Acknowledgement, PeerClient, PeerError, PeerStatus,
};
use ember_protocol::storage::Block;
use ember_protocol::transaction::BlockTx;

#[derive(Clone, Debug)]
pub struct HttpPeerClient {
    http: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn get<T: DeserializeOwned>(&self, peer: &Peer, path: &str) -> Result<T, PeerError> {
        let response = self
            .http
            .get(url(peer, path))
            .send()
            .await
            .map_err(|err| transport_error(peer, err))?;
        decode(peer, response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        peer: &Peer,
        path: &str,
        body: &B,
    ) -> Result<T, PeerError> {
        let response = self
            .http
            .post(url(peer, path))
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(peer, err))?;
        decode(peer, response).await
    }
}

fn url(peer: &Peer, path: &str) -> String {
    format!("http://{}{}", peer.host, path)
}

fn transport_error(peer: &Peer, err: reqwest::Error) -> PeerError {
    if err.is_timeout() {
        PeerError::Timeout {
            host: peer.host.clone(),
        }
    } else {
        PeerError::Unreachable {
            host: peer.host.clone(),
            reason: err.to_string(),
        }
    }
}

async fn decode<T: DeserializeOwned>(peer: &Peer, response: Response) -> Result<T, PeerError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PeerError::Rejected {
            host: peer.host.clone(),
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(|err| PeerError::Decode {
        host: peer.host.clone(),
        reason: err.to_string(),
    })
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn status(&self, peer: &Peer) -> Result<PeerStatus, PeerError> {
        self.get(peer, rpc::STATUS_PATH).await
    }

    async fn mempool(&self, peer: &Peer) -> Result<Vec<BlockTx>, PeerError> {
        self.get(peer, rpc::MEMPOOL_PATH).await
    }

    async fn blocks_from(&self, peer: &Peer, from: u64) -> Result<Vec<Block>, PeerError> {
        self.get(peer, &rpc::blocks_from_path(from)).await
    }

    async fn propose_block(&self, peer: &Peer, block: &Block) -> Result<Acknowledgement, PeerError> {
        self.post(peer, rpc::PROPOSE_BLOCK_PATH, block).await
    }

    async fn submit_transaction(
        &self,
        peer: &Peer,
        tx: &BlockTx,
    ) -> Result<Acknowledgement, PeerError> {
        self.post(peer, rpc::SUBMIT_TX_PATH, tx).await
    }

    async fn announce(&self, peer: &Peer, me: &Peer) -> Result<Acknowledgement, PeerError> {
        self.post(peer, rpc::ANNOUNCE_PATH, me).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_peer_maps_to_network_error() {
        // Nothing listens on port 1.
        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        let err = client.status(&Peer::new("127.0.0.1:1")).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::Unreachable { .. } | PeerError::Timeout { .. }
        ));
    }

    #[test]
    fn urls_are_built_from_host() {
        let peer = Peer::new("10.0.0.1:9080");
        assert_eq!(
            url(&peer, &rpc::blocks_from_path(3)),
            "http://10.0.0.1:9080/v1/node/block/list/3/latest"
        );
    }
}
