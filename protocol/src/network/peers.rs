//! Known-peer bookkeeping.
//!
//! Peer membership is independent of chain state, so the set lives in its
//! own `DashMap` and is never touched under the node's chain lock.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A remote node, identified by the `ip:port` it serves its API on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
}

impl Peer {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Whether this peer is the node itself.
    pub fn is_host(&self, host: &str) -> bool {
        self.host == host
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

#[derive(Debug, Default)]
pub struct PeerSet {
    peers: DashMap<String, Peer>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `peer`; returns `false` if it was already known.
    pub fn add(&self, peer: Peer) -> bool {
        self.peers.insert(peer.host.clone(), peer).is_none()
    }

    /// Removes `peer`; returns `false` if it was not known.
    pub fn remove(&self, peer: &Peer) -> bool {
        self.peers.remove(&peer.host).is_some()
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        self.peers.contains_key(&peer.host)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot sorted by host, optionally leaving out `exclude_host`.
    pub fn copy(&self, exclude_host: Option<&str>) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .peers
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != exclude_host)
            .map(|entry| entry.value().clone())
            .collect();
        peers.sort();
        peers
    }
}
