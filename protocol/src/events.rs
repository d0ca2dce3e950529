//! Node events.
//!
//! Things worth telling an operator about (a block solved, a peer dropped, a
//! reorganization) are emitted as [`NodeEvent`]s on a broadcast channel. The
//! node binary forwards them to WebSocket subscribers and Prometheus; tests
//! subscribe directly. Emitting never blocks and never fails: with no
//! subscribers the event is simply traced and dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::config::EVENT_CHANNEL_CAPACITY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    MiningStarted {
        number: u64,
        tx_count: usize,
        difficulty: u16,
    },
    MiningProgress {
        number: u64,
        attempts: u64,
    },
    BlockMined {
        number: u64,
        hash: String,
        tx_count: usize,
        elapsed_ms: u64,
    },
    BlockAccepted {
        number: u64,
        hash: String,
        tx_count: usize,
        beneficiary: String,
    },
    TransactionAccepted {
        key: String,
        from: String,
        to: String,
        value: u64,
        pool_size: usize,
    },
    PeerAdded {
        host: String,
    },
    PeerRemoved {
        host: String,
    },
    Reorganizing {
        reason: String,
    },
    Synced {
        latest_number: u64,
    },
}

/// Cloneable handle for emitting [`NodeEvent`]s.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: NodeEvent) {
        trace!(?event, "node event");
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_silent() {
        let sink = EventSink::new(4);
        sink.emit(NodeEvent::Synced { latest_number: 1 });
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        sink.emit(NodeEvent::PeerAdded {
            host: "127.0.0.1:9080".into(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            NodeEvent::PeerAdded {
                host: "127.0.0.1:9080".into()
            }
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(NodeEvent::Synced { latest_number: 7 }).unwrap();
        assert_eq!(json["type"], "synced");
        assert_eq!(json["latest_number"], 7);
    }
}
