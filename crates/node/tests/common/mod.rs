#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use peershare_connection::{Connection, TransportEvent, memory_pair};
use peershare_node::{LinkOrigin, Node, NodeConfig, NodeEvent, NodeOptions};
use peershare_protocol::PeerMessage;
use peershare_transfer::{Direction, MemorySource};
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn config(peer_id: &str) -> NodeConfig {
    let mut config = NodeConfig::with_peer_id(peer_id);
    config.pacing_ms = 0;
    config.event_buffer = 4096;
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.reconnect.max_attempts = 3;
    config
}

pub async fn start(peer_id: &str, options: NodeOptions) -> (Node, mpsc::Receiver<NodeEvent>) {
    start_with(config(peer_id), options).await
}

pub async fn start_with(config: NodeConfig, options: NodeOptions) -> (Node, mpsc::Receiver<NodeEvent>) {
    let node = Node::start(config, options).await.unwrap();
    let events = node.take_events().await.unwrap();
    (node, events)
}

/// Links two nodes directly. `a` counts as the dialing side.
pub async fn link(a: &Node, b: &Node) {
    let (a_end, b_end) = memory_pair(a.peer_id(), b.peer_id());
    a.adopt(a_end, LinkOrigin::Dialed).await;
    b.adopt(b_end, LinkOrigin::Accepted).await;
}

/// Links `node` to a test-driven peer and returns the peer's end.
pub async fn attach(node: &Node, peer_id: &str) -> Connection {
    let (node_end, peer_end) = memory_pair(node.peer_id(), peer_id);
    node.adopt(node_end, LinkOrigin::Accepted).await;
    peer_end
}

pub async fn wait_for<F>(events: &mut mpsc::Receiver<NodeEvent>, mut pred: F) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_received(events: &mut mpsc::Receiver<NodeEvent>) -> NodeEvent {
    wait_for(events, |e| {
        matches!(
            e,
            NodeEvent::TransferCompleted {
                direction: Direction::Received,
                ..
            }
        )
    })
    .await
}

pub async fn next_message(conn: &mut Connection) -> PeerMessage {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match conn.events.recv().await {
                Some(TransportEvent::Data(msg)) => return msg,
                Some(TransportEvent::Open) => continue,
                other => panic!("expected data, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

/// Deterministic content that differs at every chunk boundary.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn source(name: &str, data: &[u8]) -> Arc<MemorySource> {
    Arc::new(MemorySource::new(
        name,
        peershare_transfer::mime_from_name(name),
        data.to_vec(),
    ))
}
