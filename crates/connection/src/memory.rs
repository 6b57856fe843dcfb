//! In-process transports.
//!
//! Every message is encoded to its JSON wire form and decoded on the way
//! through, so in-process peers exercise the same codec as remote ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use peershare_protocol::{PeerMessage, decode, encode};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::connector::{ConnectFuture, Connector};
use crate::error::{ConnectError, TransportError};
use crate::transport::{Connection, Transport, TransportEvent};

struct MemoryTransport {
    peer_id: String,
    open: Arc<AtomicBool>,
    local_tx: mpsc::UnboundedSender<TransportEvent>,
    remote_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport for MemoryTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, msg: PeerMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let frame = encode(&msg)?;
        let msg = decode(&frame)?;
        self.remote_tx
            .send(TransportEvent::Data(msg))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.local_tx.send(TransportEvent::Close);
            let _ = self.remote_tx.send(TransportEvent::Close);
        }
    }
}

/// Creates a connected pair. The first connection is `local`'s end (its
/// transport reports `remote` as peer id), the second is `remote`'s end.
///
/// Both ends start with a [`TransportEvent::Open`] queued.
pub fn memory_pair(local: &str, remote: &str) -> (Connection, Connection) {
    let open = Arc::new(AtomicBool::new(true));
    let (local_tx, local_rx) = mpsc::unbounded_channel();
    let (remote_tx, remote_rx) = mpsc::unbounded_channel();
    let _ = local_tx.send(TransportEvent::Open);
    let _ = remote_tx.send(TransportEvent::Open);

    let local_end = MemoryTransport {
        peer_id: remote.to_string(),
        open: Arc::clone(&open),
        local_tx: local_tx.clone(),
        remote_tx: remote_tx.clone(),
    };
    let remote_end = MemoryTransport {
        peer_id: local.to_string(),
        open,
        local_tx: remote_tx,
        remote_tx: local_tx,
    };

    (
        Connection {
            transport: Arc::new(local_end),
            events: local_rx,
        },
        Connection {
            transport: Arc::new(remote_end),
            events: remote_rx,
        },
    )
}

#[derive(Default)]
struct NetworkInner {
    listeners: HashMap<String, mpsc::UnboundedSender<Connection>>,
    blocked: HashSet<(String, String)>,
    silent: HashSet<String>,
}

fn link_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// An in-process signaling fabric.
///
/// Peers register to receive incoming connections; any peer can then
/// connect to any registered peer unless the link is blocked.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer_id` and returns its stream of incoming connections.
    pub async fn register(&self, peer_id: &str) -> mpsc::UnboundedReceiver<Connection> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .await
            .listeners
            .insert(peer_id.to_string(), tx);
        rx
    }

    pub async fn unregister(&self, peer_id: &str) {
        self.inner.lock().await.listeners.remove(peer_id);
    }

    /// Prevents `a` and `b` from connecting to each other directly.
    pub async fn block(&self, a: &str, b: &str) {
        self.inner.lock().await.blocked.insert(link_key(a, b));
    }

    pub async fn unblock(&self, a: &str, b: &str) {
        self.inner.lock().await.blocked.remove(&link_key(a, b));
    }

    /// A silent peer never answers connection attempts.
    pub async fn set_silent(&self, peer_id: &str, silent: bool) {
        let mut inner = self.inner.lock().await;
        if silent {
            inner.silent.insert(peer_id.to_string());
        } else {
            inner.silent.remove(peer_id);
        }
    }

    /// A connector that dials out as `local_id`.
    pub fn connector(&self, local_id: &str) -> MemoryConnector {
        MemoryConnector {
            network: self.clone(),
            local_id: local_id.to_string(),
        }
    }
}

/// Dials peers on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryConnector {
    network: MemoryNetwork,
    local_id: String,
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, peer_id: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let listener = {
                let inner = self.network.inner.lock().await;
                if inner.silent.contains(peer_id) {
                    None
                } else if inner.blocked.contains(&link_key(&self.local_id, peer_id)) {
                    return Err(ConnectError::Unreachable {
                        peer_id: peer_id.to_string(),
                        reason: "no route".into(),
                    });
                } else {
                    Some(inner.listeners.get(peer_id).cloned().ok_or_else(|| {
                        ConnectError::Unreachable {
                            peer_id: peer_id.to_string(),
                            reason: "not listening".into(),
                        }
                    })?)
                }
            };

            let Some(listener) = listener else {
                // Silent peer: the attempt hangs until the caller gives up.
                std::future::pending::<()>().await;
                return Err(ConnectError::Cancelled);
            };

            let (local, remote) = memory_pair(&self.local_id, peer_id);
            listener
                .send(remote)
                .map_err(|_| ConnectError::Unreachable {
                    peer_id: peer_id.to_string(),
                    reason: "listener gone".into(),
                })?;
            debug!(from = %self.local_id, to = %peer_id, "memory connection established");
            Ok(local)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use peershare_protocol::FileId;
    use peershare_protocol::messages::FileChunk;

    #[tokio::test]
    async fn pair_delivers_through_codec() {
        let (a, mut b) = memory_pair("a", "b");
        assert_eq!(a.peer_id(), "b");
        assert_eq!(b.peer_id(), "a");

        let msg = PeerMessage::FileChunk(FileChunk {
            file_id: FileId::new("f"),
            data: Bytes::from_static(&[0, 1, 2, 255]),
            chunk_index: Some(0),
            offset: 0,
            total: 4,
        });
        a.transport.send(msg.clone()).unwrap();

        assert_eq!(b.events.recv().await, Some(TransportEvent::Open));
        assert_eq!(b.events.recv().await, Some(TransportEvent::Data(msg)));
    }

    #[tokio::test]
    async fn close_is_seen_by_both_ends_once() {
        let (mut a, mut b) = memory_pair("a", "b");
        b.transport.close();
        b.transport.close();

        assert_eq!(a.events.recv().await, Some(TransportEvent::Open));
        assert_eq!(a.events.recv().await, Some(TransportEvent::Close));
        assert_eq!(b.events.recv().await, Some(TransportEvent::Open));
        assert_eq!(b.events.recv().await, Some(TransportEvent::Close));
        assert!(b.events.try_recv().is_err());

        let err = a
            .transport
            .send(PeerMessage::KeepAlive(
                peershare_protocol::messages::KeepAlive::now("a"),
            ))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn blocked_link_is_unreachable() {
        let network = MemoryNetwork::new();
        let _rx = network.register("c").await;
        network.block("c", "a").await;

        let err = network.connector("a").connect("c").await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable { .. }));

        network.unblock("a", "c").await;
        assert!(network.connector("a").connect("c").await.is_ok());
    }

    #[tokio::test]
    async fn unregistered_peer_is_unreachable() {
        let network = MemoryNetwork::new();
        let err = network.connector("a").connect("ghost").await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable { .. }));
    }
}
