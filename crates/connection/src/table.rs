//! Live connections of one node, keyed by remote peer id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use peershare_protocol::PeerMessage;
use peershare_protocol::messages::DisconnectNotification;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::Transport;

struct PeerLink {
    transport: Arc<dyn Transport>,
    last_seen: Instant,
}

/// Connection table shared by every component of a node.
#[derive(Default)]
pub struct ConnectionTable {
    links: RwLock<HashMap<String, PeerLink>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport, replacing (and closing) any previous one for the peer.
    pub async fn insert(&self, transport: Arc<dyn Transport>) {
        let peer_id = transport.peer_id().to_string();
        let previous = self.links.write().await.insert(
            peer_id.clone(),
            PeerLink {
                transport,
                last_seen: Instant::now(),
            },
        );
        if let Some(old) = previous {
            debug!(peer = %peer_id, "replacing existing connection");
            old.transport.close();
        }
        info!(peer = %peer_id, "connection registered");
    }

    /// Removes a peer without closing its transport.
    pub async fn remove(&self, peer_id: &str) -> Option<Arc<dyn Transport>> {
        self.links
            .write()
            .await
            .remove(peer_id)
            .map(|link| link.transport)
    }

    /// Removes `peer_id` only if it is still bound to `transport`.
    ///
    /// A replaced link closing late must not evict its successor.
    pub async fn remove_if_same(&self, peer_id: &str, transport: &Arc<dyn Transport>) -> bool {
        let mut links = self.links.write().await;
        let same = links
            .get(peer_id)
            .is_some_and(|link| Arc::ptr_eq(&link.transport, transport));
        if same {
            links.remove(peer_id);
        }
        same
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<dyn Transport>> {
        self.links
            .read()
            .await
            .get(peer_id)
            .map(|link| Arc::clone(&link.transport))
    }

    /// Returns the transport for `peer_id` if it is open.
    pub async fn get_open(&self, peer_id: &str) -> Option<Arc<dyn Transport>> {
        self.get(peer_id).await.filter(|t| t.is_open())
    }

    /// Every open transport, sorted by peer id.
    pub async fn open_transports(&self) -> Vec<Arc<dyn Transport>> {
        let links = self.links.read().await;
        let mut open: Vec<_> = links
            .values()
            .filter(|link| link.transport.is_open())
            .map(|link| Arc::clone(&link.transport))
            .collect();
        open.sort_by(|a, b| a.peer_id().cmp(b.peer_id()));
        open
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn open_count(&self) -> usize {
        self.links
            .read()
            .await
            .values()
            .filter(|link| link.transport.is_open())
            .count()
    }

    /// Records that a message arrived from `peer_id`.
    pub async fn touch(&self, peer_id: &str) {
        if let Some(link) = self.links.write().await.get_mut(peer_id) {
            link.last_seen = Instant::now();
        }
    }

    /// Peers silent for longer than `threshold`, with their silence.
    pub async fn stale_peers(&self, threshold: Duration) -> Vec<(String, Duration)> {
        let now = Instant::now();
        let mut stale: Vec<_> = self
            .links
            .read()
            .await
            .iter()
            .filter_map(|(id, link)| {
                let silent = now.saturating_duration_since(link.last_seen);
                (silent > threshold).then(|| (id.clone(), silent))
            })
            .collect();
        stale.sort_by(|a, b| a.0.cmp(&b.0));
        stale
    }

    /// Sends `msg` to every open peer except `except`. Returns how many sends succeeded.
    pub async fn broadcast(&self, msg: &PeerMessage, except: Option<&str>) -> usize {
        let mut sent = 0;
        for transport in self.open_transports().await {
            if except == Some(transport.peer_id()) {
                continue;
            }
            match transport.send(msg.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    peer = %transport.peer_id(),
                    msg_type = msg.type_name(),
                    error = %e,
                    "broadcast send failed"
                ),
            }
        }
        sent
    }

    /// Tells every open peer we are leaving, then closes and forgets all links.
    pub async fn disconnect_all(&self, local_peer_id: &str) {
        let notice = PeerMessage::DisconnectNotification(DisconnectNotification::now(local_peer_id));
        let links: Vec<PeerLink> = self.links.write().await.drain().map(|(_, l)| l).collect();
        for link in links {
            if link.transport.is_open() {
                if let Err(e) = link.transport.send(notice.clone()) {
                    debug!(peer = %link.transport.peer_id(), error = %e, "disconnect notice not sent");
                }
                link.transport.close();
            }
        }
        info!("all connections closed");
    }
}
