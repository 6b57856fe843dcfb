//! Per-connection event loop and typed message dispatch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use peershare_connection::{Connection, Transport, TransportEvent, reconnect_loop};
use peershare_protocol::messages::{DisconnectNotification, KeepAlive};
use peershare_protocol::{FileMetadata, PeerMessage};
use peershare_relay::{ForwardAction, HOLDER_UNREACHABLE, NOT_AVAILABLE, ServeJob};
use peershare_transfer::{Direction, DownloadStatus, ReceiveError, ReceiveOutcome};
use tracing::{debug, info, trace, warn};

use crate::error::NodeError;
use crate::events::{Notice, NodeEvent};
use crate::node::{CatalogEntry, LinkOrigin, Node};

type LinkFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

impl Node {
    /// Drives one link until it closes or the node shuts down.
    pub(crate) fn run_connection(self, mut connection: Connection, origin: LinkOrigin) -> LinkFuture {
        Box::pin(async move {
            let peer_id = connection.peer_id().to_string();
            let transport = Arc::clone(&connection.transport);
            loop {
                let event = tokio::select! {
                    _ = self.inner.shutdown.cancelled() => return,
                    event = connection.events.recv() => event,
                };
                match event {
                    Some(TransportEvent::Open) => debug!(peer = %peer_id, "link open"),
                    Some(TransportEvent::Data(msg)) => {
                        self.inner.connections.touch(&peer_id).await;
                        if let Err(e) = self.dispatch(&peer_id, msg).await {
                            warn!(peer = %peer_id, error = %e, "message not handled");
                        }
                    }
                    Some(TransportEvent::Error(reason)) => {
                        warn!(peer = %peer_id, reason = %reason, "link error");
                        transport.close();
                    }
                    Some(TransportEvent::Close) | None => break,
                }
            }
            self.on_link_closed(&peer_id, &transport, origin).await;
        })
    }

    /// Handles one message from `from`.
    pub(crate) async fn dispatch(&self, from: &str, msg: PeerMessage) -> Result<(), NodeError> {
        trace!(peer = %from, msg_type = msg.type_name(), "dispatch");
        match msg {
            PeerMessage::KeepAlive(_) => {
                if let Some(link) = self.inner.connections.get_open(from).await {
                    link.send(PeerMessage::KeepAliveResponse(KeepAlive::now(self.peer_id())))?;
                }
            }
            PeerMessage::KeepAliveResponse(_) => {}
            PeerMessage::DisconnectNotification(notice) => self.on_departure(from, &notice).await,
            PeerMessage::FileInfo(info) => self.on_announce(from, info.metadata(from)).await,
            PeerMessage::ContentRequest(request) => {
                let job = self.inner.relay.on_content_request(from, &request).await?;
                self.spawn_serve(job);
            }
            PeerMessage::ContentForward(forward) => {
                match self.inner.relay.on_content_forward(from, &forward).await? {
                    ForwardAction::Serve(job) => self.spawn_serve(job),
                    ForwardAction::Forwarded { holder } => {
                        debug!(file_id = %forward.file_id, holder = %holder, "request brokered");
                    }
                }
            }
            PeerMessage::ContentResponse(response) => {
                if let Some(inner) = self.inner.relay.on_content_response(&response).await? {
                    self.on_transfer(from, &inner).await;
                }
            }
            PeerMessage::StreamingError(error) if error.error == HOLDER_UNREACHABLE => {
                match self.inner.relay.on_broker_error(from, &error).await {
                    Some(via) => debug!(file_id = %error.file_id, via = %via, "request moved to another broker"),
                    None => self.on_transfer(from, &PeerMessage::StreamingError(error)).await,
                }
            }
            other => self.on_transfer(from, &other).await,
        }
        Ok(())
    }

    async fn on_departure(&self, from: &str, notice: &DisconnectNotification) {
        info!(peer = %from, announced = %notice.peer_id, "peer is leaving");
        self.inner.departed.lock().await.insert(from.to_string());
        if let Some(link) = self.inner.connections.remove(from).await {
            link.close();
        }
    }

    async fn on_announce(&self, from: &str, metadata: FileMetadata) {
        if self.inner.relay.on_metadata(from, &metadata).await.is_none() {
            return;
        }
        if metadata.original_sender_id == self.peer_id()
            || self.inner.history.lock().await.contains(&metadata.file_id)
        {
            return;
        }

        self.inner
            .catalog
            .lock()
            .await
            .entry(metadata.file_id.clone())
            .or_insert_with(|| CatalogEntry {
                metadata: metadata.clone(),
                expected_chunks: None,
            });
        self.inner.downloads.lock().await.announce(&metadata.file_id);
        info!(
            file_id = %metadata.file_id,
            name = %metadata.name,
            holder = %metadata.original_sender_id,
            from = %from,
            "file announced"
        );
        self.inner.events.emit(NodeEvent::FileAnnounced {
            metadata,
            from: from.to_string(),
        });
    }

    async fn on_transfer(&self, from: &str, msg: &PeerMessage) {
        match self.inner.receiver.handle(from, msg).await {
            Ok(Some(outcome)) => self.on_outcome(from, outcome).await,
            Ok(None) => {}
            Err(e) => {
                let file_id = match &e {
                    ReceiveError::ProtocolViolation { file_id, reason } => {
                        warn!(peer = %from, file_id = %file_id, reason = %reason, "message discarded");
                        return;
                    }
                    ReceiveError::Integrity { file_id, .. } | ReceiveError::Store { file_id, .. } => {
                        file_id.clone()
                    }
                };
                self.fail_download(&file_id, e.to_string(), false).await;
            }
        }
    }

    async fn on_outcome(&self, from: &str, outcome: ReceiveOutcome) {
        match outcome {
            ReceiveOutcome::Started { metadata } => {
                self.inner.relay.settle_request(&metadata.file_id).await;
                self.inner.relay.on_metadata(from, &metadata).await;
                self.inner.catalog.lock().await.insert(
                    metadata.file_id.clone(),
                    CatalogEntry {
                        metadata: metadata.clone(),
                        expected_chunks: None,
                    },
                );
                self.inner
                    .downloads
                    .lock()
                    .await
                    .set(&metadata.file_id, DownloadStatus::Receiving { percent: 0 });
                self.inner.events.emit(NodeEvent::TransferStarted {
                    metadata,
                    direction: Direction::Received,
                });
            }
            ReceiveOutcome::ChunkStored {
                file_id,
                percent: Some(percent),
                ..
            } => {
                self.inner
                    .downloads
                    .lock()
                    .await
                    .set(&file_id, DownloadStatus::Receiving { percent });
            }
            ReceiveOutcome::ChunkStored { .. } => {}
            ReceiveOutcome::Completed {
                metadata,
                stats,
                recorded,
                expected_chunks,
            } => {
                self.inner.catalog.lock().await.insert(
                    metadata.file_id.clone(),
                    CatalogEntry {
                        metadata: metadata.clone(),
                        expected_chunks,
                    },
                );
                self.inner
                    .downloads
                    .lock()
                    .await
                    .set(&metadata.file_id, DownloadStatus::Ready);
                if recorded {
                    self.inner
                        .notifier
                        .notify(Notice::success(format!("{} received", metadata.name)));
                }
                self.inner.events.emit(NodeEvent::TransferCompleted {
                    metadata,
                    direction: Direction::Received,
                    stats,
                });
            }
            ReceiveOutcome::Aborted {
                file_id, reason, ..
            } => {
                self.inner.relay.settle_request(&file_id).await;
                let retryable = reason != NOT_AVAILABLE;
                self.fail_download(&file_id, reason, retryable).await;
            }
        }
    }

    fn spawn_serve(&self, job: ServeJob) {
        let node = self.clone();
        tokio::spawn(async move {
            let metadata = job.file.metadata.clone();
            let peer_id = job.target.peer_id().to_string();
            node.inner.events.emit(NodeEvent::TransferStarted {
                metadata: metadata.clone(),
                direction: Direction::Sent,
            });
            match node.inner.relay.serve(job, Some(&node.inner.progress)).await {
                Ok(stats) => node.inner.events.emit(NodeEvent::TransferCompleted {
                    metadata,
                    direction: Direction::Sent,
                    stats,
                }),
                Err(e) => {
                    warn!(file_id = %metadata.file_id, peer = %peer_id, error = %e, "serving content failed");
                    node.inner.events.emit(NodeEvent::TransferFailed {
                        file_id: metadata.file_id,
                        reason: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        });
    }

    async fn on_link_closed(&self, peer_id: &str, transport: &Arc<dyn Transport>, origin: LinkOrigin) {
        let inner = &self.inner;
        inner.connections.remove_if_same(peer_id, transport).await;
        if let Some(current) = inner.connections.get(peer_id).await
            && !Arc::ptr_eq(&current, transport)
        {
            debug!(peer = %peer_id, "replaced link closed");
            return;
        }

        for file_id in inner.receiver.abort_peer(peer_id).await {
            self.fail_download(&file_id, format!("connection to {peer_id} lost"), true)
                .await;
        }

        let notified = inner.departed.lock().await.remove(peer_id);
        info!(peer = %peer_id, notified, "peer disconnected");
        inner.events.emit(NodeEvent::PeerDisconnected {
            peer_id: peer_id.to_string(),
            notified,
        });

        if notified || origin == LinkOrigin::Accepted || inner.shutdown.is_cancelled() {
            return;
        }
        let Some(connector) = inner.connector.clone() else {
            return;
        };
        let node = self.clone();
        let peer_id = peer_id.to_string();
        tokio::spawn(async move {
            let inner = &node.inner;
            let reconnected = reconnect_loop(
                peer_id,
                connector,
                inner.config.reconnect.to_config(),
                inner.config.connect_timeout(),
                inner.lifecycle.clone(),
                inner.shutdown.child_token(),
            )
            .await;
            if let Some(connection) = reconnected {
                node.adopt(connection, LinkOrigin::Dialed).await;
            }
        });
    }
}
