//! One peer and the context objects it owns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use peershare_chunk_store::{ChunkTier, DiskTier, StoreStats, TieredChunkStore};
use peershare_connection::{
    Connection, ConnectionTable, Connector, LifecycleEvent, RecentPeers, Transport,
    connect_with_timeout, keep_alive_pump,
};
use peershare_protocol::messages::FileInfo;
use peershare_protocol::{FileId, FileMetadata, PeerMessage, now_millis};
use peershare_relay::{ContentRoute, RelayConfig, RelayLayer};
use peershare_transfer::{
    ByteSource, Delivered, DeliveryError, DeliveryStrategy, Direction, DownloadStatus,
    DownloadTracker, FileHistory, FileHistoryEntry, ProgressCallback, ReconstructionEngine,
    Receiver, SentFileRegistry, TransferStats, send_file,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{EventSink, LogNotifier, Notice, NodeEvent, Notifier};

/// Collaborators a node is started with.
#[derive(Default)]
pub struct NodeOptions {
    /// Dials peers for on-demand requests and reconnection.
    pub connector: Option<Arc<dyn Connector>>,
    /// Receives user notifications. Logs only when unset.
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Replaces the disk tier built from `store_dir`.
    pub durable_tier: Option<Arc<dyn ChunkTier>>,
}

/// How a link came to be. Only dialled links are re-dialled after a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOrigin {
    Dialed,
    Accepted,
}

/// Metadata of a file this node has heard about.
#[derive(Debug, Clone)]
pub(crate) struct CatalogEntry {
    pub(crate) metadata: FileMetadata,
    pub(crate) expected_chunks: Option<u32>,
}

pub(crate) struct Inner {
    pub(crate) config: NodeConfig,
    pub(crate) connections: Arc<ConnectionTable>,
    pub(crate) store: Arc<TieredChunkStore>,
    pub(crate) receiver: Receiver,
    pub(crate) engine: ReconstructionEngine,
    pub(crate) registry: Arc<SentFileRegistry>,
    pub(crate) history: Arc<Mutex<FileHistory>>,
    pub(crate) downloads: Mutex<DownloadTracker>,
    pub(crate) catalog: Mutex<HashMap<FileId, CatalogEntry>>,
    pub(crate) deliveries: Mutex<HashMap<FileId, CancellationToken>>,
    /// Peers that announced their departure.
    pub(crate) departed: Mutex<HashSet<String>>,
    pub(crate) recent: Mutex<RecentPeers>,
    pub(crate) relay: RelayLayer,
    pub(crate) connector: Option<Arc<dyn Connector>>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) progress: ProgressCallback,
    pub(crate) events: EventSink,
    events_rx: Mutex<Option<mpsc::Receiver<NodeEvent>>>,
    pub(crate) lifecycle: mpsc::Sender<LifecycleEvent>,
    pub(crate) shutdown: CancellationToken,
}

/// A peer: shares files, receives them, relays metadata and requests.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<Inner>,
}

impl Node {
    /// Builds the node's context and starts its background tasks.
    pub async fn start(config: NodeConfig, options: NodeOptions) -> Result<Self, NodeError> {
        let durable: Option<Arc<dyn ChunkTier>> = match (options.durable_tier, &config.store_dir) {
            (Some(tier), _) => Some(tier),
            (None, Some(dir)) => Some(Arc::new(DiskTier::open(dir.clone()).await?)),
            (None, None) => None,
        };
        let store = Arc::new(TieredChunkStore::new(durable));

        let (events, events_rx) = EventSink::channel(config.event_buffer);
        let progress: ProgressCallback = {
            let events = events.clone();
            Arc::new(move |p| events.emit(NodeEvent::Progress(p)))
        };

        let history = Arc::new(Mutex::new(FileHistory::new()));
        let receiver = Receiver::new(Arc::clone(&store), Arc::clone(&history), config.chunk_size)
            .with_progress(Arc::clone(&progress));
        let engine = ReconstructionEngine::new(Arc::clone(&store))
            .with_text_limit(config.text_fallback_limit)
            .with_progress(Arc::clone(&progress));

        let connections = Arc::new(ConnectionTable::new());
        let registry = Arc::new(SentFileRegistry::new());
        let relay = RelayLayer::new(
            RelayConfig {
                local_id: config.peer_id.clone(),
                connect_timeout: config.connect_timeout(),
                send_options: config.send_options(),
            },
            Arc::clone(&connections),
            Arc::clone(&registry),
            options.connector.clone(),
        );

        let (lifecycle, lifecycle_rx) = mpsc::channel(32);
        let node = Self {
            inner: Arc::new(Inner {
                connections,
                store,
                receiver,
                engine,
                registry,
                history,
                downloads: Mutex::new(DownloadTracker::new()),
                catalog: Mutex::new(HashMap::new()),
                deliveries: Mutex::new(HashMap::new()),
                departed: Mutex::new(HashSet::new()),
                recent: Mutex::new(RecentPeers::default()),
                relay,
                connector: options.connector,
                notifier: options.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                progress,
                events,
                events_rx: Mutex::new(Some(events_rx)),
                lifecycle,
                shutdown: CancellationToken::new(),
                config,
            }),
        };
        node.spawn_background(lifecycle_rx);

        info!(
            peer = %node.peer_id(),
            durable = node.inner.store.has_durable_tier(),
            "node started"
        );
        Ok(node)
    }

    fn spawn_background(&self, mut lifecycle_rx: mpsc::Receiver<LifecycleEvent>) {
        let inner = &self.inner;
        tokio::spawn(keep_alive_pump(
            Arc::clone(&inner.connections),
            inner.config.peer_id.clone(),
            inner.config.keep_alive_interval(),
            inner.config.stale_after(),
            inner.lifecycle.clone(),
            inner.shutdown.child_token(),
        ));

        let events = inner.events.clone();
        let cancel = inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = lifecycle_rx.recv() => match event {
                        Some(event) => events.emit(NodeEvent::Lifecycle(event)),
                        None => break,
                    },
                }
            }
        });
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.config.peer_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<NodeEvent>> {
        self.inner.events_rx.lock().await.take()
    }

    /// Ids of peers with an open link, sorted.
    pub async fn peers(&self) -> Vec<String> {
        self.inner
            .connections
            .open_transports()
            .await
            .iter()
            .map(|t| t.peer_id().to_string())
            .collect()
    }

    pub async fn recent_peers(&self) -> Vec<String> {
        self.inner.recent.lock().await.list()
    }

    pub async fn status(&self, file_id: &FileId) -> Option<DownloadStatus> {
        self.inner.downloads.lock().await.get(file_id).cloned()
    }

    pub async fn history(&self) -> Vec<FileHistoryEntry> {
        self.inner.history.lock().await.entries().to_vec()
    }

    /// Files announced to this node or received by it.
    pub async fn catalog(&self) -> Vec<FileMetadata> {
        let mut files: Vec<_> = self
            .inner
            .catalog
            .lock()
            .await
            .values()
            .map(|e| e.metadata.clone())
            .collect();
        files.sort_by_key(|m| m.created_at);
        files
    }

    pub fn store_stats(&self) -> StoreStats {
        self.inner.store.stats()
    }

    /// Dials `peer_id` and adopts the new link.
    pub async fn connect(&self, peer_id: &str) -> Result<(), NodeError> {
        let connector = self.inner.connector.as_ref().ok_or(NodeError::NoConnector)?;
        let connection =
            connect_with_timeout(connector.as_ref(), peer_id, self.inner.config.connect_timeout())
                .await?;
        self.adopt(connection, LinkOrigin::Dialed).await;
        Ok(())
    }

    /// Adopts every connection arriving on `incoming` until shutdown.
    pub fn listen(&self, mut incoming: mpsc::UnboundedReceiver<Connection>) {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let connection = tokio::select! {
                    _ = node.inner.shutdown.cancelled() => break,
                    connection = incoming.recv() => match connection {
                        Some(c) => c,
                        None => break,
                    },
                };
                node.adopt(connection, LinkOrigin::Accepted).await;
            }
        });
    }

    /// Registers an established link and starts handling its messages.
    pub async fn adopt(&self, connection: Connection, origin: LinkOrigin) {
        let peer_id = connection.peer_id().to_string();
        self.inner
            .connections
            .insert(Arc::clone(&connection.transport))
            .await;
        self.inner.recent.lock().await.record(&peer_id);
        self.inner.departed.lock().await.remove(&peer_id);
        info!(peer = %peer_id, ?origin, "peer connected");
        self.inner.events.emit(NodeEvent::PeerConnected { peer_id });

        tokio::spawn(self.clone().run_connection(connection, origin));
    }

    /// Offers a file to every open peer, metadata only.
    ///
    /// Peers pull the content later with a content request.
    pub async fn share(&self, source: Arc<dyn ByteSource>) -> Result<FileMetadata, NodeError> {
        let created_at = now_millis();
        let metadata = FileMetadata {
            file_id: FileId::for_queued(source.name(), created_at),
            name: source.name().to_string(),
            mime_type: source.mime_type().to_string(),
            total_size: source.size(),
            original_sender_id: self.peer_id().to_string(),
            created_at,
        };
        self.offer(&metadata, source).await;

        let info = PeerMessage::FileInfo(FileInfo::from_metadata(&metadata, true));
        let announced = self.inner.connections.broadcast(&info, None).await;
        if announced == 0 {
            warn!(file_id = %metadata.file_id, "file shared with no peers connected");
        }
        info!(file_id = %metadata.file_id, name = %metadata.name, peers = announced, "file shared");
        Ok(metadata)
    }

    /// Pushes a file's content to `peers`, or to every open peer when empty.
    pub async fn send_file(
        &self,
        source: Arc<dyn ByteSource>,
        peers: &[&str],
    ) -> Result<TransferStats, NodeError> {
        let targets: Vec<Arc<dyn Transport>> = if peers.is_empty() {
            self.inner.connections.open_transports().await
        } else {
            let mut targets = Vec::with_capacity(peers.len());
            for peer_id in peers {
                let transport = self.inner.connections.get_open(peer_id).await.ok_or_else(|| {
                    NodeError::NotConnected {
                        peer_id: peer_id.to_string(),
                    }
                })?;
                targets.push(transport);
            }
            targets
        };

        let metadata = FileMetadata::new(
            FileId::from_name_and_size(source.name(), source.size()),
            source.name(),
            source.mime_type(),
            source.size(),
            self.peer_id(),
        );
        self.offer(&metadata, Arc::clone(&source)).await;
        self.inner.events.emit(NodeEvent::TransferStarted {
            metadata: metadata.clone(),
            direction: Direction::Sent,
        });

        let result = send_file(
            source.as_ref(),
            &metadata,
            &targets,
            &self.inner.config.send_options(),
            Some(&self.inner.progress),
        )
        .await;
        match result {
            Ok(stats) => {
                self.inner.events.emit(NodeEvent::TransferCompleted {
                    metadata,
                    direction: Direction::Sent,
                    stats,
                });
                Ok(stats)
            }
            Err(e) => {
                self.inner
                    .notifier
                    .notify(Notice::error(metadata.name.clone(), e.to_string()));
                self.inner.events.emit(NodeEvent::TransferFailed {
                    file_id: metadata.file_id,
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                });
                Err(e.into())
            }
        }
    }

    async fn offer(&self, metadata: &FileMetadata, source: Arc<dyn ByteSource>) {
        self.inner.registry.register(metadata.clone(), source).await;
        self.inner.relay.mark_seen(&metadata.file_id).await;
        self.inner.history.lock().await.record(FileHistoryEntry {
            file_id: metadata.file_id.clone(),
            direction: Direction::Sent,
            metadata: metadata.clone(),
            shared_by: self.peer_id().to_string(),
        });
    }

    /// Asks the holder of an announced file for its content.
    pub async fn request_download(&self, file_id: &FileId) -> Result<(), NodeError> {
        let entry = self.catalog_entry(file_id).await?;
        {
            let mut downloads = self.inner.downloads.lock().await;
            let status = downloads
                .get(file_id)
                .cloned()
                .unwrap_or(DownloadStatus::Available);
            if !status.can_request() {
                return Err(NodeError::InvalidState {
                    file_id: file_id.clone(),
                    status,
                });
            }
            downloads.set(file_id, DownloadStatus::Requested);
        }

        match self.inner.relay.request_content(&entry.metadata).await {
            Ok(ContentRoute::Connected { connection }) => {
                self.adopt(connection, LinkOrigin::Dialed).await;
                Ok(())
            }
            Ok(route) => {
                debug!(file_id = %file_id, ?route, "content requested");
                Ok(())
            }
            Err(e) => {
                self.fail_download(file_id, e.to_string(), e.is_retryable())
                    .await;
                Err(e.into())
            }
        }
    }

    /// Reconstructs a received file and hands it over.
    ///
    /// Without an explicit strategy the best one the configuration allows is
    /// used. A cancelled delivery restores the status held before it.
    pub async fn download(
        &self,
        file_id: &FileId,
        strategy: Option<DeliveryStrategy>,
    ) -> Result<Delivered, NodeError> {
        let entry = self.catalog_entry(file_id).await?;
        {
            let mut downloads = self.inner.downloads.lock().await;
            let status = downloads
                .get(file_id)
                .cloned()
                .unwrap_or(DownloadStatus::Available);
            if !status.can_deliver() {
                return Err(NodeError::InvalidState {
                    file_id: file_id.clone(),
                    status,
                });
            }
            downloads.begin_delivery(file_id);
        }

        let strategy = strategy.or_else(|| {
            self.inner
                .config
                .delivery_capabilities()
                .select(entry.metadata.total_size)
        });
        let Some(strategy) = strategy else {
            self.inner.downloads.lock().await.cancel_delivery(file_id);
            return Err(DeliveryError::NoStrategy.into());
        };

        let cancel = CancellationToken::new();
        self.inner
            .deliveries
            .lock()
            .await
            .insert(file_id.clone(), cancel.clone());
        let result = self
            .inner
            .engine
            .deliver(&entry.metadata, entry.expected_chunks, &strategy, &cancel)
            .await;
        self.inner.deliveries.lock().await.remove(file_id);

        match result {
            Ok(delivered) => {
                self.inner.downloads.lock().await.finish_delivery(file_id);
                self.inner
                    .notifier
                    .notify(Notice::success(format!("{} downloaded", entry.metadata.name)));
                Ok(delivered)
            }
            Err(DeliveryError::Cancelled) => {
                let restored = self.inner.downloads.lock().await.cancel_delivery(file_id);
                info!(file_id = %file_id, ?restored, "download cancelled");
                Err(DeliveryError::Cancelled.into())
            }
            Err(e @ DeliveryError::Integrity(_)) => {
                self.fail_download(file_id, e.to_string(), false).await;
                Err(e.into())
            }
            Err(e) => {
                self.inner.downloads.lock().await.cancel_delivery(file_id);
                warn!(file_id = %file_id, error = %e, "download failed");
                self.inner
                    .notifier
                    .notify(Notice::error(entry.metadata.name, e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Cancels a running download. Returns `false` if none is running.
    pub async fn cancel_download(&self, file_id: &FileId) -> bool {
        match self.inner.deliveries.lock().await.get(file_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Tells every peer we are leaving and closes all links.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!(peer = %self.peer_id(), "node shutting down");
        self.inner.shutdown.cancel();
        for token in self.inner.deliveries.lock().await.values() {
            token.cancel();
        }
        self.inner
            .connections
            .disconnect_all(&self.inner.config.peer_id)
            .await;
    }

    async fn catalog_entry(&self, file_id: &FileId) -> Result<CatalogEntry, NodeError> {
        self.inner
            .catalog
            .lock()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| NodeError::UnknownFile {
                file_id: file_id.clone(),
            })
    }

    /// Marks a download failed and tells the user.
    pub(crate) async fn fail_download(&self, file_id: &FileId, reason: String, retryable: bool) {
        let name = self
            .inner
            .catalog
            .lock()
            .await
            .get(file_id)
            .map(|e| e.metadata.name.clone())
            .unwrap_or_else(|| file_id.to_string());
        self.inner
            .downloads
            .lock()
            .await
            .fail(file_id, reason.clone(), retryable);
        warn!(file_id = %file_id, reason = %reason, retryable, "download failed");
        self.inner.notifier.notify(Notice::error(name, reason.clone()));
        self.inner.events.emit(NodeEvent::TransferFailed {
            file_id: file_id.clone(),
            reason,
            retryable,
        });
    }
}
