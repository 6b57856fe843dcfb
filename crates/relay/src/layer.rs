use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use peershare_connection::{Connection, ConnectionTable, Connector, Transport, connect_with_timeout};
use peershare_protocol::messages::{
    ContentForward, ContentRequest, ContentResponse, FileInfo, StreamingError,
};
use peershare_protocol::{CONNECT_TIMEOUT, FileId, FileMetadata, PeerMessage};
use peershare_transfer::{
    ProgressCallback, SendOptions, SentFile, SentFileRegistry, TransferStats, send_file,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::routed::RoutedTransport;
use crate::{HOLDER_UNREACHABLE, NOT_AVAILABLE};

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub local_id: String,
    /// Window for on-demand connections to a content holder.
    pub connect_timeout: Duration,
    pub send_options: SendOptions,
}

impl RelayConfig {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            connect_timeout: CONNECT_TIMEOUT,
            send_options: SendOptions::default(),
        }
    }
}

/// How a content request left this node.
#[derive(Debug)]
pub enum ContentRoute {
    /// Sent over an existing link to the holder.
    Direct { peer_id: String },
    /// Sent over a link opened for this request. The caller must adopt it.
    Connected { connection: Connection },
    /// Sent as `content-forward` through a broker.
    Brokered { via: String },
}

/// A file to stream to a requester.
pub struct ServeJob {
    pub file: SentFile,
    pub target: Arc<dyn Transport>,
}

/// What a node did with an incoming `content-forward`.
pub enum ForwardAction {
    /// We hold the content: stream it.
    Serve(ServeJob),
    /// We are the broker: passed on to the holder.
    Forwarded { holder: String },
}

/// A brokered request still waiting for its first byte.
struct BrokerAttempt {
    metadata: FileMetadata,
    /// Brokers asked so far. The last one is the current broker.
    tried: Vec<String>,
}

/// Metadata forwarding and content routing for one node.
pub struct RelayLayer {
    config: RelayConfig,
    connections: Arc<ConnectionTable>,
    registry: Arc<SentFileRegistry>,
    connector: Option<Arc<dyn Connector>>,
    seen: Mutex<HashSet<FileId>>,
    /// Peers that delivered each file's metadata, in arrival order.
    announcers: Mutex<HashMap<FileId, Vec<String>>>,
    brokered: Mutex<HashMap<FileId, BrokerAttempt>>,
}

impl RelayLayer {
    pub fn new(
        config: RelayConfig,
        connections: Arc<ConnectionTable>,
        registry: Arc<SentFileRegistry>,
        connector: Option<Arc<dyn Connector>>,
    ) -> Self {
        Self {
            config,
            connections,
            registry,
            connector,
            seen: Mutex::new(HashSet::new()),
            announcers: Mutex::new(HashMap::new()),
            brokered: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.config.local_id
    }

    /// Marks a file id as known. Returns `true` the first time.
    pub async fn mark_seen(&self, file_id: &FileId) -> bool {
        self.seen.lock().await.insert(file_id.clone())
    }

    pub async fn has_seen(&self, file_id: &FileId) -> bool {
        self.seen.lock().await.contains(file_id)
    }

    /// Handles metadata that arrived from `from`.
    ///
    /// The first time a file id is seen, and only while this node has more
    /// than one open link, a `file-info` goes to every peer except `from`.
    /// Returns `None` for a file id seen before, otherwise the number of
    /// peers it was forwarded to.
    ///
    /// Every delivery, repeated or not, marks `from` as a broker candidate
    /// for the file.
    pub async fn on_metadata(&self, from: &str, metadata: &FileMetadata) -> Option<usize> {
        {
            let mut announcers = self.announcers.lock().await;
            let peers = announcers.entry(metadata.file_id.clone()).or_default();
            if !peers.iter().any(|p| p == from) {
                peers.push(from.to_string());
            }
        }
        if !self.mark_seen(&metadata.file_id).await {
            return None;
        }
        if self.connections.open_count().await <= 1 {
            return Some(0);
        }
        let info = PeerMessage::FileInfo(FileInfo::from_metadata(metadata, false));
        let forwarded = self.connections.broadcast(&info, Some(from)).await;
        if forwarded > 0 {
            info!(file_id = %metadata.file_id, from = %from, peers = forwarded, "metadata forwarded");
        }
        Some(forwarded)
    }

    /// Asks the holder of `metadata` for its content.
    ///
    /// Tries an open link, then an on-demand connection (bounded by the
    /// connect timeout), then a broker. Peers that announced the file are
    /// asked to broker before any other open link.
    pub async fn request_content(&self, metadata: &FileMetadata) -> Result<ContentRoute, RelayError> {
        let holder = metadata.original_sender_id.as_str();
        if holder == self.config.local_id {
            return Err(RelayError::OwnFile {
                file_id: metadata.file_id.clone(),
            });
        }
        let request = PeerMessage::ContentRequest(ContentRequest::from_metadata(metadata));

        if let Some(link) = self.connections.get_open(holder).await {
            link.send(request)?;
            debug!(file_id = %metadata.file_id, holder = %holder, "content requested directly");
            return Ok(ContentRoute::Direct {
                peer_id: holder.to_string(),
            });
        }

        let connect_error = match &self.connector {
            Some(connector) => {
                match connect_with_timeout(connector.as_ref(), holder, self.config.connect_timeout).await {
                    Ok(connection) => {
                        connection.transport.send(request)?;
                        info!(file_id = %metadata.file_id, holder = %holder, "connected to holder on demand");
                        return Ok(ContentRoute::Connected { connection });
                    }
                    Err(e) => {
                        warn!(file_id = %metadata.file_id, holder = %holder, error = %e, "direct connection failed");
                        Some(e)
                    }
                }
            }
            None => None,
        };

        let mut tried = Vec::new();
        if let Some(via) = self.forward_to_next_broker(metadata, &mut tried).await {
            info!(file_id = %metadata.file_id, holder = %holder, via = %via, "content request brokered");
            self.brokered.lock().await.insert(
                metadata.file_id.clone(),
                BrokerAttempt {
                    metadata: metadata.clone(),
                    tried,
                },
            );
            return Ok(ContentRoute::Brokered { via });
        }

        Err(match connect_error {
            Some(e) => RelayError::Connect(e),
            None => RelayError::NoRoute {
                peer_id: holder.to_string(),
            },
        })
    }

    /// Handles a broker's report that it cannot reach the holder.
    ///
    /// Passes the request on to the next untried broker and returns its id.
    /// Returns `None` when the error is not from the current broker of a
    /// pending request, or when every candidate has been tried.
    pub async fn on_broker_error(&self, from: &str, error: &StreamingError) -> Option<String> {
        if error.error != HOLDER_UNREACHABLE {
            return None;
        }
        let mut brokered = self.brokered.lock().await;
        let attempt = brokered.get_mut(&error.file_id)?;
        if attempt.tried.last().map(String::as_str) != Some(from) {
            return None;
        }
        match self.forward_to_next_broker(&attempt.metadata, &mut attempt.tried).await {
            Some(via) => {
                info!(file_id = %error.file_id, failed = %from, via = %via, "retrying through another broker");
                Some(via)
            }
            None => {
                warn!(file_id = %error.file_id, tried = attempt.tried.len(), "no broker reaches the holder");
                brokered.remove(&error.file_id);
                None
            }
        }
    }

    /// Forgets the pending broker attempt for a file once content flows or
    /// the request fails.
    pub async fn settle_request(&self, file_id: &FileId) {
        self.brokered.lock().await.remove(file_id);
    }

    /// Sends a `content-forward` to the best broker not in `tried`.
    async fn forward_to_next_broker(
        &self,
        metadata: &FileMetadata,
        tried: &mut Vec<String>,
    ) -> Option<String> {
        let forward = PeerMessage::ContentForward(ContentForward::from_metadata(
            metadata,
            self.config.local_id.clone(),
        ));
        for broker in self.broker_candidates(metadata).await {
            let via = broker.peer_id().to_string();
            if tried.contains(&via) {
                continue;
            }
            tried.push(via.clone());
            match broker.send(forward.clone()) {
                Ok(()) => return Some(via),
                Err(e) => debug!(file_id = %metadata.file_id, via = %via, error = %e, "broker send failed"),
            }
        }
        None
    }

    /// Open links other than the holder, announcers first in arrival order.
    async fn broker_candidates(&self, metadata: &FileMetadata) -> Vec<Arc<dyn Transport>> {
        let announcers = self
            .announcers
            .lock()
            .await
            .get(&metadata.file_id)
            .cloned()
            .unwrap_or_default();
        let mut links: Vec<_> = self
            .connections
            .open_transports()
            .await
            .into_iter()
            .filter(|t| t.peer_id() != metadata.original_sender_id)
            .collect();
        links.sort_by_key(|t| {
            announcers
                .iter()
                .position(|a| a == t.peer_id())
                .unwrap_or(usize::MAX)
        });
        links
    }

    /// Handles a direct content request from `from`.
    ///
    /// Unknown files are answered with an explicit `streaming-error`.
    pub async fn on_content_request(
        &self,
        from: &str,
        request: &ContentRequest,
    ) -> Result<ServeJob, RelayError> {
        let target = self
            .connections
            .get_open(from)
            .await
            .ok_or_else(|| RelayError::NoRoute {
                peer_id: from.to_string(),
            })?;

        match self.registry.get(&request.file_id).await {
            Some(file) => {
                info!(file_id = %request.file_id, requester = %from, "serving content request");
                Ok(ServeJob { file, target })
            }
            None => {
                warn!(file_id = %request.file_id, requester = %from, "requested file not held");
                target.send(not_available(&request.file_id))?;
                Err(RelayError::NotAvailable {
                    file_id: request.file_id.clone(),
                })
            }
        }
    }

    /// Handles a brokered request arriving from `from`.
    pub async fn on_content_forward(
        &self,
        from: &str,
        forward: &ContentForward,
    ) -> Result<ForwardAction, RelayError> {
        let Some(broker) = self.connections.get_open(from).await else {
            return Err(RelayError::NoRoute {
                peer_id: from.to_string(),
            });
        };

        if forward.original_sender == self.config.local_id {
            // Prefer a direct link to the requester over the broker.
            let target: Arc<dyn Transport> = match self.connections.get_open(&forward.requester_id).await {
                Some(direct) => direct,
                None => Arc::new(RoutedTransport::new(broker, forward.requester_id.clone())),
            };
            return match self.registry.get(&forward.file_id).await {
                Some(file) => {
                    info!(
                        file_id = %forward.file_id,
                        requester = %forward.requester_id,
                        via = %target.peer_id(),
                        "serving brokered request"
                    );
                    Ok(ForwardAction::Serve(ServeJob { file, target }))
                }
                None => {
                    warn!(file_id = %forward.file_id, requester = %forward.requester_id, "brokered file not held");
                    target.send(not_available(&forward.file_id))?;
                    Err(RelayError::NotAvailable {
                        file_id: forward.file_id.clone(),
                    })
                }
            };
        }

        match self.connections.get_open(&forward.original_sender).await {
            Some(holder) => {
                holder.send(PeerMessage::ContentForward(forward.clone()))?;
                debug!(
                    file_id = %forward.file_id,
                    requester = %forward.requester_id,
                    holder = %forward.original_sender,
                    "content forward passed on"
                );
                Ok(ForwardAction::Forwarded {
                    holder: forward.original_sender.clone(),
                })
            }
            None => {
                warn!(file_id = %forward.file_id, holder = %forward.original_sender, "holder not reachable from broker");
                broker.send(PeerMessage::StreamingError(StreamingError::new(
                    forward.file_id.clone(),
                    HOLDER_UNREACHABLE,
                )))?;
                Err(RelayError::NoRoute {
                    peer_id: forward.original_sender.clone(),
                })
            }
        }
    }

    /// Handles a routed message.
    ///
    /// Returns the inner message when it is addressed to this node; otherwise
    /// passes it on to the requester and returns `None`.
    pub async fn on_content_response(
        &self,
        response: &ContentResponse,
    ) -> Result<Option<PeerMessage>, RelayError> {
        if response.requester_id == self.config.local_id {
            return Ok(Some((*response.message).clone()));
        }
        let Some(requester) = self.connections.get_open(&response.requester_id).await else {
            warn!(requester = %response.requester_id, "routed message has no onward link");
            return Err(RelayError::NoRoute {
                peer_id: response.requester_id.clone(),
            });
        };
        requester.send((*response.message).clone())?;
        Ok(None)
    }

    /// Streams a job's file to its target.
    pub async fn serve(
        &self,
        job: ServeJob,
        progress: Option<&ProgressCallback>,
    ) -> Result<TransferStats, RelayError> {
        let stats = send_file(
            job.file.source.as_ref(),
            &job.file.metadata,
            &[job.target],
            &self.config.send_options,
            progress,
        )
        .await?;
        Ok(stats)
    }
}

fn not_available(file_id: &FileId) -> PeerMessage {
    PeerMessage::StreamingError(StreamingError::new(file_id.clone(), NOT_AVAILABLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use peershare_connection::{ConnectError, MemoryNetwork, TransportEvent, memory_pair};
    use peershare_transfer::MemorySource;

    fn meta(holder: &str) -> FileMetadata {
        FileMetadata {
            file_id: FileId::new("clip.mp4-1700000000000"),
            name: "clip.mp4".into(),
            mime_type: "video/mp4".into(),
            total_size: 6,
            original_sender_id: holder.into(),
            created_at: 1_700_000_000_000,
        }
    }

    fn relay(local: &str, connections: Arc<ConnectionTable>, connector: Option<Arc<dyn Connector>>) -> RelayLayer {
        let mut config = RelayConfig::new(local);
        config.send_options.pacing = Duration::ZERO;
        RelayLayer::new(config, connections, Arc::new(SentFileRegistry::new()), connector)
    }

    async fn next_data(conn: &mut Connection) -> PeerMessage {
        loop {
            match conn.events.recv().await {
                Some(TransportEvent::Data(msg)) => return msg,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn forwards_new_metadata_once_except_origin() {
        let table = Arc::new(ConnectionTable::new());
        let (ba, mut ab) = memory_pair("b", "a");
        let (bc, mut cb) = memory_pair("b", "c");
        table.insert(ba.transport.clone()).await;
        table.insert(bc.transport.clone()).await;
        let layer = relay("b", Arc::clone(&table), None);

        assert_eq!(layer.on_metadata("a", &meta("a")).await, Some(1));
        assert_eq!(layer.on_metadata("a", &meta("a")).await, None);

        match next_data(&mut cb).await {
            PeerMessage::FileInfo(info) => {
                assert_eq!(info.original_sender, "a");
                assert!(!info.direct_download);
            }
            other => panic!("unexpected {other:?}"),
        }
        ab.events.recv().await; // open
        assert!(ab.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_link_does_not_forward() {
        let table = Arc::new(ConnectionTable::new());
        let (ba, _ab) = memory_pair("b", "a");
        table.insert(ba.transport.clone()).await;
        let layer = relay("b", table, None);
        assert_eq!(layer.on_metadata("a", &meta("a")).await, Some(0));
        assert!(layer.has_seen(&meta("a").file_id).await);
    }

    #[tokio::test]
    async fn request_goes_direct_when_linked() {
        let table = Arc::new(ConnectionTable::new());
        let (ba, mut ab) = memory_pair("b", "a");
        table.insert(ba.transport.clone()).await;
        let layer = relay("b", table, None);

        let route = layer.request_content(&meta("a")).await.unwrap();
        assert!(matches!(route, ContentRoute::Direct { ref peer_id } if peer_id == "a"));
        assert!(matches!(next_data(&mut ab).await, PeerMessage::ContentRequest(_)));
    }

    #[tokio::test]
    async fn request_connects_on_demand() {
        let network = MemoryNetwork::new();
        let mut incoming = network.register("a").await;
        let layer = relay(
            "c",
            Arc::new(ConnectionTable::new()),
            Some(Arc::new(network.connector("c"))),
        );

        let route = layer.request_content(&meta("a")).await.unwrap();
        assert!(matches!(route, ContentRoute::Connected { .. }));
        let mut at_holder = incoming.recv().await.unwrap();
        assert!(matches!(next_data(&mut at_holder).await, PeerMessage::ContentRequest(_)));
    }

    #[tokio::test]
    async fn unreachable_holder_is_brokered() {
        let network = MemoryNetwork::new();
        let _a = network.register("a").await;
        network.block("a", "c").await;

        let table = Arc::new(ConnectionTable::new());
        let (cb, mut bc) = memory_pair("c", "b");
        table.insert(cb.transport.clone()).await;
        let layer = relay("c", table, Some(Arc::new(network.connector("c"))));

        let route = layer.request_content(&meta("a")).await.unwrap();
        assert!(matches!(route, ContentRoute::Brokered { ref via } if via == "b"));
        match next_data(&mut bc).await {
            PeerMessage::ContentForward(f) => {
                assert_eq!(f.requester_id, "c");
                assert_eq!(f.original_sender, "a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// `c` linked to `b` and `d`, no connector.
    async fn requester_with_two_links() -> (RelayLayer, Connection, Connection) {
        let table = Arc::new(ConnectionTable::new());
        let (cb, bc) = memory_pair("c", "b");
        let (cd, dc) = memory_pair("c", "d");
        table.insert(cb.transport.clone()).await;
        table.insert(cd.transport.clone()).await;
        (relay("c", table, None), bc, dc)
    }

    fn has_data(conn: &mut Connection) -> bool {
        while let Ok(event) = conn.events.try_recv() {
            if matches!(event, TransportEvent::Data(_)) {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn announcer_is_asked_to_broker_first() {
        let (layer, mut bc, mut dc) = requester_with_two_links().await;
        layer.on_metadata("d", &meta("a")).await;

        let route = layer.request_content(&meta("a")).await.unwrap();
        assert!(matches!(route, ContentRoute::Brokered { ref via } if via == "d"));
        assert!(matches!(next_data(&mut dc).await, PeerMessage::ContentForward(_)));
        assert!(!has_data(&mut bc));
    }

    #[tokio::test]
    async fn unreachable_report_moves_to_next_broker() {
        let (layer, mut bc, mut dc) = requester_with_two_links().await;
        layer.on_metadata("d", &meta("a")).await;
        layer.request_content(&meta("a")).await.unwrap();
        next_data(&mut dc).await;

        let unreachable = StreamingError::new(meta("a").file_id, HOLDER_UNREACHABLE);
        // Only the current broker can move the request on.
        assert_eq!(layer.on_broker_error("b", &unreachable).await, None);
        assert_eq!(layer.on_broker_error("d", &unreachable).await.as_deref(), Some("b"));
        match next_data(&mut bc).await {
            PeerMessage::ContentForward(f) => assert_eq!(f.requester_id, "c"),
            other => panic!("unexpected {other:?}"),
        }

        // Every link tried: the error is final.
        assert_eq!(layer.on_broker_error("b", &unreachable).await, None);
        assert!(!has_data(&mut dc));
    }

    #[tokio::test]
    async fn other_errors_and_settled_requests_are_not_retried() {
        let (layer, _bc, mut dc) = requester_with_two_links().await;
        layer.on_metadata("d", &meta("a")).await;
        layer.request_content(&meta("a")).await.unwrap();
        next_data(&mut dc).await;

        let missing = StreamingError::new(meta("a").file_id, NOT_AVAILABLE);
        assert_eq!(layer.on_broker_error("d", &missing).await, None);

        layer.settle_request(&meta("a").file_id).await;
        let unreachable = StreamingError::new(meta("a").file_id, HOLDER_UNREACHABLE);
        assert_eq!(layer.on_broker_error("d", &unreachable).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_holder_without_broker_times_out() {
        let network = MemoryNetwork::new();
        let _a = network.register("a").await;
        network.set_silent("a", true).await;
        let layer = relay(
            "c",
            Arc::new(ConnectionTable::new()),
            Some(Arc::new(network.connector("c"))),
        );

        let err = layer.request_content(&meta("a")).await.unwrap_err();
        assert!(matches!(err, RelayError::Connect(ConnectError::Timeout { .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_file_gets_explicit_error() {
        let table = Arc::new(ConnectionTable::new());
        let (ab, mut ba) = memory_pair("a", "b");
        table.insert(ab.transport.clone()).await;
        let layer = relay("a", table, None);

        let request = ContentRequest::from_metadata(&meta("a"));
        let err = layer.on_content_request("b", &request).await.err().unwrap();
        assert!(matches!(err, RelayError::NotAvailable { .. }));
        assert!(!err.is_retryable());

        match next_data(&mut ba).await {
            PeerMessage::StreamingError(e) => assert_eq!(e.error, NOT_AVAILABLE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn registered_file_is_served() {
        let table = Arc::new(ConnectionTable::new());
        let (ab, mut ba) = memory_pair("a", "b");
        table.insert(ab.transport.clone()).await;
        let layer = relay("a", table, None);
        layer
            .registry
            .register(
                meta("a"),
                Arc::new(MemorySource::new("clip.mp4", "video/mp4", b"abcdef".to_vec())),
            )
            .await;

        let job = layer
            .on_content_request("b", &ContentRequest::from_metadata(&meta("a")))
            .await
            .ok()
            .unwrap();
        layer.serve(job, None).await.unwrap();

        assert!(matches!(next_data(&mut ba).await, PeerMessage::FileHeader(_)));
        assert!(matches!(next_data(&mut ba).await, PeerMessage::FileChunk(_)));
        assert!(matches!(next_data(&mut ba).await, PeerMessage::FileComplete(_)));
    }

    #[tokio::test]
    async fn broker_passes_forward_to_holder() {
        let table = Arc::new(ConnectionTable::new());
        let (ba, mut ab) = memory_pair("b", "a");
        let (bc, _cb) = memory_pair("b", "c");
        table.insert(ba.transport.clone()).await;
        table.insert(bc.transport.clone()).await;
        let layer = relay("b", table, None);

        let forward = ContentForward::from_metadata(&meta("a"), "c");
        let action = layer.on_content_forward("c", &forward).await.ok().unwrap();
        assert!(matches!(action, ForwardAction::Forwarded { ref holder } if holder == "a"));
        assert!(matches!(next_data(&mut ab).await, PeerMessage::ContentForward(_)));
    }

    #[tokio::test]
    async fn broker_without_holder_reports_back() {
        let table = Arc::new(ConnectionTable::new());
        let (bc, mut cb) = memory_pair("b", "c");
        table.insert(bc.transport.clone()).await;
        let layer = relay("b", table, None);

        let forward = ContentForward::from_metadata(&meta("a"), "c");
        assert!(layer.on_content_forward("c", &forward).await.is_err());
        match next_data(&mut cb).await {
            PeerMessage::StreamingError(e) => assert_eq!(e.error, HOLDER_UNREACHABLE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn holder_routes_through_broker_when_requester_not_linked() {
        let table = Arc::new(ConnectionTable::new());
        let (ab, mut ba) = memory_pair("a", "b");
        table.insert(ab.transport.clone()).await;
        let layer = relay("a", table, None);
        layer
            .registry
            .register(
                meta("a"),
                Arc::new(MemorySource::new("clip.mp4", "video/mp4", b"abcdef".to_vec())),
            )
            .await;

        let forward = ContentForward::from_metadata(&meta("a"), "c");
        let ForwardAction::Serve(job) = layer.on_content_forward("b", &forward).await.ok().unwrap() else {
            panic!("expected serve");
        };
        assert_eq!(job.target.peer_id(), "c");
        layer.serve(job, None).await.unwrap();

        match next_data(&mut ba).await {
            PeerMessage::ContentResponse(r) => {
                assert_eq!(r.requester_id, "c");
                assert!(matches!(*r.message, PeerMessage::FileHeader(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_response_unwraps_or_forwards() {
        let table = Arc::new(ConnectionTable::new());
        let (bc, mut cb) = memory_pair("b", "c");
        table.insert(bc.transport.clone()).await;
        let layer = relay("b", Arc::clone(&table), None);

        let inner = not_available(&FileId::new("f"));
        let for_c = ContentResponse {
            requester_id: "c".into(),
            message: Box::new(inner.clone()),
        };
        assert_eq!(layer.on_content_response(&for_c).await.ok().unwrap(), None);
        assert_eq!(next_data(&mut cb).await, inner);

        let for_b = ContentResponse {
            requester_id: "b".into(),
            message: Box::new(inner.clone()),
        };
        assert_eq!(layer.on_content_response(&for_b).await.ok().unwrap(), Some(inner));
    }
}
