use std::fmt;
use std::sync::Arc;

use peershare_protocol::PeerMessage;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// A reliable, ordered, message-oriented link to one remote peer.
///
/// `send` queues the message and returns without waiting for delivery.
pub trait Transport: Send + Sync {
    /// Identifier of the remote peer.
    fn peer_id(&self) -> &str;

    fn is_open(&self) -> bool;

    fn send(&self, msg: PeerMessage) -> Result<(), TransportError>;

    /// Closes the link. Both ends observe [`TransportEvent::Close`].
    fn close(&self);
}

/// Events observed on one end of a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Data(PeerMessage),
    Close,
    Error(String),
}

/// An established link: the sending half and its event stream.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Connection {
    pub fn peer_id(&self) -> &str {
        self.transport.peer_id()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_id", &self.transport.peer_id())
            .field("open", &self.transport.is_open())
            .finish()
    }
}
