use std::sync::Arc;

use peershare_connection::{Transport, TransportError};
use peershare_protocol::PeerMessage;
use peershare_protocol::messages::ContentResponse;

/// A virtual link to `requester_id` that goes through a broker.
///
/// Every message is wrapped in `content-response` addressed to the requester.
/// Closing it leaves the broker link alone.
pub struct RoutedTransport {
    broker: Arc<dyn Transport>,
    requester_id: String,
}

impl RoutedTransport {
    pub fn new(broker: Arc<dyn Transport>, requester_id: impl Into<String>) -> Self {
        Self {
            broker,
            requester_id: requester_id.into(),
        }
    }

    pub fn broker_id(&self) -> &str {
        self.broker.peer_id()
    }
}

impl Transport for RoutedTransport {
    fn peer_id(&self) -> &str {
        &self.requester_id
    }

    fn is_open(&self) -> bool {
        self.broker.is_open()
    }

    fn send(&self, msg: PeerMessage) -> Result<(), TransportError> {
        self.broker.send(PeerMessage::ContentResponse(ContentResponse {
            requester_id: self.requester_id.clone(),
            message: Box::new(msg),
        }))
    }

    fn close(&self) {}
}
