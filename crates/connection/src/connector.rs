//! On-demand connection establishment.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConnectError;
use crate::transport::Connection;

/// Boxed future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Connection, ConnectError>> + Send + 'a>>;

/// Obtains a connection to a peer given its id.
///
/// Signaling and discovery live behind this seam.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, peer_id: &'a str) -> ConnectFuture<'a>;
}

/// Connects to `peer_id`, failing with [`ConnectError::Timeout`] after `timeout`.
pub async fn connect_with_timeout(
    connector: &dyn Connector,
    peer_id: &str,
    timeout: Duration,
) -> Result<Connection, ConnectError> {
    debug!(peer = %peer_id, timeout_secs = timeout.as_secs(), "connecting");
    match tokio::time::timeout(timeout, connector.connect(peer_id)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(peer = %peer_id, "connection attempt timed out");
            Err(ConnectError::Timeout {
                peer_id: peer_id.to_string(),
            })
        }
    }
}
