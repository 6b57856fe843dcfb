//! Connection lifecycle for peer links.
//!
//! Defines the [`Transport`] seam the transfer core sends through, the
//! per-node [`ConnectionTable`], keep-alive and stale detection, disconnect
//! notification, bounded reconnection and on-demand connection with a timeout.
//! [`MemoryNetwork`] provides in-process transports for tests and demos.

pub mod connector;
pub mod error;
pub mod keepalive;
pub mod memory;
pub mod recent;
pub mod reconnect;
pub mod table;
pub mod transport;
pub mod types;

pub use connector::{ConnectFuture, Connector, connect_with_timeout};
pub use error::{ConnectError, TransportError};
pub use keepalive::keep_alive_pump;
pub use memory::{MemoryConnector, MemoryNetwork, memory_pair};
pub use recent::RecentPeers;
pub use reconnect::reconnect_loop;
pub use table::ConnectionTable;
pub use transport::{Connection, Transport, TransportEvent};
pub use types::{LifecycleEvent, ReconnectConfig};
