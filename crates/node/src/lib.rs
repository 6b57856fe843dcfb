//! A peershare peer.
//!
//! [`Node`] owns every piece of per-peer state (connections, chunk store,
//! transfer state, sent-file registry, history, download status) and runs
//! one dispatch loop per connection.

mod config;
mod dispatch;
mod error;
mod events;
mod node;

pub use config::{ConfigError, NodeConfig, ReconnectSettings};
pub use error::NodeError;
pub use events::{LogNotifier, Notice, NoticeKind, NoticeQueue, NodeEvent, Notifier};
pub use node::{LinkOrigin, Node, NodeOptions};
