//! Relay layer.
//!
//! Spreads file metadata (never content) to peers that are not directly
//! connected to the content holder, and routes content requests to the
//! holder, directly or through a broker peer.

mod error;
mod layer;
mod routed;

pub use error::RelayError;
pub use layer::{ContentRoute, ForwardAction, RelayConfig, RelayLayer, ServeJob};
pub use routed::RoutedTransport;

/// Error text sent when a holder no longer has the requested content.
pub const NOT_AVAILABLE: &str = "File not found";

/// Error text sent when a broker cannot reach the content holder.
pub const HOLDER_UNREACHABLE: &str = "Original sender not reachable";
