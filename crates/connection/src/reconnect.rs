//! Bounded reconnection with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{Connector, connect_with_timeout};
use crate::transport::Connection;
use crate::types::{LifecycleEvent, ReconnectConfig};

/// Tries to re-establish a link to `peer_id`.
///
/// Emits [`LifecycleEvent::Reconnecting`] before each attempt. Returns the new
/// connection, or `None` once `max_attempts` are used up or `cancel` fires.
pub async fn reconnect_loop(
    peer_id: String,
    connector: Arc<dyn Connector>,
    config: ReconnectConfig,
    connect_timeout: Duration,
    events: mpsc::Sender<LifecycleEvent>,
    cancel: CancellationToken,
) -> Option<Connection> {
    for attempt in 1..=config.max_attempts {
        let delay = config.delay_for_attempt(attempt);
        let delay_secs = delay.as_secs_f64();

        let _ = events
            .send(LifecycleEvent::Reconnecting {
                peer_id: peer_id.clone(),
                attempt,
                next_retry_secs: delay_secs,
            })
            .await;
        info!(
            peer = %peer_id,
            attempt,
            delay_secs = format_args!("{delay_secs:.1}"),
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(peer = %peer_id, "reconnect cancelled");
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let attempt_result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(peer = %peer_id, "reconnect cancelled");
                return None;
            }
            r = connect_with_timeout(connector.as_ref(), &peer_id, connect_timeout) => r,
        };

        match attempt_result {
            Ok(conn) => {
                info!(peer = %peer_id, attempt, "reconnected");
                let _ = events
                    .send(LifecycleEvent::Reconnected {
                        peer_id: peer_id.clone(),
                    })
                    .await;
                return Some(conn);
            }
            Err(e) => warn!(peer = %peer_id, attempt, error = %e, "reconnect attempt failed"),
        }
    }

    info!(peer = %peer_id, attempts = config.max_attempts, "giving up on reconnect");
    let _ = events
        .send(LifecycleEvent::ReconnectFailed {
            peer_id,
            attempts: config.max_attempts,
        })
        .await;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;

    fn quick_config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let network = MemoryNetwork::new();
        let connector: Arc<dyn Connector> = Arc::new(network.connector("a"));
        let (tx, mut rx) = mpsc::channel(16);

        let result = reconnect_loop(
            "b".into(),
            connector,
            quick_config(3),
            Duration::from_secs(10),
            tx,
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_none());

        let mut attempts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                LifecycleEvent::Reconnecting { attempt, .. } => attempts.push(attempt),
                LifecycleEvent::ReconnectFailed { attempts: n, .. } => assert_eq!(n, 3),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_when_peer_returns() {
        let network = MemoryNetwork::new();
        let _incoming = network.register("b").await;
        let connector: Arc<dyn Connector> = Arc::new(network.connector("a"));
        let (tx, mut rx) = mpsc::channel(16);

        let conn = reconnect_loop(
            "b".into(),
            connector,
            quick_config(5),
            Duration::from_secs(10),
            tx,
            CancellationToken::new(),
        )
        .await
        .expect("should reconnect");
        assert_eq!(conn.peer_id(), "b");

        assert!(matches!(
            rx.recv().await,
            Some(LifecycleEvent::Reconnecting { attempt: 1, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(LifecycleEvent::Reconnected { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_loop() {
        let network = MemoryNetwork::new();
        let connector: Arc<dyn Connector> = Arc::new(network.connector("a"));
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconnect_loop(
            "b".into(),
            connector,
            quick_config(100),
            Duration::from_secs(10),
            tx,
            cancel,
        )
        .await;
        assert!(result.is_none());
    }
}
