//! Keep-alive pump: periodic heartbeats and stale peer detection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use peershare_protocol::PeerMessage;
use peershare_protocol::messages::KeepAlive;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::table::ConnectionTable;
use crate::types::LifecycleEvent;

/// Sends `keep-alive` to every open peer each `interval` and reports peers
/// silent for longer than `stale_after`. Each stale peer is reported once
/// until it is heard from again.
pub async fn keep_alive_pump(
    table: Arc<ConnectionTable>,
    local_peer_id: String,
    interval: Duration,
    stale_after: Duration,
    events: mpsc::Sender<LifecycleEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // Skip immediate first tick.
    let mut reported: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let ping = PeerMessage::KeepAlive(KeepAlive::now(&local_peer_id));
                let sent = table.broadcast(&ping, None).await;
                trace!(peers = sent, "keep-alive sent");

                let stale = table.stale_peers(stale_after).await;
                reported.retain(|id| stale.iter().any(|(s, _)| s == id));
                for (peer_id, silent) in stale {
                    if !reported.insert(peer_id.clone()) {
                        continue;
                    }
                    warn!(peer = %peer_id, silent_secs = silent.as_secs(), "peer is stale");
                    let event = LifecycleEvent::Stale {
                        peer_id,
                        silent_secs: silent.as_secs(),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::memory_pair;
    use crate::transport::TransportEvent;

    #[tokio::test]
    async fn pump_stops_on_cancel() {
        let table = Arc::new(ConnectionTable::new());
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(keep_alive_pump(
            table,
            "a".into(),
            Duration::from_secs(30),
            Duration::from_secs(60),
            tx,
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test(start_paused = true)]
    async fn sends_keep_alive_and_reports_stale_once() {
        let table = Arc::new(ConnectionTable::new());
        let (ab, mut ba) = memory_pair("a", "b");
        table.insert(ab.transport.clone()).await;

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(keep_alive_pump(
            Arc::clone(&table),
            "a".into(),
            Duration::from_secs(30),
            Duration::from_secs(60),
            tx,
            cancel.clone(),
        ));

        // First heartbeat after one interval.
        assert_eq!(ba.events.recv().await, Some(TransportEvent::Open));
        match ba.events.recv().await {
            Some(TransportEvent::Data(PeerMessage::KeepAlive(k))) => assert_eq!(k.peer_id, "a"),
            other => panic!("expected keep-alive, got {other:?}"),
        }

        // b never answers: stale is reported on the third tick (90s > 60s).
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, LifecycleEvent::Stale { ref peer_id, .. } if peer_id == "b"));

        // Not reported again on the next tick.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
    }
}
