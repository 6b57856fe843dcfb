//! Runs three peers in one process over memory transports.
//!
//! `a` shares a file, `b` sits between `a` and `c` and forwards the
//! announcement, `c` downloads the content. With `--broker` the direct link
//! between `a` and `c` is blocked so the content streams through `b`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use peershare_connection::MemoryNetwork;
use peershare_node::{Node, NodeConfig, NodeEvent, NodeOptions};
use peershare_transfer::{ByteSource, Delivered, Direction, FileSource, MemorySource};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "peershare-demo")]
#[command(version)]
#[command(about = "Share a file across three in-process peers")]
struct Args {
    /// TOML configuration shared by all peers
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File to share. A generated payload is used when absent
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Size of the generated payload in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    size: usize,

    /// Directory the downloading peer writes to
    #[arg(short, long, default_value = "downloads")]
    out: PathBuf,

    /// Block the direct link between holder and downloader
    #[arg(long)]
    broker: bool,

    /// Chunk size in bytes, overrides the configuration
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Seconds to wait for each step
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut base = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(chunk_size) = args.chunk_size {
        base.chunk_size = chunk_size;
    }
    let step = Duration::from_secs(args.timeout);

    let network = MemoryNetwork::new();
    let peer_config = |peer_id: &str| NodeConfig {
        peer_id: peer_id.to_string(),
        ..base.clone()
    };
    let mut downloader = peer_config("c");
    downloader.download_dir = Some(args.out.clone());

    let (a, mut a_events) = spawn_peer(&network, peer_config("a")).await?;
    let (b, mut b_events) = spawn_peer(&network, peer_config("b")).await?;
    let (c, mut c_events) = spawn_peer(&network, downloader).await?;
    if args.broker {
        network.block("a", "c").await;
    }

    b.connect("a").await.context("linking b to a")?;
    wait_for(&mut a_events, step, |e| matches!(e, NodeEvent::PeerConnected { .. })).await?;
    c.connect("b").await.context("linking c to b")?;
    wait_for(&mut b_events, step, |e| {
        matches!(e, NodeEvent::PeerConnected { peer_id } if peer_id == "c")
    })
    .await?;

    let source: Arc<dyn ByteSource> = match &args.file {
        Some(path) => Arc::new(
            FileSource::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => {
            let data: Vec<u8> = (0..args.size).map(|i| (i % 251) as u8).collect();
            Arc::new(MemorySource::new("payload.bin", "application/octet-stream", data))
        }
    };

    let shared = a.share(source).await?;
    info!(file_id = %shared.file_id, bytes = shared.total_size, "a shared a file");

    wait_for(&mut c_events, step, |e| matches!(e, NodeEvent::FileAnnounced { .. })).await?;
    c.request_download(&shared.file_id).await?;
    let completed = wait_for(&mut c_events, step, |e| {
        matches!(
            e,
            NodeEvent::TransferCompleted {
                direction: Direction::Received,
                ..
            } | NodeEvent::TransferFailed { .. }
        )
    })
    .await?;
    if let NodeEvent::TransferFailed { reason, .. } = completed {
        bail!("transfer failed: {reason}");
    }

    match c.download(&shared.file_id, None).await? {
        Delivered::File(path) => println!("{} bytes written to {}", shared.total_size, path.display()),
        Delivered::Buffer(bytes) => println!("{} bytes received", bytes.len()),
        Delivered::Text(text) => println!("{} base64 characters received", text.len()),
    }

    let stats = c.store_stats();
    info!(
        durable_writes = stats.durable_writes,
        fallback_writes = stats.fallback_writes,
        "c chunk store"
    );

    for node in [&c, &b, &a] {
        node.shutdown().await;
    }
    Ok(())
}

async fn spawn_peer(
    network: &MemoryNetwork,
    config: NodeConfig,
) -> Result<(Node, mpsc::Receiver<NodeEvent>)> {
    let peer_id = config.peer_id.clone();
    let node = Node::start(
        config,
        NodeOptions {
            connector: Some(Arc::new(network.connector(&peer_id))),
            ..NodeOptions::default()
        },
    )
    .await
    .with_context(|| format!("starting peer {peer_id}"))?;
    node.listen(network.register(&peer_id).await);
    let events = node
        .take_events()
        .await
        .ok_or_else(|| anyhow!("events already taken"))?;
    Ok((node, events))
}

async fn wait_for<F>(
    events: &mut mpsc::Receiver<NodeEvent>,
    limit: Duration,
    mut pred: F,
) -> Result<NodeEvent>
where
    F: FnMut(&NodeEvent) -> bool,
{
    let found = tokio::time::timeout(limit, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .context("timed out waiting for the session to progress")?;
    found.ok_or_else(|| anyhow!("event channel closed"))
}
