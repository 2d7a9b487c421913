//! Vigil observer daemon (`vigild`)
//!
//! Headless node: joins the observer roster, synchronises the frame clock
//! with its peers and gathers approvals for broadcast artifacts.

use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vigil_core::{KeyStore, StaticReporter};
use vigil_model::{Observer, ObserversConfiguration, Settings};
use vigil_node::{NodeEvent, ObserverNode};

#[derive(Parser, Debug)]
#[command(name = "vigild", version, about = "Vigil observer daemon")]
struct Args {
    /// Address the peer listener binds to.
    #[arg(long, default_value = "0.0.0.0:4000")]
    listen: SocketAddr,

    /// Average block generation interval, in seconds.
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,

    /// Approval threshold; defaults to the smallest strict majority.
    #[arg(long)]
    consensus_count: Option<u16>,

    /// PEM-encoded P-521 private key.
    #[arg(long, default_value = "p521.key")]
    key: PathBuf,

    /// Generate the key file if it does not exist yet.
    #[arg(long)]
    generate_key: bool,

    /// Roster entry: `index,host,port[,hex-public-key]`. Repeatable.
    #[arg(long = "observer")]
    observers: Vec<String>,

    /// Close connections idle for this many seconds.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Verbose logging (-v for debug, -vv for trace).
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!("vigild v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.generate_key && !args.key.exists() {
        KeyStore::generate()
            .save(&args.key)
            .context("writing fresh key material")?;
        tracing::info!(path = %args.key.display(), "generated new observer key");
    }

    let mut settings = Settings {
        average_block_generation_interval: Duration::from_secs(args.interval_secs),
        listen_addr: args.listen,
        key_path: args.key,
        idle_connection_timeout: args.idle_timeout_secs.map(Duration::from_secs),
        ..Settings::default()
    };
    if let Some(consensus_count) = args.consensus_count {
        settings.consensus_count = consensus_count;
    }

    let mut roster = Vec::with_capacity(args.observers.len());
    for entry in &args.observers {
        roster.push(parse_observer(entry)?);
    }
    let configuration = ObserversConfiguration::new(roster)
        .context("building observer roster")?;
    let reporter = Arc::new(StaticReporter::new(configuration));

    let mut handle = ObserverNode::start(settings, reporter)
        .await
        .context("starting observer node")?;
    tracing::info!(
        observer = handle.local_index,
        listen = %handle.local_addr,
        "daemon ready, press Ctrl+C to stop"
    );

    enum Tick {
        Frame(Arc<vigil_core::FrameEvent>),
        Event(NodeEvent),
        Shutdown,
    }

    loop {
        let tick = tokio::select! {
            frame = handle.frame_events.recv() => match frame {
                Some(frame) => Tick::Frame(frame),
                None => Tick::Shutdown,
            },
            event = handle.events.recv() => match event {
                Some(event) => Tick::Event(event),
                None => Tick::Shutdown,
            },
            _ = shutdown_signal() => Tick::Shutdown,
        };

        match tick {
            Tick::Frame(frame) => {
                tracing::info!(frame = frame.index, "frame end");
            }
            Tick::Event(NodeEvent::ConsensusReached { hash, tx_id }) => {
                tracing::info!(%hash, %tx_id, "consensus reached");
                handle.remove(hash).await.ok();
            }
            Tick::Shutdown => break,
        }
    }

    tracing::info!("shutdown signal received...");
    handle.shutdown().await;
    tracing::info!("daemon stopped");
    Ok(())
}

fn parse_observer(entry: &str) -> anyhow::Result<Observer> {
    let parts: Vec<&str> = entry.split(',').collect();
    if parts.len() < 3 || parts.len() > 4 {
        bail!("observer entry `{entry}` is not index,host,port[,hex-public-key]");
    }

    let index = parts[0].parse().context("observer index")?;
    let port = parts[2].parse().context("observer port")?;
    let public_key = match parts.get(3) {
        Some(hex_key) => Some(hex::decode(hex_key).context("observer public key")?),
        None => None,
    };

    Ok(Observer { index, host: parts[1].to_string(), port, public_key })
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse().expect("static directive"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Ctrl+C handler");
    }
}
