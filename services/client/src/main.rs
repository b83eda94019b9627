//! Polaredge Client
//!
//! Reads the current route manifest from its source, encodes it, and
//! pushes it to the agent with acknowledgment and retry. When every
//! attempt fails the manifest is printed to stdout instead of being lost.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use polaredge_client::sender::{send_with_retries, SenderConfig};
use polaredge_client::source::{FileSource, RouteSource};
use polaredge_proto::encode_manifest;

#[derive(Debug, Parser)]
#[command(name = "polaredge-client", about = "Push route manifests to the polaredge agent")]
struct Args {
    /// Agent address to push manifests to.
    #[arg(long, default_value = "127.0.0.1:9005", env = "POLAREDGE_AGENT_ADDR")]
    agent_addr: String,

    /// Path to the route manifest JSON file.
    #[arg(long, env = "POLAREDGE_MANIFEST_PATH")]
    manifest: PathBuf,

    /// Delivery attempts per push.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Delay between delivery attempts, in seconds.
    #[arg(long, default_value_t = 1)]
    retry_delay_secs: u64,

    /// Push once and exit instead of waiting for refresh input.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sender = SenderConfig {
        agent_addr: args.agent_addr.clone(),
        attempts: args.retries.max(1),
        retry_delay: Duration::from_secs(args.retry_delay_secs),
        ..Default::default()
    };
    let source = FileSource::new(args.manifest.clone());

    info!(agent_addr = %args.agent_addr, manifest = %args.manifest.display(), "Polaredge client started");

    if args.once {
        return refresh_and_send(&source, &sender).await;
    }

    info!("Press 'r' then Enter to refresh and re-send the manifest, 'q' to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("read stdin")? {
        match line.trim() {
            "r" | "R" => {
                info!("Refresh triggered");
                if let Err(e) = refresh_and_send(&source, &sender).await {
                    warn!(error = %e, "Refresh failed");
                }
            }
            "q" | "Q" => break,
            "" => {}
            other => warn!(input = other, "Unrecognized input (expected 'r' or 'q')"),
        }
    }

    Ok(())
}

/// Read the source, encode, and push. An undelivered manifest falls back
/// to stdout so the data is never silently dropped.
async fn refresh_and_send(source: &dyn RouteSource, sender: &SenderConfig) -> Result<()> {
    let routes = source.routes().await?;
    let payload = encode_manifest(&routes).context("encode manifest")?;

    info!(routes = routes.len(), bytes = payload.len(), "Pushing manifest");

    match send_with_retries(sender, &payload).await {
        Ok(()) => {
            info!("Manifest delivery confirmed");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Manifest undelivered, printing to stdout");
            println!("{}", String::from_utf8_lossy(&payload));
            Ok(())
        }
    }
}
