//! Polaredge Agent
//!
//! Receives route manifests from the polaredge client over a framed TCP
//! socket, filters them through the exposure policy, renders proxy
//! configuration, and supervises the proxy process.
//!
//! ## Startup
//!
//! 1. Install the proxy binary if missing, then verify it (both fatal on failure)
//! 2. Write a bootstrap config on a free port so the proxy always has a valid file
//! 3. Spawn the supervisor and the pipeline worker
//! 4. Accept manifest connections until ctrl-c

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use polaredge_agent::config::{Config, PromptMode};
use polaredge_agent::exposure::{ExposurePolicy, ExposurePrompt, StaticPrompt, TerminalPrompt};
use polaredge_agent::pipeline::Pipeline;
use polaredge_agent::ports::{self, SystemPortProbe};
use polaredge_agent::proxy::{Installer, InstallerConfig, ProxyState, Supervisor, TraefikRuntime};
use polaredge_agent::receiver::Receiver;
use polaredge_agent::render::render_bootstrap_config;
use polaredge_agent::persistence;
use polaredge_agent::status::StatusStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to configured level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting polaredge agent");
    info!(
        listen_addr = %config.listen_addr,
        config_path = %config.config_path.display(),
        bin_path = %config.bin_path.display(),
        queue_policy = ?config.queue_full_policy,
        "Configuration loaded"
    );

    // Proxy binary: install if missing, then verify. No proxy, no agent.
    let installer = Installer::new(InstallerConfig {
        releases_url: config.releases_url.clone(),
        bin_path: config.bin_path.clone(),
        ..Default::default()
    })?;

    let initial_state = if installer.is_installed() {
        ProxyState::Installed
    } else {
        warn!(bin_path = %config.bin_path.display(), "Proxy binary not found, installing");
        let tag = installer
            .install()
            .await
            .context("install proxy binary")?;
        info!(tag = %tag, "Proxy binary installed");
        ProxyState::Installed
    };

    let runtime = TraefikRuntime::new(config.bin_path.clone());
    let (supervisor, _state_rx) =
        Supervisor::new(runtime, config.config_path.clone(), initial_state);
    let version = supervisor
        .verify()
        .await
        .context("verify proxy binary")?;
    info!(version = %version, "Proxy binary verified");

    // Bootstrap config on a free port; the supervisor never launches the
    // proxy against a missing file.
    let (range_start, range_end) = config.port_range;
    let bootstrap_port = ports::find_free_port(range_start, range_end)
        .context("select bootstrap entry-point port")?;
    persistence::write_config(
        &config.config_path,
        &render_bootstrap_config(bootstrap_port),
    )
    .context("write bootstrap config")?;
    info!(
        port = bootstrap_port,
        config_path = %config.config_path.display(),
        "Bootstrap config written"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (config_tx, config_rx) = watch::channel(0u64);

    let supervisor_handle = tokio::spawn(supervisor.run(config_rx, shutdown_rx.clone()));

    // Exposure policy with the configured prompt mode.
    let prompt: Arc<dyn ExposurePrompt> = match config.prompt_mode {
        PromptMode::Interactive => Arc::new(TerminalPrompt::new(config.prompt_timeout)),
        PromptMode::Deny => Arc::new(StaticPrompt::deny()),
    };
    let policy = ExposurePolicy::new(
        prompt,
        Arc::new(SystemPortProbe),
        config.port_range,
        config.prompt_timeout,
    );

    // One bounded queue, one worker: manifests apply serially, in order.
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
    let pipeline = Pipeline::new(
        Arc::new(policy),
        config.config_path.clone(),
        StatusStore::new(config.status_path.clone()),
        config_tx,
    );
    let worker_handle = tokio::spawn(pipeline.run(queue_rx, shutdown_rx.clone()));

    let receiver = Receiver::bind(
        config.listen_addr,
        queue_tx,
        config.queue_full_policy,
        config.read_timeout,
    )
    .await
    .with_context(|| format!("bind {}", config.listen_addr))?;
    let receiver_handle = tokio::spawn(receiver.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = receiver_handle => {
            match result {
                Ok(Ok(())) => info!("Receiver exited"),
                Ok(Err(e)) => error!(error = %e, "Receiver error"),
                Err(e) => error!(error = %e, "Receiver task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    let _ = supervisor_handle.await;

    info!("Agent shutdown complete");
    Ok(())
}
