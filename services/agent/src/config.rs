//! Configuration for the polaredge agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// What the receiver does when the ingestion queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullPolicy {
    /// Hold the connection open until the queue drains (back-pressure).
    Block,
    /// Fail the connection without acknowledging, leaving redelivery to
    /// the sender's retry loop.
    Reject,
}

impl FromStr for QueueFullPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => anyhow::bail!("unknown queue policy {other:?} (expected block or reject)"),
        }
    }
}

/// How exposure decisions for non-standard ports are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Ask on the agent's terminal with a countdown.
    Interactive,
    /// Never ask; undecided routes default to off.
    Deny,
}

impl FromStr for PromptMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "deny" => Ok(Self::Deny),
            other => anyhow::bail!("unknown prompt mode {other:?} (expected interactive or deny)"),
        }
    }
}

/// Agent configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the manifest receiver listens on.
    pub listen_addr: SocketAddr,

    /// Path the rendered proxy configuration is written to.
    pub config_path: PathBuf,

    /// Path the per-manifest status artifact is written to.
    pub status_path: PathBuf,

    /// Location of the supervised proxy binary.
    pub bin_path: PathBuf,

    /// Inclusive port range scanned for substitutions and the bootstrap
    /// entry point.
    pub port_range: (u16, u16),

    /// Deadline for one framed manifest read.
    pub read_timeout: Duration,

    /// Countdown budget for an interactive exposure decision.
    pub prompt_timeout: Duration,

    /// Exposure prompt mode.
    pub prompt_mode: PromptMode,

    /// Ingestion queue capacity.
    pub queue_capacity: usize,

    /// Receiver behavior when the ingestion queue is full.
    pub queue_full_policy: QueueFullPolicy,

    /// Base URL of the proxy release feed.
    pub releases_url: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("POLAREDGE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9005".to_string())
            .parse()
            .context("POLAREDGE_LISTEN_ADDR must be a socket address")?;

        let config_path = std::env::var("POLAREDGE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/polaredge.toml"));

        let status_path = std::env::var("POLAREDGE_STATUS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("status/status.json"));

        let bin_path = std::env::var("POLAREDGE_BIN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./bin/traefik"));

        let port_range = match std::env::var("POLAREDGE_PORT_RANGE") {
            Ok(raw) => parse_port_range(&raw)
                .context("POLAREDGE_PORT_RANGE must look like 7000-7100")?,
            Err(_) => (7000, 7100),
        };

        let read_timeout_secs: u64 = std::env::var("POLAREDGE_READ_TIMEOUT_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("POLAREDGE_READ_TIMEOUT_SECS must be an integer")?
            .unwrap_or(5);

        let prompt_timeout_secs: u64 = std::env::var("POLAREDGE_PROMPT_TIMEOUT_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("POLAREDGE_PROMPT_TIMEOUT_SECS must be an integer")?
            .unwrap_or(60);

        let prompt_mode = std::env::var("POLAREDGE_PROMPT_MODE")
            .unwrap_or_else(|_| "interactive".to_string())
            .parse()?;

        let queue_capacity: usize = std::env::var("POLAREDGE_QUEUE_CAPACITY")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("POLAREDGE_QUEUE_CAPACITY must be an integer")?
            .unwrap_or(16)
            .max(1);

        let queue_full_policy = std::env::var("POLAREDGE_QUEUE_POLICY")
            .unwrap_or_else(|_| "block".to_string())
            .parse()?;

        let releases_url = std::env::var("POLAREDGE_RELEASES_URL")
            .unwrap_or_else(|_| "https://api.github.com/repos/traefik/traefik/releases".to_string());

        let log_level = std::env::var("POLAREDGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            config_path,
            status_path,
            bin_path,
            port_range,
            read_timeout: Duration::from_secs(read_timeout_secs),
            prompt_timeout: Duration::from_secs(prompt_timeout_secs),
            prompt_mode,
            queue_capacity,
            queue_full_policy,
            releases_url,
            log_level,
        })
    }
}

fn parse_port_range(raw: &str) -> Result<(u16, u16)> {
    let (start, end) = raw
        .split_once('-')
        .context("missing '-' separator")?;
    let start: u16 = start.trim().parse().context("invalid range start")?;
    let end: u16 = end.trim().parse().context("invalid range end")?;
    anyhow::ensure!(start <= end, "range start {start} exceeds end {end}");
    Ok((start, end))
}
