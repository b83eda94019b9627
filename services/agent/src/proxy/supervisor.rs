//! Proxy process supervision.
//!
//! The supervisor is a long-lived task, decoupled from the apply
//! pipeline: the pipeline publishes config generations on a watch channel
//! and the supervisor (re)starts the proxy process against the config
//! path whenever a new generation arrives. A proxy exit (clean or not)
//! never crashes the agent; the supervisor parks and the next generation
//! triggers another run.
//!
//! Process operations sit behind the `ProxyRuntime` trait so tests can
//! drive the state machine without a real binary.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Proxy lifecycle states.
///
/// `NotInstalled -> Installed -> Verified -> Running -> {Exited, Failed}`,
/// with `Exited`/`Failed` returning to `Running` on the next generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    NotInstalled,
    Installed,
    Verified,
    Running,
    Exited,
    Failed,
}

/// Errors from proxy verification and process management.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("proxy binary missing at {0}")]
    BinaryMissing(PathBuf),

    #[error("proxy verify failed: {0}")]
    Verify(String),

    #[error("failed to spawn proxy: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A running proxy process.
#[async_trait]
pub trait ProxyProcess: Send {
    /// Block until the process exits. `Ok(true)` is a clean exit.
    async fn wait(&mut self) -> Result<bool, SupervisorError>;

    /// Force the process down.
    async fn kill(&mut self) -> Result<(), SupervisorError>;
}

/// Proxy process operations.
#[async_trait]
pub trait ProxyRuntime: Send + Sync {
    /// Invoke the binary's self-report command; returns its output.
    async fn verify(&self) -> Result<String, SupervisorError>;

    /// Start the proxy against a config path.
    async fn spawn(&self, config_path: &Path) -> Result<Box<dyn ProxyProcess>, SupervisorError>;
}

/// Real runtime driving the installed traefik binary.
pub struct TraefikRuntime {
    bin_path: PathBuf,
}

impl TraefikRuntime {
    pub fn new(bin_path: PathBuf) -> Self {
        Self { bin_path }
    }
}

#[async_trait]
impl ProxyRuntime for TraefikRuntime {
    async fn verify(&self) -> Result<String, SupervisorError> {
        if !self.bin_path.exists() {
            return Err(SupervisorError::BinaryMissing(self.bin_path.clone()));
        }

        let output = Command::new(&self.bin_path)
            .arg("version")
            .output()
            .await
            .map_err(SupervisorError::Spawn)?;

        if !output.status.success() {
            return Err(SupervisorError::Verify(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn spawn(&self, config_path: &Path) -> Result<Box<dyn ProxyProcess>, SupervisorError> {
        let mut child = Command::new(&self.bin_path)
            .arg("--configFile")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        // Stream proxy output into our own logs.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "proxy", "{line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "proxy", "{line}");
                }
            });
        }

        Ok(Box::new(TraefikProcess { child }))
    }
}

struct TraefikProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl ProxyProcess for TraefikProcess {
    async fn wait(&mut self) -> Result<bool, SupervisorError> {
        let status = self.child.wait().await?;
        Ok(status.success())
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        Ok(self.child.kill().await?)
    }
}

/// The proxy supervisor state machine.
pub struct Supervisor<R: ProxyRuntime> {
    runtime: R,
    config_path: PathBuf,
    state_tx: watch::Sender<ProxyState>,
}

impl<R: ProxyRuntime> Supervisor<R> {
    pub fn new(
        runtime: R,
        config_path: PathBuf,
        initial: ProxyState,
    ) -> (Self, watch::Receiver<ProxyState>) {
        let (state_tx, state_rx) = watch::channel(initial);
        (
            Self {
                runtime,
                config_path,
                state_tx,
            },
            state_rx,
        )
    }

    pub fn state(&self) -> ProxyState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: ProxyState) {
        let prev = *self.state_tx.borrow();
        if prev != next {
            debug!(from = ?prev, to = ?next, "Proxy state transition");
            let _ = self.state_tx.send(next);
        }
    }

    /// `Installed -> Verified`. Failure here is fatal at agent startup.
    pub async fn verify(&self) -> Result<String, SupervisorError> {
        let report = self.runtime.verify().await?;
        self.transition(ProxyState::Verified);
        Ok(report)
    }

    /// Supervision loop: run the proxy for the current generation,
    /// restart on a new one, park after an exit until the next.
    pub async fn run(self, mut config_rx: watch::Receiver<u64>, mut shutdown: watch::Receiver<bool>) {
        'generations: loop {
            let generation = *config_rx.borrow_and_update();

            let mut process = match self.runtime.spawn(&self.config_path).await {
                Ok(process) => process,
                Err(e) => {
                    error!(generation, error = %e, "Failed to start proxy");
                    self.transition(ProxyState::Failed);
                    if self.park(&mut config_rx, &mut shutdown).await {
                        continue 'generations;
                    }
                    return;
                }
            };

            self.transition(ProxyState::Running);
            info!(
                generation,
                config_path = %self.config_path.display(),
                "Proxy started"
            );

            loop {
                tokio::select! {
                    exited = process.wait() => {
                        match exited {
                            Ok(true) => {
                                info!(generation, "Proxy exited cleanly");
                                self.transition(ProxyState::Exited);
                            }
                            Ok(false) => {
                                warn!(generation, "Proxy exited with failure");
                                self.transition(ProxyState::Failed);
                            }
                            Err(e) => {
                                error!(generation, error = %e, "Failed waiting on proxy");
                                self.transition(ProxyState::Failed);
                            }
                        }
                        if self.park(&mut config_rx, &mut shutdown).await {
                            continue 'generations;
                        }
                        return;
                    }
                    changed = config_rx.changed() => {
                        if changed.is_err() {
                            let _ = process.kill().await;
                            return;
                        }
                        info!("New config generation, restarting proxy");
                        if let Err(e) = process.kill().await {
                            warn!(error = %e, "Failed to kill proxy for restart");
                        }
                        continue 'generations;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Supervisor shutting down");
                            let _ = process.kill().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Park until the next config generation (true) or shutdown (false).
    async fn park(
        &self,
        config_rx: &mut watch::Receiver<u64>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                changed = config_rx.changed() => {
                    return changed.is_ok();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Scriptable runtime for tests and development: spawned "processes"
/// either exit immediately with a scripted result or run until killed.
#[derive(Clone)]
pub struct MockRuntime {
    spawns: Arc<AtomicU64>,
    kills: Arc<AtomicU64>,
    exits: Arc<std::sync::Mutex<VecDeque<Option<bool>>>>,
    fail_verify: bool,
    fail_spawns: bool,
}

impl MockRuntime {
    /// Every spawned process runs until killed.
    pub fn new() -> Self {
        Self::with_exits(Vec::new())
    }

    /// Script the exit of each successive spawn: `Some(clean)` exits
    /// immediately, `None` runs until killed. Spawns beyond the script
    /// run until killed.
    pub fn with_exits(exits: Vec<Option<bool>>) -> Self {
        Self {
            spawns: Arc::new(AtomicU64::new(0)),
            kills: Arc::new(AtomicU64::new(0)),
            exits: Arc::new(std::sync::Mutex::new(exits.into())),
            fail_verify: false,
            fail_spawns: false,
        }
    }

    /// Mock whose verify step fails.
    pub fn failing_verify() -> Self {
        Self {
            fail_verify: true,
            ..Self::new()
        }
    }

    /// Mock whose spawns fail.
    pub fn failing_spawns() -> Self {
        Self {
            fail_spawns: true,
            ..Self::new()
        }
    }

    pub fn spawn_count(&self) -> u64 {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> u64 {
        self.kills.load(Ordering::SeqCst)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyRuntime for MockRuntime {
    async fn verify(&self) -> Result<String, SupervisorError> {
        if self.fail_verify {
            return Err(SupervisorError::Verify("mock verify failure".to_string()));
        }
        Ok("mock proxy version 0.0.0".to_string())
    }

    async fn spawn(&self, _config_path: &Path) -> Result<Box<dyn ProxyProcess>, SupervisorError> {
        if self.fail_spawns {
            return Err(SupervisorError::Spawn(io::Error::other(
                "mock spawn failure",
            )));
        }

        self.spawns.fetch_add(1, Ordering::SeqCst);
        let exit = self
            .exits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(None);

        Ok(Box::new(MockProcess {
            exit,
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct MockProcess {
    exit: Option<bool>,
    kills: Arc<AtomicU64>,
}

#[async_trait]
impl ProxyProcess for MockProcess {
    async fn wait(&mut self) -> Result<bool, SupervisorError> {
        match self.exit {
            Some(clean) => Ok(clean),
            None => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
