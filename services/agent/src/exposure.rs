//! Exposure policy for routes on non-standard ports.
//!
//! Every route on a port above the well-known range needs an explicit
//! public / private / off verdict before it may reach the renderer. The
//! decision flow is pure policy; the actual asking happens behind the
//! `ExposurePrompt` capability so the interactive terminal mode and the
//! non-interactive deny mode share one code path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use polaredge_proto::RouteDescriptor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ports::{find_free_port_with, PortProbe};

/// Ports at or below this are always admitted without a prompt.
pub const WELL_KNOWN_PORT_MAX: u16 = 443;

/// Verdict for one `host:port` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    Public,
    Private,
    Off,
}

impl ExposureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Off => "off",
        }
    }
}

/// Capability for obtaining an exposure verdict from a human (or a stand-in).
#[async_trait]
pub trait ExposurePrompt: Send + Sync {
    /// Ask for the verdict on one route. The policy bounds this call with
    /// the configured timeout; expiry defaults to off.
    async fn ask(&self, route: &RouteDescriptor) -> ExposureMode;

    /// Offer a substitute port when the requested one is already bound.
    async fn confirm_port_switch(&self, requested: u16, substitute: u16) -> bool;
}

/// Fixed-answer prompt. `deny()` is the production non-interactive mode;
/// other answers are useful in tests.
pub struct StaticPrompt {
    pub answer: ExposureMode,
    pub accept_switch: bool,
}

impl StaticPrompt {
    /// Never expose anything that would need a prompt.
    pub fn deny() -> Self {
        Self {
            answer: ExposureMode::Off,
            accept_switch: false,
        }
    }
}

#[async_trait]
impl ExposurePrompt for StaticPrompt {
    async fn ask(&self, _route: &RouteDescriptor) -> ExposureMode {
        self.answer
    }

    async fn confirm_port_switch(&self, _requested: u16, _substitute: u16) -> bool {
        self.accept_switch
    }
}

/// Terminal prompt with a once-per-second countdown, reading the choice
/// from the agent's stdin. Elapsing the countdown yields off.
pub struct TerminalPrompt {
    timeout: Duration,
}

impl TerminalPrompt {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn parse_choice(line: &str) -> ExposureMode {
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "public" => ExposureMode::Public,
            "p" | "private" => ExposureMode::Private,
            _ => ExposureMode::Off,
        }
    }
}

#[async_trait]
impl ExposurePrompt for TerminalPrompt {
    async fn ask(&self, route: &RouteDescriptor) -> ExposureMode {
        println!();
        println!("New route detected: {}", route.service_name);
        println!("    host: {}", route.host);
        println!("    service: {}:{}", route.service_name, route.service_port);
        println!(
            "Port {} is outside the well-known range. Choose exposure mode:",
            route.service_port
        );
        println!("    [y] public  (expose via the proxy)");
        println!("    [p] private (cluster-only)");
        println!("    [n] off     (ignore, default on timeout)");
        print!("Your choice [n/y/p]: ");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut remaining = self.timeout.as_secs();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        // Consume the immediate first tick so the countdown starts full.
        tick.tick().await;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    return match line {
                        Ok(Some(line)) => Self::parse_choice(&line),
                        _ => ExposureMode::Off,
                    };
                }
                _ = tick.tick() => {
                    if remaining == 0 {
                        println!();
                        println!("No response, defaulting to off");
                        return ExposureMode::Off;
                    }
                    eprint!("\r{remaining}s remaining... ");
                    remaining -= 1;
                }
            }
        }
    }

    async fn confirm_port_switch(&self, requested: u16, substitute: u16) -> bool {
        println!("Port {requested} is already in use.");
        print!("Use port {substitute} instead? [y/N]: ");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_ascii_lowercase();
                line == "y" || line == "yes"
            }
            _ => false,
        }
    }
}

/// Outcome of evaluating one deduplicated route.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// The route as it will be rendered; the port may have been
    /// substituted for an admitted public route.
    pub route: RouteDescriptor,

    /// The port the manifest originally asked for.
    pub requested_port: u16,

    pub mode: ExposureMode,
    pub admitted: bool,
    pub message: String,
}

impl RouteOutcome {
    fn admitted(route: RouteDescriptor, mode: ExposureMode, message: &str) -> Self {
        let requested_port = route.service_port;
        Self {
            route,
            requested_port,
            mode,
            admitted: true,
            message: message.to_string(),
        }
    }

    fn dropped(route: RouteDescriptor, message: &str) -> Self {
        let requested_port = route.service_port;
        Self {
            route,
            requested_port,
            mode: ExposureMode::Off,
            admitted: false,
            message: message.to_string(),
        }
    }
}

/// In-memory decision cache keyed by `host:port`. Lives for the agent
/// process; entries are never evicted, so a key is never re-prompted.
#[derive(Default)]
pub struct DecisionStore {
    inner: Mutex<HashMap<String, ExposureMode>>,
}

impl DecisionStore {
    pub async fn get(&self, key: &str) -> Option<ExposureMode> {
        self.inner.lock().await.get(key).copied()
    }

    pub async fn set(&self, key: String, mode: ExposureMode) {
        self.inner.lock().await.insert(key, mode);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// The exposure decision pipeline for one manifest.
pub struct ExposurePolicy {
    store: DecisionStore,
    prompt: Arc<dyn ExposurePrompt>,
    probe: Arc<dyn PortProbe>,
    port_range: (u16, u16),
    prompt_timeout: Duration,
}

impl ExposurePolicy {
    pub fn new(
        prompt: Arc<dyn ExposurePrompt>,
        probe: Arc<dyn PortProbe>,
        port_range: (u16, u16),
        prompt_timeout: Duration,
    ) -> Self {
        Self {
            store: DecisionStore::default(),
            prompt,
            probe,
            port_range,
            prompt_timeout,
        }
    }

    /// Evaluate a manifest: dedup by `(host, servicePort)`, admit
    /// well-known ports unconditionally, and resolve everything else
    /// through the decision cache and the prompt. Every verdict is cached
    /// before the next route is evaluated.
    pub async fn filter(&self, manifest: Vec<RouteDescriptor>) -> Vec<RouteOutcome> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::new();

        for route in manifest {
            let key = route.exposure_key();
            if !seen.insert(key.clone()) {
                debug!(key = %key, "Skipping duplicate route");
                continue;
            }

            if route.service_port <= WELL_KNOWN_PORT_MAX {
                outcomes.push(RouteOutcome::admitted(
                    route,
                    ExposureMode::Public,
                    "well-known port",
                ));
                continue;
            }

            if let Some(mode) = self.store.get(&key).await {
                debug!(key = %key, mode = mode.as_str(), "Cached exposure decision");
                outcomes.push(match mode {
                    ExposureMode::Off => RouteOutcome::dropped(route, "previously declined"),
                    mode => RouteOutcome::admitted(route, mode, "cached decision"),
                });
                continue;
            }

            let answer = match tokio::time::timeout(self.prompt_timeout, self.prompt.ask(&route))
                .await
            {
                Ok(answer) => answer,
                Err(_) => {
                    info!(key = %key, "Exposure prompt timed out, defaulting to off");
                    ExposureMode::Off
                }
            };

            let outcome = match answer {
                ExposureMode::Public => self.admit_public(route, &key).await,
                ExposureMode::Private => {
                    self.store.set(key, ExposureMode::Private).await;
                    RouteOutcome::admitted(route, ExposureMode::Private, "operator choice")
                }
                ExposureMode::Off => {
                    self.store.set(key, ExposureMode::Off).await;
                    RouteOutcome::dropped(route, "declined or timed out")
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// A public verdict must land on a bindable port; offer a substitute
    /// from the configured range when the requested one is taken.
    async fn admit_public(&self, mut route: RouteDescriptor, key: &str) -> RouteOutcome {
        if self.probe.is_free(route.service_port) {
            self.store.set(key.to_string(), ExposureMode::Public).await;
            return RouteOutcome::admitted(route, ExposureMode::Public, "operator choice");
        }

        let (start, end) = self.port_range;
        let substitute = match find_free_port_with(self.probe.as_ref(), start, end) {
            Ok(port) => port,
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping route, no substitute port");
                self.store.set(key.to_string(), ExposureMode::Off).await;
                return RouteOutcome::dropped(route, "no free port in range");
            }
        };

        let confirmed = tokio::time::timeout(
            self.prompt_timeout,
            self.prompt.confirm_port_switch(route.service_port, substitute),
        )
        .await
        .unwrap_or(false);

        if !confirmed {
            self.store.set(key.to_string(), ExposureMode::Off).await;
            return RouteOutcome::dropped(route, "port substitution declined");
        }

        info!(
            key = %key,
            requested = route.service_port,
            substitute,
            "Substituting port for public route"
        );
        let requested_port = route.service_port;
        route.service_port = substitute;
        self.store.set(key.to_string(), ExposureMode::Public).await;

        let mut outcome =
            RouteOutcome::admitted(route, ExposureMode::Public, "port substituted");
        outcome.requested_port = requested_port;
        outcome
    }

    /// Cached decision count, mostly for logging and tests.
    pub async fn cached_decisions(&self) -> usize {
        self.store.len().await
    }
}
