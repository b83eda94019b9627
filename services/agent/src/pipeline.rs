//! Ingestion queue worker: the single consumer that turns raw manifest
//! payloads into applied proxy configuration.
//!
//! Payloads drain strictly in arrival order. An exclusive lock is held
//! across the whole decode -> filter -> render -> persist -> publish
//! cycle, so at most one render+apply is ever in flight even though the
//! receiver accepts connections in parallel. The applied result is
//! announced to the proxy supervisor as a new config generation on a
//! watch channel; the worker never waits on the proxy process itself.

use std::path::PathBuf;
use std::sync::Arc;

use polaredge_proto::{decode_manifest, RouteDescriptor};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::exposure::ExposurePolicy;
use crate::persistence;
use crate::render::render_config;
use crate::status::{RouteStatus, StatusStore};

/// The render/apply worker.
pub struct Pipeline {
    policy: Arc<ExposurePolicy>,
    config_path: PathBuf,
    status: StatusStore,
    config_tx: watch::Sender<u64>,
    apply_lock: Arc<Mutex<()>>,
}

impl Pipeline {
    pub fn new(
        policy: Arc<ExposurePolicy>,
        config_path: PathBuf,
        status: StatusStore,
        config_tx: watch::Sender<u64>,
    ) -> Self {
        Self {
            policy,
            config_path,
            status,
            config_tx,
            apply_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Drain the ingestion queue until shutdown.
    pub async fn run(self, mut queue: mpsc::Receiver<Vec<u8>>, mut shutdown: watch::Receiver<bool>) {
        info!("Pipeline worker started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                payload = queue.recv() => {
                    match payload {
                        Some(payload) => self.apply(payload).await,
                        None => {
                            debug!("Ingestion queue closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Pipeline worker stopped");
    }

    /// Run one full render+apply cycle for a raw payload.
    pub async fn apply(&self, payload: Vec<u8>) {
        let _guard = self.apply_lock.lock().await;

        let manifest = match decode_manifest(&payload) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Dropping undecodable manifest");
                return;
            }
        };

        let route_count = manifest.len();
        let outcomes = self.policy.filter(manifest).await;
        let admitted: Vec<RouteDescriptor> = outcomes
            .iter()
            .filter(|o| o.admitted)
            .map(|o| o.route.clone())
            .collect();

        let rendered = render_config(&admitted);
        for conflict in &rendered.conflicts {
            warn!(
                service = %conflict.service_name,
                kept = %conflict.kept_rule,
                rejected = %conflict.rejected_rule,
                "Conflicting router rule ignored"
            );
        }

        if let Err(e) = persistence::write_config(&self.config_path, &rendered.text) {
            error!(error = %e, "Failed to persist rendered config");
            return;
        }

        let records: Vec<RouteStatus> = outcomes.iter().map(RouteStatus::from_outcome).collect();
        if let Err(e) = self.status.write(&records) {
            warn!(error = %e, "Failed to write status artifact");
        }

        self.config_tx.send_modify(|generation| *generation += 1);
        let generation = *self.config_tx.borrow();
        info!(
            generation,
            routes = route_count,
            admitted = admitted.len(),
            "Manifest applied"
        );
    }
}
