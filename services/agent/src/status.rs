//! Per-manifest route status artifact.
//!
//! One record per processed route, written as a JSON array. The file is a
//! last-write snapshot: each processed manifest fully replaces it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::exposure::RouteOutcome;

/// Acknowledgment state of one processed route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    #[serde(rename = "routeID")]
    pub route_id: String,
    pub mode: String,
    pub status: String,
    pub port: u16,
    pub namespace: String,
    pub message: String,
    pub timestamp: String,
}

impl RouteStatus {
    /// Build a record from an exposure outcome. The descriptor carries no
    /// namespace, so the record uses the cluster default; identity derives
    /// from the originally requested route.
    pub fn from_outcome(outcome: &RouteOutcome) -> Self {
        Self {
            route_id: format!(
                "{}@{}:{}",
                outcome.route.service_name, outcome.route.host, outcome.requested_port
            ),
            mode: outcome.mode.as_str().to_string(),
            status: if outcome.admitted {
                "applied".to_string()
            } else {
                "dropped".to_string()
            },
            port: outcome.route.service_port,
            namespace: "default".to_string(),
            message: outcome.message.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Writer for the status artifact.
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Overwrite the artifact with this manifest's records.
    pub fn write(&self, records: &[RouteStatus]) -> Result<()> {
        let body = serde_json::to_vec_pretty(records).context("serialize status records")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "move status file into place ({} -> {})",
                tmp.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}
