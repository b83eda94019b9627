//! Route descriptor sources.
//!
//! Production intent comes from a cluster watch that lives outside this
//! crate; anything able to yield an ordered descriptor list can feed the
//! sender. The file source reads the same JSON schema the wire carries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use polaredge_proto::{decode_manifest, RouteDescriptor};

/// Yields the current ordered route list on demand.
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn routes(&self) -> Result<Vec<RouteDescriptor>>;
}

/// Reads route descriptors from a JSON manifest file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RouteSource for FileSource {
    async fn routes(&self) -> Result<Vec<RouteDescriptor>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        let routes = decode_manifest(&raw)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(routes)
    }
}
