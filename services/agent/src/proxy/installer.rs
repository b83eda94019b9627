//! Proxy binary installation.
//!
//! Resolves the latest stable release for the local platform from the
//! release feed, downloads the matching tarball, and extracts the single
//! proxy executable. Draft and prerelease entries are skipped; the asset
//! is matched by its platform suffix. An unsupported platform fails
//! before any network request is made.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::Client;
use serde::Deserialize;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from proxy installation.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no stable release carries an asset matching {suffix}")]
    NoMatchingAsset { suffix: String },

    #[error("proxy executable {name} not found in release archive")]
    BinaryNotInArchive { name: String },
}

/// Configuration for the installer.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Release feed URL. Points at the GitHub releases API in production;
    /// tests point it at a local mock.
    pub releases_url: String,

    /// Where the extracted executable lands.
    pub bin_path: PathBuf,

    /// Overall request timeout.
    pub request_timeout: Duration,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            releases_url: "https://api.github.com/repos/traefik/traefik/releases".to_string(),
            bin_path: PathBuf::from("./bin/traefik"),
            request_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Release-asset suffix for a platform. Fails for anything the upstream
/// project does not ship.
pub fn platform_suffix(os: &str, arch: &str) -> Result<String, InstallError> {
    let suffix = match (os, arch) {
        ("linux", "x86_64") => "linux_amd64.tar.gz",
        ("linux", "aarch64") => "linux_arm64.tar.gz",
        ("macos", "x86_64") => "darwin_amd64.tar.gz",
        ("macos", "aarch64") => "darwin_arm64.tar.gz",
        (os, arch) => {
            return Err(InstallError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
    };
    Ok(suffix.to_string())
}

/// Downloads and extracts the proxy binary.
pub struct Installer {
    config: InstallerConfig,
    client: Client,
}

impl Installer {
    pub fn new(config: InstallerConfig) -> Result<Self, InstallError> {
        let client = Client::builder()
            .user_agent("polaredge-agent/0.1.0")
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    /// Whether the proxy binary is already on disk.
    pub fn is_installed(&self) -> bool {
        self.config.bin_path.exists()
    }

    /// Install the latest stable release for the local platform.
    /// Returns the selected release tag.
    pub async fn install(&self) -> Result<String, InstallError> {
        self.install_for_platform(std::env::consts::OS, std::env::consts::ARCH)
            .await
    }

    /// Install for an explicit platform. The suffix check runs before any
    /// request, so an unsupported platform never touches the network.
    pub async fn install_for_platform(&self, os: &str, arch: &str) -> Result<String, InstallError> {
        let suffix = platform_suffix(os, arch)?;
        info!(os, arch, suffix = %suffix, "Resolving proxy release");

        let (tag, url) = self.latest_stable_asset(&suffix).await?;
        info!(tag = %tag, url = %url, "Downloading proxy release");

        let archive = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        self.extract_binary(&archive)?;
        info!(tag = %tag, bin_path = %self.config.bin_path.display(), "Proxy installed");

        Ok(tag)
    }

    /// First non-draft, non-prerelease release carrying an asset with the
    /// platform suffix.
    async fn latest_stable_asset(&self, suffix: &str) -> Result<(String, String), InstallError> {
        let releases: Vec<Release> = self
            .client
            .get(&self.config.releases_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        for release in releases {
            if release.draft || release.prerelease {
                debug!(tag = %release.tag_name, "Skipping draft/prerelease");
                continue;
            }
            for asset in release.assets {
                if asset.name.ends_with(suffix) {
                    return Ok((release.tag_name, asset.browser_download_url));
                }
            }
        }

        Err(InstallError::NoMatchingAsset {
            suffix: suffix.to_string(),
        })
    }

    /// Pull the single proxy executable out of the gzipped tarball and
    /// write it executable.
    fn extract_binary(&self, archive: &[u8]) -> Result<(), InstallError> {
        let wanted = self
            .config
            .bin_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "traefik".into());

        let mut tarball = Archive::new(GzDecoder::new(archive));
        for entry in tarball.entries()? {
            let mut entry = entry?;
            let path = entry.path()?;
            if path.file_name() != Some(wanted.as_os_str()) {
                continue;
            }

            if let Some(parent) = self.config.bin_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let mut out = std::fs::File::create(&self.config.bin_path)?;
            std::io::copy(&mut entry, &mut out)?;
            drop(out);

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &self.config.bin_path,
                    std::fs::Permissions::from_mode(0o755),
                )?;
            }

            return Ok(());
        }

        Err(InstallError::BinaryNotInArchive {
            name: wanted.to_string_lossy().into_owned(),
        })
    }

    /// Extract from an already-downloaded archive. Exposed for tests.
    pub fn extract_from(&self, archive: &[u8]) -> Result<(), InstallError> {
        self.extract_binary(archive)
    }

    pub fn bin_path(&self) -> &Path {
        &self.config.bin_path
    }
}
