//! Supervised proxy: installation, verification, and process lifecycle.

mod installer;
mod supervisor;

pub use installer::{platform_suffix, InstallError, Installer, InstallerConfig};
pub use supervisor::{
    MockRuntime, ProxyProcess, ProxyRuntime, ProxyState, Supervisor, SupervisorError,
    TraefikRuntime,
};
