//! Rendered-config persistence.
//!
//! Config updates must be applied atomically: write to a temp file next to
//! the target, then rename into place. Parent directories are created as
//! needed.

use std::path::Path;

use anyhow::{Context, Result};

/// Persist rendered configuration text to its fixed path.
pub fn write_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| {
        format!(
            "move config into place ({} -> {})",
            tmp.display(),
            path.display()
        )
    })?;

    Ok(())
}
