use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

/// Serialize `value` as JSON and replace `path` with it.
///
/// The bytes land in a sibling temp file first and are renamed over the
/// target, so readers never observe a partially written file.
pub async fn write_json_replace<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    purpose: &str,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .with_context(|| format!("Failed to serialize {purpose}: {}", path.display()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!(
                "Failed to create directory ({purpose}): {}",
                parent.display()
            )
        })?;
    }

    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, &bytes).await.with_context(|| {
        format!("Failed to write temp file ({purpose}): {}", tmp.display())
    })?;

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(anyhow::Error::new(e)).context(format!(
            "Failed to replace file ({purpose}): {}",
            path.display()
        ));
    }

    debug!(path = %path.display(), bytes = bytes.len(), purpose = %purpose, "Wrote JSON file");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| OsString::from("out"), ToOwned::to_owned);
    name.push(".tmp");
    path.with_file_name(name)
}
