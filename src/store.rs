//! Per-subreddit JSON archive files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use crate::fs_utils::write_json_replace;
use crate::models::ArchiveMapping;

const MAX_FORUM_NAME_LEN: usize = 50;

/// Which record survives when a post id is both on disk and freshly fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The archived copy wins; posts keep the snapshot from their first fetch.
    #[default]
    KeepExisting,
    /// The fetched copy wins, refreshing score and edited text.
    PreferFetched,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForumNameError {
    #[error("subreddit name is empty")]
    Empty,
    #[error("subreddit name is longer than 50 characters")]
    TooLong,
    #[error("subreddit name contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Check a subreddit name before it is used in a URL or a file name.
///
/// A leading `r/` or `/r/` is accepted and stripped.
///
/// # Errors
///
/// Returns an error unless the name is 1 to 50 ASCII letters, digits or
/// underscores.
pub fn validate_forum_name(name: &str) -> Result<&str, ForumNameError> {
    let name = name.trim();
    let name = name
        .strip_prefix("/r/")
        .or_else(|| name.strip_prefix("r/"))
        .unwrap_or(name);

    if name.is_empty() {
        return Err(ForumNameError::Empty);
    }
    if name.len() > MAX_FORUM_NAME_LEN {
        return Err(ForumNameError::TooLong);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(ForumNameError::InvalidChar(c));
    }
    Ok(name)
}

/// Merge `old` into `new` under `policy`. Keys from both sides survive.
#[must_use]
pub fn merge(old: ArchiveMapping, mut new: ArchiveMapping, policy: MergePolicy) -> ArchiveMapping {
    match policy {
        MergePolicy::KeepExisting => {
            new.extend(old);
            new
        }
        MergePolicy::PreferFetched => {
            for (id, record) in old {
                new.entry(id).or_insert(record);
            }
            new
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
    policy: MergePolicy,
}

impl ArchiveStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, policy: MergePolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    /// Archive file for `forum`: `<dir>/<forum>.json`.
    #[must_use]
    pub fn path_for(&self, forum: &str) -> PathBuf {
        self.dir.join(format!("{forum}.json"))
    }

    /// Read the archive for `forum`; a missing file is an empty archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn read(&self, forum: &str) -> Result<ArchiveMapping> {
        read_archive(&self.path_for(forum)).await
    }

    /// Merge `new_data` into the archive for `forum` and rewrite the file.
    ///
    /// Returns the merged archive as written.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing file is unreadable or corrupt (it is
    /// left untouched), or if the new file cannot be written.
    pub async fn write(&self, forum: &str, new_data: ArchiveMapping) -> Result<ArchiveMapping> {
        let path = self.path_for(forum);
        let fetched = new_data.len();

        let old = read_archive(&path).await?;
        let existing = old.len();
        let merged = merge(old, new_data, self.policy);

        write_json_replace(&path, &merged, "archive").await?;

        info!(
            subreddit = %forum,
            path = %path.display(),
            existing,
            fetched,
            total = merged.len(),
            "Archive written"
        );
        Ok(merged)
    }
}

async fn read_archive(path: &Path) -> Result<ArchiveMapping> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No existing archive");
            return Ok(ArchiveMapping::new());
        }
        Err(e) => {
            return Err(anyhow::Error::new(e))
                .context(format!("Failed to read archive: {}", path.display()))
        }
    };

    serde_json::from_slice(&bytes)
        .with_context(|| format!("Existing archive is not valid JSON: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostRecord;
    use tempfile::TempDir;

    fn record(time: i64, score: i64, title: &str, text: &str) -> PostRecord {
        PostRecord {
            time,
            score,
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_validate_forum_name() {
        assert_eq!(validate_forum_name("rust"), Ok("rust"));
        assert_eq!(validate_forum_name("r/Ask_History"), Ok("Ask_History"));
        assert_eq!(validate_forum_name("/r/rust"), Ok("rust"));
        assert_eq!(validate_forum_name(""), Err(ForumNameError::Empty));
        assert_eq!(validate_forum_name("r/"), Err(ForumNameError::Empty));
        assert_eq!(
            validate_forum_name("../etc/passwd"),
            Err(ForumNameError::InvalidChar('.'))
        );
        assert_eq!(
            validate_forum_name("a/b"),
            Err(ForumNameError::InvalidChar('/'))
        );
        assert_eq!(
            validate_forum_name(&"a".repeat(51)),
            Err(ForumNameError::TooLong)
        );
    }

    #[test]
    fn test_merge_policies_on_shared_key() {
        let old = ArchiveMapping::from([("k".to_string(), record(1, 2, "old", ""))]);
        let new = ArchiveMapping::from([("k".to_string(), record(1, 9, "new", "edited"))]);

        let kept = merge(old.clone(), new.clone(), MergePolicy::KeepExisting);
        assert_eq!(kept["k"].title, "old");

        let refreshed = merge(old, new, MergePolicy::PreferFetched);
        assert_eq!(refreshed["k"].title, "new");
        assert_eq!(refreshed["k"].score, 9);
    }

    #[tokio::test]
    async fn test_write_without_existing_file() {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(dir.path(), MergePolicy::KeepExisting);
        let data = ArchiveMapping::from([("a".to_string(), record(5, 1, "u", "hi"))]);

        let merged = store.write("rust", data.clone()).await.unwrap();

        assert_eq!(merged, data);
        assert_eq!(store.read("rust").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(dir.path(), MergePolicy::KeepExisting);
        std::fs::write(store.path_for("rust"), "[1, 2").unwrap();

        let result = store
            .write(
                "rust",
                ArchiveMapping::from([("a".to_string(), record(5, 1, "u", ""))]),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(
            std::fs::read_to_string(store.path_for("rust")).unwrap(),
            "[1, 2"
        );
    }
}
