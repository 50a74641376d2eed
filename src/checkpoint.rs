//! Per-subreddit checkpoint file (`config.json`).
//!
//! Stores the timestamp each subreddit was last archived up to, so the next
//! run only asks the search API for newer posts. A damaged file is never
//! fatal: the run falls back to a full fetch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::fs_utils::write_json_replace;
use crate::models::Checkpoints;

/// What was found on disk when reading the checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Valid(Checkpoints),
    Missing,
    Empty,
    Corrupt { reason: String },
}

impl LoadOutcome {
    /// The checkpoints to run with; anything but a valid file means none.
    #[must_use]
    pub fn into_checkpoints(self) -> Checkpoints {
        match self {
            Self::Valid(checkpoints) => checkpoints,
            Self::Missing | Self::Empty | Self::Corrupt { .. } => Checkpoints::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and classify the checkpoint file without modifying it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be read.
    pub async fn load_outcome(&self) -> Result<LoadOutcome> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(e) => {
                return Err(anyhow::Error::new(e)).context(format!(
                    "Failed to read checkpoint file: {}",
                    self.path.display()
                ))
            }
        };

        if bytes.is_empty() {
            return Ok(LoadOutcome::Empty);
        }

        Ok(match serde_json::from_slice::<Checkpoints>(&bytes) {
            Ok(checkpoints) => LoadOutcome::Valid(checkpoints),
            Err(e) => LoadOutcome::Corrupt {
                reason: e.to_string(),
            },
        })
    }

    /// Load checkpoints, creating an empty file if none exists.
    ///
    /// A corrupt file is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or read.
    pub async fn load(&self) -> Result<Checkpoints> {
        let outcome = self.load_outcome().await?;

        match &outcome {
            LoadOutcome::Valid(checkpoints) => {
                debug!(path = %self.path.display(), entries = checkpoints.len(), "Loaded checkpoints");
            }
            LoadOutcome::Missing => {
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await
                    .with_context(|| {
                        format!("Failed to create checkpoint file: {}", self.path.display())
                    })?;
                debug!(path = %self.path.display(), "Created empty checkpoint file");
            }
            LoadOutcome::Empty => {}
            LoadOutcome::Corrupt { reason } => {
                warn!(path = %self.path.display(), %reason, "Decoding JSON has failed, starting without checkpoints");
            }
        }

        Ok(outcome.into_checkpoints())
    }

    /// Replace the checkpoint file with `checkpoints`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, checkpoints: &Checkpoints) -> Result<()> {
        write_json_replace(&self.path, checkpoints, "checkpoints").await
    }
}
