//! One archive run: checkpoints in, fetch, merge-write, checkpoints out.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::archiver::Archiver;
use crate::checkpoint::CheckpointStore;
use crate::config::Settings;
use crate::pushshift::SearchApi;
use crate::store::{validate_forum_name, ArchiveStore};

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub archived: usize,
    pub checkpoint: i64,
}

/// Archive `forum` using the current time as the run start.
///
/// # Errors
///
/// Returns an error for an invalid subreddit name, a search API failure,
/// or a storage failure. The checkpoint file is only rewritten after the
/// archive has been written.
pub async fn archive_subreddit<A: SearchApi>(
    settings: &Settings,
    api: A,
    forum: &str,
) -> Result<RunSummary> {
    archive_subreddit_at(settings, api, forum, Utc::now().timestamp()).await
}

/// [`archive_subreddit`] with an explicit run start time.
///
/// # Errors
///
/// See [`archive_subreddit`].
pub async fn archive_subreddit_at<A: SearchApi>(
    settings: &Settings,
    api: A,
    forum: &str,
    now: i64,
) -> Result<RunSummary> {
    let forum = validate_forum_name(forum).context("Invalid subreddit name")?;

    let checkpoint_store = CheckpointStore::new(settings.checkpoint_path());
    let mut checkpoints = checkpoint_store
        .load()
        .await
        .context("Failed to load checkpoints")?;

    let archiver = Archiver::new(api, settings);
    let fetched = archiver
        .archive_at(forum, &mut checkpoints, now)
        .await
        .with_context(|| format!("Failed to fetch /r/{forum}"))?;
    let fetched_count = fetched.len();

    let store = ArchiveStore::new(&settings.archive_dir, settings.merge_policy);
    let archived = store
        .write(forum, fetched)
        .await
        .with_context(|| format!("Failed to write archive for /r/{forum}"))?;

    checkpoint_store
        .save(&checkpoints)
        .await
        .context("Failed to save checkpoints")?;

    let summary = RunSummary {
        fetched: fetched_count,
        archived: archived.len(),
        checkpoint: now,
    };
    info!(
        subreddit = %forum,
        fetched = summary.fetched,
        archived = summary.archived,
        checkpoint = summary.checkpoint,
        "Archive run complete"
    );
    Ok(summary)
}
