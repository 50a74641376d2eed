//! Redsaver library.
//!
//! Archives text posts from a subreddit into a local JSON file, fetching only
//! what was posted since the previous run.

pub mod archiver;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod fs_utils;
pub mod models;
pub mod pushshift;
pub mod runner;
pub mod store;

pub use runner::{archive_subreddit, archive_subreddit_at, RunSummary};
