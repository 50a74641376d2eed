//! Archive records and the search API's wire types.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// One archived post as stored in `<subreddit>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    /// Creation time, seconds since the Unix epoch.
    pub time: i64,
    pub score: i64,
    pub title: String,
    /// Self text, empty for link posts.
    pub text: String,
}

/// All archived posts of one subreddit keyed by post id.
pub type ArchiveMapping = BTreeMap<String, PostRecord>;

/// Last archived-before timestamp per subreddit.
pub type Checkpoints = BTreeMap<String, i64>;

/// A submission as returned by the search API.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_utc: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: Option<String>,
}

impl Submission {
    #[must_use]
    pub fn to_record(&self) -> PostRecord {
        PostRecord {
            time: self.created_utc,
            score: self.score,
            title: self.title.clone(),
            text: self.selftext.clone().unwrap_or_default(),
        }
    }
}

/// Some mirrors report `created_utc` as a float.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Int(i64),
        Float(f64),
    }

    match Timestamp::deserialize(deserializer)? {
        Timestamp::Int(t) => Ok(t),
        Timestamp::Float(t) => Ok(t.trunc() as i64),
    }
}
