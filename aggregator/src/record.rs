//! Merged responses returned to the inbound caller.
//!
//! Every field has a zero/empty default; a field keeps its default when
//! the source feeding it failed, so records are always complete-shaped.

use crate::protocol::Post;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user analytics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub user_id: String,
    pub posts_count: u64,
    pub workouts_count: u64,
    pub followers_count: u64,
    pub following_count: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub last_updated: DateTime<Utc>,
}

impl SubjectRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        SubjectRecord {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Platform-wide analytics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformRecord {
    pub total_users: u64,
    pub total_posts: u64,
    pub total_workouts: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub last_updated: DateTime<Utc>,
}

/// Recent posts from the accounts a user follows, newest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub user_id: String,
    pub items: Vec<Post>,
    pub last_updated: DateTime<Utc>,
}

impl FeedRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        FeedRecord {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Any record the result cache can hold.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregatedRecord {
    Subject(SubjectRecord),
    Platform(PlatformRecord),
    Feed(FeedRecord),
}

impl From<SubjectRecord> for AggregatedRecord {
    fn from(record: SubjectRecord) -> Self {
        AggregatedRecord::Subject(record)
    }
}

impl From<PlatformRecord> for AggregatedRecord {
    fn from(record: PlatformRecord) -> Self {
        AggregatedRecord::Platform(record)
    }
}

impl From<FeedRecord> for AggregatedRecord {
    fn from(record: FeedRecord) -> Self {
        AggregatedRecord::Feed(record)
    }
}

impl TryFrom<AggregatedRecord> for SubjectRecord {
    type Error = AggregatedRecord;
    fn try_from(record: AggregatedRecord) -> Result<Self, Self::Error> {
        match record {
            AggregatedRecord::Subject(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl TryFrom<AggregatedRecord> for PlatformRecord {
    type Error = AggregatedRecord;
    fn try_from(record: AggregatedRecord) -> Result<Self, Self::Error> {
        match record {
            AggregatedRecord::Platform(r) => Ok(r),
            other => Err(other),
        }
    }
}

impl TryFrom<AggregatedRecord> for FeedRecord {
    type Error = AggregatedRecord;
    fn try_from(record: AggregatedRecord) -> Result<Self, Self::Error> {
        match record {
            AggregatedRecord::Feed(r) => Ok(r),
            other => Err(other),
        }
    }
}
