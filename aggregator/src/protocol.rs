//! Request paths and response shapes of the downstream services.
//!
//! Only the fields the aggregator folds into its records are decoded.
//! Collections that are only counted decode their elements as
//! [`IgnoredAny`].

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// content: `GET /posts?userId=<id>` or `GET /posts?limit=<n>`
pub const POSTS_PATH: &str = "/posts";
/// fitness: `GET /workouts?userId=<id>` or `GET /workouts?limit=<n>`
pub const WORKOUTS_PATH: &str = "/workouts";
/// social-graph: `GET /follows/stats?userId=<id>`
pub const FOLLOW_STATS_PATH: &str = "/follows/stats";
/// social-graph: `GET /follows?userId=<id>`
pub const FOLLOWING_PATH: &str = "/follows";
/// users: `GET /users?limit=<n>`
pub const USERS_PATH: &str = "/users";

pub const SUBJECT_PARAM: &str = "userId";
pub const LIMIT_PARAM: &str = "limit";

#[derive(Debug, Deserialize)]
pub struct PostsPage {
    pub posts: Vec<Post>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WorkoutsPage {
    pub workouts: Vec<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
pub struct FollowStats {
    pub followers: u64,
    pub following: u64,
}

#[derive(Debug, Deserialize)]
pub struct Following {
    pub following: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsersPage {
    pub users: Vec<IgnoredAny>,
}
