//! Fan-out, merge and caching of aggregated records.
//!
//! Every aggregation follows the same steps:
//!
//! 1. Look the record up in the result cache and return it on a hit.
//! 2. On a miss, start from a record with every field at its default.
//! 3. Query each source concurrently, one task per source, each call wrapped
//!    in the retry policy.
//! 4. Wait for all of them, folding successful responses into the record.
//!    A failed source leaves its fields at their defaults.
//! 5. Stamp `lastUpdated`, write the record to the cache and return it.
//!
//! Downstream failures never surface as errors. The work runs in its own
//! task so that a caller going away does not cancel the cache fill.

use crate::cache::{self, GLOBAL_KEY, ResultCache};
use crate::client::DownstreamClient;
use crate::clock::Clock;
use crate::config::{CacheConfig, DEFAULT_MAX_FEED_FOLLOWEES};
use crate::endpoints::Source;
use crate::metrics_defs::{AGGREGATION_DURATION, CACHE_ERROR, CACHE_HIT, CACHE_MISS};
use crate::outcome::CallOutcome;
use crate::protocol::{
    FOLLOW_STATS_PATH, FOLLOWING_PATH, FollowStats, Following, LIMIT_PARAM, POSTS_PATH, Post,
    PostsPage, SUBJECT_PARAM, USERS_PATH, UsersPage, WORKOUTS_PATH, WorkoutsPage,
};
use crate::record::{AggregatedRecord, FeedRecord, PlatformRecord, SubjectRecord};
use crate::types::{BearerToken, SubjectId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use shared::{counter, histogram};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

pub const DEFAULT_FEED_LIMIT: usize = 20;
pub const MAX_FEED_LIMIT: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct AggregatorSettings {
    pub subject_ttl: Duration,
    pub global_ttl: Duration,
    pub feed_ttl: Duration,
    /// Limit passed to the platform-wide listings
    pub global_page_size: u32,
    /// Followees whose posts are fetched for one feed
    pub max_feed_followees: usize,
}

impl AggregatorSettings {
    pub fn new(cache: &CacheConfig, global_page_size: u32) -> Self {
        AggregatorSettings {
            subject_ttl: Duration::from_secs(cache.subject_ttl_secs),
            global_ttl: Duration::from_secs(cache.global_ttl_secs),
            feed_ttl: Duration::from_secs(cache.feed_ttl_secs),
            global_page_size,
            max_feed_followees: DEFAULT_MAX_FEED_FOLLOWEES,
        }
    }

    pub fn with_max_feed_followees(mut self, max_feed_followees: usize) -> Self {
        self.max_feed_followees = max_feed_followees;
        self
    }
}

#[derive(Clone, Copy, Debug)]
enum Kind {
    Subject,
    Platform,
    Feed,
}

impl Kind {
    const fn as_str(&self) -> &'static str {
        match self {
            Kind::Subject => "subject",
            Kind::Platform => "platform",
            Kind::Feed => "feed",
        }
    }
}

/// Contribution of one source to a [`SubjectRecord`].
enum SubjectPart {
    Posts(CallOutcome<PostsPage>),
    Workouts(CallOutcome<WorkoutsPage>),
    Follows(CallOutcome<FollowStats>),
}

/// Contribution of one source to a [`PlatformRecord`].
enum PlatformPart {
    Users(CallOutcome<UsersPage>),
    Posts(CallOutcome<PostsPage>),
    Workouts(CallOutcome<WorkoutsPage>),
}

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    client: DownstreamClient,
    cache: Arc<dyn ResultCache>,
    clock: Arc<dyn Clock>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(
        client: DownstreamClient,
        cache: Arc<dyn ResultCache>,
        clock: Arc<dyn Clock>,
        settings: AggregatorSettings,
    ) -> Self {
        Aggregator {
            inner: Arc::new(AggregatorInner {
                client,
                cache,
                clock,
                settings,
            }),
        }
    }

    /// Per-user analytics: content, fitness and social-graph counts.
    pub async fn subject_analytics(
        &self,
        subject: &SubjectId,
        token: &BearerToken,
    ) -> SubjectRecord {
        let key = cache::subject_key(subject);
        if let Some(record) = self.inner.cached(&key, Kind::Subject) {
            return record;
        }

        let inner = self.inner.clone();
        let subject = subject.clone();
        let token = token.clone();
        let user_id = subject.to_string();
        self.detach(
            Kind::Subject,
            async move { inner.fill_subject(subject, token, key).await },
            |now| SubjectRecord {
                last_updated: now,
                ..SubjectRecord::new(user_id)
            },
        )
        .await
    }

    /// Platform-wide analytics.
    ///
    /// Likes and comments are summed over the first page of posts only.
    pub async fn platform_analytics(&self, token: &BearerToken) -> PlatformRecord {
        if let Some(record) = self.inner.cached(GLOBAL_KEY, Kind::Platform) {
            return record;
        }

        let inner = self.inner.clone();
        let token = token.clone();
        self.detach(
            Kind::Platform,
            async move { inner.fill_platform(token).await },
            |now| PlatformRecord {
                last_updated: now,
                ..PlatformRecord::default()
            },
        )
        .await
    }

    /// Newest posts of the accounts `subject` follows. `limit` is clamped
    /// to `1..=MAX_FEED_LIMIT`.
    pub async fn feed(&self, subject: &SubjectId, limit: usize, token: &BearerToken) -> FeedRecord {
        let limit = limit.clamp(1, MAX_FEED_LIMIT);
        let key = cache::feed_key(subject, limit);
        if let Some(record) = self.inner.cached(&key, Kind::Feed) {
            return record;
        }

        let inner = self.inner.clone();
        let subject = subject.clone();
        let token = token.clone();
        let user_id = subject.to_string();
        self.detach(
            Kind::Feed,
            async move { inner.fill_feed(subject, limit, token, key).await },
            |now| FeedRecord {
                last_updated: now,
                ..FeedRecord::new(user_id)
            },
        )
        .await
    }

    async fn detach<T, Fut>(
        &self,
        kind: Kind,
        work: Fut,
        fallback: impl FnOnce(DateTime<Utc>) -> T,
    ) -> T
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::spawn(work).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "Aggregation task failed");
                fallback(self.inner.clock.now())
            }
        }
    }
}

impl AggregatorInner {
    async fn fill_subject(
        &self,
        subject: SubjectId,
        token: BearerToken,
        key: String,
    ) -> SubjectRecord {
        let started = Instant::now();
        let mut record = SubjectRecord::new(subject.as_str());

        let by_subject = || vec![(SUBJECT_PARAM, subject.to_string())];
        let mut join_set = JoinSet::new();
        self.spawn_call(
            &mut join_set,
            Source::Content,
            POSTS_PATH,
            by_subject(),
            &token,
            SubjectPart::Posts,
        );
        self.spawn_call(
            &mut join_set,
            Source::Fitness,
            WORKOUTS_PATH,
            by_subject(),
            &token,
            SubjectPart::Workouts,
        );
        self.spawn_call(
            &mut join_set,
            Source::SocialGraph,
            FOLLOW_STATS_PATH,
            by_subject(),
            &token,
            SubjectPart::Follows,
        );

        join_all(join_set, |part| match part {
            SubjectPart::Posts(CallOutcome::Success(page)) => {
                record.posts_count = page.posts.len() as u64;
                record.total_likes = sum_likes(&page.posts);
                record.total_comments = sum_comments(&page.posts);
            }
            SubjectPart::Workouts(CallOutcome::Success(page)) => {
                record.workouts_count = page.workouts.len() as u64;
            }
            SubjectPart::Follows(CallOutcome::Success(stats)) => {
                record.followers_count = stats.followers;
                record.following_count = stats.following;
            }
            // Failed sources keep their defaults
            _ => {}
        })
        .await;

        record.last_updated = self.clock.now();
        self.store(&key, record.clone().into(), self.settings.subject_ttl);
        self.finish(Kind::Subject, &key, started);
        record
    }

    async fn fill_platform(&self, token: BearerToken) -> PlatformRecord {
        let started = Instant::now();
        let mut record = PlatformRecord::default();

        let page_size = self.settings.global_page_size.to_string();
        let by_page = || vec![(LIMIT_PARAM, page_size.clone())];
        let mut join_set = JoinSet::new();
        self.spawn_call(
            &mut join_set,
            Source::Users,
            USERS_PATH,
            by_page(),
            &token,
            PlatformPart::Users,
        );
        self.spawn_call(
            &mut join_set,
            Source::Content,
            POSTS_PATH,
            by_page(),
            &token,
            PlatformPart::Posts,
        );
        self.spawn_call(
            &mut join_set,
            Source::Fitness,
            WORKOUTS_PATH,
            by_page(),
            &token,
            PlatformPart::Workouts,
        );

        join_all(join_set, |part| match part {
            PlatformPart::Users(CallOutcome::Success(page)) => {
                record.total_users = page.users.len() as u64;
            }
            PlatformPart::Posts(CallOutcome::Success(page)) => {
                record.total_posts = page.posts.len() as u64;
                record.total_likes = sum_likes(&page.posts);
                record.total_comments = sum_comments(&page.posts);
            }
            PlatformPart::Workouts(CallOutcome::Success(page)) => {
                record.total_workouts = page.workouts.len() as u64;
            }
            _ => {}
        })
        .await;

        record.last_updated = self.clock.now();
        self.store(GLOBAL_KEY, record.clone().into(), self.settings.global_ttl);
        self.finish(Kind::Platform, GLOBAL_KEY, started);
        record
    }

    async fn fill_feed(
        &self,
        subject: SubjectId,
        limit: usize,
        token: BearerToken,
        key: String,
    ) -> FeedRecord {
        let started = Instant::now();
        let mut record = FeedRecord::new(subject.as_str());

        // Without the follow list there is nothing to fan out to
        let following = self
            .client
            .call::<Following>(
                Source::SocialGraph,
                FOLLOWING_PATH,
                &[(SUBJECT_PARAM, subject.as_str())],
                &token,
            )
            .await
            .ok()
            .map(|f| f.following)
            .unwrap_or_default();

        let followees = select_followees(following, &subject, self.settings.max_feed_followees);

        // No followee can contribute more than `limit` items
        let per_followee = limit.to_string();
        let mut join_set = JoinSet::new();
        for followee in followees {
            self.spawn_call(
                &mut join_set,
                Source::Content,
                POSTS_PATH,
                vec![(SUBJECT_PARAM, followee), (LIMIT_PARAM, per_followee.clone())],
                &token,
                |outcome: CallOutcome<PostsPage>| outcome,
            );
        }

        let mut items = Vec::new();
        join_all(join_set, |outcome| {
            if let CallOutcome::Success(page) = outcome {
                items.extend(page.posts);
            }
        })
        .await;

        sort_newest_first(&mut items);
        items.truncate(limit);

        record.items = items;
        record.last_updated = self.clock.now();
        self.store(&key, record.clone().into(), self.settings.feed_ttl);
        self.finish(Kind::Feed, &key, started);
        record
    }

    /// Spawns one downstream call into `join_set`, tagging its outcome with `wrap`.
    fn spawn_call<T, C, W>(
        &self,
        join_set: &mut JoinSet<C>,
        source: Source,
        path: &'static str,
        query: Vec<(&'static str, String)>,
        token: &BearerToken,
        wrap: W,
    ) where
        T: DeserializeOwned + Send + 'static,
        C: Send + 'static,
        W: FnOnce(CallOutcome<T>) -> C + Send + 'static,
    {
        let client = self.client.clone();
        let token = token.clone();
        join_set.spawn(async move {
            let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
            wrap(client.call::<T>(source, path, &query, &token).await)
        });
    }

    fn cached<T>(&self, key: &str, kind: Kind) -> Option<T>
    where
        T: TryFrom<AggregatedRecord>,
    {
        let record = match self.cache.get(key) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key, error = %e, "Result cache read failed, aggregating live");
                counter!(CACHE_ERROR).increment(1);
                None
            }
        };

        match record.and_then(|r| T::try_from(r).ok()) {
            Some(record) => {
                tracing::debug!(key, "Result cache hit");
                counter!(CACHE_HIT, "kind" => kind.as_str()).increment(1);
                Some(record)
            }
            None => {
                counter!(CACHE_MISS, "kind" => kind.as_str()).increment(1);
                None
            }
        }
    }

    fn store(&self, key: &str, record: AggregatedRecord, ttl: Duration) {
        if let Err(e) = self.cache.put(key, record, ttl) {
            tracing::warn!(key, error = %e, "Result cache write failed");
            counter!(CACHE_ERROR).increment(1);
        }
    }

    fn finish(&self, kind: Kind, key: &str, started: Instant) {
        let elapsed = started.elapsed();
        histogram!(AGGREGATION_DURATION, "kind" => kind.as_str()).record(elapsed.as_secs_f64());
        tracing::debug!(
            kind = kind.as_str(),
            key,
            elapsed = ?elapsed,
            "Aggregation complete"
        );
    }
}

/// Waits for every task in the set, handing each result to `apply`.
async fn join_all<C: 'static>(mut join_set: JoinSet<C>, mut apply: impl FnMut(C)) {
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(part) => apply(part),
            Err(e) => tracing::error!(error = %e, "Source task panicked"),
        }
    }
}

/// Followees in the order social-graph listed them, without duplicates or
/// the subject itself, capped at `max`.
fn select_followees(following: Vec<String>, subject: &SubjectId, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let followees: Vec<String> = following
        .into_iter()
        .filter(|id| id != subject.as_str() && seen.insert(id.clone()))
        .collect();

    if followees.len() > max {
        tracing::info!(
            subject = %subject,
            followees = followees.len(),
            max,
            "Feed limited to the first followees"
        );
    }

    followees.into_iter().take(max).collect()
}

fn sum_likes(posts: &[Post]) -> u64 {
    posts.iter().fold(0, |acc, p| acc.saturating_add(p.likes))
}

fn sum_comments(posts: &[Post]) -> u64 {
    posts.iter().fold(0, |acc, p| acc.saturating_add(p.comments))
}

/// Newest first; posts without a timestamp go last. Ties break on id so
/// the order does not depend on which source answered first.
fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
