use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::cache::MemoryCache;
use crate::client::{DownstreamClient, Transport};
use crate::clock::Clock;
use crate::config::{CacheConfig, DEFAULT_MAX_ENTRIES, EndpointConfig};
use crate::endpoints::{Endpoints, ServiceEndpoint, Source};
use crate::outcome::{CallOutcome, FailureKind};
use crate::retry::{RetryPolicy, Sleeper};
use crate::types::BearerToken;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use hyper::body::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub fn test_endpoints() -> Vec<EndpointConfig> {
    Source::ALL
        .iter()
        .map(|source| EndpointConfig {
            name: *source,
            url: Url::parse(&format!("http://{}.test", source.as_str())).unwrap(),
            timeout_secs: 30,
        })
        .collect()
}

pub fn json(value: serde_json::Value) -> CallOutcome<Bytes> {
    CallOutcome::Success(Bytes::from(value.to_string()))
}

pub fn fail(kind: FailureKind) -> CallOutcome<Bytes> {
    CallOutcome::failure(kind, "scripted failure")
}

/// In-memory [`Transport`] with scripted responses per `source path?query`.
///
/// Scripted outcomes are served in order and the last one repeats.
/// Unscripted requests get a 404.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<CallOutcome<Bytes>>>>,
    calls: Mutex<Vec<(Source, String)>>,
    tokens: Mutex<Vec<String>>,
}

impl MockTransport {
    fn key(source: Source, path_and_query: &str) -> String {
        format!("{source} {path_and_query}")
    }

    pub fn respond(&self, source: Source, path_and_query: &str, outcome: CallOutcome<Bytes>) {
        self.respond_sequence(source, path_and_query, vec![outcome]);
    }

    pub fn respond_sequence(
        &self,
        source: Source,
        path_and_query: &str,
        outcomes: Vec<CallOutcome<Bytes>>,
    ) {
        self.scripts
            .lock()
            .insert(Self::key(source, path_and_query), outcomes.into());
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, source: Source) -> usize {
        self.calls.lock().iter().filter(|(s, _)| *s == source).count()
    }

    pub fn calls_for(&self, source: Source, path_and_query: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(s, p)| *s == source && p == path_and_query)
            .count()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        endpoint: &ServiceEndpoint,
        url: &Url,
        token: &BearerToken,
    ) -> CallOutcome<Bytes> {
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        self.calls
            .lock()
            .push((endpoint.source, path_and_query.clone()));
        self.tokens.lock().push(token.expose().to_string());

        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&Self::key(endpoint.source, &path_and_query)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| fail(FailureKind::ClientError(404))),
            None => fail(FailureKind::ClientError(404)),
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += TimeDelta::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct TestHarness {
    pub transport: Arc<MockTransport>,
    pub sleeper: Arc<RecordingSleeper>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<MemoryCache>,
    pub aggregator: Aggregator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(AggregatorSettings::new(&CacheConfig::default(), 1000))
    }

    pub fn with_settings(settings: AggregatorSettings) -> Self {
        let transport = Arc::new(MockTransport::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(MemoryCache::new(clock.clone(), DEFAULT_MAX_ENTRIES));

        let client = DownstreamClient::new(
            transport.clone(),
            Endpoints::try_new(&test_endpoints()).unwrap(),
            RetryPolicy::new(3, Duration::from_secs(1)).with_sleeper(sleeper.clone()),
        );
        let aggregator = Aggregator::new(client, cache.clone(), clock.clone(), settings);

        TestHarness {
            transport,
            sleeper,
            clock,
            cache,
            aggregator,
        }
    }

    pub fn token(&self) -> BearerToken {
        BearerToken::new("test-token")
    }
}
