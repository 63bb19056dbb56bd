use crate::config::{EndpointConfig, ValidationError};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Downstream services the aggregator knows how to query.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Content,
    Fitness,
    SocialGraph,
    Users,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Content,
        Source::Fitness,
        Source::SocialGraph,
        Source::Users,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Source::Content => "content",
            Source::Fitness => "fitness",
            Source::SocialGraph => "social-graph",
            Source::Users => "users",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceEndpoint {
    pub source: Source,
    pub base_url: Url,
    pub timeout: Duration,
}

impl ServiceEndpoint {
    /// Appends `path` to the base URL's own path and sets the query.
    pub fn url_for(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }
}

impl From<&EndpointConfig> for ServiceEndpoint {
    fn from(config: &EndpointConfig) -> Self {
        ServiceEndpoint {
            source: config.name,
            base_url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// One endpoint per source, fixed at startup.
#[derive(Clone, Debug)]
pub struct Endpoints {
    inner: Arc<EndpointsInner>,
}

#[derive(Debug)]
struct EndpointsInner {
    content: ServiceEndpoint,
    fitness: ServiceEndpoint,
    social_graph: ServiceEndpoint,
    users: ServiceEndpoint,
}

impl Endpoints {
    pub fn try_new(configs: &[EndpointConfig]) -> Result<Self, ValidationError> {
        let find = |source: Source| {
            configs
                .iter()
                .find(|c| c.name == source)
                .map(ServiceEndpoint::from)
                .ok_or(ValidationError::MissingEndpoint(source))
        };

        Ok(Endpoints {
            inner: Arc::new(EndpointsInner {
                content: find(Source::Content)?,
                fitness: find(Source::Fitness)?,
                social_graph: find(Source::SocialGraph)?,
                users: find(Source::Users)?,
            }),
        })
    }

    pub fn get(&self, source: Source) -> &ServiceEndpoint {
        match source {
            Source::Content => &self.inner.content,
            Source::Fitness => &self.inner.fitness,
            Source::SocialGraph => &self.inner.social_graph,
            Source::Users => &self.inner.users,
        }
    }
}
