//! Outbound calls to downstream services.

use crate::endpoints::{Endpoints, ServiceEndpoint, Source};
use crate::metrics_defs::DOWNSTREAM_FAILURE;
use crate::outcome::{CallOutcome, FailureKind};
use crate::retry::RetryPolicy;
use crate::types::BearerToken;
use async_trait::async_trait;
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use shared::counter;
use std::sync::Arc;
use url::Url;

/// A single `GET` against a downstream service, with no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        endpoint: &ServiceEndpoint,
        url: &Url,
        token: &BearerToken,
    ) -> CallOutcome<Bytes>;
}

/// [`Transport`] backed by a shared reqwest connection pool.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        endpoint: &ServiceEndpoint,
        url: &Url,
        token: &BearerToken,
    ) -> CallOutcome<Bytes> {
        // The timeout covers the whole exchange, body included
        let response = match self
            .client
            .get(url.clone())
            .bearer_auth(token.expose())
            .timeout(endpoint.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return CallOutcome::failure(classify_transport_error(&e), e.to_string()),
        };

        let status = response.status();
        if let Some(kind) = FailureKind::from_status(status) {
            return CallOutcome::failure(kind, format!("{} responded {status}", endpoint.source));
        }

        match response.bytes().await {
            Ok(body) => CallOutcome::Success(body),
            Err(e) => CallOutcome::failure(classify_transport_error(&e), e.to_string()),
        }
    }
}

fn classify_transport_error(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::ConnectionError
    }
}

/// Issues typed calls to the configured downstream services.
///
/// Each call goes through the retry policy; a failure that survives the
/// retries is returned as a [`CallOutcome::Failure`] for the caller to
/// degrade on.
#[derive(Clone)]
pub struct DownstreamClient {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    retry: RetryPolicy,
}

impl DownstreamClient {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints, retry: RetryPolicy) -> Self {
        DownstreamClient {
            transport,
            endpoints,
            retry,
        }
    }

    pub async fn call<T>(
        &self,
        source: Source,
        path: &str,
        query: &[(&str, &str)],
        token: &BearerToken,
    ) -> CallOutcome<T>
    where
        T: DeserializeOwned + Send,
    {
        let endpoint = self.endpoints.get(source);
        let url = endpoint.url_for(path, query);

        let transport = &self.transport;
        let target = &url;
        let outcome = self
            .retry
            .run(source.as_str(), || async move {
                transport
                    .get(endpoint, target, token)
                    .await
                    .and_then(|body| decode(&body))
            })
            .await;

        if let CallOutcome::Failure(failure) = &outcome {
            tracing::warn!(
                source = %source,
                url = %url,
                failure = %failure,
                "Downstream call failed, using defaults"
            );
            counter!(
                DOWNSTREAM_FAILURE,
                "source" => source.as_str(),
                "kind" => failure.kind.as_str(),
            )
            .increment(1);
        }

        outcome
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> CallOutcome<T> {
    match serde_json::from_slice(body) {
        Ok(value) => CallOutcome::Success(value),
        Err(e) => CallOutcome::failure(FailureKind::DecodeError, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FollowStats, POSTS_PATH, PostsPage};
    use crate::testutils::{MockTransport, RecordingSleeper, json, test_endpoints};
    use http_body_util::Full;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioExecutor;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::net::TcpListener;

    // /ok echoes the Authorization header, /busy -> 503, /limited -> 429,
    // /missing -> 404, /garbage -> invalid JSON, /slow sleeps for 2s.
    async fn route(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let path = req.uri().path().to_string();
        let auth = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let (status, body) = match path.as_str() {
            "/ok" => (
                StatusCode::OK,
                serde_json::json!({"followers": 10, "following": 4, "auth": auth}).to_string(),
            ),
            "/busy" => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
            "/limited" => (StatusCode::TOO_MANY_REQUESTS, String::new()),
            "/missing" => (StatusCode::NOT_FOUND, String::new()),
            "/garbage" => (StatusCode::OK, "not json".to_string()),
            "/slow" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                (StatusCode::OK, "{}".to_string())
            }
            _ => (StatusCode::NOT_FOUND, String::new()),
        };

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        Ok(response)
    }

    async fn start_test_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = hyper_util::rt::TokioIo::new(stream);

                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(route))
                        .await;
                });
            }
        });

        port
    }

    fn endpoint(port: u16, timeout: Duration) -> ServiceEndpoint {
        ServiceEndpoint {
            source: Source::SocialGraph,
            base_url: Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
            timeout,
        }
    }

    async fn get(port: u16, path: &str, timeout: Duration) -> CallOutcome<Bytes> {
        let endpoint = endpoint(port, timeout);
        let url = endpoint.url_for(path, &[]);
        HttpTransport::new()
            .unwrap()
            .get(&endpoint, &url, &BearerToken::new("t0ken"))
            .await
    }

    fn kind(outcome: CallOutcome<Bytes>) -> FailureKind {
        match outcome {
            CallOutcome::Failure(failure) => failure.kind,
            CallOutcome::Success(_) => panic!("expected a failure"),
        }
    }

    #[tokio::test]
    async fn test_http_transport_success_forwards_token() {
        let port = start_test_server().await;

        let body = get(port, "/ok", Duration::from_secs(5)).await.ok().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["auth"], "Bearer t0ken");
        assert_eq!(parsed["followers"], 10);
    }

    #[tokio::test]
    async fn test_http_transport_status_classification() {
        let port = start_test_server().await;
        let timeout = Duration::from_secs(5);

        assert_eq!(
            kind(get(port, "/busy", timeout).await),
            FailureKind::ServerError(503)
        );
        assert_eq!(
            kind(get(port, "/limited", timeout).await),
            FailureKind::RateLimited
        );
        assert_eq!(
            kind(get(port, "/missing", timeout).await),
            FailureKind::ClientError(404)
        );
    }

    #[tokio::test]
    async fn test_http_transport_timeout() {
        let port = start_test_server().await;
        assert_eq!(
            kind(get(port, "/slow", Duration::from_millis(200)).await),
            FailureKind::Timeout
        );
    }

    #[tokio::test]
    async fn test_http_transport_connection_error() {
        // Reserve a port and release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert_eq!(
            kind(get(port, "/ok", Duration::from_secs(5)).await),
            FailureKind::ConnectionError
        );
    }

    #[tokio::test]
    async fn test_http_transport_decode_error_is_permanent() {
        let port = start_test_server().await;
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut configs = test_endpoints();
        for config in configs.iter_mut() {
            config.url = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        }
        let client = DownstreamClient::new(
            Arc::new(HttpTransport::new().unwrap()),
            Endpoints::try_new(&configs).unwrap(),
            RetryPolicy::new(3, Duration::from_secs(1)).with_sleeper(sleeper.clone()),
        );

        let outcome: CallOutcome<FollowStats> = client
            .call(Source::SocialGraph, "/garbage", &[], &BearerToken::new("t"))
            .await;

        assert!(matches!(
            outcome,
            CallOutcome::Failure(ref f) if f.kind == FailureKind::DecodeError
        ));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_call_retries_then_decodes() {
        let transport = Arc::new(MockTransport::default());
        transport.respond_sequence(
            Source::Content,
            "/posts?userId=u1",
            vec![
                CallOutcome::failure(FailureKind::ServerError(500), "boom"),
                json(serde_json::json!({"posts": [{"likes": 2}]})),
            ],
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = DownstreamClient::new(
            transport.clone(),
            Endpoints::try_new(&test_endpoints()).unwrap(),
            RetryPolicy::new(3, Duration::from_secs(1)).with_sleeper(sleeper.clone()),
        );

        let outcome: CallOutcome<PostsPage> = client
            .call(
                Source::Content,
                POSTS_PATH,
                &[("userId", "u1")],
                &BearerToken::new("tok"),
            )
            .await;

        let page = outcome.ok().unwrap();
        assert_eq!(page.posts[0].likes, 2);
        assert_eq!(transport.calls_to(Source::Content), 2);
        assert_eq!(transport.tokens_seen(), vec!["tok", "tok"]);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(2)]);
    }
}
