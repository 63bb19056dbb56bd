//! Inbound HTTP surface of the aggregator.
//!
//! Only local validation fails a request. Once a request reaches the
//! aggregator the answer is a 200, however many sources failed.

use crate::aggregator::{Aggregator, DEFAULT_FEED_LIMIT, MAX_FEED_LIMIT};
use crate::errors::{AggregatorError, Result};
use crate::protocol::LIMIT_PARAM;
use crate::types::{BearerToken, SubjectId};
use http::request::Parts;
use hyper::body::Incoming;
use hyper::header::AUTHORIZATION;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use shared::http::{BoxedBody, make_json_error_response, make_json_response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, PartialEq)]
enum Route<'a> {
    Subject(&'a str),
    Global,
    Feed(&'a str),
}

fn match_route(path: &str) -> Option<Route<'_>> {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').skip(1).collect();
    match segments.as_slice() {
        ["aggregate", "global"] => Some(Route::Global),
        ["aggregate", "subject", id] => Some(Route::Subject(id)),
        ["aggregate", "subject", id, "feed"] => Some(Route::Feed(id)),
        _ => None,
    }
}

/// Reads `limit` from the query string. Absent means the default; anything
/// that is not an integer in `1..=MAX_FEED_LIMIT` is rejected.
fn parse_limit(query: Option<&str>) -> Result<usize> {
    let raw = query
        .into_iter()
        .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .find(|(key, _)| key == LIMIT_PARAM)
        .map(|(_, value)| value.into_owned());

    let Some(raw) = raw else {
        return Ok(DEFAULT_FEED_LIMIT);
    };

    match raw.parse::<usize>() {
        Ok(limit) if (1..=MAX_FEED_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(AggregatorError::InvalidLimit(raw)),
    }
}

/// Answers one inbound request.
pub async fn handle<B>(aggregator: &Aggregator, req: Request<B>) -> Response<BoxedBody> {
    let (parts, _body) = req.into_parts();

    match dispatch(aggregator, &parts).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(
                method = %parts.method,
                path = parts.uri.path(),
                error = %e,
                "Rejected request"
            );
            make_json_error_response(e.status_code(), &e.to_string())
        }
    }
}

async fn dispatch(aggregator: &Aggregator, parts: &Parts) -> Result<Response<BoxedBody>> {
    let route = match_route(parts.uri.path()).ok_or(AggregatorError::NoRouteMatched)?;

    if parts.method != Method::GET {
        return Err(AggregatorError::MethodNotAllowed);
    }

    let token = BearerToken::from_authorization(
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )?;

    let response = match route {
        Route::Subject(id) => {
            let subject = SubjectId::parse(id)?;
            render(&aggregator.subject_analytics(&subject, &token).await)
        }
        Route::Global => render(&aggregator.platform_analytics(&token).await),
        Route::Feed(id) => {
            let subject = SubjectId::parse(id)?;
            let limit = parse_limit(parts.uri.query())?;
            render(&aggregator.feed(&subject, limit, &token).await)
        }
    };

    Ok(response)
}

/// Encodes an aggregated record as a 200 response.
///
/// Encoding is not a request error: records are plain structs whose
/// serialization does not fail. Should it ever fail, the caller gets a 500
/// and the failure is logged at `error`.
fn render<T: Serialize>(record: &T) -> Response<BoxedBody> {
    make_json_response(StatusCode::OK, record).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode aggregated record");
        make_json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode response",
        )
    })
}

#[derive(Clone)]
pub struct AggregatorService {
    aggregator: Aggregator,
}

impl AggregatorService {
    pub fn new(aggregator: Aggregator) -> Self {
        AggregatorService { aggregator }
    }
}

impl Service<Request<Incoming>> for AggregatorService {
    type Response = Response<BoxedBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let aggregator = self.aggregator.clone();
        Box::pin(async move { Ok(handle(&aggregator, req).await) })
    }
}
