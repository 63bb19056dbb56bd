pub mod aggregator;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod metrics_defs;
pub mod outcome;
pub mod protocol;
pub mod record;
pub mod retry;
pub mod service;
pub mod types;

#[cfg(test)]
mod testutils;

use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::cache::MemoryCache;
use crate::client::{DownstreamClient, HttpTransport};
use crate::clock::SystemClock;
use crate::endpoints::Endpoints;
use crate::errors::AggregatorError;
use crate::retry::RetryPolicy;
use crate::service::AggregatorService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

pub async fn run(config: config::Config) -> Result<(), AggregatorError> {
    config.validate()?;

    let endpoints = Endpoints::try_new(&config.endpoints)?;
    let client = DownstreamClient::new(
        Arc::new(HttpTransport::new()?),
        endpoints,
        RetryPolicy::from_config(&config.retry),
    );
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(MemoryCache::new(clock.clone(), config.cache.max_entries));
    let settings = AggregatorSettings::new(&config.cache, config.global_page_size)
        .with_max_feed_followees(config.max_feed_followees);
    let aggregator = Aggregator::new(client, cache, clock, settings);

    tracing::info!(
        retries = config.retry.max_retries,
        sources = config.endpoints.len(),
        "Aggregator configured"
    );

    // Ready as soon as the service is built; there is nothing to warm up
    let admin_service = AdminService::new(|| true);

    let aggregator_task = run_http_service::<_, _, AggregatorError>(
        &config.listener.host,
        config.listener.port,
        AggregatorService::new(aggregator),
    );
    let admin_task = run_http_service::<_, _, AggregatorError>(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(aggregator_task, admin_task)?;
    Ok(())
}
