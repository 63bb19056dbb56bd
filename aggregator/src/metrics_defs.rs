//! Metrics definitions for the aggregator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Aggregations served from the result cache. Tagged with kind.",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Aggregations that missed the result cache. Tagged with kind.",
};

pub const CACHE_ERROR: MetricDef = MetricDef {
    name: "cache.error",
    metric_type: MetricType::Counter,
    description: "Result cache reads or writes that failed and were skipped",
};

pub const DOWNSTREAM_RETRY: MetricDef = MetricDef {
    name: "downstream.retry",
    metric_type: MetricType::Counter,
    description: "Retries of downstream calls. Tagged with source.",
};

pub const DOWNSTREAM_FAILURE: MetricDef = MetricDef {
    name: "downstream.failure",
    metric_type: MetricType::Counter,
    description: "Downstream calls that failed after retries. Tagged with source, kind.",
};

pub const AGGREGATION_DURATION: MetricDef = MetricDef {
    name: "aggregation.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fan out and merge one aggregation in seconds. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_ERROR,
    DOWNSTREAM_RETRY,
    DOWNSTREAM_FAILURE,
    AGGREGATION_DURATION,
];
