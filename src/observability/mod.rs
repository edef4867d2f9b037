// Observability: Prometheus metrics and the Pushgateway push

pub mod metrics;

pub use metrics::{init, init_with_push_options, push_all_metrics, render, MetricName};
