// Observability: metrics recorded by every pipeline stage

pub mod metrics;

pub use metrics::{init, MetricName};
