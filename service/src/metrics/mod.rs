//! Client usage metrics: ingestion, retention and the dashboard API.

pub mod handlers;
pub mod session;
pub mod store;

pub use handlers::DashboardUser;
pub use store::{MetricEvent, MetricsOverview, MetricsStore, MetricsStoreError};
