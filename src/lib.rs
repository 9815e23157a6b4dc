//! Polling, normalization and per-sensor caching for a telemetry dashboard.
//!
//! The display layer reads [`DashboardFeed::snapshot`] and never sees
//! transport, retries or payload quirks.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod normalize;
pub mod transport;

pub use cache::{FetchState, PollingCache, RetryPolicy, Source};
pub use config::FeedConfig;
pub use domain::{Icon, SensorKind, SensorReading, SensorSeries, SeriesAggregate, SeriesPoint};
pub use error::{FetchError, NormalizationError, TransportError};
pub use feed::{DashboardFeed, FeedOptions, FeedSnapshot};
pub use transport::{HttpTransport, Transport, Window};
