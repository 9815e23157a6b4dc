//! ==============================================================================
//! feed.rs - dashboard feed: one polling cache per sensor
//! ==============================================================================
//!
//! purpose:
//!     owns a `PollingCache<SensorReading>` for every current-value sensor
//!     and, when charts are enabled, a `PollingCache<SeriesAggregate>` for
//!     every loggable metric. refreshes each of them once on start and then
//!     only when asked to.
//!
//! shared state:
//!     the log caches share one `SeriesAggregate`. each merge replaces a
//!     single key under the lock, so two log fetches finishing in either
//!     order leave the same aggregate behind.
//!
//! ==============================================================================

use crate::cache::{FetchState, PollingCache, RetryPolicy, Source};
use crate::domain::{SensorKind, SensorReading, SeriesAggregate};
use crate::error::FetchError;
use crate::normalize::{normalize_reading, normalize_series};
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// latest value of one sensor
pub struct ReadingSource {
    transport: Arc<dyn Transport>,
    kind: SensorKind,
}

impl ReadingSource {
    pub fn new(transport: Arc<dyn Transport>, kind: SensorKind) -> Self {
        Self { transport, kind }
    }
}

#[async_trait]
impl Source<SensorReading> for ReadingSource {
    async fn fetch(&self) -> Result<SensorReading, FetchError> {
        let raw = self.transport.fetch_current(self.kind).await?;
        Ok(normalize_reading(&raw)?)
    }
}

/// Historical series of one sensor, merged into the shared aggregate.
pub struct SeriesSource {
    transport: Arc<dyn Transport>,
    kind: SensorKind,
    window_hours: NonZeroU32,
    aggregate: Arc<Mutex<SeriesAggregate>>,
}

impl SeriesSource {
    pub fn new(
        transport: Arc<dyn Transport>,
        kind: SensorKind,
        window_hours: NonZeroU32,
        aggregate: Arc<Mutex<SeriesAggregate>>,
    ) -> Self {
        Self {
            transport,
            kind,
            window_hours,
            aggregate,
        }
    }
}

#[async_trait]
impl Source<SeriesAggregate> for SeriesSource {
    async fn fetch(&self) -> Result<SeriesAggregate, FetchError> {
        let raw = self.transport.fetch_log(self.kind, self.window_hours).await?;
        let series = normalize_series(&raw)?;
        debug!(
            sensor = %self.kind,
            series = %series.name,
            points = series.points.len(),
            "merging series"
        );

        let mut aggregate = self.aggregate.lock().unwrap_or_else(PoisonError::into_inner);
        aggregate.merge(series);
        Ok(aggregate.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub retry: RetryPolicy,
    /// `None` disables the historical chart caches
    pub log_window: Option<NonZeroU32>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            log_window: NonZeroU32::new(1),
        }
    }
}

/// Read-only view handed to the display layer.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub readings: BTreeMap<SensorKind, FetchState<SensorReading>>,
    /// last good reading per sensor, even while loading or failed
    pub last_readings: BTreeMap<SensorKind, SensorReading>,
    pub logs: BTreeMap<SensorKind, FetchState<SeriesAggregate>>,
    /// everything merged so far, for the chart
    pub chart: SeriesAggregate,
    pub taken_at: DateTime<Utc>,
}

pub struct DashboardFeed {
    readings: BTreeMap<SensorKind, PollingCache<SensorReading>>,
    logs: BTreeMap<SensorKind, PollingCache<SeriesAggregate>>,
    aggregate: Arc<Mutex<SeriesAggregate>>,
}

impl DashboardFeed {
    /// Build every cache and refresh each one exactly once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, options: &FeedOptions) -> Self {
        let aggregate = Arc::new(Mutex::new(SeriesAggregate::new()));

        let readings: BTreeMap<SensorKind, PollingCache<SensorReading>> = SensorKind::ALL
            .into_iter()
            .map(|kind| {
                let source: Arc<dyn Source<SensorReading>> =
                    Arc::new(ReadingSource::new(Arc::clone(&transport), kind));
                (kind, PollingCache::new(kind.as_str(), source, options.retry))
            })
            .collect();

        let logs: BTreeMap<SensorKind, PollingCache<SeriesAggregate>> = match options.log_window
        {
            Some(window) => SensorKind::ALL
                .into_iter()
                .filter(SensorKind::is_loggable)
                .map(|kind| {
                    let source: Arc<dyn Source<SeriesAggregate>> = Arc::new(SeriesSource::new(
                        Arc::clone(&transport),
                        kind,
                        window,
                        Arc::clone(&aggregate),
                    ));
                    let label = format!("{}_log", kind);
                    (kind, PollingCache::new(label, source, options.retry))
                })
                .collect(),
            None => BTreeMap::new(),
        };

        let feed = Self {
            readings,
            logs,
            aggregate,
        };
        let started = feed.refresh_all();
        info!(caches = started, "dashboard feed started");
        feed
    }

    /// Refresh the current value (and log, if any) of one sensor.
    /// Returns how many fetches were actually started.
    pub fn refresh(&self, kind: SensorKind) -> usize {
        let reading = self.readings.get(&kind).and_then(|c| c.refresh());
        let log = self.logs.get(&kind).and_then(|c| c.refresh());
        usize::from(reading.is_some()) + usize::from(log.is_some())
    }

    pub fn refresh_all(&self) -> usize {
        let readings = self.readings.values().filter_map(|c| c.refresh()).count();
        let logs = self.logs.values().filter_map(|c| c.refresh()).count();
        readings + logs
    }

    pub fn reading(&self, kind: SensorKind) -> Option<FetchState<SensorReading>> {
        self.readings.get(&kind).map(PollingCache::current_value)
    }

    pub fn log(&self, kind: SensorKind) -> Option<FetchState<SeriesAggregate>> {
        self.logs.get(&kind).map(PollingCache::current_value)
    }

    pub fn has_logs(&self) -> bool {
        !self.logs.is_empty()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let chart = self
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        FeedSnapshot {
            readings: self
                .readings
                .iter()
                .map(|(kind, cache)| (*kind, cache.current_value()))
                .collect(),
            last_readings: self
                .readings
                .iter()
                .filter_map(|(kind, cache)| cache.last_value().map(|r| (*kind, r)))
                .collect(),
            logs: self
                .logs
                .iter()
                .map(|(kind, cache)| (*kind, cache.current_value()))
                .collect(),
            chart,
            taken_at: Utc::now(),
        }
    }

    /// Wait for every in-flight fetch to settle, then snapshot.
    pub async fn settled(&self) -> FeedSnapshot {
        for cache in self.readings.values() {
            cache.settled().await;
        }
        for cache in self.logs.values() {
            cache.settled().await;
        }
        self.snapshot()
    }
}
