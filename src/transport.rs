//! ==============================================================================
//! transport.rs - GET <base>/<endpoint>/<hours> -> json
//! ==============================================================================
//!
//! purpose:
//!     the seam between the polling core and the network. the core only ever
//!     needs `get(path) -> json | TransportError`; `fetch_current` and
//!     `fetch_log` build the path for a sensor and window.
//!
//! relationships:
//!     - used by: feed.rs (ReadingSource / SeriesSource)
//!     - implemented by: HttpTransport (reqwest), test doubles in tests/
//!
//! ==============================================================================

use crate::domain::SensorKind;
use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Which slice of a sensor's data to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// most recent single value (sent as hours = 0)
    Latest,
    /// series covering this many hours
    Hours(NonZeroU32),
}

impl Window {
    pub fn hours(&self) -> u32 {
        match self {
            Window::Latest => 0,
            Window::Hours(h) => h.get(),
        }
    }

    pub fn path(&self, kind: SensorKind) -> String {
        format!("{}/{}", kind.endpoint(), self.hours())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path` relative to the configured base and parse the body as json
    async fn get(&self, path: &str) -> Result<Value, TransportError>;

    async fn fetch_current(&self, kind: SensorKind) -> Result<Value, TransportError> {
        self.get(&Window::Latest.path(kind)).await
    }

    async fn fetch_log(
        &self,
        kind: SensorKind,
        window_hours: NonZeroU32,
    ) -> Result<Value, TransportError> {
        self.get(&Window::Hours(window_hours).path(kind)).await
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sensor-feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn get(&self, path: &str) -> Result<Value, TransportError> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_fetch_paths_use_hours_segment() {
        let t = Recorder {
            paths: Mutex::new(Vec::new()),
        };
        t.fetch_current(SensorKind::Temperature).await.unwrap();
        t.fetch_log(SensorKind::Humidity, NonZeroU32::new(6).unwrap())
            .await
            .unwrap();
        t.fetch_current(SensorKind::DiskUsage).await.unwrap();

        assert_eq!(
            *t.paths.lock().unwrap(),
            vec![
                "sensors/tempsensor/0".to_string(),
                "sensors/humiditysensor/6".to_string(),
                "system/fileusage/0".to_string(),
            ]
        );
    }

    #[test]
    fn test_http_transport_joins_url() {
        let t = HttpTransport::new("http://localhost:8000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(t.url("api-root"), "http://localhost:8000/api/api-root");
        assert_eq!(
            t.url("/sensors/tempsensor/0"),
            "http://localhost:8000/api/sensors/tempsensor/0"
        );
        assert_eq!(
            t.url(&Window::Latest.path(SensorKind::CpuTemperature)),
            "http://localhost:8000/api/system/cputemperature/0"
        );
    }

    #[tokio::test]
    async fn test_http_transport_unreachable_is_network_error() {
        // port 9 (discard) on localhost is closed on any sane test box
        let t = HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = t.fetch_current(SensorKind::Temperature).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)), "{:?}", err);
    }
}
