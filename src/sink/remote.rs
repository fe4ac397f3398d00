//! HTTP client for the remote event store and schedule service.
//!
//! The store is a small JSON service in front of the central database:
//! bearer-token `POST /v1/events` for event upserts (keyed by point id +
//! start timestamp), `GET /v1/points/{id}/schedule` for the work window,
//! `GET /health` for connectivity probes.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::schedule::{ScheduleProvider, WorkSchedule};
use crate::sink::{RemoteAck, RemoteStore, RemoteStoreError};

/// Connect timeout. A dead remote must not stall a sampling loop for
/// longer than this.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Overall request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Remote service endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Service host.
    pub host: String,
    /// Service port.
    pub port: u16,
    /// Bearer authentication token.
    pub token: String,
}

impl RemoteConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
        }
    }

    /// Get the base service URL.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the event upsert endpoint URL.
    pub fn events_url(&self) -> String {
        format!("{}/v1/events", self.url())
    }

    /// Get the schedule endpoint URL for a trading point.
    pub fn schedule_url(&self, point_id: i64) -> String {
        format!("{}/v1/points/{}/schedule", self.url(), point_id)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.url())
    }
}

/// Event payload posted to the store.
#[derive(Debug, Clone, Serialize)]
struct EventEnvelope<'a> {
    event: &'a Event,
    device_id: &'a str,
    timezone: String,
    meta: EnvelopeMeta,
}

/// Payload metadata.
#[derive(Debug, Clone, Serialize)]
struct EnvelopeMeta {
    source: &'static str,
    version: &'static str,
}

/// Acknowledgement body returned by the store.
#[derive(Debug, Clone, Deserialize)]
struct AckBody {
    timestamp: Option<String>,
}

/// Async client for the remote service.
pub struct RemoteClient {
    config: RemoteConfig,
    client: reqwest::Client,
    point_id: i64,
    device_id: String,
}

impl RemoteClient {
    /// Create a new remote client for one trading point.
    pub fn new(config: RemoteConfig, point_id: i64) -> Result<Self, RemoteStoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RemoteStoreError::Unreachable(format!("client build failed: {e}")))?;

        // Device ID from hostname + instance suffix, stable for the process.
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let device_id = format!(
            "point{}-{}-{}",
            point_id,
            hostname,
            &uuid::Uuid::new_v4().to_string()[..8]
        );

        Ok(Self {
            config,
            client,
            point_id,
            device_id,
        })
    }

    /// Test connection to the service.
    pub async fn test_connection(&self) -> Result<bool, RemoteStoreError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| RemoteStoreError::Unreachable(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Upsert one event.
    pub async fn write_event(&self, event: &Event) -> Result<RemoteAck, RemoteStoreError> {
        let envelope = EventEnvelope {
            event,
            device_id: &self.device_id,
            timezone: chrono_tz::Tz::UTC.to_string(),
            meta: EnvelopeMeta {
                source: "storewatch",
                version: env!("CARGO_PKG_VERSION"),
            },
        };

        let response = self
            .client
            .post(self.config.events_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| RemoteStoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteStoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        // The write is committed at this point; a malformed ack body is
        // not a reason to re-deliver.
        let ack = response
            .json::<AckBody>()
            .await
            .map(|body| RemoteAck {
                timestamp: body.timestamp,
            })
            .unwrap_or_default();

        Ok(ack)
    }

    /// Fetch the work schedule for this client's trading point.
    pub async fn fetch_schedule(&self) -> Result<WorkSchedule, RemoteStoreError> {
        let response = self
            .client
            .get(self.config.schedule_url(self.point_id))
            .header("Authorization", format!("Bearer {}", self.config.token))
            .send()
            .await
            .map_err(|e| RemoteStoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteStoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<WorkSchedule>()
            .await
            .map_err(|e| RemoteStoreError::Rejected {
                status: status.as_u16(),
                message: format!("invalid schedule body: {e}"),
            })
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Blocking client for use from agent threads.
pub struct BlockingRemoteClient {
    inner: RemoteClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingRemoteClient {
    /// Create a new blocking remote client.
    pub fn new(config: RemoteConfig, point_id: i64) -> Result<Self, RemoteStoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                RemoteStoreError::Unreachable(format!("failed to create runtime: {e}"))
            })?;

        Ok(Self {
            inner: RemoteClient::new(config, point_id)?,
            runtime,
        })
    }

    /// Test connection to the service.
    pub fn test_connection(&self) -> Result<bool, RemoteStoreError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        self.inner.device_id()
    }
}

impl RemoteStore for BlockingRemoteClient {
    fn write(&self, event: &Event) -> Result<RemoteAck, RemoteStoreError> {
        self.runtime.block_on(self.inner.write_event(event))
    }
}

impl ScheduleProvider for BlockingRemoteClient {
    fn fetch(&self) -> Result<WorkSchedule, RemoteStoreError> {
        self.runtime.block_on(self.inner.fetch_schedule())
    }
}
