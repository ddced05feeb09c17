// Asynchronous telemetry sink — the Rust analogue of `pythonmatcher/influx.py`.
//
// The original keeps a process-wide cache of InfluxDB client connections and
// a small `ThreadPoolExecutor` for fire-and-forget writes. No InfluxDB client
// crate is available here, so this sink instead POSTs line-protocol-shaped
// JSON batches to a generic HTTP endpoint via `reqwest`, using the same
// enabled/drop-database/async-write knobs as the original's settings module.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{MarketError, MarketResult};

/// One telemetry point: a named measurement with tags, numeric fields, and
/// a simulated timestamp — matches the `{measurement, tags, fields, time}`
/// shape written by the original.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub time: DateTime<Utc>,
}

impl Sample {
    pub fn new(measurement: &'static str, time: DateTime<Utc>) -> Self {
        Self {
            measurement,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time,
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: f64) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}

struct Inner {
    client: reqwest::Client,
    host: String,
    database: String,
    enabled: bool,
    drop_database: bool,
    write_async: bool,
    dropped_once: AtomicBool,
    async_tx: mpsc::UnboundedSender<Vec<Sample>>,
}

/// Cheaply cloneable handle to the telemetry sink; clones share the same
/// background writer task, mirroring the original's module-level client cache.
#[derive(Clone)]
pub struct TelemetrySink {
    inner: Arc<Inner>,
}

impl TelemetrySink {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::new();
        let (async_tx, mut async_rx) = mpsc::unbounded_channel::<Vec<Sample>>();

        let bg_client = client.clone();
        let bg_host = config.telemetry_host.clone();
        let bg_database = config.telemetry_database.clone();
        tokio::spawn(async move {
            while let Some(points) = async_rx.recv().await {
                if let Err(e) = post_points(&bg_client, &bg_host, &bg_database, &points).await {
                    log::error!("telemetry background write failed: {e}");
                }
            }
        });

        Self {
            inner: Arc::new(Inner {
                client,
                host: config.telemetry_host.clone(),
                database: config.telemetry_database.clone(),
                enabled: config.telemetry_enabled,
                drop_database: config.telemetry_drop_database,
                write_async: config.telemetry_write_async,
                dropped_once: AtomicBool::new(false),
                async_tx,
            }),
        }
    }

    /// Writes a batch of samples. A no-op when telemetry is disabled.
    /// Failures are logged and swallowed — they must never stall or fail
    /// the simulation loop.
    pub async fn write_points(&self, points: Vec<Sample>) {
        if !self.inner.enabled || points.is_empty() {
            return;
        }

        if self.inner.drop_database && !self.inner.dropped_once.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.drop_and_create_database().await {
                log::error!("telemetry drop/create database failed: {e}");
            }
        }

        if self.inner.write_async {
            let n = points.len();
            if self.inner.async_tx.send(points).is_err() {
                log::error!("telemetry background writer is gone; dropped {n} point(s)");
            }
        } else if let Err(e) =
            post_points(&self.inner.client, &self.inner.host, &self.inner.database, &points).await
        {
            log::error!("telemetry write failed: {e}");
        }
    }

    async fn drop_and_create_database(&self) -> MarketResult<()> {
        let url = format!(
            "http://{}/query?q=DROP+DATABASE+{}",
            self.inner.host, self.inner.database
        );
        self.inner
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| MarketError::Telemetry(e.to_string()))?;

        let url = format!(
            "http://{}/query?q=CREATE+DATABASE+{}",
            self.inner.host, self.inner.database
        );
        self.inner
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| MarketError::Telemetry(e.to_string()))?;
        Ok(())
    }
}

async fn post_points(
    client: &reqwest::Client,
    host: &str,
    database: &str,
    points: &[Sample],
) -> MarketResult<()> {
    let url = format!("http://{host}/write?db={database}");
    log::debug!(
        "telemetry batch: {}",
        serde_json::to_string(points).unwrap_or_default()
    );
    client
        .post(&url)
        .json(points)
        .send()
        .await
        .map_err(|e| MarketError::Telemetry(e.to_string()))?;
    Ok(())
}
