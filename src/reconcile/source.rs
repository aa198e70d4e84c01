use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::reconcile::positions::Position;

/// Where the broker's authoritative positions come from. Implementations
/// do the I/O; the reconciler only ever sees the resulting snapshot.
#[async_trait]
pub trait PositionSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_positions(&self) -> Result<Vec<Position>>;
}

/// Result of asking a [`PositionSource`] with a deadline.
#[derive(Debug, Clone)]
pub enum BrokerSnapshot {
    Available(Vec<Position>),
    Unavailable(String),
}

/// Fetch with a hard deadline so a slow broker never stalls the loop.
pub async fn fetch_with_timeout(source: &dyn PositionSource, limit: Duration) -> BrokerSnapshot {
    let started = std::time::Instant::now();
    let outcome = timeout(limit, source.fetch_positions()).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(Ok(positions)) => {
            log(
                Level::Debug,
                Domain::Recon,
                "broker_fetch",
                obj(&[
                    ("source", v_str(source.name())),
                    ("positions", v_num(positions.len() as f64)),
                    ("elapsed_ms", v_num(elapsed_ms)),
                ]),
            );
            BrokerSnapshot::Available(positions)
        }
        Ok(Err(err)) => {
            let cause = format!("{} fetch failed: {:#}", source.name(), err);
            log(Level::Error, Domain::Recon, "broker_fetch_error", obj(&[("msg", v_str(&cause))]));
            BrokerSnapshot::Unavailable(cause)
        }
        Err(_) => {
            let cause = format!("{} timed out after {}ms", source.name(), limit.as_millis());
            log(Level::Warn, Domain::Recon, "broker_fetch_timeout", obj(&[("msg", v_str(&cause))]));
            BrokerSnapshot::Unavailable(cause)
        }
    }
}

/// Reads a JSON array of positions written by an external broker client.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PositionSource for JsonFileSource {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading broker snapshot {}", self.path.display()))?;
        let positions: Vec<Position> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing broker snapshot {}", self.path.display()))?;
        Ok(positions)
    }
}

/// Fixed snapshot; used when the feed pushes snapshots itself, and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    positions: Vec<Position>,
}

impl StaticSource {
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }
}

#[async_trait]
impl PositionSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.clone())
    }
}
