//! Aggregation pass: enumerate, aggregate each file on a bounded blocking
//! pool, then merge and roll up once every file has finished.

use crate::aggregate::aggregate_file;
use crate::config::{ClawtricsConfig, ConfigError};
use crate::metrics::{DayMetrics, MetricsSnapshot};
use crate::rollup;
use crate::source::{self, LogFileRef};
use crate::tokens::TokenTable;
use crate::watch::ChangeDetector;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Owns the configuration a pass needs. Cheap to clone; passes share nothing
/// mutable.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    config: Arc<ClawtricsConfig>,
    tokens: Arc<TokenTable>,
}

impl MetricsEngine {
    pub fn new(config: ClawtricsConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let tokens = TokenTable::from_config(&config.estimation);
        Ok(Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
        })
    }

    pub fn config(&self) -> &ClawtricsConfig {
        &self.config
    }

    /// Files a pass over `window_days` would read.
    pub fn log_files(&self, window_days: u32) -> Vec<LogFileRef> {
        source::enumerate(&self.config.sources, window_days, self.config.extension())
    }

    /// A detector over the same roots this engine reads.
    pub fn change_detector(&self) -> ChangeDetector {
        ChangeDetector::new(self.config.sources.clone(), self.config.extension())
    }

    /// Run the full pipeline for the most recent `window_days` days.
    ///
    /// Dropping the returned future aborts queued files; files already being
    /// read finish on their worker and their results are discarded.
    pub async fn snapshot(&self, window_days: u32) -> Result<MetricsSnapshot, EngineError> {
        if window_days == 0 {
            return Err(EngineError::InvalidWindow(window_days));
        }

        let started = std::time::Instant::now();
        let files = self.log_files(window_days);
        let file_count = files.len();
        let results = self.aggregate_all(files).await?;

        let days = rollup::window(rollup::merge_sources(results), window_days);
        let mut snapshot = rollup::rollup(&days);
        snapshot.window_days = window_days;
        snapshot.generated_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        tracing::info!(
            files = file_count,
            days = snapshot.daily_metrics.len(),
            runs = snapshot.total_runs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregation pass complete"
        );
        Ok(snapshot)
    }

    /// Aggregate every file, returning results in the input order.
    async fn aggregate_all(
        &self,
        files: Vec<LogFileRef>,
    ) -> Result<Vec<(LogFileRef, DayMetrics)>, EngineError> {
        let permits = Arc::new(Semaphore::new(self.config.ingest.workers));
        let mut tasks = JoinSet::new();
        let total = files.len();

        for (idx, file) in files.into_iter().enumerate() {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::PoolClosed)?;
            let tokens = Arc::clone(&self.tokens);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let day = aggregate_file(&file.path, &tokens);
                (idx, file, day)
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.map_err(EngineError::Join)?);
        }
        results.sort_by_key(|(idx, _, _)| *idx);
        Ok(results
            .into_iter()
            .map(|(_, file, day)| (file, day))
            .collect())
    }
}

/// Last snapshot plus the fingerprint it was computed at. Reruns the pipeline
/// only when the logs changed or a different window is requested.
#[derive(Debug)]
pub struct SnapshotCache {
    detector: ChangeDetector,
    window_days: Option<u32>,
    snapshot: Option<Arc<MetricsSnapshot>>,
}

impl SnapshotCache {
    pub fn new(engine: &MetricsEngine) -> Self {
        Self {
            detector: engine.change_detector(),
            window_days: None,
            snapshot: None,
        }
    }

    /// The current snapshot and whether it was freshly computed.
    pub async fn get(
        &mut self,
        engine: &MetricsEngine,
        window_days: u32,
    ) -> Result<(Arc<MetricsSnapshot>, bool), EngineError> {
        let advanced = self.detector.advanced();
        if advanced.is_none() && self.window_days == Some(window_days) {
            if let Some(snapshot) = &self.snapshot {
                return Ok((Arc::clone(snapshot), false));
            }
        }

        // The fingerprint is committed only once a pass succeeds, so a failed
        // pass leaves the change pending for the next call.
        let snapshot = Arc::new(engine.snapshot(window_days).await?);
        if let Some(seen) = advanced {
            self.detector.commit(seen);
        }
        self.window_days = Some(window_days);
        self.snapshot = Some(Arc::clone(&snapshot));
        Ok((snapshot, true))
    }
}

/// Failures with no degraded path, surfaced to the caller.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    InvalidWindow(u32),
    /// A worker panicked or was cancelled.
    Join(tokio::task::JoinError),
    PoolClosed,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "{e}"),
            EngineError::InvalidWindow(days) => {
                write!(f, "window must cover at least one day, got {days}")
            }
            EngineError::Join(e) => write!(f, "aggregation worker failed: {e}"),
            EngineError::PoolClosed => write!(f, "aggregation worker pool closed"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::Join(e) => Some(e),
            EngineError::InvalidWindow(_) | EngineError::PoolClosed => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}
