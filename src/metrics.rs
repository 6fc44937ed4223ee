//! Metric value types shared by the aggregator, the rollup and the outer
//! surfaces. Field names serialize in camelCase to match the dashboard.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count per key. Ordered so serialized output is deterministic; consumers
/// sort by count themselves.
pub type Histogram = BTreeMap<String, u64>;

pub fn bump(histogram: &mut Histogram, key: &str) {
    *histogram.entry(key.to_string()).or_insert(0) += 1;
}

pub fn merge_into(dst: &mut Histogram, src: &Histogram) {
    for (key, count) in src {
        *dst.entry(key.clone()).or_insert(0) += count;
    }
}

/// Entries ordered by count descending, key ascending on ties.
pub fn by_count(histogram: &Histogram) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = histogram.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    entries
}

/// Key for a tool-chain edge.
pub fn chain_key(from: &str, to: &str) -> String {
    format!("{from}→{to}")
}

/// One correlated agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub duration_ms: u64,
    pub aborted: bool,
    /// Timestamp of the completion line.
    pub time: Option<String>,
    pub model: String,
    pub provider: String,
    pub channel: String,
    pub thinking: String,
    /// Tool invocations in the order they started.
    pub tools: Vec<String>,
    pub estimated_tokens: u64,
    pub compactions: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub total: u64,
    pub by_type: Histogram,
}

impl ErrorSummary {
    pub fn record(&mut self, kind: &str) {
        self.total += 1;
        bump(&mut self.by_type, kind);
    }

    pub fn merge(&mut self, other: &ErrorSummary) {
        self.total += other.total;
        merge_into(&mut self.by_type, &other.by_type);
    }
}

/// Everything derived from one log file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayMetrics {
    pub runs: Vec<Run>,
    pub tools: Histogram,
    pub tool_chains: Histogram,
    pub shell_commands: Histogram,
    pub models: Histogram,
    pub providers: Histogram,
    pub channels: Histogram,
    pub thinking_modes: Histogram,
    pub thinking_avg_durations: BTreeMap<String, f64>,
    pub session_count: u64,
    pub total_runs: u64,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
    pub min_duration_ms: u64,
    pub aborted_runs: u64,
    pub compaction_count: u64,
    pub total_estimated_tokens: u64,
    pub avg_estimated_tokens: f64,
    pub heavy_sessions: u64,
    pub runs_with_compaction: u64,
    pub errors: ErrorSummary,
}

impl DayMetrics {
    /// Fold another file of the same day and source into this one. Session
    /// counts add, so a session split across rotated files counts twice.
    pub fn absorb(&mut self, other: DayMetrics) {
        merge_into(&mut self.tools, &other.tools);
        merge_into(&mut self.tool_chains, &other.tool_chains);
        merge_into(&mut self.shell_commands, &other.shell_commands);
        merge_into(&mut self.models, &other.models);
        merge_into(&mut self.providers, &other.providers);
        merge_into(&mut self.channels, &other.channels);
        merge_into(&mut self.thinking_modes, &other.thinking_modes);
        self.errors.merge(&other.errors);

        self.session_count = self.session_count.saturating_add(other.session_count);
        self.total_runs = self.total_runs.saturating_add(other.total_runs);
        self.total_duration_ms = self.total_duration_ms.saturating_add(other.total_duration_ms);
        self.aborted_runs = self.aborted_runs.saturating_add(other.aborted_runs);
        self.compaction_count = self.compaction_count.saturating_add(other.compaction_count);
        self.total_estimated_tokens = self
            .total_estimated_tokens
            .saturating_add(other.total_estimated_tokens);
        self.heavy_sessions = self.heavy_sessions.saturating_add(other.heavy_sessions);
        self.runs_with_compaction = self
            .runs_with_compaction
            .saturating_add(other.runs_with_compaction);
        self.runs.extend(other.runs);

        self.avg_duration_ms = mean(self.total_duration_ms, self.total_runs);
        self.avg_estimated_tokens = mean(self.total_estimated_tokens, self.total_runs);
        self.max_duration_ms = self.runs.iter().map(|r| r.duration_ms).max().unwrap_or(0);
        self.min_duration_ms = self.runs.iter().map(|r| r.duration_ms).min().unwrap_or(0);
        self.thinking_avg_durations = thinking_avg_durations(&self.runs);
    }
}

/// Rollup over a window of days. Rebuilt on every aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub generated_at: Option<String>,
    pub window_days: u32,
    pub total_runs: u64,
    pub total_duration_ms: u64,
    /// Sum of per-day distinct session counts; a session active on two days
    /// counts twice.
    pub total_sessions: u64,
    pub aborted_runs: u64,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
    pub max_duration_ms: u64,
    pub tools: Histogram,
    pub tool_chains: Histogram,
    pub shell_commands: Histogram,
    pub models: Histogram,
    pub providers: Histogram,
    pub channels: Histogram,
    pub thinking_modes: Histogram,
    pub thinking_avg_durations: BTreeMap<String, f64>,
    pub compaction_count: u64,
    pub total_estimated_tokens: u64,
    pub avg_estimated_tokens: f64,
    pub heavy_sessions: u64,
    pub runs_with_compaction: u64,
    pub errors: ErrorSummary,
    pub daily_metrics: BTreeMap<String, DayMetrics>,
}

/// Mean duration per thinking mode. Averages do not merge, so callers
/// recompute this from the runs at every level.
pub fn thinking_avg_durations<'a>(runs: impl IntoIterator<Item = &'a Run>) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for run in runs {
        let entry = sums.entry(run.thinking.as_str()).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(run.duration_ms);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(mode, (total, count))| (mode.to_string(), total as f64 / count as f64))
        .collect()
}

/// p50, p95 and max of a duration set using nearest-rank on the sorted
/// values. An empty set yields zeros.
pub fn percentiles(mut durations: Vec<u64>) -> (u64, u64, u64) {
    if durations.is_empty() {
        return (0, 0, 0);
    }
    durations.sort_unstable();
    let n = durations.len();
    let at = |q: f64| durations[((n as f64 * q).floor() as usize).min(n - 1)];
    (at(0.5), at(0.95), durations[n - 1])
}

pub fn mean(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}
