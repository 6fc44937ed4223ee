//! Rollup: merge per-day metrics into one window-level [`MetricsSnapshot`].

use crate::metrics::{
    mean, merge_into, percentiles, thinking_avg_durations, DayMetrics, MetricsSnapshot,
};
use crate::source::LogFileRef;
use std::collections::BTreeMap;

/// Collapse per-file results into one entry per date.
///
/// `files` must be in enumeration order (preferred source first within a
/// date). The first file seen for a date picks that day's primary source.
/// Further files from the primary source (rotated logs) merge in fully;
/// files from any other source only contribute their shell-command counts.
pub fn merge_sources(files: Vec<(LogFileRef, DayMetrics)>) -> BTreeMap<String, DayMetrics> {
    let mut days: BTreeMap<String, (String, DayMetrics)> = BTreeMap::new();
    for (file, metrics) in files {
        match days.get_mut(&file.date_key) {
            Some((primary_tag, primary)) if *primary_tag == file.tag => {
                tracing::debug!(
                    date = %file.date_key,
                    path = %file.path.display(),
                    "additional file from primary source"
                );
                primary.absorb(metrics);
            }
            Some((_, primary)) => {
                tracing::debug!(
                    date = %file.date_key,
                    source = %file.tag,
                    "secondary source for date, merging shell commands only"
                );
                merge_into(&mut primary.shell_commands, &metrics.shell_commands);
            }
            None => {
                days.insert(file.date_key, (file.tag, metrics));
            }
        }
    }
    days.into_iter().map(|(date, (_, day))| (date, day)).collect()
}

/// Keep the most recent `window_days` dates.
pub fn window(
    mut days: BTreeMap<String, DayMetrics>,
    window_days: u32,
) -> BTreeMap<String, DayMetrics> {
    let excess = days.len().saturating_sub(window_days as usize);
    let oldest: Vec<String> = days.keys().take(excess).cloned().collect();
    for key in oldest {
        days.remove(&key);
    }
    days
}

/// Merge every day in `days` into one snapshot. Sums and histogram merges
/// do not depend on the order days are visited.
pub fn rollup(days: &BTreeMap<String, DayMetrics>) -> MetricsSnapshot {
    let mut snap = MetricsSnapshot::default();
    let mut durations: Vec<u64> = Vec::new();

    for day in days.values() {
        snap.total_runs = snap.total_runs.saturating_add(day.total_runs);
        snap.total_duration_ms = snap.total_duration_ms.saturating_add(day.total_duration_ms);
        snap.total_sessions = snap.total_sessions.saturating_add(day.session_count);
        snap.aborted_runs = snap.aborted_runs.saturating_add(day.aborted_runs);
        snap.compaction_count = snap.compaction_count.saturating_add(day.compaction_count);
        snap.total_estimated_tokens = snap
            .total_estimated_tokens
            .saturating_add(day.total_estimated_tokens);
        snap.heavy_sessions = snap.heavy_sessions.saturating_add(day.heavy_sessions);
        snap.runs_with_compaction = snap
            .runs_with_compaction
            .saturating_add(day.runs_with_compaction);
        snap.errors.merge(&day.errors);

        merge_into(&mut snap.tools, &day.tools);
        merge_into(&mut snap.tool_chains, &day.tool_chains);
        merge_into(&mut snap.shell_commands, &day.shell_commands);
        merge_into(&mut snap.models, &day.models);
        merge_into(&mut snap.providers, &day.providers);
        merge_into(&mut snap.channels, &day.channels);
        merge_into(&mut snap.thinking_modes, &day.thinking_modes);

        durations.extend(day.runs.iter().map(|r| r.duration_ms));
    }

    let (p50, p95, max) = percentiles(durations);
    snap.p50_duration_ms = p50;
    snap.p95_duration_ms = p95;
    snap.max_duration_ms = max;
    snap.avg_duration_ms = mean(snap.total_duration_ms, snap.total_runs);
    snap.avg_estimated_tokens = mean(snap.total_estimated_tokens, snap.total_runs);
    snap.thinking_avg_durations = thinking_avg_durations(days.values().flat_map(|d| &d.runs));
    snap.daily_metrics = days.clone();
    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_lines;
    use crate::config::SourceKind;
    use crate::tokens::TokenTable;
    use std::path::PathBuf;

    fn line(message: &str) -> String {
        serde_json::json!({"1": message, "time": "2025-01-01T00:00:00Z"}).to_string()
    }

    fn exec_line(command: &str) -> String {
        serde_json::json!({
            "0": "{\"subsystem\":\"exec\"}",
            "1": format!("elevated command {command}")
        })
        .to_string()
    }

    fn day(messages: &[&str]) -> DayMetrics {
        let lines: Vec<String> = messages.iter().map(|m| line(m)).collect();
        aggregate_lines(&lines, &TokenTable::builtin())
    }

    fn file(date: &str, tag: &str, kind: SourceKind) -> LogFileRef {
        LogFileRef {
            path: PathBuf::from(format!("/logs/{tag}/{tag}-{date}.log")),
            date_key: date.to_string(),
            tag: tag.to_string(),
            kind,
        }
    }

    fn sample_days() -> BTreeMap<String, DayMetrics> {
        BTreeMap::from([
            (
                "2025-01-01".to_string(),
                day(&[
                    "embedded run start: runId=a sessionId=s1 model=opus thinking=high",
                    "embedded run tool start: runId=a tool=read",
                    "embedded run tool start: runId=a tool=exec",
                    "embedded run done: runId=a sessionId=s1 durationMs=1000",
                    "embedded run done: runId=b sessionId=s2 durationMs=3000 aborted=true",
                ]),
            ),
            (
                "2025-01-02".to_string(),
                day(&[
                    "embedded run start: runId=c sessionId=s1 model=sonnet",
                    "embedded run tool start: runId=c tool=read",
                    "embedded run tool start: runId=c tool=exec",
                    "embedded run compaction start: runId=c sessionId=s1",
                    "embedded run done: runId=c sessionId=s1 durationMs=2000",
                ]),
            ),
        ])
    }

    #[test]
    fn empty_window_is_all_zero() {
        let snap = rollup(&BTreeMap::new());
        assert_eq!(snap.total_runs, 0);
        assert_eq!(snap.p50_duration_ms, 0);
        assert_eq!(snap.p95_duration_ms, 0);
        assert_eq!(snap.max_duration_ms, 0);
        assert_eq!(snap.avg_duration_ms, 0.0);
        assert_eq!(snap.avg_estimated_tokens, 0.0);
        assert!(snap.daily_metrics.is_empty());
    }

    #[test]
    fn sums_and_merges_across_days() {
        let snap = rollup(&sample_days());
        assert_eq!(snap.total_runs, 3);
        assert_eq!(snap.total_duration_ms, 6000);
        // s1 appears on both days and is counted twice
        assert_eq!(snap.total_sessions, 3);
        assert_eq!(snap.aborted_runs, 1);
        assert_eq!(snap.compaction_count, 1);
        assert_eq!(snap.runs_with_compaction, 1);
        assert_eq!(snap.tools.get("read"), Some(&2));
        assert_eq!(snap.tool_chains.get("read→exec"), Some(&2));
        assert_eq!(snap.models.get("opus"), Some(&1));
        assert_eq!(snap.models.get("sonnet"), Some(&1));
        assert_eq!(snap.avg_duration_ms, 2000.0);
        assert_eq!(snap.p50_duration_ms, 2000);
        assert_eq!(snap.p95_duration_ms, 3000);
        assert_eq!(snap.max_duration_ms, 3000);
        assert_eq!(snap.total_estimated_tokens, 2 * (2000 + 1500));
        assert_eq!(snap.daily_metrics.len(), 2);
    }

    #[test]
    fn thinking_averages_are_recomputed_over_window() {
        let snap = rollup(&sample_days());
        assert_eq!(snap.thinking_avg_durations.get("high"), Some(&1000.0));
        // b (3000) and c (2000) default to off across two days
        assert_eq!(snap.thinking_avg_durations.get("off"), Some(&2500.0));
        assert_eq!(snap.thinking_modes.get("off"), Some(&2));
    }

    #[test]
    fn rollup_is_order_independent() {
        let days = sample_days();
        let forward = rollup(&days);

        // Merge the same days as two windows in both orders
        let mut first_half = BTreeMap::new();
        let mut second_half = BTreeMap::new();
        for (i, (k, v)) in days.iter().enumerate() {
            if i == 0 {
                first_half.insert(k.clone(), v.clone());
            } else {
                second_half.insert(k.clone(), v.clone());
            }
        }
        let mut ab = first_half.clone();
        ab.extend(second_half.clone());
        let mut ba = second_half;
        ba.extend(first_half);

        assert_eq!(rollup(&ab), forward);
        assert_eq!(rollup(&ba), forward);
    }

    #[test]
    fn totals_saturate_across_days() {
        let done = format!("embedded run done: runId=a durationMs={}", u64::MAX);
        let huge = |d: &str| (d.to_string(), day(&[done.as_str()]));
        let days = BTreeMap::from([huge("2025-01-01"), huge("2025-01-02")]);
        let snap = rollup(&days);
        assert_eq!(snap.total_runs, 2);
        assert_eq!(snap.total_duration_ms, u64::MAX);
        assert_eq!(snap.max_duration_ms, u64::MAX);
    }

    #[test]
    fn secondary_source_contributes_only_shell_commands() {
        let primary = aggregate_lines(
            [
                line("embedded run done: runId=a durationMs=10"),
                exec_line("git status"),
            ],
            &TokenTable::builtin(),
        );
        let secondary = aggregate_lines(
            [
                line("embedded run done: runId=z durationMs=99999"),
                exec_line("git log"),
                exec_line("docker ps"),
            ],
            &TokenTable::builtin(),
        );

        let days = merge_sources(vec![
            (file("2025-01-01", "openclaw", SourceKind::Enriched), primary),
            (file("2025-01-01", "clawdbot", SourceKind::Legacy), secondary),
        ]);
        assert_eq!(days.len(), 1);
        let d = &days["2025-01-01"];
        assert_eq!(d.total_runs, 1);
        assert_eq!(d.max_duration_ms, 10);
        assert_eq!(d.shell_commands.get("git"), Some(&2));
        assert_eq!(d.shell_commands.get("docker"), Some(&1));
    }

    #[test]
    fn rotated_files_of_primary_source_merge_fully() {
        let first = day(&[
            "embedded run start: runId=a sessionId=s1 model=opus",
            "embedded run done: runId=a sessionId=s1 durationMs=1000",
        ]);
        let rotated = day(&["embedded run done: runId=b sessionId=s2 durationMs=3000"]);
        let legacy = day(&["embedded run done: runId=z durationMs=99999"]);

        let mut rotated_ref = file("2025-01-01", "openclaw", SourceKind::Enriched);
        rotated_ref.path = PathBuf::from("/logs/openclaw/openclaw-2025-01-01.1.log");
        let days = merge_sources(vec![
            (file("2025-01-01", "openclaw", SourceKind::Enriched), first),
            (rotated_ref, rotated),
            (file("2025-01-01", "clawdbot", SourceKind::Legacy), legacy),
        ]);

        let d = &days["2025-01-01"];
        assert_eq!(d.total_runs, 2);
        assert_eq!(d.total_duration_ms, 4000);
        assert_eq!(d.max_duration_ms, 3000);
        assert_eq!(d.min_duration_ms, 1000);
        assert_eq!(d.avg_duration_ms, 2000.0);
        assert_eq!(d.session_count, 2);
        assert_eq!(d.models.get("opus"), Some(&1));
        assert_eq!(d.models.get("unknown"), Some(&1));
        assert_eq!(d.runs.len(), 2);
    }

    #[test]
    fn distinct_dates_are_kept() {
        let days = merge_sources(vec![
            (file("2025-01-02", "openclaw", SourceKind::Enriched), DayMetrics::default()),
            (file("2025-01-01", "clawdbot", SourceKind::Legacy), DayMetrics::default()),
        ]);
        assert_eq!(days.len(), 2);
    }

    #[test]
    fn window_keeps_most_recent_dates() {
        let days: BTreeMap<String, DayMetrics> = (1..=5)
            .map(|d| (format!("2025-01-0{d}"), DayMetrics::default()))
            .collect();
        let kept = window(days, 2);
        let keys: Vec<&str> = kept.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["2025-01-04", "2025-01-05"]);

        let days: BTreeMap<String, DayMetrics> =
            BTreeMap::from([("2025-01-01".to_string(), DayMetrics::default())]);
        assert_eq!(window(days, 30).len(), 1);
    }
}
