//! Terminal rendering of a [`MetricsSnapshot`].

use crate::metrics::{by_count, Histogram, MetricsSnapshot};

const BAR_WIDTH: usize = 30;
const WIDE_BAR_WIDTH: usize = 40;
const LABEL_WIDTH: usize = 15;
const TOP_TOOLS: usize = 5;
const DAILY_ROWS: usize = 14;

/// Format milliseconds as `0s`, `Nms`, `N.Ns` or `N.Nm`.
pub fn format_duration(ms: f64) -> String {
    if ms <= 0.0 {
        "0s".to_string()
    } else if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else {
        format!("{:.1}m", ms / 60_000.0)
    }
}

pub fn format_tokens(tokens: f64) -> String {
    if tokens < 1000.0 {
        format!("{:.0}", tokens)
    } else {
        format!("{:.1}K", tokens / 1000.0)
    }
}

/// A `width`-cell bar for `value` relative to `max`.
pub fn bar(value: u64, max: u64, width: usize) -> String {
    let max = max.max(1);
    let filled = ((value as f64 / max as f64) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

fn bar_lines(histogram: &Histogram, limit: Option<usize>, width: usize) -> Vec<String> {
    let entries = by_count(histogram);
    let max = entries.first().map(|(_, n)| *n).unwrap_or(1);
    entries
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(label, count)| {
            format!(
                "  {:<width$} {} {}",
                label,
                bar(count, max, width),
                count,
                width = LABEL_WIDTH
            )
        })
        .collect()
}

fn section(lines: &mut Vec<String>, title: &str, body: Vec<String>) {
    lines.push(String::new());
    lines.push(format!("{title}:"));
    if body.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        lines.extend(body);
    }
}

pub fn summary(snap: &MetricsSnapshot) -> String {
    let mut lines = vec![
        format!("Clawtrics Summary (last {} days)", snap.window_days),
        String::new(),
        format!("Total Runs:     {}", snap.total_runs),
        format!("Total Duration: {}", format_duration(snap.total_duration_ms as f64)),
        format!("Avg Duration:   {}", format_duration(snap.avg_duration_ms)),
        format!("P50 Duration:   {}", format_duration(snap.p50_duration_ms as f64)),
        format!("P95 Duration:   {}", format_duration(snap.p95_duration_ms as f64)),
        format!("Max Duration:   {}", format_duration(snap.max_duration_ms as f64)),
        format!("Sessions:       {}", snap.total_sessions),
        format!("Aborted:        {}", snap.aborted_runs),
        format!(
            "Est. Tokens:    {} (avg {}/run)",
            format_tokens(snap.total_estimated_tokens as f64),
            format_tokens(snap.avg_estimated_tokens)
        ),
        format!(
            "Compactions:    {} ({} heavy sessions)",
            snap.compaction_count, snap.heavy_sessions
        ),
        format!("Errors:         {}", snap.errors.total),
    ];

    section(&mut lines, "Top Tools", bar_lines(&snap.tools, Some(TOP_TOOLS), BAR_WIDTH));
    section(&mut lines, "Models", bar_lines(&snap.models, None, BAR_WIDTH));
    section(&mut lines, "Channels", bar_lines(&snap.channels, None, BAR_WIDTH));
    lines.join("\n")
}

/// Most recent days first.
pub fn daily(snap: &MetricsSnapshot) -> String {
    let mut lines = vec![
        "Daily Breakdown".to_string(),
        String::new(),
        "  Date        Runs    Avg       Total     Sessions".to_string(),
        format!("  {}", "-".repeat(55)),
    ];
    for (date, day) in snap.daily_metrics.iter().rev().take(DAILY_ROWS) {
        lines.push(format!(
            "  {}  {:<7} {:<9} {:<9} {}",
            date,
            day.total_runs,
            format_duration(day.avg_duration_ms),
            format_duration(day.total_duration_ms as f64),
            day.session_count
        ));
    }
    lines.join("\n")
}

pub fn tools(snap: &MetricsSnapshot) -> String {
    histogram_report("Tool Usage", &snap.tools)
}

pub fn models(snap: &MetricsSnapshot) -> String {
    let mut out = histogram_report("Model Usage", &snap.models);
    out.push('\n');
    out.push_str(&histogram_report("Providers", &snap.providers));

    let mut thinking = vec![String::new(), "Thinking Modes".to_string(), String::new()];
    for (mode, count) in by_count(&snap.thinking_modes) {
        let avg = snap.thinking_avg_durations.get(mode).copied().unwrap_or(0.0);
        thinking.push(format!(
            "  {:<width$} {:>6} runs  avg {}",
            mode,
            count,
            format_duration(avg),
            width = LABEL_WIDTH
        ));
    }
    out.push_str(&thinking.join("\n"));
    out
}

pub fn chains(snap: &MetricsSnapshot) -> String {
    let mut out = histogram_report("Tool Chains", &snap.tool_chains);
    out.push('\n');
    out.push_str(&histogram_report("Shell Commands", &snap.shell_commands));
    out
}

pub fn errors(snap: &MetricsSnapshot) -> String {
    let title = format!("Errors ({} total)", snap.errors.total);
    histogram_report(&title, &snap.errors.by_type)
}

fn histogram_report(title: &str, histogram: &Histogram) -> String {
    let mut lines = vec![title.to_string(), String::new()];
    let body = bar_lines(histogram, None, WIDE_BAR_WIDTH);
    if body.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        lines.extend(body);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DayMetrics;

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(450.0), "450ms");
        assert_eq!(format_duration(1500.0), "1.5s");
        assert_eq!(format_duration(59_999.0), "60.0s");
        assert_eq!(format_duration(90_000.0), "1.5m");
    }

    #[test]
    fn format_tokens_units() {
        assert_eq!(format_tokens(0.0), "0");
        assert_eq!(format_tokens(999.0), "999");
        assert_eq!(format_tokens(3500.0), "3.5K");
    }

    #[test]
    fn bar_scales_to_max() {
        assert_eq!(bar(10, 10, 4), "████");
        assert_eq!(bar(5, 10, 4), "██░░");
        assert_eq!(bar(0, 10, 4), "░░░░");
        assert_eq!(bar(0, 0, 3), "░░░");
        assert_eq!(bar(20, 10, 3), "███");
    }

    #[test]
    fn summary_lists_top_tools_only() {
        let mut snap = MetricsSnapshot {
            window_days: 30,
            total_runs: 4,
            p95_duration_ms: 2500,
            ..Default::default()
        };
        for (i, tool) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            snap.tools.insert(tool.to_string(), 10 - i as u64);
        }
        let out = summary(&snap);
        assert!(out.contains("Total Runs:     4"));
        assert!(out.contains("P95 Duration:   2.5s"));
        assert!(out.contains("  e "));
        assert!(!out.contains("  f "));
        assert!(out.contains("Models:\n  (none)"));
    }

    #[test]
    fn daily_is_newest_first() {
        let mut snap = MetricsSnapshot::default();
        for d in 1..=3 {
            snap.daily_metrics.insert(
                format!("2025-01-0{d}"),
                DayMetrics {
                    total_runs: d,
                    ..Default::default()
                },
            );
        }
        let out = daily(&snap);
        let first = out.find("2025-01-03").unwrap();
        let last = out.find("2025-01-01").unwrap();
        assert!(first < last);
    }

    #[test]
    fn errors_report_counts_by_kind() {
        let mut snap = MetricsSnapshot::default();
        snap.errors.record("rate_limit");
        snap.errors.record("rate_limit");
        snap.errors.record("timeout");
        let out = errors(&snap);
        assert!(out.starts_with("Errors (3 total)"));
        let rate = out.find("rate_limit").unwrap();
        let timeout = out.find("timeout").unwrap();
        assert!(rate < timeout);
    }
}
