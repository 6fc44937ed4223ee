//! Per-file aggregation: fold one log file into a [`DayMetrics`].
//!
//! Pure in the file contents: the same bytes always produce the same value.

use crate::correlate::{Correlation, Correlator};
use crate::event::parse_line;
use crate::metrics::{bump, mean, thinking_avg_durations, DayMetrics};
use crate::tokens::TokenTable;
use std::collections::HashSet;
use std::path::Path;

/// Compactions within one file at which a session counts as heavy.
pub const HEAVY_SESSION_COMPACTIONS: u32 = 3;

/// Aggregate raw log lines.
pub fn aggregate_lines<I, S>(lines: I, tokens: &TokenTable) -> DayMetrics
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut correlator = Correlator::new();
    for line in lines {
        if let Some(parsed) = parse_line(line.as_ref()) {
            correlator.observe(parsed);
        }
    }
    summarize(correlator.finish(), tokens)
}

/// Aggregate one log file. A file that cannot be read contributes an empty
/// [`DayMetrics`]; the failure is logged, not returned.
pub fn aggregate_file(path: &Path, tokens: &TokenTable) -> DayMetrics {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "failed to read log file, treating as empty"
            );
            return DayMetrics::default();
        }
    };

    // Lossy decode so one torn multi-byte write does not hide the rest of the day
    let text = String::from_utf8_lossy(&bytes);
    let day = aggregate_lines(text.lines(), tokens);
    tracing::debug!(
        path = %path.display(),
        runs = day.total_runs,
        errors = day.errors.total,
        "aggregated log file"
    );
    day
}

/// Turn a file's correlation into its day metrics.
pub fn summarize(correlation: Correlation, tokens: &TokenTable) -> DayMetrics {
    let Correlation {
        mut runs,
        tools,
        tool_chains,
        shell_commands,
        errors,
        compaction_count,
        session_compactions,
        open_runs,
    } = correlation;

    if open_runs > 0 {
        tracing::trace!(open_runs, "runs without completion in file");
    }

    let mut day = DayMetrics {
        tools,
        tool_chains,
        shell_commands,
        errors,
        compaction_count,
        ..Default::default()
    };

    let mut sessions: HashSet<&str> = HashSet::new();
    for run in &mut runs {
        run.estimated_tokens = tokens.estimate_run(&run.tools);
    }
    for run in &runs {
        bump(&mut day.models, &run.model);
        bump(&mut day.providers, &run.provider);
        bump(&mut day.channels, &run.channel);
        bump(&mut day.thinking_modes, &run.thinking);
        if let Some(session) = run.session_id.as_deref().filter(|s| !s.is_empty()) {
            sessions.insert(session);
        }
        day.total_duration_ms = day.total_duration_ms.saturating_add(run.duration_ms);
        day.total_estimated_tokens = day
            .total_estimated_tokens
            .saturating_add(run.estimated_tokens);
        if run.aborted {
            day.aborted_runs += 1;
        }
        if run.compactions > 0 {
            day.runs_with_compaction += 1;
        }
    }

    day.session_count = sessions.len() as u64;
    day.total_runs = runs.len() as u64;
    day.avg_duration_ms = mean(day.total_duration_ms, day.total_runs);
    day.avg_estimated_tokens = mean(day.total_estimated_tokens, day.total_runs);
    day.max_duration_ms = runs.iter().map(|r| r.duration_ms).max().unwrap_or(0);
    day.min_duration_ms = runs.iter().map(|r| r.duration_ms).min().unwrap_or(0);
    day.thinking_avg_durations = thinking_avg_durations(&runs);
    day.heavy_sessions = session_compactions
        .values()
        .filter(|&&n| n >= HEAVY_SESSION_COMPACTIONS)
        .count() as u64;
    day.runs = runs;
    day
}
