//! Log source enumeration: find per-day log files under the configured roots.
//!
//! A log file qualifies when it carries the configured extension and its name
//! embeds an ISO date (`openclaw-2025-01-31.log`). Files for the same date may
//! exist under several roots; ordering puts the preferred source first so the
//! rollup can keep it as the day's primary.

use crate::config::{SourceConfig, SourceKind};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static DATE_IN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap());

/// One enumerated log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileRef {
    pub path: PathBuf,
    /// `YYYY-MM-DD`, validated as a calendar date.
    pub date_key: String,
    pub tag: String,
    #[serde(skip)]
    pub kind: SourceKind,
}

/// Extract the first embedded ISO date from a file name.
pub fn date_key(file_name: &str) -> Option<String> {
    DATE_IN_NAME
        .captures_iter(file_name)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
        .map(str::to_string)
}

/// All log file paths under `root` with the given extension. A missing or
/// unreadable root yields nothing.
pub fn log_files_in(root: &Path, extension: &str) -> Vec<PathBuf> {
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "log root not present");
        return Vec::new();
    }

    let escaped = glob::Pattern::escape(&root.to_string_lossy());
    let pattern = format!("{escaped}/*.{extension}");
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!(error = %e, pattern = %pattern, "invalid log glob pattern");
            return Vec::new();
        }
    };

    paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable log entry");
                None
            }
        })
        .filter(|p| p.is_file())
        .collect()
}

/// List log files across `sources`, newest date first, preferred source first
/// within a date. Returns at most `window_days * 2` refs so a window can be
/// filled even when two sources cover every day.
pub fn enumerate(sources: &[SourceConfig], window_days: u32, extension: &str) -> Vec<LogFileRef> {
    let mut refs: Vec<LogFileRef> = Vec::new();

    for source in sources {
        for path in log_files_in(&source.root, extension) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(date_key) = date_key(name) else {
                continue;
            };
            refs.push(LogFileRef {
                path,
                date_key,
                tag: source.tag.clone(),
                kind: source.kind,
            });
        }
    }

    refs.sort_by(|a, b| {
        b.date_key
            .cmp(&a.date_key)
            .then(a.kind.cmp(&b.kind))
            .then(a.path.cmp(&b.path))
    });
    let mut seen = HashSet::new();
    refs.retain(|r| seen.insert(r.path.clone()));

    let limit = (window_days as usize).saturating_mul(2);
    refs.truncate(limit);

    tracing::debug!(files = refs.len(), window_days, "enumerated log files");
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn source(root: &Path, tag: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig {
            root: root.to_path_buf(),
            tag: tag.to_string(),
            kind,
        }
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn date_key_extracts_iso_date() {
        assert_eq!(
            date_key("openclaw-2025-01-31.log").as_deref(),
            Some("2025-01-31")
        );
        assert_eq!(date_key("clawdbot.log"), None);
        assert_eq!(date_key("openclaw-2025-13-40.log"), None);
    }

    #[test]
    fn date_key_skips_invalid_candidate() {
        assert_eq!(
            date_key("run-9999-99-99-2025-02-01.log").as_deref(),
            Some("2025-02-01")
        );
    }

    #[test]
    fn missing_root_contributes_nothing() {
        let dir = tempdir().unwrap();
        let sources = vec![source(
            &dir.path().join("absent"),
            "openclaw",
            SourceKind::Enriched,
        )];
        assert!(enumerate(&sources, 30, "log").is_empty());
    }

    #[test]
    fn filters_extension_and_undated_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "openclaw-2025-01-01.log");
        touch(dir.path(), "openclaw-2025-01-02.txt");
        touch(dir.path(), "openclaw.log");

        let sources = vec![source(dir.path(), "openclaw", SourceKind::Enriched)];
        let refs = enumerate(&sources, 30, "log");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].date_key, "2025-01-01");
        assert_eq!(refs[0].tag, "openclaw");
    }

    #[test]
    fn orders_by_date_then_source_priority() {
        let enriched = tempdir().unwrap();
        let legacy = tempdir().unwrap();
        touch(enriched.path(), "openclaw-2025-01-02.log");
        touch(legacy.path(), "clawdbot-2025-01-02.log");
        touch(legacy.path(), "clawdbot-2025-01-03.log");
        touch(enriched.path(), "openclaw-2025-01-01.log");

        // Legacy listed first to show the ordering does not depend on config order
        let sources = vec![
            source(legacy.path(), "clawdbot", SourceKind::Legacy),
            source(enriched.path(), "openclaw", SourceKind::Enriched),
        ];
        let refs = enumerate(&sources, 30, "log");
        let order: Vec<(&str, &str)> = refs
            .iter()
            .map(|r| (r.date_key.as_str(), r.tag.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("2025-01-03", "clawdbot"),
                ("2025-01-02", "openclaw"),
                ("2025-01-02", "clawdbot"),
                ("2025-01-01", "openclaw"),
            ]
        );
    }

    #[test]
    fn duplicate_root_is_deduplicated() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "openclaw-2025-01-01.log");
        let sources = vec![
            source(dir.path(), "openclaw", SourceKind::Enriched),
            source(dir.path(), "openclaw", SourceKind::Enriched),
        ];
        assert_eq!(enumerate(&sources, 30, "log").len(), 1);
    }

    #[test]
    fn truncates_to_twice_the_window() {
        let dir = tempdir().unwrap();
        for day in 1..=9 {
            touch(dir.path(), &format!("openclaw-2025-01-0{day}.log"));
        }
        let sources = vec![source(dir.path(), "openclaw", SourceKind::Enriched)];
        let refs = enumerate(&sources, 2, "log");
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0].date_key, "2025-01-09");
        assert_eq!(refs[3].date_key, "2025-01-06");
    }
}
