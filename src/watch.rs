//! Change detection by polling: the newest modification time across all log
//! files is the fingerprint. No file-system watches are registered.

use crate::config::SourceConfig;
use crate::source::log_files_in;
use std::time::SystemTime;

/// Newest modification time over every log file under `sources`, or `None`
/// when there are no readable log files.
pub fn fingerprint(sources: &[SourceConfig], extension: &str) -> Option<SystemTime> {
    sources
        .iter()
        .flat_map(|s| log_files_in(&s.root, extension))
        .filter_map(|path| match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(mtime) => Some(mtime),
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "cannot stat log file");
                None
            }
        })
        .max()
}

/// Remembers the last fingerprint a caller acted on.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    sources: Vec<SourceConfig>,
    extension: String,
    last: Option<SystemTime>,
}

impl ChangeDetector {
    pub fn new(sources: Vec<SourceConfig>, extension: impl Into<String>) -> Self {
        Self {
            sources,
            extension: extension.into(),
            last: None,
        }
    }

    /// Current fingerprint without recording it.
    pub fn fingerprint(&self) -> Option<SystemTime> {
        fingerprint(&self.sources, &self.extension)
    }

    /// The current fingerprint if it is ahead of the committed one. The first
    /// observation of any log file counts. Files disappearing or mtimes moving
    /// backwards do not. Nothing is recorded; see [`commit`](Self::commit).
    pub fn advanced(&self) -> Option<SystemTime> {
        let current = self.fingerprint()?;
        match self.last {
            Some(last) if current <= last => None,
            _ => Some(current),
        }
    }

    /// Record `seen` as acted on. Never moves the committed value backwards.
    pub fn commit(&mut self, seen: SystemTime) {
        if self.last.map_or(true, |last| seen > last) {
            tracing::debug!(current = ?seen, previous = ?self.last, "log fingerprint advanced");
            self.last = Some(seen);
        }
    }

    /// [`advanced`](Self::advanced) followed by a commit.
    pub fn has_changed(&mut self) -> bool {
        match self.advanced() {
            Some(current) => {
                self.commit(current);
                true
            }
            None => false,
        }
    }

    pub fn last_seen(&self) -> Option<SystemTime> {
        self.last
    }
}
