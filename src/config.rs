use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from clawtrics.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClawtricsConfig {
    pub sources: Vec<SourceConfig>,
    pub window: WindowConfig,
    pub ingest: IngestConfig,
    pub estimation: EstimationConfig,
    pub serve: ServeConfig,
}

/// One log root. `kind` decides which source wins when two roots hold a
/// file for the same date.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub root: PathBuf,
    pub tag: String,
    #[serde(default)]
    pub kind: SourceKind,
}

/// Source priority. Variants are ordered: `Enriched` sorts first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Enriched,
    #[default]
    Legacy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub days: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub workers: usize,
    pub extension: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub default_tokens: u64,
    /// Per-tool overrides layered on top of the built-in table.
    pub tools: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    pub poll_interval_secs: u64,
}

// --- Default implementations ---

impl Default for ClawtricsConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    root: PathBuf::from("/tmp/openclaw"),
                    tag: "openclaw".to_string(),
                    kind: SourceKind::Enriched,
                },
                SourceConfig {
                    root: PathBuf::from("/tmp/clawdbot"),
                    tag: "clawdbot".to_string(),
                    kind: SourceKind::Legacy,
                },
            ],
            window: WindowConfig::default(),
            ingest: IngestConfig::default(),
            estimation: EstimationConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { days: 30 }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            extension: "log".to_string(),
        }
    }
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            default_tokens: crate::tokens::DEFAULT_TOOL_TOKENS,
            tools: HashMap::new(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3001,
            poll_interval_secs: 2,
        }
    }
}

impl ClawtricsConfig {
    /// Load config from `path`. A missing file yields the defaults; a file
    /// that exists but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline has no degraded path for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.days == 0 {
            return Err(ConfigError::Invalid("window.days must be at least 1".into()));
        }
        if self.ingest.workers == 0 {
            return Err(ConfigError::Invalid(
                "ingest.workers must be at least 1".into(),
            ));
        }
        if self.ingest.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid(
                "ingest.extension must not be empty".into(),
            ));
        }
        if let Some(source) = self.sources.iter().find(|s| s.tag.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "source {} has an empty tag",
                source.root.display()
            )));
        }
        Ok(())
    }

    /// Replace the configured sources with ad-hoc roots from the command line.
    /// Each root is tagged with its directory name and treated as enriched.
    pub fn override_roots(&mut self, roots: &[PathBuf]) {
        if roots.is_empty() {
            return;
        }
        self.sources = roots
            .iter()
            .map(|root| SourceConfig {
                root: root.clone(),
                tag: root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| root.display().to_string()),
                kind: SourceKind::Enriched,
            })
            .collect();
    }

    /// The extension without a leading dot.
    pub fn extension(&self) -> &str {
        self.ingest.extension.trim_start_matches('.')
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
