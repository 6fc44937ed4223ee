//! Log line parsing: one raw JSON line in, one typed [`ParsedLine`] out.
//!
//! The agent runtime writes tslog-style JSON objects. The human message sits
//! in the positional field `"1"`, the subsystem descriptor in `"0"`, and the
//! level and timestamp in `_meta`:
//!
//! ```text
//! {"0":"{\"subsystem\":\"agent/embedded\"}","1":"embedded run done: runId=abc durationMs=1500 aborted=false","_meta":{"logLevelName":"DEBUG","date":"2025-01-01T00:00:01Z"},"time":"2025-01-01T00:00:01Z"}
//! ```
//!
//! Lines that do not decode are dropped without error: log files may hold
//! partial writes or output from unrelated writers.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

pub const RUN_START_MARKER: &str = "embedded run start:";
pub const RUN_DONE_MARKER: &str = "embedded run done:";
pub const TOOL_START_MARKER: &str = "embedded run tool start:";
pub const COMPACTION_MARKER: &str = "compaction start";
pub const ELEVATED_PREFIX: &str = "elevated command";

pub const UNKNOWN: &str = "unknown";
pub const THINKING_OFF: &str = "off";

/// Log level taken from the line's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl Severity {
    pub fn parse(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "trace" | "silly" => Severity::Trace,
            "debug" => Severity::Debug,
            "info" => Severity::Info,
            "warn" | "warning" => Severity::Warn,
            "error" => Severity::Error,
            "fatal" => Severity::Fatal,
            _ => Severity::Unknown,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }
}

/// Error taxonomy bucket for an error-level line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ExecFailed,
    EditFailed,
    AuthError,
    RateLimit,
    Timeout,
    NetworkError,
    Deprecation,
    LaneError,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ExecFailed => "exec_failed",
            ErrorKind::EditFailed => "edit_failed",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Deprecation => "deprecation",
            ErrorKind::LaneError => "lane_error",
            ErrorKind::Other => "other",
        }
    }
}

/// Ordered signatures; the first kind with a matching substring wins.
static ERROR_SIGNATURES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::ExecFailed, &["exec failed", "Exec failed", "exec error"]),
    (ErrorKind::EditFailed, &["edit failed", "Edit failed"]),
    (
        ErrorKind::AuthError,
        &["No API key", "API key", "api key", "Unauthorized", "401"],
    ),
    (
        ErrorKind::RateLimit,
        &["rate limit", "Rate limit", "rate_limit", "429", "Too Many Requests"],
    ),
    (
        ErrorKind::Timeout,
        &["timed out", "timeout", "Timeout", "ETIMEDOUT"],
    ),
    (
        ErrorKind::NetworkError,
        &["ECONNREFUSED", "ECONNRESET", "ENOTFOUND", "EAI_AGAIN", "fetch failed", "network"],
    ),
    (
        ErrorKind::Deprecation,
        &["DeprecationWarning", "deprecated", "Deprecated"],
    ),
    (ErrorKind::LaneError, &["lane task error", "lane error"]),
];

/// Classify an error message against the signature table.
pub fn classify_error(message: &str) -> ErrorKind {
    ERROR_SIGNATURES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| message.contains(*n)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Other)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub run_id: String,
    pub session_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub channel: String,
    pub thinking: String,
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDone {
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub duration_ms: u64,
    pub aborted: bool,
}

/// What a line means, decided once at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    RunStart(RunStart),
    ToolStart {
        run_id: Option<String>,
        tool: String,
    },
    RunDone(RunDone),
    Compaction {
        run_id: Option<String>,
        session_id: Option<String>,
    },
    /// Base command of an elevated shell invocation.
    ShellCommand(String),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub time: Option<String>,
    pub severity: Severity,
    pub subsystem: Option<String>,
    pub event: LogEvent,
    /// Set for error-level lines, independent of `event`: an error-level
    /// completion is still a completion.
    pub error: Option<ErrorKind>,
}

/// Decode one raw line. Returns `None` when the line is not a JSON object
/// with a string message.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let entry = value.as_object()?;

    let subsystem = subsystem_hint(entry);
    let message = message_text(entry)?;
    let meta = entry.get("_meta").and_then(|m| m.as_object());

    let time = entry
        .get("time")
        .and_then(|t| t.as_str())
        .or_else(|| meta.and_then(|m| m.get("date")).and_then(|d| d.as_str()))
        .map(str::to_string);

    let severity = meta
        .and_then(|m| m.get("logLevelName"))
        .or_else(|| entry.get("level"))
        .and_then(|l| l.as_str())
        .map(Severity::parse)
        .unwrap_or(Severity::Unknown);

    let event = classify(message, subsystem.as_deref(), time.as_deref());
    let error = severity.is_error().then(|| classify_error(message));

    Some(ParsedLine {
        time,
        severity,
        subsystem,
        event,
        error,
    })
}

fn message_text(entry: &Map<String, Value>) -> Option<&str> {
    if let Some(msg) = ["1", "msg", "message"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(|v| v.as_str()))
    {
        return Some(msg);
    }
    entry
        .get("0")
        .and_then(|v| v.as_str())
        .filter(|s| subsystem_descriptor(s).is_none())
}

fn subsystem_hint(entry: &Map<String, Value>) -> Option<String> {
    if let Some(sub) = entry.get("subsystem").and_then(|s| s.as_str()) {
        return Some(sub.to_string());
    }
    if let Some(sub) = entry
        .get("0")
        .and_then(|v| v.as_str())
        .and_then(subsystem_descriptor)
    {
        return Some(sub);
    }
    let name = entry
        .get("_meta")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())?;
    subsystem_descriptor(name).or_else(|| {
        let bare = name.trim();
        (!bare.is_empty() && !bare.contains(char::is_whitespace)).then(|| bare.to_string())
    })
}

/// Parse `{"subsystem":"exec"}` descriptors.
fn subsystem_descriptor(s: &str) -> Option<String> {
    if !s.trim_start().starts_with('{') {
        return None;
    }
    let v: Value = serde_json::from_str(s).ok()?;
    v.get("subsystem")?.as_str().map(str::to_string)
}

fn is_exec_subsystem(subsystem: Option<&str>) -> bool {
    subsystem.is_some_and(|s| s.split('/').any(|seg| seg == "exec"))
}

fn classify(message: &str, subsystem: Option<&str>, time: Option<&str>) -> LogEvent {
    if message.contains(RUN_DONE_MARKER) {
        let Some(duration_ms) = field(message, "durationMs").and_then(|d| d.parse().ok()) else {
            return LogEvent::Unrecognized;
        };
        return LogEvent::RunDone(RunDone {
            run_id: field(message, "runId").map(str::to_string),
            session_id: field(message, "sessionId").map(str::to_string),
            duration_ms,
            aborted: field(message, "aborted") == Some("true"),
        });
    }

    if message.contains(TOOL_START_MARKER) {
        return match field(message, "tool").map(tool_name) {
            Some(tool) if !tool.is_empty() => LogEvent::ToolStart {
                run_id: field(message, "runId").map(str::to_string),
                tool: tool.to_string(),
            },
            _ => LogEvent::Unrecognized,
        };
    }

    if message.contains(COMPACTION_MARKER) {
        return LogEvent::Compaction {
            run_id: field(message, "runId").map(str::to_string),
            session_id: field(message, "sessionId").map(str::to_string),
        };
    }

    if message.contains(RUN_START_MARKER) {
        let Some(run_id) = field(message, "runId") else {
            return LogEvent::Unrecognized;
        };
        let or_unknown = |key: &str| field(message, key).unwrap_or(UNKNOWN).to_string();
        return LogEvent::RunStart(RunStart {
            run_id: run_id.to_string(),
            session_id: field(message, "sessionId").map(str::to_string),
            model: or_unknown("model"),
            provider: or_unknown("provider"),
            channel: or_unknown("messageChannel"),
            thinking: field(message, "thinking")
                .unwrap_or(THINKING_OFF)
                .to_string(),
            start_time: time.map(str::to_string),
        });
    }

    if is_exec_subsystem(subsystem) {
        if let Some(rest) = message.trim_start().strip_prefix(ELEVATED_PREFIX) {
            let raw = rest.trim_start_matches(':').trim();
            if let Some(cmd) = base_command(raw) {
                return LogEvent::ShellCommand(cmd);
            }
        }
    }

    LogEvent::Unrecognized
}

/// Value of the first `key=value` token in `message`.
pub fn field<'a>(message: &'a str, key: &str) -> Option<&'a str> {
    message
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.trim_end_matches([',', ';']))
        .filter(|v| !v.is_empty())
}

fn tool_name(raw: &str) -> &str {
    let end = raw
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        .unwrap_or(raw.len());
    &raw[..end]
}

static COMMAND_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&&|\|\||;").unwrap());

const WRAPPER_PREFIXES: &[&str] = &[
    "sudo ", "env ", "bash -lc ", "bash -c ", "sh -c ", "zsh -lc ", "zsh -c ",
];

const SKIPPED_COMMANDS: &[&str] = &["cd", "export", "source", ".", "pushd", "popd"];

fn strip_wrappers(mut s: &str) -> &str {
    loop {
        let before = s;
        s = s.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        for prefix in WRAPPER_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest;
            }
        }
        if s == before {
            return s;
        }
    }
}

fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn basename(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

/// Reduce a shell command line to the program it runs: `cd /repo && npm test`
/// becomes `npm`, `/usr/bin/git status` becomes `git`.
pub fn base_command(raw: &str) -> Option<String> {
    let stripped = strip_wrappers(raw);
    for segment in COMMAND_SEPARATORS.split(stripped) {
        let segment = strip_wrappers(segment);
        let Some(first) = segment.split_whitespace().next() else {
            continue;
        };
        if SKIPPED_COMMANDS.contains(&first) || is_assignment(first) {
            continue;
        }
        let name = basename(first.trim_matches(|c: char| c == '"' || c == '\''));
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    raw.split_whitespace()
        .next()
        .map(|t| t.trim_matches(|c: char| c == '"' || c == '\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
