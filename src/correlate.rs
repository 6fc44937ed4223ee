//! Run correlation: match start, tool, compaction and completion lines that
//! share a run id into [`Run`] records.
//!
//! State lives in one [`Correlator`] per file. A run whose start and completion
//! fall in different files (day rollover) completes with default attributes.

use crate::event::{LogEvent, ParsedLine, RunDone, RunStart, THINKING_OFF, UNKNOWN};
use crate::metrics::{bump, chain_key, ErrorSummary, Histogram, Run};
use std::collections::HashMap;

#[derive(Debug)]
struct OpenRun {
    start: RunStart,
    tools: Vec<String>,
    /// Start order within the file.
    seq: u64,
}

/// Output of correlating one file.
#[derive(Debug, Default)]
pub struct Correlation {
    /// Completed runs in completion order. `estimated_tokens` is left at zero.
    pub runs: Vec<Run>,
    pub tools: Histogram,
    pub tool_chains: Histogram,
    pub shell_commands: Histogram,
    pub errors: ErrorSummary,
    pub compaction_count: u64,
    /// Compactions per session id across the whole file.
    pub session_compactions: HashMap<String, u32>,
    /// Runs started but never completed in this file.
    pub open_runs: usize,
}

#[derive(Debug, Default)]
pub struct Correlator {
    open: HashMap<String, OpenRun>,
    run_compactions: HashMap<String, u32>,
    next_seq: u64,
    out: Correlation,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one parsed line.
    pub fn observe(&mut self, line: ParsedLine) {
        if let Some(kind) = line.error {
            self.out.errors.record(kind.as_str());
        }
        match line.event {
            LogEvent::RunStart(start) => self.on_start(start),
            LogEvent::ToolStart { run_id, tool } => self.on_tool(run_id.as_deref(), tool),
            LogEvent::Compaction { run_id, session_id } => {
                self.out.compaction_count += 1;
                if let Some(run_id) = run_id {
                    *self.run_compactions.entry(run_id).or_insert(0) += 1;
                }
                if let Some(session_id) = session_id {
                    *self.out.session_compactions.entry(session_id).or_insert(0) += 1;
                }
            }
            LogEvent::RunDone(done) => self.on_done(done, line.time),
            LogEvent::ShellCommand(cmd) => bump(&mut self.out.shell_commands, &cmd),
            LogEvent::Unrecognized => {}
        }
    }

    pub fn finish(mut self) -> Correlation {
        self.out.open_runs = self.open.len();
        self.out
    }

    fn on_start(&mut self, start: RunStart) {
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.open.get_mut(&start.run_id) {
            // Duplicate start: the later line's attributes win, tools already
            // attributed to the run are kept.
            Some(open) => {
                open.start = start;
                open.seq = seq;
            }
            None => {
                self.open.insert(
                    start.run_id.clone(),
                    OpenRun {
                        start,
                        tools: Vec::new(),
                        seq,
                    },
                );
            }
        }
    }

    fn on_tool(&mut self, run_id: Option<&str>, tool: String) {
        bump(&mut self.out.tools, &tool);

        let target = match run_id {
            Some(id) => self.open.get_mut(id),
            None => self.open.values_mut().max_by_key(|r| r.seq),
        };
        let Some(open) = target else {
            return;
        };

        if let Some(last) = open.tools.last() {
            if *last != tool {
                bump(&mut self.out.tool_chains, &chain_key(last, &tool));
            }
        }
        open.tools.push(tool);
    }

    fn on_done(&mut self, done: RunDone, time: Option<String>) {
        let open = done.run_id.as_deref().and_then(|id| self.open.remove(id));
        let compactions = done
            .run_id
            .as_deref()
            .and_then(|id| self.run_compactions.remove(id))
            .unwrap_or(0);

        let (start, tools) = match open {
            Some(open) => (Some(open.start), open.tools),
            None => (None, Vec::new()),
        };
        let (session_id, model, provider, channel, thinking) = match start {
            Some(s) => (s.session_id, s.model, s.provider, s.channel, s.thinking),
            None => (
                None,
                UNKNOWN.to_string(),
                UNKNOWN.to_string(),
                UNKNOWN.to_string(),
                THINKING_OFF.to_string(),
            ),
        };

        let run = Run {
            session_id: done.session_id.or(session_id),
            model,
            provider,
            channel,
            thinking,
            run_id: done.run_id,
            duration_ms: done.duration_ms,
            aborted: done.aborted,
            time,
            tools,
            estimated_tokens: 0,
            compactions,
        };
        self.out.runs.push(run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::parse_line;

    fn msg(message: &str) -> String {
        serde_json::json!({"1": message, "time": "2025-01-01T00:00:00Z"}).to_string()
    }

    fn correlate(messages: &[&str]) -> Correlation {
        let mut c = Correlator::new();
        for m in messages {
            if let Some(line) = parse_line(&msg(m)) {
                c.observe(line);
            }
        }
        c.finish()
    }

    #[test]
    fn start_tool_done_builds_run() {
        let out = correlate(&[
            "embedded run start: runId=abc sessionId=s1 model=foo provider=bar messageChannel=webchat thinking=high",
            "embedded run tool start: tool=exec",
            "embedded run done: runId=abc sessionId=s1 durationMs=1500 aborted=false",
        ]);
        assert_eq!(out.runs.len(), 1);
        let run = &out.runs[0];
        assert_eq!(run.run_id.as_deref(), Some("abc"));
        assert_eq!(run.model, "foo");
        assert_eq!(run.provider, "bar");
        assert_eq!(run.channel, "webchat");
        assert_eq!(run.thinking, "high");
        assert_eq!(run.tools, vec!["exec"]);
        assert_eq!(run.duration_ms, 1500);
        assert!(!run.aborted);
        assert_eq!(out.open_runs, 0);
    }

    #[test]
    fn unmatched_completion_uses_defaults() {
        let out = correlate(&["embedded run done: runId=zzz durationMs=2000"]);
        assert_eq!(out.runs.len(), 1);
        let run = &out.runs[0];
        assert_eq!(run.duration_ms, 2000);
        assert_eq!(run.model, "unknown");
        assert_eq!(run.provider, "unknown");
        assert_eq!(run.channel, "unknown");
        assert_eq!(run.thinking, "off");
        assert!(run.tools.is_empty());
    }

    #[test]
    fn repeated_tool_does_not_chain() {
        let out = correlate(&[
            "embedded run start: runId=r1",
            "embedded run tool start: runId=r1 tool=read",
            "embedded run tool start: runId=r1 tool=read",
        ]);
        assert_eq!(out.tools.get("read"), Some(&2));
        assert!(out.tool_chains.is_empty());

        let out = correlate(&[
            "embedded run start: runId=r1",
            "embedded run tool start: runId=r1 tool=read",
            "embedded run tool start: runId=r1 tool=read",
            "embedded run tool start: runId=r1 tool=write",
            "embedded run done: runId=r1 durationMs=5",
        ]);
        assert_eq!(out.tools.get("read"), Some(&2));
        assert_eq!(out.tool_chains.get("read→write"), Some(&1));
        assert_eq!(out.tool_chains.len(), 1);
        assert_eq!(out.runs[0].tools, vec!["read", "read", "write"]);
    }

    #[test]
    fn chain_edges_count_distinct_transitions() {
        let out = correlate(&[
            "embedded run start: runId=r1",
            "embedded run tool start: runId=r1 tool=read",
            "embedded run tool start: runId=r1 tool=exec",
            "embedded run tool start: runId=r1 tool=exec",
            "embedded run tool start: runId=r1 tool=read",
            "embedded run tool start: runId=r1 tool=exec",
        ]);
        assert_eq!(out.tool_chains.get("read→exec"), Some(&2));
        assert_eq!(out.tool_chains.get("exec→read"), Some(&1));
        let edges: u64 = out.tool_chains.values().sum();
        assert_eq!(edges, 3);
    }

    #[test]
    fn tool_for_unknown_run_counts_without_chain() {
        let out = correlate(&[
            "embedded run tool start: runId=ghost tool=read",
            "embedded run tool start: runId=ghost tool=write",
            "embedded run tool start: tool=exec",
        ]);
        assert_eq!(out.tools.values().sum::<u64>(), 3);
        assert!(out.tool_chains.is_empty());
        assert!(out.runs.is_empty());
    }

    #[test]
    fn tools_are_attributed_per_run() {
        let out = correlate(&[
            "embedded run start: runId=a",
            "embedded run start: runId=b",
            "embedded run tool start: runId=a tool=read",
            "embedded run tool start: runId=b tool=exec",
            "embedded run tool start: runId=a tool=write",
            "embedded run done: runId=a durationMs=1",
            "embedded run done: runId=b durationMs=2",
        ]);
        assert_eq!(out.runs[0].tools, vec!["read", "write"]);
        assert_eq!(out.runs[1].tools, vec!["exec"]);
        // exec on b does not break a's read→write edge
        assert_eq!(out.tool_chains.get("read→write"), Some(&1));
        assert_eq!(out.tool_chains.len(), 1);
    }

    #[test]
    fn tool_without_run_id_goes_to_latest_open_run() {
        let out = correlate(&[
            "embedded run start: runId=a",
            "embedded run start: runId=b",
            "embedded run tool start: tool=read",
            "embedded run done: runId=b durationMs=3",
            "embedded run tool start: tool=exec",
            "embedded run done: runId=a durationMs=4",
        ]);
        assert_eq!(out.runs[0].run_id.as_deref(), Some("b"));
        assert_eq!(out.runs[0].tools, vec!["read"]);
        assert_eq!(out.runs[1].tools, vec!["exec"]);
    }

    #[test]
    fn duplicate_start_last_wins() {
        let out = correlate(&[
            "embedded run start: runId=r1 model=old",
            "embedded run tool start: runId=r1 tool=read",
            "embedded run start: runId=r1 model=new",
            "embedded run done: runId=r1 durationMs=9",
        ]);
        assert_eq!(out.runs[0].model, "new");
        assert_eq!(out.runs[0].tools, vec!["read"]);
    }

    #[test]
    fn compactions_count_per_run_and_session() {
        let out = correlate(&[
            "embedded run compaction start: runId=r1 sessionId=s1",
            "embedded run start: runId=r1 sessionId=s1",
            "embedded run compaction start: runId=r1 sessionId=s1",
            "embedded run done: runId=r1 durationMs=10",
            "embedded run compaction start: sessionId=s1",
        ]);
        assert_eq!(out.compaction_count, 3);
        assert_eq!(out.runs[0].compactions, 2);
        assert_eq!(out.session_compactions.get("s1"), Some(&3));
    }

    #[test]
    fn session_falls_back_to_start() {
        let out = correlate(&[
            "embedded run start: runId=r1 sessionId=s9",
            "embedded run done: runId=r1 durationMs=10",
        ]);
        assert_eq!(out.runs[0].session_id.as_deref(), Some("s9"));
    }

    #[test]
    fn completed_run_state_is_discarded() {
        let out = correlate(&[
            "embedded run start: runId=r1 model=foo",
            "embedded run done: runId=r1 durationMs=10",
            "embedded run done: runId=r1 durationMs=20",
        ]);
        assert_eq!(out.runs.len(), 2);
        assert_eq!(out.runs[0].model, "foo");
        assert_eq!(out.runs[1].model, "unknown");
    }

    #[test]
    fn open_runs_are_reported() {
        let out = correlate(&["embedded run start: runId=r1", "embedded run start: runId=r2"]);
        assert!(out.runs.is_empty());
        assert_eq!(out.open_runs, 2);
    }
}
