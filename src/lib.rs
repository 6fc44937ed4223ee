//! Run correlation and usage metrics for OpenClaw agent gateway logs.

pub mod aggregate;
pub mod config;
pub mod correlate;
pub mod engine;
pub mod event;
pub mod metrics;
pub mod report;
pub mod rollup;
#[cfg(feature = "serve")]
pub mod serve;
pub mod source;
pub mod tokens;
pub mod watch;
