#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Deployment execution: host preflight, port probing, retried external
//! commands and the staged apply flow that brings a spec live.

mod apply;
mod error;
mod logsink;
mod mesh;
mod ports;
mod preflight;
mod retry;
mod runner;

pub use apply::{ApplyReport, Executor, Stage};
pub use error::{DeployError, Result};
pub use logsink::{redact, LogSink};
pub use mesh::TailscaleMesh;
pub use ports::{ensure_available, suggest_port, PortProber, TcpProber, PRESET_PORTS};
pub use preflight::{check_host_os, require_root, tune_docker_daemon};
pub use retry::{run_with_retry, RetryPolicy, Sleeper, ThreadSleeper};
pub use runner::{CommandOutput, CommandRequest, CommandRunner, InterruptState, ShellRunner};
