//! Shell command execution with live log streaming and interrupt handling.
//!
//! Commands run in their own process group so an interrupt can signal the
//! whole tree (compose spawns children). The CLI installs a Ctrl-C handler
//! that calls [`InterruptState::request`]; the runner checks the flag after
//! every command and reports [`DeployError::Interrupted`].

use std::io::{BufRead, BufReader};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use crate::error::{DeployError, Result};
use crate::logsink::{redact, LogSink};

const TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Short name for logs and error messages.
    pub label: String,
    /// Shell command line, run via `bash -c`.
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandRequest {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self { label: label.into(), command: command.into(), cwd: None, env: Vec::new() }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Last lines of combined stdout/stderr, for error context.
    pub tail: Vec<String>,
}

impl CommandOutput {
    pub fn tail_text(&self) -> String {
        self.tail.join("\n")
    }
}

/// Seam between the apply logic and the host system. Tests substitute a
/// recording fake; production uses [`ShellRunner`].
pub trait CommandRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput>;
}

/// Shared interrupt flag plus the process group of whatever is currently
/// running, so a Ctrl-C can terminate it.
#[derive(Clone, Default)]
pub struct InterruptState {
    inner: Arc<InterruptInner>,
}

#[derive(Default)]
struct InterruptInner {
    requested: AtomicBool,
    active_pgid: Mutex<Option<i32>>,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Mark interrupted and signal the active process group, if any.
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        let pgid = self.inner.active_pgid.lock().ok().and_then(|guard| *guard);
        if let Some(pgid) = pgid {
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGTERM);
        }
    }

    fn set_active(&self, pgid: Option<i32>) {
        if let Ok(mut guard) = self.inner.active_pgid.lock() {
            *guard = pgid;
        }
    }
}

pub struct ShellRunner {
    interrupt: InterruptState,
    sink: Arc<LogSink>,
}

impl ShellRunner {
    pub fn new(interrupt: InterruptState, sink: Arc<LogSink>) -> Self {
        Self { interrupt, sink }
    }

    fn stream_child(&self, child: &mut Child) -> CommandOutput {
        let mut tail: Vec<String> = Vec::new();
        let stderr = child.stderr.take().map(|pipe| {
            std::thread::spawn(move || {
                let mut lines = Vec::new();
                for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
                    lines.push(line);
                }
                lines
            })
        });
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                self.emit(&mut tail, &line);
            }
        }
        if let Some(handle) = stderr {
            if let Ok(lines) = handle.join() {
                for line in lines {
                    self.emit(&mut tail, &line);
                }
            }
        }
        CommandOutput { tail }
    }

    fn emit(&self, tail: &mut Vec<String>, line: &str) {
        let line = redact(line);
        tracing::debug!(target: "moor::cmd", "{line}");
        self.sink.line(&line);
        if tail.len() == TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        if self.interrupt.requested() {
            return Err(DeployError::Interrupted);
        }
        self.sink.line(&format!("$ {}", request.command));
        tracing::info!(label = %request.label, command = %redact(&request.command), "running");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(DeployError::io(format!("spawning '{}'", request.label)))?;
        self.interrupt.set_active(Some(child.id() as i32));

        let output = self.stream_child(&mut child);
        let status = child
            .wait()
            .map_err(DeployError::io(format!("waiting for '{}'", request.label)));
        self.interrupt.set_active(None);
        let status = status?;

        if self.interrupt.requested() {
            return Err(DeployError::Interrupted);
        }
        if status.success() {
            Ok(output)
        } else {
            Err(DeployError::CommandFailed {
                command: request.label.clone(),
                status: status
                    .code()
                    .map(|code| format!("exit code {code}"))
                    .unwrap_or_else(|| "signal".to_owned()),
                detail: output.tail_text(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ShellRunner {
        ShellRunner::new(InterruptState::new(), Arc::new(LogSink::disabled()))
    }

    #[test]
    fn captures_combined_output_tail() {
        let request = CommandRequest::new("echo", "echo out; echo err >&2");
        let output = runner().run(&request).unwrap();
        assert!(output.tail.contains(&"out".to_owned()));
        assert!(output.tail.contains(&"err".to_owned()));
    }

    #[test]
    fn nonzero_exit_is_a_command_failure_with_detail() {
        let request = CommandRequest::new("boom", "echo why >&2; exit 3");
        let err = runner().run(&request).unwrap_err();
        match err {
            DeployError::CommandFailed { command, status, detail } => {
                assert_eq!(command, "boom");
                assert_eq!(status, "exit code 3");
                assert!(detail.contains("why"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let request = CommandRequest::new("pwd", "echo \"$PWD $MOOR_TEST_VAR\"")
            .cwd(dir.path())
            .env("MOOR_TEST_VAR", "v1");
        let output = runner().run(&request).unwrap();
        let line = output.tail.last().unwrap();
        assert!(line.ends_with(" v1"), "{line}");
    }

    #[test]
    fn requested_interrupt_blocks_new_commands() {
        let interrupt = InterruptState::new();
        interrupt.request();
        let runner = ShellRunner::new(interrupt, Arc::new(LogSink::disabled()));
        let err = runner.run(&CommandRequest::new("noop", "true")).unwrap_err();
        assert!(matches!(err, DeployError::Interrupted));
    }

    #[test]
    fn tail_keeps_only_recent_lines() {
        let request = CommandRequest::new("many", "seq 1 100");
        let output = runner().run(&request).unwrap();
        assert_eq!(output.tail.len(), TAIL_LINES);
        assert_eq!(output.tail.last().unwrap(), "100");
    }
}
