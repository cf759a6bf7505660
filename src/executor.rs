// src/executor.rs

//! External process execution
//!
//! Every shell-out (syntax checks, privileged copies, symlinks, service
//! reloads, certificate issuance) goes through a [`ProcessExecutor`] so the
//! pipeline and the adapters can be exercised with a [`RecordingExecutor`]
//! that never touches the real system.
//!
//! Key features:
//! - Timeout protection (the child is killed when it expires)
//! - stdin nullification to prevent hangs
//! - Output captured and logged line by line

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default timeout for a single command (60 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Overrides the executor's default timeout
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run through non-interactive `sudo` when `elevate` is set
    pub fn elevated(self, elevate: bool) -> Self {
        if !elevate {
            return self;
        }
        let mut args = vec!["-n".to_string(), self.program];
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            current_dir: self.current_dir,
            timeout: self.timeout,
        }
    }

    /// Space-joined command line, for logs and prefix matching
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished (or killed) command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or on timeout
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Successful run with the given stdout
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_string(),
            ..Self::default()
        }
    }

    /// Failed run with the given exit code and stderr
    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.to_string(),
            ..Self::default()
        }
    }

    /// Run that was killed after its timeout expired
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// stdout and stderr trimmed and joined (daemon syntax checks write to stderr)
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => String::new(),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }

    /// Human-readable failure detail
    pub fn failure_detail(&self, spec: &CommandSpec) -> String {
        if self.timed_out {
            return format!("'{}' timed out", spec.command_line());
        }
        let detail = self.combined();
        let code = self.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        if detail.is_empty() {
            format!("'{}' failed with exit code {}", spec.command_line(), code)
        } else {
            format!(
                "'{}' failed with exit code {}: {}",
                spec.command_line(),
                code,
                detail
            )
        }
    }
}

/// Runs external commands
pub trait ProcessExecutor: Send + Sync {
    /// Run `spec` to completion or timeout
    ///
    /// A non-zero exit is reported in the output, not as an error; `Err` means
    /// the process could not be started or waited on.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Executor backed by `std::process::Command`
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor for SystemExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let timeout = spec.timeout.unwrap_or(self.timeout);
        debug!("Executing: {}", spec.command_line());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::ExternalService(format!("failed to spawn '{}': {}", spec.program, e))
        })?;

        match child.wait_timeout(timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                for line in stdout.lines() {
                    debug!("[{}] {}", spec.program, line);
                }
                for line in stderr.lines() {
                    warn!("[{}] {}", spec.program, line);
                }

                Ok(CommandOutput {
                    code: status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                })
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(
                    "'{}' timed out after {} seconds",
                    spec.command_line(),
                    timeout.as_secs()
                );
                Ok(CommandOutput::timed_out())
            }
        }
    }
}

/// Executor that records commands and replays scripted outputs
///
/// Responses are matched by command-line prefix, most recently scripted
/// first. When several outputs are queued for a prefix they are consumed in
/// order and the last one repeats. Unmatched commands succeed with no output.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output for commands starting with `prefix`
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.respond_sequence(prefix, vec![output]);
    }

    /// Script successive outputs for commands starting with `prefix`
    pub fn respond_sequence(&self, prefix: &str, outputs: Vec<CommandOutput>) {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses.push((prefix.to_string(), outputs.into()));
    }

    /// Command lines run so far
    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(CommandSpec::command_line)
            .collect()
    }

    /// Commands run so far
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of recorded commands containing `needle`
    pub fn count_matching(&self, needle: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl ProcessExecutor for RecordingExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.command_line();
        debug!("[RECORD] {}", line);
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        for (prefix, queue) in responses.iter_mut().rev() {
            if line.starts_with(prefix.as_str()) {
                let output = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                return Ok(output.unwrap_or_default());
            }
        }

        Ok(CommandOutput::ok(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_prefixes_sudo() {
        let spec = CommandSpec::new("nginx").arg("-t").elevated(true);
        assert_eq!(spec.command_line(), "sudo -n nginx -t");

        let spec = CommandSpec::new("nginx").arg("-t").elevated(false);
        assert_eq!(spec.command_line(), "nginx -t");
    }

    #[test]
    fn test_system_executor_captures_output() {
        let exec = SystemExecutor::new();
        let out = exec
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .unwrap();

        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.combined(), "hello\noops");
    }

    #[test]
    fn test_system_executor_timeout_kills_child() {
        let exec = SystemExecutor::new().with_timeout(Duration::from_millis(200));
        let out = exec.run(&CommandSpec::new("sleep").arg("5")).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn test_system_executor_spawn_failure() {
        let exec = SystemExecutor::new();
        let err = exec
            .run(&CommandSpec::new("/nonexistent/command"))
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[test]
    fn test_recording_executor_sequences() {
        let exec = RecordingExecutor::new();
        exec.respond_sequence(
            "certbot",
            vec![CommandOutput::failed(1, "rate limited"), CommandOutput::ok("done")],
        );

        let spec = CommandSpec::new("certbot").arg("certonly");
        assert!(!exec.run(&spec).unwrap().success());
        assert!(exec.run(&spec).unwrap().success());
        assert!(exec.run(&spec).unwrap().success());
        assert!(exec.run(&CommandSpec::new("nginx")).unwrap().success());
        assert_eq!(exec.count_matching("certbot"), 3);
    }

    #[test]
    fn test_failure_detail() {
        let spec = CommandSpec::new("nginx").arg("-t");
        let detail = CommandOutput::failed(1, "emerg: bad directive").failure_detail(&spec);
        assert_eq!(detail, "'nginx -t' failed with exit code 1: emerg: bad directive");
        assert!(CommandOutput::timed_out().failure_detail(&spec).contains("timed out"));
    }
}
