// src/service.rs

//! Service control for the proxy and PHP-FPM daemons
//!
//! The deployment pipeline only ever asks for a reload. Start, stop, status
//! and log tailing exist for the operator surface.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::{CommandOutput, CommandSpec, DEFAULT_TIMEOUT, ProcessExecutor};

static SERVICE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9@._-]{0,127}$").unwrap());

static ENABLED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";\s*enabled[;)]").unwrap());

/// State-changing systemctl verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
}

/// Coarse unit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Running,
    Stopped,
    Failed,
    Unknown,
}

/// Parsed `systemctl status` result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub running: bool,
    pub enabled: bool,
    pub state: ServiceState,
}

impl ServiceStatus {
    /// Parse `systemctl status` output
    ///
    /// Oneshot units such as ufw report `active (exited)`, which counts as
    /// running.
    pub fn parse(output: &str) -> Self {
        let running = output.contains("Active: active (running)")
            || output.contains("Active: active (exited)");
        let state = if running {
            ServiceState::Running
        } else if output.contains("Active: inactive (dead)") {
            ServiceState::Stopped
        } else if output.contains("Active: failed") {
            ServiceState::Failed
        } else {
            ServiceState::Unknown
        };

        Self {
            running,
            enabled: ENABLED.is_match(output),
            state,
        }
    }
}

/// Check a service name before it reaches a command line
pub fn validate_service_name(name: &str) -> Result<()> {
    if SERVICE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid service name: {:?}", name)))
    }
}

/// Controls system services
pub trait ServiceControl: Send + Sync {
    /// Run a state-changing action; a non-zero exit is reported in the output
    fn control(&self, action: ServiceAction, service: &str) -> Result<CommandOutput>;

    fn status(&self, service: &str) -> Result<ServiceStatus>;

    /// Last `lines` journal lines of the service
    fn tail_logs(&self, service: &str, lines: usize) -> Result<String>;

    fn start(&self, service: &str) -> Result<CommandOutput> {
        self.control(ServiceAction::Start, service)
    }

    fn stop(&self, service: &str) -> Result<CommandOutput> {
        self.control(ServiceAction::Stop, service)
    }

    fn restart(&self, service: &str) -> Result<CommandOutput> {
        self.control(ServiceAction::Restart, service)
    }

    /// Reload without dropping in-flight connections
    fn reload(&self, service: &str) -> Result<CommandOutput> {
        self.control(ServiceAction::Reload, service)
    }
}

/// systemd-backed service control
pub struct SystemdServiceControl {
    executor: Arc<dyn ProcessExecutor>,
    elevate: bool,
    timeout: Duration,
}

impl SystemdServiceControl {
    pub fn new(executor: Arc<dyn ProcessExecutor>, elevate: bool) -> Self {
        Self {
            executor,
            elevate,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ServiceControl for SystemdServiceControl {
    fn control(&self, action: ServiceAction, service: &str) -> Result<CommandOutput> {
        validate_service_name(service)?;
        info!("systemctl {} {}", action, service);

        let spec = CommandSpec::new("systemctl")
            .args([action.as_ref(), service])
            .timeout(self.timeout)
            .elevated(self.elevate);
        self.executor.run(&spec)
    }

    fn status(&self, service: &str) -> Result<ServiceStatus> {
        validate_service_name(service)?;

        let spec = CommandSpec::new("systemctl")
            .args(["status", "--no-pager", service])
            .timeout(self.timeout);
        let output = self.executor.run(&spec)?;

        // systemctl status exits non-zero for stopped units; only the text matters
        let text = output.combined();
        if text.contains("could not be found") || text.contains("not-found") {
            return Err(Error::NotFound(format!("service {}", service)));
        }
        Ok(ServiceStatus::parse(&text))
    }

    fn tail_logs(&self, service: &str, lines: usize) -> Result<String> {
        validate_service_name(service)?;

        let spec = CommandSpec::new("journalctl")
            .args(["-u", service, "-n"])
            .arg(lines.to_string())
            .arg("--no-pager")
            .timeout(self.timeout)
            .elevated(self.elevate);
        let output = self.executor.run(&spec)?;

        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Error::ExternalService(output.failure_detail(&spec)))
        }
    }
}

/// Service control for the sandbox: logs and reports success
#[derive(Debug, Default, Clone)]
pub struct SandboxServiceControl;

impl ServiceControl for SandboxServiceControl {
    fn control(&self, action: ServiceAction, service: &str) -> Result<CommandOutput> {
        validate_service_name(service)?;
        info!("[SANDBOX] {} {} (skipped)", service, action);
        Ok(CommandOutput::ok(&format!("[SANDBOX] {} {} (skipped)", service, action)))
    }

    fn status(&self, service: &str) -> Result<ServiceStatus> {
        validate_service_name(service)?;
        debug!("[SANDBOX] status {}", service);
        Ok(ServiceStatus {
            running: true,
            enabled: true,
            state: ServiceState::Running,
        })
    }

    fn tail_logs(&self, service: &str, _lines: usize) -> Result<String> {
        validate_service_name(service)?;
        Ok(format!("[SANDBOX] no journal for {}\n", service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;

    const RUNNING: &str = "\u{25cf} nginx.service - A high performance web server
     Loaded: loaded (/lib/systemd/system/nginx.service; enabled; vendor preset: enabled)
     Active: active (running) since Mon 2026-10-19 08:00:00 UTC; 2h ago";

    const DEAD: &str = "\u{25cb} php8.3-fpm.service - The PHP 8.3 FastCGI Process Manager
     Loaded: loaded (/lib/systemd/system/php8.3-fpm.service; disabled; vendor preset: enabled)
     Active: inactive (dead)";

    #[test]
    fn test_parse_status() {
        let status = ServiceStatus::parse(RUNNING);
        assert!(status.running);
        assert!(status.enabled);
        assert_eq!(status.state, ServiceState::Running);

        let status = ServiceStatus::parse(DEAD);
        assert!(!status.running);
        assert!(!status.enabled);
        assert_eq!(status.state, ServiceState::Stopped);

        let status = ServiceStatus::parse("Active: failed (Result: exit-code)");
        assert_eq!(status.state, ServiceState::Failed);
    }

    #[test]
    fn test_reload_command_line() {
        let exec = Arc::new(RecordingExecutor::new());
        let services = SystemdServiceControl::new(exec.clone(), true);

        let out = services.reload("php8.3-fpm").unwrap();
        assert!(out.success());
        assert_eq!(exec.command_lines(), vec!["sudo -n systemctl reload php8.3-fpm"]);
    }

    #[test]
    fn test_status_not_found() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond(
            "systemctl status",
            CommandOutput::failed(4, "Unit redis.service could not be found."),
        );
        let services = SystemdServiceControl::new(exec, false);
        assert!(matches!(services.status("redis"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_tail_logs() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond("journalctl", CommandOutput::ok("line1\nline2\n"));
        let services = SystemdServiceControl::new(exec.clone(), false);

        assert_eq!(services.tail_logs("nginx", 2).unwrap(), "line1\nline2\n");
        assert_eq!(exec.command_lines(), vec!["journalctl -u nginx -n 2 --no-pager"]);
    }

    #[test]
    fn test_rejects_injected_service_name() {
        let services = SandboxServiceControl;
        assert!(services.reload("nginx; rm -rf /").is_err());
        assert!(services.reload("nginx").unwrap().success());
    }
}
