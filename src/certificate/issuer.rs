// src/certificate/issuer.rs

//! Certificate issuers
//!
//! [`CertbotIssuer`] shells out to certbot's nginx plugin through the process
//! executor. Issuance includes the ACME domain-validation round trips, so it
//! gets its own long timeout rather than the executor's default.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::executor::{CommandSpec, ProcessExecutor};

/// Lifetime of a certificate from the ACME issuer
pub const CERTIFICATE_LIFETIME_DAYS: i64 = 90;

/// Default ceiling for one issuance attempt
pub const DEFAULT_ISSUE_TIMEOUT: Duration = Duration::from_secs(300);

/// A certificate that was issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub domain: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedCertificate {
    /// Certificate issued at `issued_at` with the standard lifetime
    pub fn new(domain: &str, issued_at: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            issued_at,
            expires_at: issued_at + ChronoDuration::days(CERTIFICATE_LIFETIME_DAYS),
        }
    }
}

/// Obtains a certificate for a domain
///
/// Slow and opaque: a call may take minutes and either succeeds or fails
/// with the provider's detail.
pub trait CertificateIssuer: Send + Sync {
    fn issue(&self, domain: &str, contact_email: &str) -> Result<IssuedCertificate>;
}

/// Issues certificates with `certbot certonly --nginx`
pub struct CertbotIssuer {
    executor: Arc<dyn ProcessExecutor>,
    elevate: bool,
    timeout: Duration,
}

impl CertbotIssuer {
    pub fn new(executor: Arc<dyn ProcessExecutor>, elevate: bool) -> Self {
        Self {
            executor,
            elevate,
            timeout: DEFAULT_ISSUE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a `certbot` binary is on the PATH
    pub fn is_installed() -> bool {
        which::which("certbot").is_ok()
    }

    fn command(&self, domain: &str, contact_email: &str) -> CommandSpec {
        CommandSpec::new("certbot")
            .args([
                "certonly",
                "--nginx",
                "-d",
                domain,
                "--non-interactive",
                "--agree-tos",
                "--email",
                contact_email,
            ])
            .timeout(self.timeout)
            .elevated(self.elevate)
    }
}

impl CertificateIssuer for CertbotIssuer {
    fn issue(&self, domain: &str, contact_email: &str) -> Result<IssuedCertificate> {
        let spec = self.command(domain, contact_email);
        info!("Requesting certificate for {}", domain);

        let output = self.executor.run(&spec)?;
        if output.success() {
            info!("Certificate issued for {}", domain);
            return Ok(IssuedCertificate::new(domain, Utc::now()));
        }

        let detail = if output.timed_out {
            format!(
                "certificate request for {} timed out after {} seconds",
                domain,
                self.timeout.as_secs()
            )
        } else {
            let text = output.combined();
            if text.is_empty() {
                format!("certificate request for {} failed", domain)
            } else {
                text
            }
        };
        warn!("Certificate request for {} failed: {}", domain, detail);
        Err(Error::ExternalService(detail))
    }
}

/// Issuer for the sandbox: logs and reports success
#[derive(Debug, Default, Clone)]
pub struct SandboxIssuer;

impl CertificateIssuer for SandboxIssuer {
    fn issue(&self, domain: &str, contact_email: &str) -> Result<IssuedCertificate> {
        info!(
            "[SANDBOX] certificate for {} ({}) (skipped)",
            domain, contact_email
        );
        Ok(IssuedCertificate::new(domain, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, RecordingExecutor};

    #[test]
    fn test_certbot_command_line() {
        let exec = Arc::new(RecordingExecutor::new());
        let issuer = CertbotIssuer::new(exec.clone(), true);

        let cert = issuer.issue("app.example.com", "ops@example.com").unwrap();
        assert_eq!(cert.domain, "app.example.com");
        assert_eq!((cert.expires_at - cert.issued_at).num_days(), 90);

        assert_eq!(
            exec.command_lines(),
            vec![
                "sudo -n certbot certonly --nginx -d app.example.com --non-interactive \
                 --agree-tos --email ops@example.com"
            ]
        );
        assert_eq!(exec.commands()[0].timeout, Some(DEFAULT_ISSUE_TIMEOUT));
    }

    #[test]
    fn test_certbot_failure_carries_provider_detail() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond(
            "certbot",
            CommandOutput::failed(1, "too many certificates already issued"),
        );
        let issuer = CertbotIssuer::new(exec, false);

        let err = issuer.issue("app.example.com", "ops@example.com").unwrap_err();
        assert!(matches!(err, Error::ExternalService(_)));
        assert!(err.to_string().contains("too many certificates"));
    }

    #[test]
    fn test_certbot_timeout() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond("certbot", CommandOutput::timed_out());
        let issuer = CertbotIssuer::new(exec, false).with_timeout(Duration::from_secs(5));

        let err = issuer.issue("app.example.com", "ops@example.com").unwrap_err();
        assert!(err.to_string().contains("timed out after 5 seconds"));
    }
}
