// src/certificate/mod.rs

//! Certificate lifecycle
//!
//! ```text
//! none ──► pending ──► active
//!             │  ▲        │
//!             ▼  │        │ renewal
//!           failed ◄──────┘ (via pending)
//! ```
//!
//! Entering `pending` requires the site's document root on disk; without it
//! the request fails as a precondition error and the issuer is never called.
//! A `pending` older than the issuance ceiling (timeout × attempts) is stale
//! and may be requested again.
//!
//! The lifecycle only computes [`SiteUpdate`]s and calls the issuer. Writing
//! the updates back and redeploying the proxy config after a successful
//! issuance is the caller's job (see [`crate::manager::SiteManager`]).

pub mod issuer;

pub use issuer::{
    CERTIFICATE_LIFETIME_DAYS, CertbotIssuer, CertificateIssuer, IssuedCertificate,
    SandboxIssuer,
};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::site::validate::validate_email;
use crate::site::{Site, SiteUpdate, TlsStatus};

/// Issuance attempts per request
pub const DEFAULT_ATTEMPTS: u32 = 2;

/// Drives certificate requests for sites
pub struct CertificateLifecycle {
    issuer: Arc<dyn CertificateIssuer>,
    contact_email: String,
    attempts: u32,
    issue_timeout: Duration,
}

impl CertificateLifecycle {
    pub fn new(issuer: Arc<dyn CertificateIssuer>, contact_email: &str) -> Self {
        Self {
            issuer,
            contact_email: contact_email.to_string(),
            attempts: DEFAULT_ATTEMPTS,
            issue_timeout: issuer::DEFAULT_ISSUE_TIMEOUT,
        }
    }

    /// Set the attempt budget (clamped to 1..=2)
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.clamp(1, DEFAULT_ATTEMPTS);
        self
    }

    /// Set the per-attempt ceiling used for stale-pending detection
    pub fn with_issue_timeout(mut self, timeout: Duration) -> Self {
        self.issue_timeout = timeout;
        self
    }

    /// How long a request may stay `pending` before it counts as stale
    pub fn pending_ceiling(&self) -> Duration {
        self.issue_timeout * self.attempts
    }

    /// True when a `pending` site has outlived the issuance ceiling
    pub fn is_stale(&self, site: &Site, now: DateTime<Utc>) -> bool {
        if site.tls_status != TlsStatus::Pending {
            return false;
        }
        match site.tls_pending_since {
            Some(since) => (now - since)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.pending_ceiling()),
            None => true,
        }
    }

    /// Check the transition into `pending` and return the update entering it
    pub fn begin(&self, site: &Site, now: DateTime<Utc>) -> Result<SiteUpdate> {
        site.validate()?;
        validate_email(&self.contact_email)?;

        if site.tls_status == TlsStatus::Pending && !self.is_stale(site, now) {
            return Err(Error::Precondition(format!(
                "certificate request for {} is already in progress",
                site.domain
            )));
        }

        let docroot = site.document_root();
        if !docroot.is_dir() {
            return Err(Error::Precondition(format!(
                "document root {} does not exist; deploy {} before requesting a certificate",
                docroot.display(),
                site.domain
            )));
        }

        if site.tls_status == TlsStatus::Pending {
            warn!("Retrying stale certificate request for {}", site.domain);
        }
        info!("Certificate for {}: {} -> pending", site.domain, site.tls_status);

        Ok(SiteUpdate {
            tls_status: Some(TlsStatus::Pending),
            tls_pending_since: Some(Some(now)),
            tls_last_error: Some(None),
            ..SiteUpdate::default()
        })
    }

    /// Call the issuer, spending at most the attempt budget
    ///
    /// There is no backoff between attempts beyond the issuer's own timeout.
    pub fn issue(&self, site: &Site) -> Result<IssuedCertificate> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.issuer.issue(&site.domain, &self.contact_email) {
                Ok(cert) => return Ok(cert),
                Err(e) => {
                    warn!(
                        "Certificate attempt {}/{} for {} failed: {}",
                        attempt, self.attempts, site.domain, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::ExternalService(format!("no certificate attempt made for {}", site.domain))
        }))
    }

    /// Update for an issued certificate
    ///
    /// Also sets `tls_desired`, so the redeploy that follows renders TLS.
    pub fn success_update(cert: &IssuedCertificate) -> SiteUpdate {
        SiteUpdate {
            tls_desired: Some(true),
            tls_status: Some(TlsStatus::Active),
            tls_pending_since: Some(None),
            tls_issued_at: Some(Some(cert.issued_at)),
            tls_expires_at: Some(Some(cert.expires_at)),
            tls_last_error: Some(None),
            ..SiteUpdate::default()
        }
    }

    /// Update for a failed request; `tls_desired` is left alone
    pub fn failure_update(error: &Error) -> SiteUpdate {
        SiteUpdate {
            tls_status: Some(TlsStatus::Failed),
            tls_pending_since: Some(None),
            tls_last_error: Some(Some(error.to_string())),
            ..SiteUpdate::default()
        }
    }
}
