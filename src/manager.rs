// src/manager.rs

//! Site operations with store write-back
//!
//! [`SiteManager`] ties the store, the deployment pipeline and the
//! certificate lifecycle together. Every operation reads the current site
//! record, runs on that immutable snapshot and writes its result back in a
//! single [`SiteStore::update`]. A certificate request writes twice because
//! entering `pending` is its own transition, visible while the issuer runs.
//!
//! Anything that deploys reads the record while holding the domain's deploy
//! lock and writes back before releasing it, so runs queued on the same
//! domain each render the record the previous run left behind.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::certificate::{
    CertbotIssuer, CertificateIssuer, CertificateLifecycle, IssuedCertificate, SandboxIssuer,
};
use crate::config::Config;
use crate::deploy::{DeployReport, Deployer, DomainLock, TeardownReport, deploy_update};
use crate::error::{Error, Result};
use crate::executor::{ProcessExecutor, SystemExecutor};
use crate::platform::{OsFamilyAdapter, select_adapter};
use crate::render::RenderedArtifact;
use crate::service::{SandboxServiceControl, ServiceControl, SystemdServiceControl};
use crate::site::validate::validate_php_settings;
use crate::site::{PhpSettings, ProxyStatus, Site, SiteUpdate};
use crate::store::{SiteStore, SqliteStore};

/// Outcome of a certificate request that reached the issuer successfully
#[derive(Debug)]
pub struct CertificateOutcome {
    /// Site record after write-back
    pub site: Site,
    pub certificate: IssuedCertificate,
    /// Set when the TLS redeploy failed; the certificate stays active
    pub redeploy_error: Option<Error>,
}

/// Orchestrates site operations
pub struct SiteManager {
    store: Arc<dyn SiteStore>,
    deployer: Arc<Deployer>,
    lifecycle: Arc<CertificateLifecycle>,
}

impl SiteManager {
    pub fn new(
        store: Arc<dyn SiteStore>,
        deployer: Arc<Deployer>,
        lifecycle: Arc<CertificateLifecycle>,
    ) -> Self {
        Self {
            store,
            deployer,
            lifecycle,
        }
    }

    /// Build the production or sandbox stack selected by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let adapter: Arc<dyn OsFamilyAdapter> = Arc::from(select_adapter(config)?);
        let executor: Arc<dyn ProcessExecutor> =
            Arc::new(SystemExecutor::new().with_timeout(config.command_timeout()));
        let elevate = adapter.needs_privilege();

        let (services, issuer): (Arc<dyn ServiceControl>, Arc<dyn CertificateIssuer>) =
            if adapter.is_sandboxed() {
                (Arc::new(SandboxServiceControl), Arc::new(SandboxIssuer))
            } else {
                if !CertbotIssuer::is_installed() {
                    warn!("certbot not found on PATH; certificate requests will fail");
                }
                (
                    Arc::new(
                        SystemdServiceControl::new(executor.clone(), elevate)
                            .with_timeout(config.command_timeout()),
                    ),
                    Arc::new(
                        CertbotIssuer::new(executor.clone(), elevate)
                            .with_timeout(config.issue_timeout()),
                    ),
                )
            };

        info!(
            "Using {} adapter rooted at {}",
            adapter.family(),
            adapter.root().display()
        );

        let store = Arc::new(SqliteStore::open(config.effective_db_path()?)?);
        let deployer = Deployer::new(adapter, executor, services, config.effective_lock_dir()?)
            .with_timeout(config.command_timeout());
        let lifecycle = CertificateLifecycle::new(issuer, &config.contact_email)
            .with_attempts(config.issue_attempts)
            .with_issue_timeout(config.issue_timeout());

        Ok(Self::new(store, Arc::new(deployer), Arc::new(lifecycle)))
    }

    pub fn store(&self) -> &dyn SiteStore {
        self.store.as_ref()
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    /// Register a new site
    pub fn add_site(&self, site: &Site) -> Result<()> {
        site.validate()?;
        self.store.insert(site)?;
        info!("Added site {} ({})", site.domain, site.runtime);
        Ok(())
    }

    pub fn get_site(&self, domain: &str) -> Result<Site> {
        self.store.get(domain)
    }

    pub fn list_sites(&self) -> Result<Vec<Site>> {
        self.store.list()
    }

    /// Render the artifacts of a stored site without deploying them
    pub fn render(&self, domain: &str) -> Result<Vec<RenderedArtifact>> {
        self.deployer.render(&self.store.get(domain)?)
    }

    /// Deploy a site and record the outcome in `proxy_status`
    pub fn deploy(&self, domain: &str) -> Result<DeployReport> {
        let lock = self.deployer.lock(domain)?;
        let site = self.store.get(domain)?;
        self.deploy_with(&site, SiteUpdate::default(), &lock)
    }

    /// Change a PHP site's overrides and redeploy its pool
    ///
    /// The new settings are kept even when the deploy fails.
    pub fn configure_php(&self, domain: &str, settings: PhpSettings) -> Result<DeployReport> {
        validate_php_settings(&settings)?;
        let lock = self.deployer.lock(domain)?;
        let site = self.store.get(domain)?;
        site.php_version()?;

        let change = SiteUpdate {
            php_settings: Some(settings),
            ..SiteUpdate::default()
        };
        self.deploy_with(&site.with_update(&change), change, &lock)
    }

    /// Deploy `site` and write `change` back with the outcome
    fn deploy_with(
        &self,
        site: &Site,
        change: SiteUpdate,
        lock: &DomainLock,
    ) -> Result<DeployReport> {
        let outcome = self.deployer.deploy_locked(site, lock);
        if let Err(e) = &outcome {
            warn!("Deploy of {} failed: {}", site.domain, e);
        }

        self.store
            .update(&site.domain, &change.merge(deploy_update(&outcome)))?;
        outcome
    }

    /// Remove a site's artifacts and mark its proxy inactive
    pub fn teardown(&self, domain: &str) -> Result<TeardownReport> {
        let lock = self.deployer.lock(domain)?;
        let site = self.store.get(domain)?;
        let report = self.deployer.teardown_locked(&site, &lock)?;

        self.store.update(
            domain,
            &SiteUpdate {
                proxy_status: Some(ProxyStatus::Inactive),
                proxy_last_error: Some(None),
                ..SiteUpdate::default()
            },
        )?;
        Ok(report)
    }

    /// Tear down a site's artifacts, then delete its record
    ///
    /// Artifact cleanup is best-effort: its failures are logged and the
    /// record is deleted regardless.
    pub fn remove_site(&self, domain: &str) -> Result<TeardownReport> {
        let lock = self.deployer.lock(domain)?;
        let site = self.store.get(domain)?;

        let report = match self.deployer.teardown_locked(&site, &lock) {
            Ok(report) => report,
            Err(e) => {
                warn!("Teardown of {} failed, removing record anyway: {}", domain, e);
                TeardownReport {
                    warnings: vec![e.to_string()],
                    ..TeardownReport::default()
                }
            }
        };

        self.store.remove(domain)?;
        info!("Removed site {}", domain);
        Ok(report)
    }

    /// Run a certificate request to completion
    ///
    /// Blocks for as long as the issuer takes; see
    /// [`spawn_certificate_request`](Self::spawn_certificate_request) for
    /// callers on an async runtime. A failed issuance is written back as
    /// `failed` before the error is returned.
    pub fn request_certificate(&self, domain: &str) -> Result<CertificateOutcome> {
        let site = self.store.get(domain)?;
        let pending = self.lifecycle.begin(&site, Utc::now())?;
        let site = self.store.update(domain, &pending)?;

        let cert = match self.lifecycle.issue(&site) {
            Ok(cert) => cert,
            Err(e) => {
                warn!("Certificate request for {} failed: {}", domain, e);
                self.store
                    .update(domain, &CertificateLifecycle::failure_update(&e))?;
                return Err(e);
            }
        };

        // the issuer may have run for minutes; render what the store holds now
        let issued = CertificateLifecycle::success_update(&cert);
        let (redeploy, _lock) = match self.deployer.lock(domain) {
            Ok(lock) => {
                let redeploy = self.store.get(domain).and_then(|current| {
                    self.deployer
                        .deploy_locked(&current.with_update(&issued), &lock)
                });
                (redeploy, Some(lock))
            }
            Err(e) => (Err(e), None),
        };
        if let Err(e) = &redeploy {
            // the certificate is real; only the proxy status records the failure
            warn!(
                "Certificate for {} is active but the TLS redeploy failed: {}",
                domain, e
            );
        }

        let site = self
            .store
            .update(domain, &issued.merge(deploy_update(&redeploy)))?;
        info!(
            "Certificate active for {} (proxy {})",
            domain, site.proxy_status
        );

        Ok(CertificateOutcome {
            site,
            certificate: cert,
            redeploy_error: redeploy.err(),
        })
    }

    /// Run a certificate request on the blocking thread pool
    ///
    /// Dropping the handle does not cancel the request. A caller that gives
    /// up early leaves the site `pending`, and the lifecycle lets it be
    /// requested again once the issuance ceiling has passed.
    pub fn spawn_certificate_request(
        self: &Arc<Self>,
        domain: &str,
    ) -> tokio::task::JoinHandle<Result<CertificateOutcome>> {
        let manager = Arc::clone(self);
        let domain = domain.to_string();
        tokio::task::spawn_blocking(move || manager.request_certificate(&domain))
    }
}
