// src/deploy/mod.rs

//! Deployment pipeline
//!
//! Each artifact of a site goes through five stages in strict order:
//!
//! 1. **Render** the config text from the current site record
//! 2. **Write** it to the "available" location (never the enabled copy)
//! 3. **Validate** the daemon's whole active configuration set
//! 4. **Activate** it (symlink into "enabled" for the proxy; the pool
//!    directory include already activates a pool)
//! 5. **Reload** the daemon without dropping connections
//!
//! The first failing stage stops the run and is reported as
//! [`Error::Deploy`]. A failed validation puts back the previous content of
//! the file, so whatever was live before the run is still live after it.
//!
//! PHP sites deploy their pool before their proxy config, so the socket the
//! proxy forwards to exists by the time the proxy reloads.
//!
//! Runs for the same domain are serialized by a [`DomainLock`] held for the
//! whole run.

pub mod lock;
pub mod writer;

pub use crate::render::ArtifactKind;
pub use lock::DomainLock;
pub use writer::{ArtifactWriter, rejected_path};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::executor::{DEFAULT_TIMEOUT, ProcessExecutor};
use crate::platform::{OsFamilyAdapter, ResolvedPaths};
use crate::render::{RenderedArtifact, pool_artifact, proxy_artifact};
use crate::service::ServiceControl;
use crate::site::validate::validate_domain;
use crate::site::{ProxyStatus, RuntimeKind, Site, SiteUpdate};

/// Pipeline stage, in execution order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeployStage {
    Render,
    Write,
    Validate,
    Activate,
    Reload,
}

/// One artifact that made it through all stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// False when the file already had the rendered content
    pub changed: bool,
}

/// Result of a successful site deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub domain: String,
    pub artifacts: Vec<DeployedArtifact>,
    /// Whether the proxy config carries the TLS listener
    pub tls: bool,
}

impl DeployReport {
    /// True when any artifact's content changed
    pub fn changed(&self) -> bool {
        self.artifacts.iter().any(|a| a.changed)
    }
}

/// Site fields to write back after a deploy attempt
pub fn deploy_update(outcome: &Result<DeployReport>) -> SiteUpdate {
    match outcome {
        Ok(_) => SiteUpdate {
            proxy_status: Some(ProxyStatus::Active),
            proxy_last_error: Some(None),
            ..SiteUpdate::default()
        },
        Err(e) => SiteUpdate {
            proxy_status: Some(ProxyStatus::Failed),
            proxy_last_error: Some(Some(e.to_string())),
            ..SiteUpdate::default()
        },
    }
}

/// Result of a teardown; every removal is best-effort
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: Vec<PathBuf>,
    /// Failures that were logged and skipped
    pub warnings: Vec<String>,
}

/// Runs the deployment pipeline against one OS family adapter
pub struct Deployer {
    adapter: Arc<dyn OsFamilyAdapter>,
    executor: Arc<dyn ProcessExecutor>,
    services: Arc<dyn ServiceControl>,
    writer: ArtifactWriter,
    lock_dir: PathBuf,
    timeout: Duration,
}

impl Deployer {
    pub fn new(
        adapter: Arc<dyn OsFamilyAdapter>,
        executor: Arc<dyn ProcessExecutor>,
        services: Arc<dyn ServiceControl>,
        lock_dir: impl Into<PathBuf>,
    ) -> Self {
        let writer = if adapter.needs_privilege() {
            ArtifactWriter::privileged(executor.clone())
        } else {
            ArtifactWriter::direct(executor.clone())
        };

        Self {
            adapter,
            executor,
            services,
            writer,
            lock_dir: lock_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the timeout for syntax checks and privileged file commands
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.writer = self.writer.with_timeout(timeout);
        self.timeout = timeout;
        self
    }

    pub fn adapter(&self) -> &dyn OsFamilyAdapter {
        self.adapter.as_ref()
    }

    pub fn services(&self) -> &Arc<dyn ServiceControl> {
        &self.services
    }

    /// Resolve every artifact location for `site`
    pub fn resolve(&self, site: &Site) -> Result<ResolvedPaths> {
        self.adapter.resolve(site)
    }

    /// Render all artifacts of `site` without touching the filesystem
    pub fn render(&self, site: &Site) -> Result<Vec<RenderedArtifact>> {
        let paths = self.resolve(site)?;
        let mut artifacts = Vec::with_capacity(2);
        if site.runtime == RuntimeKind::PhpApp {
            artifacts.push(pool_artifact(site, &paths)?);
        }
        artifacts.push(proxy_artifact(site, &paths)?);
        Ok(artifacts)
    }

    /// Take the deploy lock of `domain`, blocking until it is free
    ///
    /// Callers that read the site record before deploying it should read
    /// it while holding this lock, so the last run always renders the
    /// latest record.
    pub fn lock(&self, domain: &str) -> Result<DomainLock> {
        validate_domain(domain)?;
        DomainLock::acquire(&self.lock_dir, domain)
    }

    /// Deploy the pool (PHP sites) and then the proxy config of `site`
    pub fn deploy(&self, site: &Site) -> Result<DeployReport> {
        let lock = self.lock(&site.domain)?;
        self.deploy_locked(site, &lock)
    }

    /// [`deploy`](Self::deploy) under a lock the caller already holds
    pub fn deploy_locked(&self, site: &Site, lock: &DomainLock) -> Result<DeployReport> {
        debug!("Deploying under {}", lock.path().display());
        let paths = self
            .resolve(site)
            .map_err(|e| e.at_stage(ArtifactKind::Proxy, DeployStage::Render))?;

        info!("Deploying {} ({})", site.domain, site.runtime);
        let mut artifacts = Vec::with_capacity(2);

        if site.runtime == RuntimeKind::PhpApp {
            let pool = pool_artifact(site, &paths)
                .map_err(|e| e.at_stage(ArtifactKind::Pool, DeployStage::Render))?;
            artifacts.push(self.run_pipeline(&pool, &paths)?);
        }

        let proxy = proxy_artifact(site, &paths)
            .map_err(|e| e.at_stage(ArtifactKind::Proxy, DeployStage::Render))?;
        artifacts.push(self.run_pipeline(&proxy, &paths)?);

        info!("Deployed {}", site.domain);
        Ok(DeployReport {
            domain: site.domain.clone(),
            artifacts,
            tls: site.tls_enabled(),
        })
    }

    fn run_pipeline(
        &self,
        artifact: &RenderedArtifact,
        paths: &ResolvedPaths,
    ) -> Result<DeployedArtifact> {
        let kind = artifact.kind;
        let path = &artifact.path;

        // Write
        let previous = self
            .writer
            .read(path)
            .map_err(|e| e.at_stage(kind, DeployStage::Write))?;
        let changed = previous.as_deref() != Some(artifact.content.as_str());
        if changed {
            self.writer
                .write(path, &artifact.content)
                .map_err(|e| e.at_stage(kind, DeployStage::Write))?;
            info!("Wrote {} config {}", kind, path.display());
        } else {
            debug!("{} unchanged", path.display());
        }

        // Validate
        if let Err(e) = self.validate(kind, paths) {
            if changed {
                if let Err(restore) = self.contain_rejected(artifact, previous.as_deref()) {
                    error!("Failed to restore {}: {}", path.display(), restore);
                    return Err(Error::IoError(format!(
                        "{}; restoring the previous {} config failed: {}",
                        e, kind, restore
                    ))
                    .at_stage(kind, DeployStage::Validate));
                }
            }
            return Err(e.at_stage(kind, DeployStage::Validate));
        }

        // Activate
        self.activate(kind, paths)
            .map_err(|e| e.at_stage(kind, DeployStage::Activate))?;

        // Reload
        self.reload(kind, paths)
            .map_err(|e| e.at_stage(kind, DeployStage::Reload))?;

        Ok(DeployedArtifact {
            kind,
            path: path.clone(),
            changed,
        })
    }

    fn validate(&self, kind: ArtifactKind, paths: &ResolvedPaths) -> Result<()> {
        let check = match kind {
            ArtifactKind::Proxy => self.adapter.proxy_check_command(),
            ArtifactKind::Pool => self.adapter.pool_check_command(&paths.pool()?.version),
        };

        let Some(check) = check else {
            info!("[SANDBOX] {} syntax check (skipped)", kind);
            return Ok(());
        };

        let spec = check
            .timeout(self.timeout)
            .elevated(self.adapter.needs_privilege());
        let output = self.executor.run(&spec)?;
        if output.success() {
            debug!("{} syntax check passed", kind);
            Ok(())
        } else {
            Err(Error::ValidationFailed(output.failure_detail(&spec)))
        }
    }

    /// Take a rejected render out of the active configuration set
    ///
    /// With a previous version the old content goes back in place first,
    /// then the rejected text is kept as `<file>.rejected` if that write
    /// works. Without one, a proxy file stays in "available" (it was never
    /// linked) while a pool file is renamed, because the pool directory
    /// include would load it. An error means the rejected render is still
    /// in the active set.
    fn contain_rejected(&self, artifact: &RenderedArtifact, previous: Option<&str>) -> Result<()> {
        let path = &artifact.path;
        let rejected = rejected_path(path);

        match previous {
            Some(previous) => {
                self.writer.write(path, previous)?;
                match self.writer.write(&rejected, &artifact.content) {
                    Ok(()) => warn!(
                        "Restored {}; rejected config kept at {}",
                        path.display(),
                        rejected.display()
                    ),
                    Err(e) => warn!(
                        "Restored {}; could not keep rejected config at {}: {}",
                        path.display(),
                        rejected.display(),
                        e
                    ),
                }
            }
            None if artifact.kind == ArtifactKind::Pool => {
                self.writer.rename(path, &rejected)?;
                warn!("Moved rejected pool config to {}", rejected.display());
            }
            None => warn!("Rejected config left unlinked at {}", path.display()),
        }
        Ok(())
    }

    fn activate(&self, kind: ArtifactKind, paths: &ResolvedPaths) -> Result<()> {
        match kind {
            ArtifactKind::Proxy => self
                .writer
                .symlink(&paths.proxy_available, &paths.proxy_enabled)
                .map_err(|e| Error::ActivationFailed(e.to_string())),
            ArtifactKind::Pool => {
                debug!("Pool {} is active through its directory include", paths.pool()?.name);
                Ok(())
            }
        }
    }

    fn reload(&self, kind: ArtifactKind, paths: &ResolvedPaths) -> Result<()> {
        let service = match kind {
            ArtifactKind::Proxy => paths.proxy_service.as_str(),
            ArtifactKind::Pool => paths.pool()?.service_name.as_str(),
        };

        let output = self
            .services
            .reload(service)
            .map_err(|e| Error::ReloadFailed(e.to_string()))?;
        if output.success() {
            debug!("Reloaded {}", service);
            Ok(())
        } else {
            let detail = output.combined();
            Err(Error::ReloadFailed(if detail.is_empty() {
                format!("{} did not reload", service)
            } else {
                format!("{}: {}", service, detail)
            }))
        }
    }

    /// Disable and delete the artifacts of `site`
    ///
    /// Missing files are not errors and removal failures are logged, so this
    /// only fails when the site is invalid or its lock cannot be taken.
    pub fn teardown(&self, site: &Site) -> Result<TeardownReport> {
        let lock = self.lock(&site.domain)?;
        self.teardown_locked(site, &lock)
    }

    /// [`teardown`](Self::teardown) under a lock the caller already holds
    pub fn teardown_locked(&self, site: &Site, lock: &DomainLock) -> Result<TeardownReport> {
        debug!("Tearing down under {}", lock.path().display());
        let paths = self.resolve(site)?;
        info!("Tearing down {}", site.domain);

        let mut report = TeardownReport::default();

        let mut targets: Vec<&Path> = vec![&paths.proxy_enabled, &paths.proxy_available];
        let pool_config = paths.pool.as_ref().map(|p| p.config_path.clone());
        if let Some(config) = &pool_config {
            targets.push(config);
        }
        let rejected: Vec<PathBuf> = targets.iter().skip(1).map(|p| rejected_path(p)).collect();
        targets.extend(rejected.iter().map(PathBuf::as_path));

        for path in targets {
            match self.writer.remove(path) {
                Ok(true) => report.removed.push(path.to_path_buf()),
                Ok(false) => debug!("{} already absent", path.display()),
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.warnings.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        let mut services = vec![paths.proxy_service.clone()];
        if let Some(pool) = &paths.pool {
            services.push(pool.service_name.clone());
        }
        for service in services {
            match self.services.reload(&service) {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    warn!("Reload of {} failed: {}", service, out.combined());
                    report
                        .warnings
                        .push(format!("reload {}: {}", service, out.combined()));
                }
                Err(e) => {
                    warn!("Reload of {} failed: {}", service, e);
                    report.warnings.push(format!("reload {}: {}", service, e));
                }
            }
        }

        Ok(report)
    }
}
