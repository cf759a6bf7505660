// tests/common/mod.rs

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::Utc;
use sitewarden::certificate::{CertificateIssuer, CertificateLifecycle, IssuedCertificate};
use sitewarden::platform::{DebianAdapter, SandboxAdapter};
use sitewarden::service::{SandboxServiceControl, SystemdServiceControl};
use sitewarden::{Deployer, Error, MemoryStore, RecordingExecutor, Result, SiteManager, SiteStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

pub const CONTACT_EMAIL: &str = "ops@example.com";

type IssueHook = Box<dyn Fn(&str) + Send + Sync>;

/// Issuer that fails a fixed number of times before succeeding
pub struct ScriptedIssuer {
    failures: u32,
    calls: AtomicU32,
    on_issue: Mutex<Option<IssueHook>>,
}

impl ScriptedIssuer {
    pub fn succeeding() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            on_issue: Mutex::new(None),
        }
    }

    /// Run `hook` with the domain on every call, before answering
    pub fn on_issue(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_issue.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateIssuer for ScriptedIssuer {
    fn issue(&self, domain: &str, _contact_email: &str) -> Result<IssuedCertificate> {
        if let Some(hook) = self.on_issue.lock().unwrap().as_ref() {
            hook(domain);
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::ExternalService(format!(
                "rate limited while validating {}",
                domain
            )));
        }
        Ok(IssuedCertificate::new(domain, Utc::now()))
    }
}

/// A manager wired to test doubles, plus handles to inspect them
///
/// Keep the struct alive for the duration of the test: the TempDir holds
/// the staging root, the site roots and the lock directory.
pub struct Harness {
    pub temp: TempDir,
    pub manager: Arc<SiteManager>,
    pub store: Arc<MemoryStore>,
    pub executor: Arc<RecordingExecutor>,
    pub issuer: Arc<ScriptedIssuer>,
}

impl Harness {
    /// Sandbox adapter: no commands, everything under the TempDir
    pub fn sandbox(issuer: ScriptedIssuer) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let deployer = Deployer::new(
            Arc::new(SandboxAdapter::new(temp.path().join("server"))),
            executor.clone(),
            Arc::new(SandboxServiceControl),
            temp.path().join("locks"),
        );
        Self::assemble(temp, deployer, executor, issuer)
    }

    /// Debian layout under a staging root, with syntax checks and reloads
    /// going through the recording executor
    pub fn staged(issuer: ScriptedIssuer) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let deployer = Deployer::new(
            Arc::new(DebianAdapter::with_root(temp.path().join("root"))),
            executor.clone(),
            Arc::new(SystemdServiceControl::new(executor.clone(), false)),
            temp.path().join("locks"),
        );
        Self::assemble(temp, deployer, executor, issuer)
    }

    fn assemble(
        temp: TempDir,
        deployer: Deployer,
        executor: Arc<RecordingExecutor>,
        issuer: ScriptedIssuer,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let issuer = Arc::new(issuer);
        let lifecycle = CertificateLifecycle::new(issuer.clone(), CONTACT_EMAIL);
        let manager = Arc::new(SiteManager::new(
            store.clone() as Arc<dyn SiteStore>,
            Arc::new(deployer),
            Arc::new(lifecycle),
        ));

        Self {
            temp,
            manager,
            store,
            executor,
            issuer,
        }
    }

    /// Create a site root (and its document root) inside the TempDir
    pub fn site_root(&self, name: &str, subpath: &str) -> PathBuf {
        let root = self.temp.path().join("srv").join(name);
        std::fs::create_dir_all(root.join(subpath)).unwrap();
        root
    }

    pub fn deployer(&self) -> &Deployer {
        self.manager.deployer()
    }
}
