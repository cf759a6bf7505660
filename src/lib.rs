// src/lib.rs

//! Sitewarden
//!
//! Per-site nginx and PHP-FPM configuration lifecycle for a single host.
//!
//! # Architecture
//!
//! - Sites are immutable records; operations return the fields to change and
//!   write them back once
//! - OS family adapters (sandbox, Debian, RHEL) resolve every path and
//!   service name, so nothing else branches on the OS
//! - Rendering is pure: same site and paths, same bytes
//! - Deployment runs render, write, validate, activate and reload in order,
//!   and a failed validation never touches the live configuration
//! - Certificates move through none, pending, active and failed; an issued
//!   certificate triggers a TLS redeploy
//! - Every external command goes through a `ProcessExecutor`

pub mod certificate;
pub mod config;
pub mod deploy;
mod error;
pub mod executor;
pub mod manager;
pub mod platform;
pub mod render;
pub mod service;
pub mod site;
pub mod store;

pub use certificate::{CertificateIssuer, CertificateLifecycle, IssuedCertificate};
pub use config::{Config, Environment};
pub use deploy::{ArtifactKind, DeployReport, DeployStage, Deployer};
pub use error::{Error, ErrorKind, Result};
pub use executor::{CommandOutput, CommandSpec, ProcessExecutor, RecordingExecutor, SystemExecutor};
pub use manager::{CertificateOutcome, SiteManager};
pub use platform::{OsFamily, OsFamilyAdapter, ResolvedPaths, select_adapter};
pub use render::{RenderedArtifact, render_pool_config, render_proxy_config};
pub use service::{ServiceControl, ServiceStatus};
pub use site::{PhpSettings, ProxyStatus, RuntimeKind, Site, SiteUpdate, TlsStatus};
pub use store::{MemoryStore, SiteStore, SqliteStore};
