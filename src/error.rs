// src/error.rs

//! Error types for sitewarden
//!
//! Every stage of the deployment pipeline and the certificate lifecycle
//! returns one of these variants. A failed deploy is wrapped in
//! [`Error::Deploy`], which keeps the artifact and stage that failed next to
//! the stage's own error.

use crate::deploy::{ArtifactKind, DeployStage};
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering, deploying or certifying a site
#[derive(Error, Debug)]
pub enum Error {
    /// A required Site field is missing or fails the allow-list
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external precondition is not met yet (e.g. document root missing)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Write or permission failure reported by a privileged helper
    #[error("I/O error: {0}")]
    IoError(String),

    /// The daemon's syntax check rejected the active configuration set
    #[error("configuration test failed: {0}")]
    ValidationFailed(String),

    /// Enabling the artifact failed
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// The daemon did not accept the reload signal
    #[error("reload failed: {0}")]
    ReloadFailed(String),

    /// Certificate issuer or service-control command failed or timed out
    #[error("external service error: {0}")]
    ExternalService(String),

    /// No site record for this domain
    #[error("site not found: {0}")]
    NotFound(String),

    /// Site already registered
    #[error("site already exists: {0}")]
    AlreadyExists(String),

    /// Site store failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration file or flag is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// A deployment pipeline run stopped at `stage`
    #[error("{artifact} deploy failed at {stage} stage: {source}")]
    Deploy {
        artifact: ArtifactKind,
        stage: DeployStage,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Precondition,
    Io,
    Validation,
    Activation,
    Reload,
    ExternalService,
    NotFound,
    Storage,
    Config,
}

impl Error {
    /// Wrap a stage error with the artifact and stage it came from
    pub fn at_stage(self, artifact: ArtifactKind, stage: DeployStage) -> Self {
        Self::Deploy {
            artifact,
            stage,
            source: Box::new(self),
        }
    }

    /// Classify this error; a deploy failure reports its inner error's kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::Input,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Io(_) | Self::IoError(_) => ErrorKind::Io,
            Self::ValidationFailed(_) => ErrorKind::Validation,
            Self::ActivationFailed(_) => ErrorKind::Activation,
            Self::ReloadFailed(_) => ErrorKind::Reload,
            Self::ExternalService(_) => ErrorKind::ExternalService,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::Database(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
            Self::Deploy { source, .. } => source.kind(),
        }
    }

    /// The pipeline stage that failed, if this is a deploy failure
    pub fn stage(&self) -> Option<DeployStage> {
        match self {
            Self::Deploy { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether repeating the same operation unchanged may succeed
    ///
    /// Input, precondition and validation failures need an outside change
    /// first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Io | ErrorKind::Reload | ErrorKind::Activation | ErrorKind::ExternalService
        )
    }
}
