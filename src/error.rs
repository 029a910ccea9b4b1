use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::job::JobFailure;
use crate::kobo::TransportError;

#[derive(Debug, Error)]
pub enum BifrostError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Job(#[from] JobFailure),

    #[error(transparent)]
    Precondition(#[from] Precondition),

    #[error("permission change on {asset_uid} was rejected: {detail}")]
    PermissionRejected {
        asset_uid: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("import finished without producing an asset: {0}")]
    ImportRejected(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A guard on the asset's state that the requested operation violates.
#[derive(Debug, Error)]
pub enum Precondition {
    #[error(
        "asset {asset_uid} is already deployed; run `bifrost redeploy {asset_uid}` to publish the latest version (server said: {detail})"
    )]
    AlreadyDeployed { asset_uid: String, detail: String },

    #[error("asset {asset_uid} has never been deployed; run `bifrost deploy {asset_uid}` first")]
    NotYetDeployed { asset_uid: String },

    #[error("asset {asset_uid} does not exist on the server")]
    AssetNotFound { asset_uid: String },
}

impl BifrostError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BifrostError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classifies the error for scripted consumers.
    pub fn kind(&self) -> FailureKind {
        match self {
            BifrostError::Transport(_) => FailureKind::Transport,
            BifrostError::Validation(_) | BifrostError::Encode(_) => FailureKind::Validation,
            BifrostError::Job(failure) => match failure {
                JobFailure::TimedOut { .. } => FailureKind::TimedOut,
                JobFailure::Cancelled => FailureKind::Cancelled,
                JobFailure::Transport(_) => FailureKind::Transport,
                _ => FailureKind::JobFailed,
            },
            BifrostError::Precondition(_) => FailureKind::PreconditionFailed,
            BifrostError::PermissionRejected { .. } => FailureKind::PermissionRejected,
            BifrostError::ImportRejected(_) => FailureKind::ImportRejected,
            BifrostError::Config(_) => FailureKind::Config,
            BifrostError::Io { .. } => FailureKind::Io,
        }
    }
}

/// Failure classes exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Validation,
    JobFailed,
    TimedOut,
    Cancelled,
    PreconditionFailed,
    PermissionRejected,
    ImportRejected,
    Config,
    Io,
}

impl FailureKind {
    /// Process exit status for this failure class.
    pub fn exit_code(self) -> u8 {
        match self {
            FailureKind::Io => 1,
            FailureKind::Validation | FailureKind::Config => 2,
            FailureKind::Transport => 3,
            FailureKind::JobFailed => 4,
            FailureKind::TimedOut => 5,
            FailureKind::PreconditionFailed => 6,
            FailureKind::PermissionRejected => 7,
            FailureKind::ImportRejected => 8,
            FailureKind::Cancelled => 130,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Transport => "Transport error",
            FailureKind::Validation => "Invalid input",
            FailureKind::JobFailed => "Job failed",
            FailureKind::TimedOut => "Timed out",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::PreconditionFailed => "Precondition failed",
            FailureKind::PermissionRejected => "Permission rejected",
            FailureKind::ImportRejected => "Import rejected",
            FailureKind::Config => "Configuration error",
            FailureKind::Io => "I/O error",
        };
        f.write_str(label)
    }
}

/// Tagged result of one operation, handed to the presentation layer.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success { data: T },
    Failed { kind: FailureKind, message: String },
}

impl<T> Outcome<T> {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success { .. } => 0,
            Outcome::Failed { kind, .. } => kind.exit_code(),
        }
    }
}

impl<T> From<Result<T, BifrostError>> for Outcome<T> {
    fn from(result: Result<T, BifrostError>) -> Self {
        match result {
            Ok(data) => Outcome::Success { data },
            Err(err) => Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}
