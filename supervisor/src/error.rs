use crate::types::Pid;
use std::{io, path::PathBuf, result, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Preprocessing bundle not found. Dataset may not be fully preprocessed.")]
    ArtifactMissing { expected_path: PathBuf },
    #[error("Inference already running for this dataset")]
    AlreadyRunning { pid: Pid },
    #[error("No inference running for this dataset")]
    NotRunning,
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Preprocessing failed: {0}")]
    PreprocessFailed(String),
    #[error("Preprocessing timeout (>{}s)", .timeout.as_secs())]
    PreprocessTimeout { timeout: Duration },
    #[error("malformed metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("supervisor is no longer running")]
    Shutdown,
}

/// Discriminant callers branch on, e.g. to pick an HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    ArtifactMissing,
    AlreadyRunning,
    NotRunning,
    LaunchError,
    PreprocessFailed,
    PreprocessTimeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ArtifactMissing => "ARTIFACT_MISSING",
            ErrorKind::AlreadyRunning => "ALREADY_RUNNING",
            ErrorKind::NotRunning => "NOT_RUNNING",
            ErrorKind::LaunchError => "LAUNCH_ERROR",
            ErrorKind::PreprocessFailed => "PREPROCESS_FAILED",
            ErrorKind::PreprocessTimeout => "PREPROCESS_TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::InvalidInput(_) => ErrorKind::InvalidInput,
            SupervisorError::NotFound(_) => ErrorKind::NotFound,
            SupervisorError::ArtifactMissing { .. } => ErrorKind::ArtifactMissing,
            SupervisorError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            SupervisorError::NotRunning => ErrorKind::NotRunning,
            SupervisorError::Launch { .. } => ErrorKind::LaunchError,
            SupervisorError::PreprocessFailed(_) => ErrorKind::PreprocessFailed,
            SupervisorError::PreprocessTimeout { .. } => ErrorKind::PreprocessTimeout,
            SupervisorError::Metadata(_) | SupervisorError::Io(_) | SupervisorError::Shutdown => {
                ErrorKind::Unknown
            }
        }
    }

    pub(crate) fn dataset_not_found() -> Self {
        SupervisorError::NotFound("Dataset not found".into())
    }
}

pub type Result<T> = result::Result<T, SupervisorError>;
