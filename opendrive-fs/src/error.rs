use opendrive_core::{ApiErrorClass, OpenDriveError};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("setup error: {0}")]
    Setup(#[from] ConfigError),
    #[error("session rejected: {0}")]
    Auth(#[source] OpenDriveError),
    #[error("remote call failed: {0}")]
    Remote(#[source] OpenDriveError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hash type not supported")]
    HashUnsupported,
    #[error("root {parent_root:?} points at file {leaf:?}")]
    IsFile { parent_root: String, leaf: String },
    #[error("can't purge root directory")]
    CantPurgeRoot,
    #[error("list depth must be at least 1")]
    ZeroDepth,
}

impl From<OpenDriveError> for FsError {
    fn from(err: OpenDriveError) -> Self {
        match err.classification() {
            Some(ApiErrorClass::Auth) => FsError::Auth(err),
            _ => FsError::Remote(err),
        }
    }
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FsError::DirectoryNotFound(_) | FsError::ObjectNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
