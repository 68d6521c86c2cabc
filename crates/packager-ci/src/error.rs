//! Error types for packager-ci

use packager_client::ClientError;
use packager_core::{ConfigurationError, ProcessError};
use thiserror::Error;

/// A build could not be carried out. A build that ran and exited non-zero
/// is a failed [`crate::BuildResult`], not an error.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Configuration cannot be built as declared (e.g. no image)
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Container or build process could not be run
    #[error("build process error: {0}")]
    Process(#[from] ProcessError),

    /// Package client failed before producing a result
    #[error("package client error: {0}")]
    Client(#[from] ClientError),

    /// `<runtime> pull` failed
    #[error("pulling image {image} failed with exit code {exit_code}")]
    PullFailed { image: String, exit_code: i32 },

    /// Scratch files for the build could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Publishing a built package failed.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Upload requested but no credentials available
    #[error("no password available to log in as {0}")]
    MissingCredentials(String),

    /// Remote registration, login or transfer failed
    #[error("upload failed: {0}")]
    Client(#[from] ClientError),
}

/// Searching or pruning a remote failed.
#[derive(Error, Debug)]
#[error("query on remote {remote} for {pattern} failed: {source}")]
pub struct RemoteQueryError {
    pub remote: String,
    pub pattern: String,
    #[source]
    pub source: ClientError,
}

/// Top-level error of a packager run.
#[derive(Error, Debug)]
pub enum PackagerError {
    /// Invalid settings, matrix or CI context; raised before any build
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Client preparation step (config install, remote registration) failed
    #[error("{step} failed: {source}")]
    Setup {
        step: &'static str,
        #[source]
        source: ClientError,
    },
}

/// Result type for packager operations.
pub type PackagerResult<T> = std::result::Result<T, PackagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_passes_through() {
        let err: PackagerError = ConfigurationError::NoCompiler.into();
        assert!(err.to_string().contains("no compiler versions configured"));
    }

    #[test]
    fn test_setup_error_names_step() {
        let err = PackagerError::Setup {
            step: "config install",
            source: ClientError::RemoteNotFound("remote0".to_string()),
        };
        assert_eq!(err.to_string(), "config install failed: remote not found: remote0");
    }

    #[test]
    fn test_remote_query_error_display() {
        let err = RemoteQueryError {
            remote: "upload_repo".to_string(),
            pattern: "zlib*".to_string(),
            source: ClientError::RemoteNotFound("upload_repo".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "query on remote upload_repo for zlib* failed: remote not found: upload_repo"
        );
    }
}
