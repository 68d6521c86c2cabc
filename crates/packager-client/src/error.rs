//! Error types for packager-client

use packager_core::ProcessError;
use thiserror::Error;

/// Errors raised by a [`crate::PackageClient`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The client executable could not be run
    #[error("client process error: {0}")]
    Process(#[from] ProcessError),

    /// The client ran but reported failure
    #[error("`{command}` exited with code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        tail: Vec<String>,
    },

    /// `--version` output could not be understood
    #[error("unrecognised client version output: {0:?}")]
    UnknownVersion(String),

    /// JSON emitted by the client did not have the expected shape
    #[error("unexpected client response: {0}")]
    InvalidResponse(String),

    /// Remote name is not registered
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// Credentials rejected by the remote
    #[error("authentication failed for user {user} on remote {remote}")]
    AuthenticationFailed { remote: String, user: String },

    /// Write operation attempted without logging in first
    #[error("not authenticated on remote {0}")]
    NotAuthenticated(String),

    /// Reference is not present where it was expected
    #[error("reference not found: {0}")]
    NotFound(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
