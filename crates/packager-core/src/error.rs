//! Error types for packager-core

use thiserror::Error;

/// Errors raised while resolving settings or declaring the build matrix.
///
/// All of these are fatal and surface before the first build starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required field could not be resolved from arguments, environment or defaults
    #[error("missing required setting: {0}")]
    MissingField(&'static str),

    /// Boolean environment variables only accept "1" or "0"
    #[error("invalid boolean value for {var}: {value:?} (expected \"1\" or \"0\")")]
    InvalidBool { var: String, value: String },

    /// Numeric environment variable failed to parse
    #[error("invalid numeric value for {var}: {value:?}")]
    InvalidNumber { var: String, value: String },

    /// Package reference text is not `name/version[@user/channel]`
    #[error("invalid package reference: {0:?}")]
    InvalidReference(String),

    /// Stable branch pattern is not a valid regular expression
    #[error("invalid stable branch pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Job split page/total out of range
    #[error("invalid job split: page {page} of {total}")]
    InvalidJobSplit { page: usize, total: usize },

    /// No docker image configured and none derivable from the configuration
    #[error("cannot determine docker image for build {0}")]
    NoDockerImage(String),

    /// No compiler versions given and the host compiler could not be detected
    #[error("no compiler versions configured and no host compiler detected")]
    NoCompiler,
}

/// Errors raised when spawning or waiting on a child process.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Command had nothing to execute
    #[error("empty command")]
    EmptyCommand,

    /// Child process could not be spawned
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// IO failure while streaming output or waiting
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
