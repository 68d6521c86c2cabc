//! Packager Core
//!
//! Domain model for the multi-configuration package builder:
//! - Package references and build configurations
//! - Layered run settings (arguments > environment > defaults)
//! - Build matrix expansion, pruning and job splitting
//! - CI context detection
//! - Process execution and the execution log sink

pub mod ci;
pub mod configuration;
pub mod env;
pub mod error;
pub mod host;
pub mod matrix;
pub mod output;
pub mod process;
pub mod reference;
pub mod settings;
pub mod telemetry;

// Re-export key types
pub use ci::{detect_ci, CiManager, CiProvider, StaticCiManager};
pub use configuration::{BuildConfiguration, ConfigurationId};
pub use env::Environment;
pub use error::{ConfigResult, ConfigurationError, ProcessError};
pub use host::{Compiler, HostProfile};
pub use matrix::{expand, BuildMatrix, CommonBuildsOptions, JobSplit, MatrixAxes};
pub use output::{MemorySink, OutputSink, StdoutSink};
pub use process::{ProcessOutput, ProcessRunner, ShellCommand, TokioProcessRunner};
pub use reference::PackageReference;
pub use settings::{DockerSettings, ExplicitParams, RunSettings, Secret, UPLOAD_REMOTE_NAME};
pub use telemetry::init_tracing;
