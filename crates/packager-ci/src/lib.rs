//! Packager CI - build matrix execution and publishing
//!
//! Runs every configuration of a build matrix:
//! - Natively through the package client, or inside a container
//! - Gates uploads on build status and the CI ref
//! - Collects per-configuration results into a run report

pub mod container;
pub mod error;
pub mod executor;
pub mod gate;
pub mod packager;
pub mod report;

// Re-export key types
pub use container::ContainerInvocation;
pub use error::{BuildError, PackagerError, PackagerResult, RemoteQueryError, UploadError};
pub use executor::{BuildExecutor, BuildJob, DockerExecutor, NativeExecutor};
pub use gate::{GateDecision, SkipReason, UploadGate};
pub use packager::MultiPackager;
pub use report::{BuildResult, BuildStatus, RunReport, UploadOutcome};
