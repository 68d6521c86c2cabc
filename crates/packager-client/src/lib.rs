//! Packager Client
//!
//! The seam between the orchestrator and the package manager:
//! - `PackageClient` trait (build, remotes, login, upload, search, remove)
//! - `CliPackageClient` for the 1.x and 2.x command-line APIs
//! - `MemoryRemote`, an in-memory client for tests

pub mod cli;
pub mod client;
pub mod error;
pub mod fakes;
pub mod response;

pub use cli::{create_command_line, profile_text, shell_quote, CliPackageClient};
pub use client::{
    normalize_reference, pattern_matches, ClientApi, CreateOutcome, CreateRequest, PackageClient,
    PackageInfo, RecipeMatch,
};
pub use error::{ClientError, ClientResult};
pub use fakes::MemoryRemote;
