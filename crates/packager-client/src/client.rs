//! Package client trait and the values that cross it.
//!
//! `PackageClient` is the seam between the orchestrator and the package
//! manager: building a configuration natively, registering remotes,
//! logging in, uploading, and querying or pruning a remote.
//!
//! Implementations: [`crate::CliPackageClient`] drives the real executable,
//! [`crate::MemoryRemote`] keeps everything in memory for tests.

use async_trait::async_trait;
use packager_core::{BuildConfiguration, PackageReference, Secret};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::ClientResult;

// ---------------------------------------------------------------------------
// ClientApi
// ---------------------------------------------------------------------------

/// Command-line API revision of the package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientApi {
    /// 1.x: positional references, `user`, `search --json`.
    V1,
    /// 2.x and later: `--name/--version`, `remote login`, `list --format=json`.
    V2,
}

impl ClientApi {
    /// Pick the revision from a version string such as `1.59.0` or
    /// `Conan version 2.0.4`.
    pub fn from_version(text: &str) -> Option<Self> {
        let version = text
            .split_whitespace()
            .find(|word| word.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
        let major: u32 = version.split('.').next()?.parse().ok()?;
        Some(if major >= 2 { ClientApi::V2 } else { ClientApi::V1 })
    }

    /// Package cache location relative to the user home.
    pub fn cache_dir(self) -> &'static str {
        match self {
            ClientApi::V1 => ".conan/data",
            ClientApi::V2 => ".conan2/p",
        }
    }

    /// pip requirement that installs a client of the same major version.
    pub fn pip_requirement(self) -> &'static str {
        match self {
            ClientApi::V1 => "conan<2",
            ClientApi::V2 => "conan>=2",
        }
    }
}

impl fmt::Display for ClientApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientApi::V1 => write!(f, "v1"),
            ClientApi::V2 => write!(f, "v2"),
        }
    }
}

// ---------------------------------------------------------------------------
// Build request / outcome
// ---------------------------------------------------------------------------

/// Everything needed to build one configuration from a recipe directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub recipe_dir: PathBuf,
    pub reference: PackageReference,
    pub settings: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    pub env_vars: BTreeMap<String, String>,
    pub build_requires: Vec<String>,
    pub build_policy: Option<String>,
}

impl CreateRequest {
    /// Request for `config`, published as `reference` unless the
    /// configuration carries its own.
    pub fn for_configuration(
        recipe_dir: impl Into<PathBuf>,
        reference: &PackageReference,
        config: &BuildConfiguration,
    ) -> Self {
        Self {
            recipe_dir: recipe_dir.into(),
            reference: config.reference().unwrap_or(reference).clone(),
            settings: config.settings().clone(),
            options: config.options().clone(),
            env_vars: config.env_vars().clone(),
            build_requires: config.build_requires().to_vec(),
            build_policy: None,
        }
    }

    pub fn with_build_policy(mut self, policy: Option<&str>) -> Self {
        self.build_policy = policy.map(str::to_string);
        self
    }
}

/// Result of a build through the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub exit_code: i32,
    /// Binary package id reported by the client, when it reported one.
    pub package_id: Option<String>,
    /// Last lines of client output.
    pub tail: Vec<String>,
}

impl CreateOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Remote query results
// ---------------------------------------------------------------------------

/// One binary package of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A recipe found on a remote, with the packages that were listed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMatch {
    pub reference: String,
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
}

/// Canonical text of a reference as printed by a remote: revision and a
/// trailing bare `@` removed.
pub fn normalize_reference(text: &str) -> &str {
    let text = text.split('#').next().unwrap_or(text);
    text.strip_suffix('@').unwrap_or(text)
}

/// Glob match supporting `*` only, the form used for reference patterns.
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// PackageClient
// ---------------------------------------------------------------------------

/// Operations the orchestrator needs from the package manager.
#[async_trait]
pub trait PackageClient: Send + Sync {
    /// API revision the client speaks.
    fn api(&self) -> ClientApi;

    /// Client version string.
    async fn version(&self) -> ClientResult<String>;

    /// Build and package one configuration into the local cache.
    async fn create(&self, request: &CreateRequest) -> ClientResult<CreateOutcome>;

    /// Register (or re-point) a remote.
    async fn add_remote(&self, name: &str, url: &str) -> ClientResult<()>;

    /// Log in to a remote.
    async fn authenticate(&self, remote: &str, user: &str, password: &Secret) -> ClientResult<()>;

    /// Upload a recipe and either one package or all of its packages.
    async fn upload(
        &self,
        reference: &PackageReference,
        package_id: Option<&str>,
        remote: &str,
        retry: u32,
    ) -> ClientResult<()>;

    /// Recipes on `remote` matching a glob pattern.
    async fn search_recipes(&self, pattern: &str, remote: &str) -> ClientResult<Vec<RecipeMatch>>;

    /// Binary packages of one recipe on `remote`.
    async fn search_packages(
        &self,
        reference: &PackageReference,
        remote: &str,
    ) -> ClientResult<Vec<PackageInfo>>;

    /// Remove every recipe matching `pattern` from `remote` and return what
    /// was removed. Matching nothing is not an error.
    async fn remove(&self, pattern: &str, remote: &str) -> ClientResult<Vec<String>>;

    /// Install shared client configuration from a URL.
    async fn config_install(&self, url: &str) -> ClientResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_from_version_output() {
        assert_eq!(ClientApi::from_version("Conan version 1.59.0"), Some(ClientApi::V1));
        assert_eq!(ClientApi::from_version("Conan version 2.0.4"), Some(ClientApi::V2));
        assert_eq!(ClientApi::from_version("2.3"), Some(ClientApi::V2));
        assert_eq!(ClientApi::from_version("Conan"), None);
    }

    #[test]
    fn test_cache_dir_and_pip_pin_follow_api() {
        assert_eq!(ClientApi::V1.cache_dir(), ".conan/data");
        assert_eq!(ClientApi::V2.cache_dir(), ".conan2/p");
        assert_eq!(ClientApi::V1.pip_requirement(), "conan<2");
        assert_eq!(ClientApi::V2.pip_requirement(), "conan>=2");
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("zlib/1.2.11*", "zlib/1.2.11@lasote/mychannel"));
        assert!(pattern_matches("zlib/1.2.11*", "zlib/1.2.11"));
        assert!(!pattern_matches("zlib/1.2.11*", "zlib/1.2.12@a/b"));
        assert!(pattern_matches("*@lasote/*", "zlib/1.2.11@lasote/testing"));
        assert!(pattern_matches("zlib", "zlib"));
        assert!(!pattern_matches("zlib", "zlib2"));
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("zlib/1.2.11@#abc123"), "zlib/1.2.11");
        assert_eq!(normalize_reference("zlib/1.2.11@u/c#abc"), "zlib/1.2.11@u/c");
        assert_eq!(normalize_reference("zlib/1.2.11@"), "zlib/1.2.11");
    }

    #[test]
    fn test_request_prefers_configuration_reference() {
        let base = PackageReference::new("zlib", "1.2.11");
        let other = PackageReference::new("zlib", "1.3");
        let config = BuildConfiguration::new([("arch", "x86")]).with_reference(other.clone());
        let request = CreateRequest::for_configuration(".", &base, &config);
        assert_eq!(request.reference, other);
        assert_eq!(request.settings.get("arch").map(String::as_str), Some("x86"));
    }
}
