//! A single entry of the build matrix.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::reference::PackageReference;

/// Well-known setting names.
pub mod keys {
    pub const OS: &str = "os";
    pub const ARCH: &str = "arch";
    pub const COMPILER: &str = "compiler";
    pub const COMPILER_VERSION: &str = "compiler.version";
    pub const COMPILER_LIBCXX: &str = "compiler.libcxx";
    pub const COMPILER_RUNTIME: &str = "compiler.runtime";
    pub const BUILD_TYPE: &str = "build_type";
}

/// Identity of a configuration: SHA-256 over its normalized settings and options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigurationId(String);

impl ConfigurationId {
    fn compute(settings: &BTreeMap<String, String>, options: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (k, v) in settings {
            hasher.update(b"s\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\0");
        }
        for (k, v) in options {
            hasher.update(b"o\0");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\0");
        }
        ConfigurationId(hex::encode(hasher.finalize()))
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One concrete build: settings, options, environment and tool requirements.
///
/// Immutable after construction; the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    settings: BTreeMap<String, String>,
    #[serde(default)]
    options: BTreeMap<String, String>,
    #[serde(default)]
    env_vars: BTreeMap<String, String>,
    #[serde(default)]
    build_requires: Vec<String>,
    #[serde(default)]
    reference: Option<PackageReference>,
}

impl BuildConfiguration {
    pub fn new<S, K, V>(settings: S) -> Self
    where
        S: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            settings: settings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            options: BTreeMap::new(),
            env_vars: BTreeMap::new(),
            build_requires: Vec::new(),
            reference: None,
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_options<I, K, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .extend(options.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_env_vars<I, K, V>(mut self, env_vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars
            .extend(env_vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_build_requires<I, S>(mut self, build_requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build_requires
            .extend(build_requires.into_iter().map(Into::into));
        self
    }

    pub fn with_reference(mut self, reference: PackageReference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Identity over settings and options.
    pub fn id(&self) -> ConfigurationId {
        ConfigurationId::compute(&self.settings, &self.options)
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    pub fn build_requires(&self) -> &[String] {
        &self.build_requires
    }

    pub fn reference(&self) -> Option<&PackageReference> {
        self.reference.as_ref()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn compiler(&self) -> Option<&str> {
        self.setting(keys::COMPILER)
    }

    pub fn compiler_version(&self) -> Option<&str> {
        self.setting(keys::COMPILER_VERSION)
    }

    pub fn arch(&self) -> Option<&str> {
        self.setting(keys::ARCH)
    }

    pub fn build_type(&self) -> Option<&str> {
        self.setting(keys::BUILD_TYPE)
    }

    pub fn os(&self) -> Option<&str> {
        self.setting(keys::OS)
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.settings.iter().chain(self.options.iter()) {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        if first {
            write!(f, "<default profile>")?;
        }
        Ok(())
    }
}
