//! Layered run settings.
//!
//! [`RunSettings::resolve`] merges three layers for every field:
//!
//! 1. explicit arguments ([`ExplicitParams`]),
//! 2. the captured [`Environment`] (`CONAN_*` variables),
//! 3. built-in defaults.
//!
//! The result is an immutable snapshot. [`RunSettings::with_overrides`] is the
//! only way to change a value and it returns a fresh snapshot.

use regex::Regex;
use std::fmt;
use std::path::PathBuf;

use crate::env::{split_list, Environment};
use crate::error::{ConfigResult, ConfigurationError};
use crate::reference::PackageReference;

/// Environment variable names recognised by the resolver.
pub mod vars {
    pub const REFERENCE: &str = "CONAN_REFERENCE";
    pub const USERNAME: &str = "CONAN_USERNAME";
    pub const CHANNEL: &str = "CONAN_CHANNEL";
    pub const STABLE_CHANNEL: &str = "CONAN_STABLE_CHANNEL";
    pub const STABLE_BRANCH_PATTERN: &str = "CONAN_STABLE_BRANCH_PATTERN";
    pub const UPLOAD: &str = "CONAN_UPLOAD";
    pub const UPLOAD_ONLY_WHEN_STABLE: &str = "CONAN_UPLOAD_ONLY_WHEN_STABLE";
    pub const UPLOAD_ONLY_WHEN_TAG: &str = "CONAN_UPLOAD_ONLY_WHEN_TAG";
    pub const UPLOAD_RETRY: &str = "CONAN_UPLOAD_RETRY";
    pub const LOGIN_USERNAME: &str = "CONAN_LOGIN_USERNAME";
    pub const PASSWORD: &str = "CONAN_PASSWORD";
    pub const SKIP_CHECK_CREDENTIALS: &str = "CONAN_SKIP_CHECK_CREDENTIALS";
    pub const USE_DOCKER: &str = "CONAN_USE_DOCKER";
    pub const DOCKER_IMAGE: &str = "CONAN_DOCKER_IMAGE";
    pub const DOCKER_RUNTIME: &str = "CONAN_DOCKER_RUNTIME";
    pub const DOCKER_RUN_OPTIONS: &str = "CONAN_DOCKER_RUN_OPTIONS";
    pub const DOCKER_USE_SUDO: &str = "CONAN_DOCKER_USE_SUDO";
    pub const DOCKER_IMAGE_SKIP_PULL: &str = "CONAN_DOCKER_IMAGE_SKIP_PULL";
    pub const DOCKER_32_IMAGES: &str = "CONAN_DOCKER_32_IMAGES";
    pub const DOCKER_SHELL: &str = "CONAN_DOCKER_SHELL";
    pub const DOCKER_ENTRY_SCRIPT: &str = "CONAN_DOCKER_ENTRY_SCRIPT";
    pub const DOCKER_VOLUMES: &str = "CONAN_DOCKER_VOLUMES";
    pub const DOCKER_HOME: &str = "CONAN_DOCKER_HOME";
    pub const PIP_PACKAGE: &str = "CONAN_PIP_PACKAGE";
    pub const PIP_COMMAND: &str = "CONAN_PIP_COMMAND";
    pub const PIP_USE_SUDO: &str = "CONAN_PIP_USE_SUDO";
    pub const CONFIG_URL: &str = "CONAN_CONFIG_URL";
    pub const BUILD_POLICY: &str = "CONAN_BUILD_POLICY";
    pub const REMOTES: &str = "CONAN_REMOTES";
    pub const CONTINUE_ON_ERROR: &str = "CONAN_CONTINUE_ON_ERROR";
    pub const USER_HOME: &str = "CONAN_USER_HOME";
    pub const GCC_VERSIONS: &str = "CONAN_GCC_VERSIONS";
    pub const CLANG_VERSIONS: &str = "CONAN_CLANG_VERSIONS";
    pub const APPLE_CLANG_VERSIONS: &str = "CONAN_APPLE_CLANG_VERSIONS";
    pub const VISUAL_VERSIONS: &str = "CONAN_VISUAL_VERSIONS";
    pub const ARCHS: &str = "CONAN_ARCHS";
    pub const BUILD_TYPES: &str = "CONAN_BUILD_TYPES";
    pub const CURRENT_PAGE: &str = "CONAN_CURRENT_PAGE";
    pub const TOTAL_PAGES: &str = "CONAN_TOTAL_PAGES";
}

const DEFAULT_CHANNEL: &str = "testing";
const DEFAULT_STABLE_CHANNEL: &str = "stable";
const DEFAULT_STABLE_BRANCH_PATTERN: &str = "master$|release.*|stable.*";
const DEFAULT_UPLOAD_RETRY: u32 = 3;
const DEFAULT_DOCKER_RUNTIME: &str = "docker";
const DEFAULT_DOCKER_SHELL: &str = "/bin/sh -c";
const DEFAULT_DOCKER_HOME: &str = "/home/conan";
const DEFAULT_PIP_COMMAND: &str = "pip";

/// Name under which the upload target is registered with the client.
pub const UPLOAD_REMOTE_NAME: &str = "upload_repo";

/// A credential that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Access the raw value. Only the remote client should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Explicit arguments. `None` means "not supplied" and falls through to the
/// environment, then to the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplicitParams {
    pub reference: Option<String>,
    pub username: Option<String>,
    pub channel: Option<String>,
    pub stable_channel: Option<String>,
    pub stable_branch_pattern: Option<String>,
    pub upload: Option<String>,
    pub upload_only_when_stable: Option<bool>,
    pub upload_only_when_tag: Option<bool>,
    pub upload_retry: Option<u32>,
    pub login_username: Option<String>,
    pub skip_check_credentials: Option<bool>,
    pub use_docker: Option<bool>,
    pub docker_image: Option<String>,
    pub docker_runtime: Option<String>,
    pub docker_run_options: Option<String>,
    pub docker_use_sudo: Option<bool>,
    pub docker_image_skip_pull: Option<bool>,
    pub docker_32_images: Option<bool>,
    pub docker_shell: Option<String>,
    pub docker_entry_script: Option<String>,
    pub docker_volumes: Option<Vec<String>>,
    pub docker_home: Option<String>,
    pub pip_package: Option<String>,
    pub pip_command: Option<String>,
    pub pip_use_sudo: Option<bool>,
    pub config_url: Option<String>,
    pub build_policy: Option<String>,
    pub remotes: Option<Vec<String>>,
    pub continue_on_error: Option<bool>,
    pub gcc_versions: Option<Vec<String>>,
    pub clang_versions: Option<Vec<String>>,
    pub apple_clang_versions: Option<Vec<String>>,
    pub visual_versions: Option<Vec<String>>,
    pub archs: Option<Vec<String>>,
    pub build_types: Option<Vec<String>>,
    pub project_dir: Option<PathBuf>,
}

impl ExplicitParams {
    /// Layer `other` on top of `self`; fields set in `other` win.
    pub fn overlay(self, other: ExplicitParams) -> ExplicitParams {
        macro_rules! pick {
            ($($field:ident),* $(,)?) => {
                ExplicitParams { $($field: other.$field.or(self.$field),)* }
            };
        }
        pick!(
            reference,
            username,
            channel,
            stable_channel,
            stable_branch_pattern,
            upload,
            upload_only_when_stable,
            upload_only_when_tag,
            upload_retry,
            login_username,
            skip_check_credentials,
            use_docker,
            docker_image,
            docker_runtime,
            docker_run_options,
            docker_use_sudo,
            docker_image_skip_pull,
            docker_32_images,
            docker_shell,
            docker_entry_script,
            docker_volumes,
            docker_home,
            pip_package,
            pip_command,
            pip_use_sudo,
            config_url,
            build_policy,
            remotes,
            continue_on_error,
            gcc_versions,
            clang_versions,
            apple_clang_versions,
            visual_versions,
            archs,
            build_types,
            project_dir,
        )
    }
}

/// Declared axis value lists. `None` means the axis was not supplied and the
/// matrix falls back to host detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisSettings {
    pub gcc_versions: Option<Vec<String>>,
    pub clang_versions: Option<Vec<String>>,
    pub apple_clang_versions: Option<Vec<String>>,
    pub visual_versions: Option<Vec<String>>,
    pub archs: Option<Vec<String>>,
    pub build_types: Option<Vec<String>>,
}

impl AxisSettings {
    /// Whether any compiler axis was supplied.
    pub fn has_compilers(&self) -> bool {
        self.gcc_versions.is_some()
            || self.clang_versions.is_some()
            || self.apple_clang_versions.is_some()
            || self.visual_versions.is_some()
    }
}

/// Container-related settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSettings {
    pub image: Option<String>,
    pub runtime: String,
    /// Opaque fragment inserted verbatim into the run command.
    pub run_options: String,
    pub use_sudo: bool,
    pub skip_pull: bool,
    pub use_32_images: bool,
    pub shell: String,
    pub entry_script: Option<String>,
    pub volumes: Vec<String>,
    pub home: String,
    /// Requirement installed in the container. `None` pins the client's
    /// major version to the host's.
    pub pip_package: Option<String>,
    pub pip_command: String,
    pub pip_use_sudo: bool,
}

/// Resolved, immutable orchestration parameters for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    reference: PackageReference,
    username: Option<String>,
    channel: String,
    stable_channel: String,
    stable_branch_pattern: Regex,
    upload: Option<String>,
    upload_only_when_stable: bool,
    upload_only_when_tag: bool,
    upload_retry: u32,
    login_username: Option<String>,
    password: Option<Secret>,
    skip_check_credentials: bool,
    use_docker: bool,
    docker: DockerSettings,
    config_url: Option<String>,
    build_policy: Option<String>,
    remotes: Vec<String>,
    continue_on_error: bool,
    axes: AxisSettings,
    project_dir: PathBuf,
    user_home: Option<PathBuf>,
    propagated_env: Vec<(String, String)>,
    explicit: ExplicitParams,
    env: Environment,
}

impl RunSettings {
    /// Resolve every field with explicit > environment > default precedence.
    pub fn resolve(explicit: &ExplicitParams, env: &Environment) -> ConfigResult<Self> {
        let text = |arg: &Option<String>, var: &str| arg.clone().or_else(|| env.string(var));
        let flag = |arg: Option<bool>, var: &str| -> ConfigResult<Option<bool>> {
            match arg {
                Some(v) => Ok(Some(v)),
                None => env.bool(var),
            }
        };
        let list = |arg: &Option<Vec<String>>, var: &str| arg.clone().or_else(|| env.list(var));

        let reference_text =
            text(&explicit.reference, vars::REFERENCE).ok_or(ConfigurationError::MissingField("reference"))?;
        let parsed: PackageReference = reference_text.parse()?;
        let reference = PackageReference::new(parsed.name.clone(), parsed.version.clone());

        let username = text(&explicit.username, vars::USERNAME).or(parsed.user.clone());
        let channel = text(&explicit.channel, vars::CHANNEL)
            .or(parsed.channel.clone())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let stable_channel = text(&explicit.stable_channel, vars::STABLE_CHANNEL)
            .unwrap_or_else(|| DEFAULT_STABLE_CHANNEL.to_string());

        let pattern = text(&explicit.stable_branch_pattern, vars::STABLE_BRANCH_PATTERN)
            .unwrap_or_else(|| DEFAULT_STABLE_BRANCH_PATTERN.to_string());
        let stable_branch_pattern =
            Regex::new(&pattern).map_err(|e| ConfigurationError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

        let upload = text(&explicit.upload, vars::UPLOAD);
        let upload_only_when_stable =
            flag(explicit.upload_only_when_stable, vars::UPLOAD_ONLY_WHEN_STABLE)?.unwrap_or(false);
        let upload_only_when_tag =
            flag(explicit.upload_only_when_tag, vars::UPLOAD_ONLY_WHEN_TAG)?.unwrap_or(false);
        let upload_retry = match explicit.upload_retry {
            Some(n) => n,
            None => env.number(vars::UPLOAD_RETRY)?.unwrap_or(DEFAULT_UPLOAD_RETRY),
        };
        let login_username = text(&explicit.login_username, vars::LOGIN_USERNAME).or(username.clone());
        let password = env.get(vars::PASSWORD).map(Secret::new);
        let skip_check_credentials =
            flag(explicit.skip_check_credentials, vars::SKIP_CHECK_CREDENTIALS)?.unwrap_or(false);

        if upload.is_some() {
            if username.is_none() {
                return Err(ConfigurationError::MissingField("username"));
            }
            if password.is_none() && !skip_check_credentials {
                return Err(ConfigurationError::MissingField("password"));
            }
        }

        let image = text(&explicit.docker_image, vars::DOCKER_IMAGE);
        let use_docker = flag(explicit.use_docker, vars::USE_DOCKER)?.unwrap_or(image.is_some());

        // An explicit fragment is kept verbatim; the env form is a comma list.
        let run_options = match &explicit.docker_run_options {
            Some(opts) => opts.clone(),
            None => env
                .get(vars::DOCKER_RUN_OPTIONS)
                .map(|raw| split_list(raw).join(" "))
                .unwrap_or_default(),
        };

        let docker = DockerSettings {
            image,
            runtime: text(&explicit.docker_runtime, vars::DOCKER_RUNTIME)
                .unwrap_or_else(|| DEFAULT_DOCKER_RUNTIME.to_string()),
            run_options,
            use_sudo: flag(explicit.docker_use_sudo, vars::DOCKER_USE_SUDO)?.unwrap_or(false),
            skip_pull: flag(explicit.docker_image_skip_pull, vars::DOCKER_IMAGE_SKIP_PULL)?
                .unwrap_or(false),
            use_32_images: flag(explicit.docker_32_images, vars::DOCKER_32_IMAGES)?.unwrap_or(false),
            shell: text(&explicit.docker_shell, vars::DOCKER_SHELL)
                .unwrap_or_else(|| DEFAULT_DOCKER_SHELL.to_string()),
            entry_script: text(&explicit.docker_entry_script, vars::DOCKER_ENTRY_SCRIPT),
            volumes: list(&explicit.docker_volumes, vars::DOCKER_VOLUMES).unwrap_or_default(),
            home: text(&explicit.docker_home, vars::DOCKER_HOME)
                .unwrap_or_else(|| DEFAULT_DOCKER_HOME.to_string()),
            pip_package: text(&explicit.pip_package, vars::PIP_PACKAGE),
            pip_command: text(&explicit.pip_command, vars::PIP_COMMAND)
                .unwrap_or_else(|| DEFAULT_PIP_COMMAND.to_string()),
            pip_use_sudo: flag(explicit.pip_use_sudo, vars::PIP_USE_SUDO)?.unwrap_or(false),
        };

        let axes = AxisSettings {
            gcc_versions: list(&explicit.gcc_versions, vars::GCC_VERSIONS),
            clang_versions: list(&explicit.clang_versions, vars::CLANG_VERSIONS),
            apple_clang_versions: list(&explicit.apple_clang_versions, vars::APPLE_CLANG_VERSIONS),
            visual_versions: list(&explicit.visual_versions, vars::VISUAL_VERSIONS),
            archs: list(&explicit.archs, vars::ARCHS),
            build_types: list(&explicit.build_types, vars::BUILD_TYPES),
        };

        let user_home = env
            .get(vars::USER_HOME)
            .or_else(|| env.get("HOME"))
            .map(PathBuf::from);

        Ok(Self {
            reference,
            username,
            channel,
            stable_channel,
            stable_branch_pattern,
            upload,
            upload_only_when_stable,
            upload_only_when_tag,
            upload_retry,
            login_username,
            password,
            skip_check_credentials,
            use_docker,
            docker,
            config_url: text(&explicit.config_url, vars::CONFIG_URL),
            build_policy: text(&explicit.build_policy, vars::BUILD_POLICY),
            remotes: list(&explicit.remotes, vars::REMOTES).unwrap_or_default(),
            continue_on_error: flag(explicit.continue_on_error, vars::CONTINUE_ON_ERROR)?
                .unwrap_or(false),
            axes,
            project_dir: explicit
                .project_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            user_home,
            propagated_env: propagated_env(env),
            explicit: explicit.clone(),
            env: env.clone(),
        })
    }

    /// Produce a new snapshot with `overrides` layered over the original
    /// explicit arguments. `self` is left untouched.
    pub fn with_overrides(&self, overrides: ExplicitParams) -> ConfigResult<Self> {
        let merged = self.explicit.clone().overlay(overrides);
        Self::resolve(&merged, &self.env)
    }

    pub fn reference(&self) -> &PackageReference {
        &self.reference
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stable_channel(&self) -> &str {
        &self.stable_channel
    }

    pub fn stable_branch_pattern(&self) -> &Regex {
        &self.stable_branch_pattern
    }

    /// Channel to publish under, given whether the CI ref is stable.
    pub fn channel_for(&self, stable: bool) -> &str {
        if stable {
            &self.stable_channel
        } else {
            &self.channel
        }
    }

    /// Full reference with user/channel applied for the given stability.
    pub fn full_reference(&self, stable: bool) -> PackageReference {
        match self.username() {
            Some(user) => self
                .reference
                .with_coordinates(Some(user), Some(self.channel_for(stable))),
            None => self.reference.clone(),
        }
    }

    pub fn upload(&self) -> Option<&str> {
        self.upload.as_deref()
    }

    pub fn upload_only_when_stable(&self) -> bool {
        self.upload_only_when_stable
    }

    pub fn upload_only_when_tag(&self) -> bool {
        self.upload_only_when_tag
    }

    pub fn upload_retry(&self) -> u32 {
        self.upload_retry
    }

    pub fn login_username(&self) -> Option<&str> {
        self.login_username.as_deref()
    }

    pub fn password(&self) -> Option<&Secret> {
        self.password.as_ref()
    }

    pub fn skip_check_credentials(&self) -> bool {
        self.skip_check_credentials
    }

    pub fn use_docker(&self) -> bool {
        self.use_docker
    }

    pub fn docker(&self) -> &DockerSettings {
        &self.docker
    }

    pub fn config_url(&self) -> Option<&str> {
        self.config_url.as_deref()
    }

    pub fn build_policy(&self) -> Option<&str> {
        self.build_policy.as_deref()
    }

    pub fn remotes(&self) -> &[String] {
        &self.remotes
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn axes(&self) -> &AxisSettings {
        &self.axes
    }

    pub fn project_dir(&self) -> &PathBuf {
        &self.project_dir
    }

    /// Directory the host package cache lives under (`CONAN_USER_HOME`,
    /// else `HOME`).
    pub fn user_home(&self) -> Option<&PathBuf> {
        self.user_home.as_ref()
    }

    /// `CONAN_*` variables forwarded into containers, secrets excluded.
    pub fn propagated_env(&self) -> &[(String, String)] {
        &self.propagated_env
    }

    /// The environment snapshot this value was resolved from.
    pub fn environment(&self) -> &Environment {
        &self.env
    }
}

fn propagated_env(env: &Environment) -> Vec<(String, String)> {
    env.with_prefix("CONAN_")
        .filter(|(k, v)| {
            !v.is_empty()
                && !k.starts_with("CONAN_DOCKER_")
                && *k != vars::USER_HOME
                && *k != vars::PASSWORD
        })
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
