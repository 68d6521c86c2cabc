//! CI context: branch, tag, pull-request state and job splitting.
//!
//! Each supported provider has its own [`CiManager`] implementation in
//! [`providers`]. [`detect_ci`] picks one from the environment snapshot once
//! at startup.
//!
//! # Modules
//!
//! - [`providers`]: Travis, AppVeyor, GitLab, CircleCI, Azure, Jenkins,
//!   GitHub Actions and the generic fallback that reads git

pub mod providers;

use regex::Regex;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::env::Environment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::matrix::JobSplit;
use crate::settings::vars;

pub use providers::{
    AppveyorManager, AzureManager, CircleCiManager, GenericManager, GithubActionsManager,
    GitlabManager, JenkinsManager, TravisManager,
};

/// Supported CI providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiProvider {
    Travis,
    Appveyor,
    Gitlab,
    CircleCi,
    Azure,
    Jenkins,
    GithubActions,
    Generic,
}

impl fmt::Display for CiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CiProvider::Travis => "travis",
            CiProvider::Appveyor => "appveyor",
            CiProvider::Gitlab => "gitlab",
            CiProvider::CircleCi => "circleci",
            CiProvider::Azure => "azure",
            CiProvider::Jenkins => "jenkins",
            CiProvider::GithubActions => "github-actions",
            CiProvider::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Read-only view of the CI execution context.
pub trait CiManager: Send + Sync {
    fn provider(&self) -> CiProvider;

    /// Current branch, if known.
    fn branch(&self) -> Option<String>;

    /// Tag being built, if this is a tag build.
    fn tag(&self) -> Option<String>;

    fn is_pull_request(&self) -> bool;

    fn commit_message(&self) -> Option<String>;

    /// Page/total for horizontal job splitting.
    fn job_split(&self) -> ConfigResult<Option<JobSplit>>;

    fn is_tag(&self) -> bool {
        self.tag().is_some()
    }

    /// Branch matches `pattern` anchored at the start.
    fn is_stable_branch(&self, pattern: &Regex) -> bool {
        self.branch()
            .is_some_and(|b| pattern.find(&b).is_some_and(|m| m.start() == 0))
    }

    /// A ref is stable when it is a tag or a stable branch.
    fn is_stable(&self, pattern: &Regex) -> bool {
        self.is_tag() || self.is_stable_branch(pattern)
    }

    /// Commit message asks CI to skip the build.
    fn skip_builds(&self) -> bool {
        self.commit_message()
            .is_some_and(|m| m.contains("[skip ci]") || m.contains("[ci skip]"))
    }
}

/// Parse `CONAN_CURRENT_PAGE` / `CONAN_TOTAL_PAGES`.
pub fn env_job_split(env: &Environment) -> ConfigResult<Option<JobSplit>> {
    match (env.number(vars::CURRENT_PAGE)?, env.number(vars::TOTAL_PAGES)?) {
        (Some(page), Some(total)) => Ok(Some(JobSplit {
            page: page as usize,
            total: total as usize,
        })),
        (None, None) => Ok(None),
        (page, total) => Err(ConfigurationError::InvalidJobSplit {
            page: page.unwrap_or(0) as usize,
            total: total.unwrap_or(0) as usize,
        }),
    }
}

/// Pick the CI manager matching the environment fingerprint.
pub fn detect_ci(env: &Environment, project_dir: &Path) -> Box<dyn CiManager> {
    let manager: Box<dyn CiManager> = if env.contains("TRAVIS") {
        Box::new(TravisManager::new(env.clone()))
    } else if env.contains("APPVEYOR") {
        Box::new(AppveyorManager::new(env.clone()))
    } else if env.contains("GITLAB_CI") {
        Box::new(GitlabManager::new(env.clone()))
    } else if env.contains("CIRCLECI") {
        Box::new(CircleCiManager::new(env.clone()))
    } else if env.contains("TF_BUILD") || env.contains("SYSTEM_TEAMFOUNDATIONCOLLECTIONURI") {
        Box::new(AzureManager::new(env.clone()))
    } else if env.contains("JENKINS_URL") {
        Box::new(JenkinsManager::new(env.clone()))
    } else if env.contains("GITHUB_ACTIONS") {
        Box::new(GithubActionsManager::new(env.clone()))
    } else {
        Box::new(GenericManager::from_checkout(env.clone(), project_dir))
    };
    info!(provider = %manager.provider(), branch = ?manager.branch(), "Detected CI context");
    manager
}

/// Fixed CI context, used by tests and dry runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCiManager {
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub pull_request: bool,
    pub commit_message: Option<String>,
    pub job_split: Option<JobSplit>,
}

impl StaticCiManager {
    pub fn on_branch(branch: &str) -> Self {
        Self {
            branch: Some(branch.to_string()),
            ..Default::default()
        }
    }

    pub fn on_tag(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            ..Default::default()
        }
    }
}

impl CiManager for StaticCiManager {
    fn provider(&self) -> CiProvider {
        CiProvider::Generic
    }

    fn branch(&self) -> Option<String> {
        self.branch.clone()
    }

    fn tag(&self) -> Option<String> {
        self.tag.clone()
    }

    fn is_pull_request(&self) -> bool {
        self.pull_request
    }

    fn commit_message(&self) -> Option<String> {
        self.commit_message.clone()
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        Ok(self.job_split)
    }
}
