//! One [`CiManager`] per CI provider.

use std::path::Path;
use std::process::Command;

use super::{env_job_split, CiManager, CiProvider};
use crate::env::Environment;
use crate::error::ConfigResult;
use crate::matrix::JobSplit;

/// Strip a `refs/<kind>/` prefix from a git ref.
fn ref_suffix<'a>(git_ref: &'a str, kind: &str) -> Option<&'a str> {
    git_ref
        .strip_prefix("refs/")
        .and_then(|r| r.strip_prefix(kind))
        .and_then(|r| r.strip_prefix('/'))
}

/// Travis CI
#[derive(Debug, Clone)]
pub struct TravisManager {
    env: Environment,
}

impl TravisManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for TravisManager {
    fn provider(&self) -> CiProvider {
        CiProvider::Travis
    }

    fn branch(&self) -> Option<String> {
        self.env.string("TRAVIS_BRANCH")
    }

    fn tag(&self) -> Option<String> {
        self.env.string("TRAVIS_TAG")
    }

    fn is_pull_request(&self) -> bool {
        self.env
            .get("TRAVIS_PULL_REQUEST")
            .is_some_and(|pr| pr != "false")
    }

    fn commit_message(&self) -> Option<String> {
        self.env.string("TRAVIS_COMMIT_MESSAGE")
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// AppVeyor
#[derive(Debug, Clone)]
pub struct AppveyorManager {
    env: Environment,
}

impl AppveyorManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for AppveyorManager {
    fn provider(&self) -> CiProvider {
        CiProvider::Appveyor
    }

    fn branch(&self) -> Option<String> {
        self.env.string("APPVEYOR_REPO_BRANCH")
    }

    fn tag(&self) -> Option<String> {
        if self.env.get("APPVEYOR_REPO_TAG") == Some("true") {
            self.env.string("APPVEYOR_REPO_TAG_NAME")
        } else {
            None
        }
    }

    fn is_pull_request(&self) -> bool {
        self.env.get("APPVEYOR_PULL_REQUEST_NUMBER").is_some()
    }

    fn commit_message(&self) -> Option<String> {
        let title = self.env.get("APPVEYOR_REPO_COMMIT_MESSAGE")?;
        match self.env.get("APPVEYOR_REPO_COMMIT_MESSAGE_EXTENDED") {
            Some(extended) => Some(format!("{title}\n{extended}")),
            None => Some(title.to_string()),
        }
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// GitLab CI
#[derive(Debug, Clone)]
pub struct GitlabManager {
    env: Environment,
}

impl GitlabManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for GitlabManager {
    fn provider(&self) -> CiProvider {
        CiProvider::Gitlab
    }

    fn branch(&self) -> Option<String> {
        self.env
            .string("CI_COMMIT_REF_NAME")
            .or_else(|| self.env.string("CI_BUILD_REF_NAME"))
    }

    fn tag(&self) -> Option<String> {
        self.env
            .string("CI_COMMIT_TAG")
            .or_else(|| self.env.string("CI_BUILD_TAG"))
    }

    fn is_pull_request(&self) -> bool {
        self.env.get("CI_MERGE_REQUEST_ID").is_some()
    }

    fn commit_message(&self) -> Option<String> {
        self.env.string("CI_COMMIT_MESSAGE")
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// CircleCI
#[derive(Debug, Clone)]
pub struct CircleCiManager {
    env: Environment,
}

impl CircleCiManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for CircleCiManager {
    fn provider(&self) -> CiProvider {
        CiProvider::CircleCi
    }

    fn branch(&self) -> Option<String> {
        self.env.string("CIRCLE_BRANCH")
    }

    fn tag(&self) -> Option<String> {
        self.env.string("CIRCLE_TAG")
    }

    fn is_pull_request(&self) -> bool {
        self.env.get("CIRCLE_PULL_REQUEST").is_some()
    }

    fn commit_message(&self) -> Option<String> {
        None
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// Azure Pipelines
#[derive(Debug, Clone)]
pub struct AzureManager {
    env: Environment,
}

impl AzureManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for AzureManager {
    fn provider(&self) -> CiProvider {
        CiProvider::Azure
    }

    fn branch(&self) -> Option<String> {
        let source = self.env.get("BUILD_SOURCEBRANCH")?;
        ref_suffix(source, "heads").map(str::to_string)
    }

    fn tag(&self) -> Option<String> {
        let source = self.env.get("BUILD_SOURCEBRANCH")?;
        ref_suffix(source, "tags").map(str::to_string)
    }

    fn is_pull_request(&self) -> bool {
        self.env.get("SYSTEM_PULLREQUEST_PULLREQUESTID").is_some()
            || self.env.get("BUILD_REASON") == Some("PullRequest")
    }

    fn commit_message(&self) -> Option<String> {
        self.env.string("BUILD_SOURCEVERSIONMESSAGE")
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// Jenkins (multibranch pipelines)
#[derive(Debug, Clone)]
pub struct JenkinsManager {
    env: Environment,
}

impl JenkinsManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for JenkinsManager {
    fn provider(&self) -> CiProvider {
        CiProvider::Jenkins
    }

    fn branch(&self) -> Option<String> {
        self.env
            .string("BRANCH_NAME")
            .or_else(|| self.env.string("GIT_BRANCH"))
    }

    fn tag(&self) -> Option<String> {
        self.env.string("TAG_NAME")
    }

    fn is_pull_request(&self) -> bool {
        self.env.get("CHANGE_ID").is_some()
    }

    fn commit_message(&self) -> Option<String> {
        None
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// GitHub Actions
#[derive(Debug, Clone)]
pub struct GithubActionsManager {
    env: Environment,
}

impl GithubActionsManager {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }
}

impl CiManager for GithubActionsManager {
    fn provider(&self) -> CiProvider {
        CiProvider::GithubActions
    }

    fn branch(&self) -> Option<String> {
        if self.is_pull_request() {
            return self.env.string("GITHUB_HEAD_REF");
        }
        let git_ref = self.env.get("GITHUB_REF")?;
        ref_suffix(git_ref, "heads").map(str::to_string)
    }

    fn tag(&self) -> Option<String> {
        let git_ref = self.env.get("GITHUB_REF")?;
        ref_suffix(git_ref, "tags").map(str::to_string)
    }

    fn is_pull_request(&self) -> bool {
        matches!(
            self.env.get("GITHUB_EVENT_NAME"),
            Some("pull_request") | Some("pull_request_target")
        )
    }

    fn commit_message(&self) -> Option<String> {
        None
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

/// Fallback for unknown CI systems and local runs: queries git once.
#[derive(Debug, Clone)]
pub struct GenericManager {
    env: Environment,
    branch: Option<String>,
    tag: Option<String>,
    commit_message: Option<String>,
}

impl GenericManager {
    /// Query git in `project_dir` for branch, exact tag and last commit message.
    pub fn from_checkout(env: Environment, project_dir: &Path) -> Self {
        let git = |args: &[&str]| -> Option<String> {
            let output = Command::new("git")
                .args(args)
                .current_dir(project_dir)
                .output()
                .ok()?;
            if !output.status.success() {
                return None;
            }
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!text.is_empty()).then_some(text)
        };

        Self {
            branch: git(&["rev-parse", "--abbrev-ref", "HEAD"]).filter(|b| b != "HEAD"),
            tag: git(&["describe", "--exact-match", "--tags"]),
            commit_message: git(&["log", "-1", "--format=%B"]),
            env,
        }
    }
}

impl CiManager for GenericManager {
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
        false
    }

    fn commit_message(&self) -> Option<String> {
        self.commit_message.clone()
    }

    fn job_split(&self) -> ConfigResult<Option<JobSplit>> {
        env_job_split(&self.env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_travis_pull_request_flag() {
        let ci = TravisManager::new(Environment::from_pairs([("TRAVIS_PULL_REQUEST", "false")]));
        assert!(!ci.is_pull_request());
        let ci = TravisManager::new(Environment::from_pairs([("TRAVIS_PULL_REQUEST", "42")]));
        assert!(ci.is_pull_request());
    }

    #[test]
    fn test_appveyor_tag_requires_flag() {
        let ci = AppveyorManager::new(Environment::from_pairs([("APPVEYOR_REPO_TAG_NAME", "v1")]));
        assert!(ci.tag().is_none());
        let ci = AppveyorManager::new(Environment::from_pairs([
            ("APPVEYOR_REPO_TAG", "true"),
            ("APPVEYOR_REPO_TAG_NAME", "v1"),
        ]));
        assert_eq!(ci.tag().as_deref(), Some("v1"));
    }

    #[test]
    fn test_github_refs() {
        let ci = GithubActionsManager::new(Environment::from_pairs([
            ("GITHUB_REF", "refs/heads/release/2.0"),
            ("GITHUB_EVENT_NAME", "push"),
        ]));
        assert_eq!(ci.branch().as_deref(), Some("release/2.0"));
        assert!(ci.tag().is_none());

        let ci = GithubActionsManager::new(Environment::from_pairs([
            ("GITHUB_REF", "refs/pull/7/merge"),
            ("GITHUB_HEAD_REF", "feature"),
            ("GITHUB_EVENT_NAME", "pull_request"),
        ]));
        assert!(ci.is_pull_request());
        assert_eq!(ci.branch().as_deref(), Some("feature"));
    }

    #[test]
    fn test_azure_tag_ref() {
        let ci = AzureManager::new(Environment::from_pairs([(
            "BUILD_SOURCEBRANCH",
            "refs/tags/v3.1",
        )]));
        assert_eq!(ci.tag().as_deref(), Some("v3.1"));
        assert!(ci.branch().is_none());
    }

    #[test]
    fn test_gitlab_merge_request() {
        let ci = GitlabManager::new(Environment::from_pairs([
            ("CI_COMMIT_REF_NAME", "master"),
            ("CI_MERGE_REQUEST_ID", "12"),
        ]));
        assert!(ci.is_pull_request());
        assert_eq!(ci.branch().as_deref(), Some("master"));
    }

    #[test]
    fn test_generic_outside_repo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ci = GenericManager::from_checkout(Environment::default(), dir.path());
        assert!(ci.tag().is_none());
        assert!(!ci.is_pull_request());
    }
}
