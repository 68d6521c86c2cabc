//! Per-configuration results and the run report.

use chrono::{DateTime, Utc};
use packager_core::{BuildConfiguration, ConfigurationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Exit status of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    Failed { exit_code: i32 },
}

/// Upload gate state for one build: `Built → Evaluate → {Uploaded, Skipped, Failed}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// The gate never ran (build failed or run aborted).
    NotEvaluated,
    Skipped { reason: String },
    Uploaded { package_id: Option<String> },
    Failed { error: String },
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::NotEvaluated => write!(f, "not evaluated"),
            UploadOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            UploadOutcome::Uploaded { package_id: Some(id) } => write!(f, "uploaded {id}"),
            UploadOutcome::Uploaded { package_id: None } => write!(f, "uploaded"),
            UploadOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Outcome of building one configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub id: ConfigurationId,
    pub configuration: BuildConfiguration,
    /// Reference the package was built as.
    pub reference: String,
    #[serde(flatten)]
    pub status: BuildStatus,
    /// Last lines of build output.
    pub log_tail: Vec<String>,
    pub package_id: Option<String>,
    pub upload: UploadOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildResult {
    /// Result of a finished build process.
    pub fn from_exit(
        configuration: &BuildConfiguration,
        reference: impl fmt::Display,
        exit_code: i32,
        log_tail: Vec<String>,
        package_id: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let status = if exit_code == 0 {
            BuildStatus::Succeeded
        } else {
            BuildStatus::Failed { exit_code }
        };
        Self {
            id: configuration.id(),
            configuration: configuration.clone(),
            reference: reference.to_string(),
            status,
            log_tail,
            package_id,
            upload: UploadOutcome::NotEvaluated,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Result for a build that could not be run at all.
    pub fn errored(
        configuration: &BuildConfiguration,
        reference: impl fmt::Display,
        error: impl fmt::Display,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::from_exit(
            configuration,
            reference,
            -1,
            vec![error.to_string()],
            None,
            started_at,
        )
    }

    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }

    pub fn with_upload(mut self, upload: UploadOutcome) -> Self {
        self.upload = upload;
        self
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Everything a run did, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub results: Vec<BuildResult>,
    /// Fail-fast stopped the run before the matrix was exhausted.
    pub aborted: bool,
    /// The commit message asked CI to skip building.
    pub skipped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            results: Vec::new(),
            aborted: false,
            skipped: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn push(&mut self, result: BuildResult) {
        self.results.push(result);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Number of builds that succeeded.
    pub fn built(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    /// Number of builds that failed.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded()).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count_uploads(|u| matches!(u, UploadOutcome::Uploaded { .. }))
    }

    pub fn skipped_uploads(&self) -> usize {
        self.count_uploads(|u| matches!(u, UploadOutcome::Skipped { .. }))
    }

    pub fn failed_uploads(&self) -> usize {
        self.count_uploads(|u| matches!(u, UploadOutcome::Failed { .. }))
    }

    fn count_uploads(&self, pred: impl Fn(&UploadOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.upload)).count()
    }

    /// No failed build and no failed upload.
    pub fn success(&self) -> bool {
        self.failed() == 0 && self.failed_uploads() == 0
    }

    /// One-line summary for the execution log.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} built, {} failed, {} uploaded, {} upload(s) skipped",
            self.built(),
            self.failed(),
            self.uploaded(),
            self.skipped_uploads()
        );
        if self.failed_uploads() > 0 {
            line.push_str(&format!(", {} upload(s) failed", self.failed_uploads()));
        }
        if self.aborted {
            line.push_str(" (aborted)");
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(arch: &str) -> BuildConfiguration {
        BuildConfiguration::new([("arch", arch)])
    }

    #[test]
    fn test_counts_and_success() {
        let mut report = RunReport::new();
        report.push(
            BuildResult::from_exit(&config("x86"), "zlib/1.2.11@", 0, vec![], None, Utc::now())
                .with_upload(UploadOutcome::Uploaded { package_id: None }),
        );
        report.push(
            BuildResult::from_exit(&config("x86_64"), "zlib/1.2.11@", 0, vec![], None, Utc::now())
                .with_upload(UploadOutcome::Skipped {
                    reason: "pull request".to_string(),
                }),
        );
        assert!(report.success());
        assert_eq!(report.built(), 2);
        assert_eq!(report.uploaded(), 1);
        assert_eq!(report.skipped_uploads(), 1);
        assert_eq!(
            report.summary(),
            "2 built, 0 failed, 1 uploaded, 1 upload(s) skipped"
        );
    }

    #[test]
    fn test_failed_upload_fails_run() {
        let mut report = RunReport::new();
        report.push(
            BuildResult::from_exit(&config("x86"), "zlib/1.2.11@", 0, vec![], None, Utc::now())
                .with_upload(UploadOutcome::Failed {
                    error: "denied".to_string(),
                }),
        );
        assert!(!report.success());
        assert!(report.summary().ends_with("1 upload(s) failed"));
    }

    #[test]
    fn test_errored_result() {
        let result = BuildResult::errored(&config("x86"), "zlib/1.2.11@", "spawn failed", Utc::now());
        assert_eq!(result.status, BuildStatus::Failed { exit_code: -1 });
        assert_eq!(result.log_tail, vec!["spawn failed".to_string()]);
        assert_eq!(result.upload, UploadOutcome::NotEvaluated);
    }

    #[test]
    fn test_report_serializes() {
        let mut report = RunReport::new();
        report.push(BuildResult::from_exit(
            &config("x86"),
            "zlib/1.2.11@",
            2,
            vec!["boom".to_string()],
            None,
            Utc::now(),
        ));
        let json = serde_json::to_value(report.finish()).unwrap();
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][0]["exit_code"], 2);
        assert_eq!(json["results"][0]["upload"]["state"], "not_evaluated");
    }
}
