//! Upload gate: decides whether a built package is published, and publishes it.

use packager_client::PackageClient;
use packager_core::{CiManager, OutputSink, PackageReference, RunSettings, UPLOAD_REMOTE_NAME};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::UploadError;
use crate::report::{BuildResult, UploadOutcome};

/// Why a package is not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    BuildFailed,
    NoUploadTarget,
    PullRequest,
    NotStable,
    NotTag,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::BuildFailed => "build failed",
            SkipReason::NoUploadTarget => "no upload remote configured",
            SkipReason::PullRequest => "pull request build",
            SkipReason::NotStable => "not a stable branch or tag",
            SkipReason::NotTag => "not a tag build",
        };
        f.write_str(text)
    }
}

/// Gate verdict for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateDecision {
    Upload { remote_url: String },
    Skip(SkipReason),
}

/// Upload gate rules.
pub struct UploadGate;

impl UploadGate {
    /// Decide without side effects. Rules, first match wins:
    /// - failed build
    /// - no upload URL
    /// - pull request
    /// - stable-only and the ref is neither a stable branch nor a tag
    /// - tag-only and the ref is not a tag
    pub fn evaluate(result: &BuildResult, settings: &RunSettings, ci: &dyn CiManager) -> GateDecision {
        if !result.succeeded() {
            return GateDecision::Skip(SkipReason::BuildFailed);
        }
        let Some(url) = settings.upload() else {
            return GateDecision::Skip(SkipReason::NoUploadTarget);
        };
        if ci.is_pull_request() {
            return GateDecision::Skip(SkipReason::PullRequest);
        }
        if settings.upload_only_when_stable() && !ci.is_stable(settings.stable_branch_pattern()) {
            return GateDecision::Skip(SkipReason::NotStable);
        }
        if settings.upload_only_when_tag() && !ci.is_tag() {
            return GateDecision::Skip(SkipReason::NotTag);
        }
        GateDecision::Upload {
            remote_url: url.to_string(),
        }
    }

    /// Evaluate and, when allowed, register the upload remote, log in and
    /// upload. Failures are returned as [`UploadOutcome::Failed`].
    pub async fn maybe_upload(
        result: &BuildResult,
        reference: &PackageReference,
        settings: &RunSettings,
        ci: &dyn CiManager,
        client: &dyn PackageClient,
        sink: &dyn OutputSink,
    ) -> UploadOutcome {
        let remote_url = match Self::evaluate(result, settings, ci) {
            GateDecision::Skip(reason) => {
                info!(%reason, reference = %reference, "Upload skipped");
                sink.line(&format!("Skipping upload of {reference}: {reason}"));
                return UploadOutcome::Skipped {
                    reason: reason.to_string(),
                };
            }
            GateDecision::Upload { remote_url } => remote_url,
        };

        let package_id = result.package_id.as_deref();
        match Self::upload(reference, package_id, &remote_url, settings, client).await {
            Ok(()) => {
                info!(reference = %reference, package_id = ?package_id, "Uploaded");
                sink.line(&format!("Uploaded {reference} to {UPLOAD_REMOTE_NAME}"));
                UploadOutcome::Uploaded {
                    package_id: package_id.map(str::to_string),
                }
            }
            Err(e) => {
                warn!(error = %e, reference = %reference, "Upload failed");
                sink.line(&format!("Upload of {reference} failed: {e}"));
                UploadOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn upload(
        reference: &PackageReference,
        package_id: Option<&str>,
        remote_url: &str,
        settings: &RunSettings,
        client: &dyn PackageClient,
    ) -> Result<(), UploadError> {
        client.add_remote(UPLOAD_REMOTE_NAME, remote_url).await?;

        let user = settings
            .login_username()
            .ok_or_else(|| UploadError::MissingCredentials("<unset>".to_string()))?;
        match settings.password() {
            Some(password) => client.authenticate(UPLOAD_REMOTE_NAME, user, password).await?,
            None if settings.skip_check_credentials() => {}
            None => return Err(UploadError::MissingCredentials(user.to_string())),
        }

        client
            .upload(reference, package_id, UPLOAD_REMOTE_NAME, settings.upload_retry())
            .await?;
        Ok(())
    }
}
