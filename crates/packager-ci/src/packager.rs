//! Matrix orchestration.

use chrono::Utc;
use packager_client::{ClientError, PackageClient, RecipeMatch};
use packager_core::{
    BuildConfiguration, BuildMatrix, CiManager, CommonBuildsOptions, HostProfile, MatrixAxes,
    OutputSink, PackageReference, ProcessRunner, RunSettings, UPLOAD_REMOTE_NAME,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::container::image_for;
use crate::error::{PackagerError, PackagerResult, RemoteQueryError};
use crate::executor::{BuildExecutor, BuildJob, DockerExecutor, NativeExecutor};
use crate::gate::UploadGate;
use crate::report::{BuildResult, RunReport};

/// Builds every configuration of a matrix and publishes what the upload
/// gate allows.
///
/// Configurations run one at a time in declaration order. The first failed
/// build stops the run unless `continue_on_error` is set.
pub struct MultiPackager {
    settings: RunSettings,
    ci: Box<dyn CiManager>,
    client: Arc<dyn PackageClient>,
    executor: Arc<dyn BuildExecutor>,
    sink: Arc<dyn OutputSink>,
    matrix: BuildMatrix,
    host: Option<HostProfile>,
}

impl MultiPackager {
    /// Builds run in containers when `settings.use_docker()`, otherwise
    /// through the client on the host.
    pub fn new(
        settings: RunSettings,
        ci: Box<dyn CiManager>,
        client: Arc<dyn PackageClient>,
        runner: Arc<dyn ProcessRunner>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let executor: Arc<dyn BuildExecutor> = if settings.use_docker() {
            Arc::new(DockerExecutor::new(runner, sink.clone(), client.api()))
        } else {
            Arc::new(NativeExecutor::new(client.clone()))
        };
        Self {
            settings,
            ci,
            client,
            executor,
            sink,
            matrix: BuildMatrix::new(),
            host: None,
        }
    }

    /// Use a fixed host profile instead of detecting it on this machine.
    pub fn with_host(mut self, host: HostProfile) -> Self {
        self.host = Some(host);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn ci(&self) -> &dyn CiManager {
        self.ci.as_ref()
    }

    /// Add one configuration. Returns `false` for a duplicate.
    pub fn add(&mut self, configuration: BuildConfiguration) -> bool {
        self.matrix.add(configuration)
    }

    /// Expand the configured axes and add the result. Returns how many
    /// configurations were new.
    pub fn add_common_builds(&mut self, options: CommonBuildsOptions) -> PackagerResult<usize> {
        let host = self.host.get_or_insert_with(HostProfile::detect);
        let axes = MatrixAxes::from_settings(self.settings.axes(), host, self.settings.use_docker())?;
        let added = self.matrix.add_common_builds(&axes, &options);
        info!(added, total = self.matrix.len(), "Added common builds");
        Ok(added)
    }

    pub fn remove_build_if<F>(&mut self, pred: F) -> usize
    where
        F: FnMut(&BuildConfiguration) -> bool,
    {
        self.matrix.remove_build_if(pred)
    }

    pub fn update_build_if<P, U>(&mut self, pred: P, update: U)
    where
        P: FnMut(&BuildConfiguration) -> bool,
        U: FnMut(BuildConfiguration) -> BuildConfiguration,
    {
        self.matrix.update_build_if(pred, update)
    }

    pub fn builds(&self) -> &[BuildConfiguration] {
        self.matrix.builds()
    }

    /// Reference (with user and channel) builds are published as.
    pub fn reference(&self) -> PackageReference {
        let stable = self.ci.is_stable(self.settings.stable_branch_pattern());
        self.settings.full_reference(stable)
    }

    /// Configurations this CI job is responsible for.
    pub fn planned_builds(&self) -> PackagerResult<Vec<BuildConfiguration>> {
        Ok(match self.ci.job_split()? {
            Some(split) => self.matrix.paginate(split)?,
            None => self.matrix.builds().to_vec(),
        })
    }

    /// Print the planned configurations to the execution log.
    pub fn print_matrix(&self, builds: &[BuildConfiguration]) {
        self.sink.line(&format!(
            "Build matrix for {} ({} configuration(s))",
            self.reference(),
            builds.len()
        ));
        for (i, config) in builds.iter().enumerate() {
            let options = config
                .options()
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            self.sink
                .line(&format!("{:>3} | {} | {}", i + 1, config, options));
        }
    }

    /// Run the whole matrix.
    pub async fn run(&self) -> PackagerResult<RunReport> {
        let mut report = RunReport::new();

        if self.ci.skip_builds() {
            info!("Commit message requests skipping CI");
            self.sink
                .line("Skipped builds due to [skip ci] in commit message");
            report.skipped = true;
            return Ok(report.finish());
        }

        let builds = self.planned_builds()?;
        if self.settings.use_docker() {
            for configuration in &builds {
                image_for(self.settings.docker(), configuration)?;
            }
        }

        if let (Some(url), false) = (self.settings.config_url(), self.settings.use_docker()) {
            self.client
                .config_install(url)
                .await
                .map_err(|source| PackagerError::Setup {
                    step: "config install",
                    source,
                })?;
        }
        for (i, url) in self.settings.remotes().iter().enumerate() {
            let name = format!("remote{i}");
            self.client
                .add_remote(&name, url)
                .await
                .map_err(|source| PackagerError::Setup {
                    step: "remote registration",
                    source,
                })?;
        }

        let reference = self.reference();
        self.print_matrix(&builds);
        info!(run_id = %report.run_id, builds = builds.len(), reference = %reference, "Starting run");

        let total = builds.len();
        for (n, configuration) in builds.iter().enumerate() {
            self.sink.line(&format!(
                "[{}/{}] Building {} with {}",
                n + 1,
                total,
                reference,
                configuration
            ));

            let started_at = Utc::now();
            let job = BuildJob {
                configuration,
                reference: &reference,
                settings: &self.settings,
            };
            let result = match self.executor.execute(&job).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, config = %configuration, "Build could not run");
                    BuildResult::errored(configuration, &reference, e, started_at)
                }
            };

            let result = if result.succeeded() {
                let upload = UploadGate::maybe_upload(
                    &result,
                    &reference,
                    &self.settings,
                    self.ci.as_ref(),
                    self.client.as_ref(),
                    self.sink.as_ref(),
                )
                .await;
                result.with_upload(upload)
            } else {
                for line in &result.log_tail {
                    self.sink.line(line);
                }
                self.sink.line(&format!("Build failed: {configuration}"));
                result
            };

            let failed = !result.succeeded();
            report.push(result);
            if failed && !self.settings.continue_on_error() {
                warn!(config = %configuration, "Stopping after failed build");
                report.aborted = true;
                break;
            }
        }

        let report = report.finish();
        self.sink.line(&report.summary());
        info!(
            run_id = %report.run_id,
            built = report.built(),
            failed = report.failed(),
            uploaded = report.uploaded(),
            "Run finished"
        );
        Ok(report)
    }

    /// Make `remote` usable for queries: register the upload remote when it
    /// is the one asked for, then log in if credentials are configured.
    async fn connect(&self, remote: &str) -> Result<(), ClientError> {
        if remote == UPLOAD_REMOTE_NAME {
            if let Some(url) = self.settings.upload() {
                self.client.add_remote(UPLOAD_REMOTE_NAME, url).await?;
            }
        }
        if let (Some(user), Some(password)) =
            (self.settings.login_username(), self.settings.password())
        {
            self.client.authenticate(remote, user, password).await?;
        }
        Ok(())
    }

    /// Recipes on `remote` matching `pattern`.
    pub async fn search(&self, pattern: &str, remote: &str) -> Result<Vec<RecipeMatch>, RemoteQueryError> {
        let query = async {
            self.connect(remote).await?;
            self.client.search_recipes(pattern, remote).await
        };
        query.await.map_err(|source| RemoteQueryError {
            remote: remote.to_string(),
            pattern: pattern.to_string(),
            source,
        })
    }

    /// Remove recipes matching `pattern` from `remote`.
    pub async fn remove(&self, pattern: &str, remote: &str) -> Result<Vec<String>, RemoteQueryError> {
        let query = async {
            self.connect(remote).await?;
            self.client.remove(pattern, remote).await
        };
        query.await.map_err(|source| RemoteQueryError {
            remote: remote.to_string(),
            pattern: pattern.to_string(),
            source,
        })
    }
}
