//! Build execution: natively through the package client, or inside a container.

use async_trait::async_trait;
use chrono::Utc;
use packager_client::{create_command_line, profile_text, ClientApi, CreateRequest, PackageClient};
use packager_core::settings::vars;
use packager_core::{
    BuildConfiguration, OutputSink, PackageReference, ProcessRunner, RunSettings, ShellCommand,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::container::{bootstrap_script, env_flags, image_for, pull_command, ContainerInvocation};
use crate::error::BuildError;
use crate::report::BuildResult;

/// Directory under the project that holds generated profiles for containers.
const SCRATCH_DIR: &str = ".packager";

/// One configuration to build, with the context it is built in.
#[derive(Debug, Clone, Copy)]
pub struct BuildJob<'a> {
    pub configuration: &'a BuildConfiguration,
    /// Full reference (user/channel applied) to build as.
    pub reference: &'a PackageReference,
    pub settings: &'a RunSettings,
}

impl BuildJob<'_> {
    fn request(&self, recipe_dir: impl Into<PathBuf>) -> CreateRequest {
        CreateRequest::for_configuration(recipe_dir, self.reference, self.configuration)
            .with_build_policy(self.settings.build_policy())
    }
}

/// Builds a single configuration. A non-zero exit is a failed
/// [`BuildResult`]; `Err` means the build could not be attempted.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn execute(&self, job: &BuildJob<'_>) -> Result<BuildResult, BuildError>;
}

// ---------------------------------------------------------------------------
// NativeExecutor
// ---------------------------------------------------------------------------

/// Builds on the host by delegating to [`PackageClient::create`].
pub struct NativeExecutor {
    client: Arc<dyn PackageClient>,
}

impl NativeExecutor {
    pub fn new(client: Arc<dyn PackageClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BuildExecutor for NativeExecutor {
    async fn execute(&self, job: &BuildJob<'_>) -> Result<BuildResult, BuildError> {
        let started_at = Utc::now();
        let request = job.request(job.settings.project_dir().clone());
        debug!(reference = %request.reference, config = %job.configuration, "Native build");

        let outcome = self.client.create(&request).await?;
        Ok(BuildResult::from_exit(
            job.configuration,
            &request.reference,
            outcome.exit_code,
            outcome.tail,
            outcome.package_id,
            started_at,
        ))
    }
}

// ---------------------------------------------------------------------------
// DockerExecutor
// ---------------------------------------------------------------------------

/// Builds inside a throwaway container. The host package cache is mounted
/// so uploads can run on the host afterwards.
pub struct DockerExecutor {
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
    api: ClientApi,
    pulled: Mutex<BTreeSet<String>>,
}

impl DockerExecutor {
    /// `api` selects the command-line form of the build run in the container.
    pub fn new(runner: Arc<dyn ProcessRunner>, sink: Arc<dyn OutputSink>, api: ClientApi) -> Self {
        Self {
            runner,
            sink,
            api,
            pulled: Mutex::new(BTreeSet::new()),
        }
    }

    /// Pull `image` unless it was already pulled in this run.
    async fn pull(&self, settings: &RunSettings, image: &str) -> Result<(), BuildError> {
        let docker = settings.docker();
        if docker.skip_pull {
            return Ok(());
        }
        let first = self
            .pulled
            .lock()
            .map(|mut pulled| pulled.insert(image.to_string()))
            .unwrap_or(true);
        if !first {
            return Ok(());
        }

        let command = ShellCommand::shell(pull_command(docker, image));
        self.sink.line(&format!(">> {}", command.display()));
        let output = self.runner.run(&command, self.sink.as_ref()).await?;
        if !output.success() {
            if let Ok(mut pulled) = self.pulled.lock() {
                pulled.remove(image);
            }
            return Err(BuildError::PullFailed {
                image: image.to_string(),
                exit_code: output.exit_code,
            });
        }
        Ok(())
    }

    /// Write the generated profile into the project.
    async fn stage_profile(
        &self,
        project_dir: &Path,
        home: &str,
        job: &BuildJob<'_>,
        request: &CreateRequest,
    ) -> Result<Option<StagedProfile>, BuildError> {
        let Some(text) = profile_text(self.api, request) else {
            return Ok(None);
        };
        let file_name = format!("build-{}.profile", job.configuration.id().short());
        let host_dir = project_dir.join(SCRATCH_DIR);
        tokio::fs::create_dir_all(&host_dir).await?;
        let host_path = host_dir.join(&file_name);
        tokio::fs::write(&host_path, text).await?;
        Ok(Some(StagedProfile {
            host_path,
            container_path: format!("{home}/project/{SCRATCH_DIR}/{file_name}"),
        }))
    }
}

/// A profile written for one container build.
struct StagedProfile {
    host_path: PathBuf,
    container_path: String,
}

impl StagedProfile {
    /// Delete the profile, and the scratch directory once it is empty.
    async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.host_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.host_path.display(), error = %e, "Could not remove build profile");
            }
        }
        if let Some(dir) = self.host_path.parent() {
            // Fails while other profiles remain.
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl BuildExecutor for DockerExecutor {
    async fn execute(&self, job: &BuildJob<'_>) -> Result<BuildResult, BuildError> {
        let started_at = Utc::now();
        let settings = job.settings;
        let docker = settings.docker();

        let image = image_for(docker, job.configuration)?;
        self.pull(settings, &image).await?;

        let project_dir = absolute(settings.project_dir());
        let storage_dir = settings
            .user_home()
            .unwrap_or(&project_dir)
            .join(self.api.cache_dir());

        let request = job.request(".");
        let profile = self
            .stage_profile(&project_dir, &docker.home, job, &request)
            .await?;
        let create_line = create_command_line(
            self.api,
            &request,
            profile.as_ref().map(|p| p.container_path.as_str()),
        );
        let script = bootstrap_script(docker, self.api, settings.config_url(), &create_line);

        let invocation = ContainerInvocation::build(
            docker,
            self.api,
            &image,
            &project_dir.display().to_string(),
            &storage_dir.display().to_string(),
            &env_flags(settings, job.configuration, job.reference),
            &script,
        );

        let mut command = ShellCommand::shell(invocation.command_line()).current_dir(&project_dir);
        if let Some(password) = settings.password() {
            command = command.env(vars::PASSWORD, password.expose());
        }

        info!(%image, config = %job.configuration, "Running container build");
        self.sink.line(&format!(">> {}", command.display()));
        let output = self.runner.run(&command, self.sink.as_ref()).await;
        if let Some(profile) = profile {
            profile.remove().await;
        }
        let output = output?;

        Ok(BuildResult::from_exit(
            job.configuration,
            job.reference,
            output.exit_code,
            output.tail,
            None,
            started_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packager_client::MemoryRemote;
    use packager_core::{Environment, ExplicitParams, MemorySink, ProcessError, ProcessOutput};

    /// Answers every command with success and remembers whether the staged
    /// profile existed while the container ran.
    struct ProfileCheckingRunner {
        profile: PathBuf,
        commands: Mutex<Vec<String>>,
        profile_present: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl ProcessRunner for ProfileCheckingRunner {
        async fn run(
            &self,
            command: &ShellCommand,
            _sink: &dyn OutputSink,
        ) -> Result<ProcessOutput, ProcessError> {
            self.commands.lock().unwrap().push(command.display());
            self.profile_present
                .lock()
                .unwrap()
                .push(self.profile.exists());
            Ok(ProcessOutput {
                exit_code: 0,
                stdout: String::new(),
                tail: Vec::new(),
            })
        }
    }

    fn settings() -> RunSettings {
        let env = Environment::from_pairs([("CONAN_REFERENCE", "zlib/1.2.11")]);
        RunSettings::resolve(&ExplicitParams::default(), &env).unwrap()
    }

    #[tokio::test]
    async fn test_native_executor_reports_package_id() {
        let client = Arc::new(MemoryRemote::new());
        let executor = NativeExecutor::new(client.clone());
        let settings = settings();
        let reference = settings.full_reference(false);
        let config = BuildConfiguration::new([("arch", "x86_64")]);

        let result = executor
            .execute(&BuildJob {
                configuration: &config,
                reference: &reference,
                settings: &settings,
            })
            .await
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(result.package_id.as_deref(), Some(config.id().as_str()));
        assert_eq!(client.creates(), 1);
    }

    #[tokio::test]
    async fn test_native_executor_failed_build() {
        let client = Arc::new(MemoryRemote::new().failing_when("arch", "x86"));
        let executor = NativeExecutor::new(client);
        let settings = settings();
        let reference = settings.full_reference(false);
        let config = BuildConfiguration::new([("arch", "x86")]);

        let result = executor
            .execute(&BuildJob {
                configuration: &config,
                reference: &reference,
                settings: &settings,
            })
            .await
            .unwrap();
        assert!(!result.succeeded());
        assert!(result.package_id.is_none());
    }

    #[tokio::test]
    async fn test_docker_profile_removed_after_container_exits() {
        let project = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let explicit = ExplicitParams {
            project_dir: Some(project.path().to_path_buf()),
            ..Default::default()
        };
        let env = Environment::from_pairs([
            ("CONAN_REFERENCE", "zlib/1.2.11"),
            ("CONAN_DOCKER_IMAGE", "conanio/gcc8"),
            ("CONAN_USER_HOME", home.path().to_str().unwrap()),
        ]);
        let settings = RunSettings::resolve(&explicit, &env).unwrap();
        let reference = settings.full_reference(false);
        let config = BuildConfiguration::new([("arch", "x86_64")])
            .with_build_requires(["cmake/3.27.0"]);

        let project_dir = absolute(project.path());
        let profile = project_dir
            .join(SCRATCH_DIR)
            .join(format!("build-{}.profile", config.id().short()));
        let runner = Arc::new(ProfileCheckingRunner {
            profile: profile.clone(),
            commands: Mutex::new(Vec::new()),
            profile_present: Mutex::new(Vec::new()),
        });
        let executor = DockerExecutor::new(runner.clone(), Arc::new(MemorySink::new()), ClientApi::V2);

        let result = executor
            .execute(&BuildJob {
                configuration: &config,
                reference: &reference,
                settings: &settings,
            })
            .await
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(*runner.profile_present.lock().unwrap(), vec![false, true]);
        assert!(!profile.exists());
        assert!(!project_dir.join(SCRATCH_DIR).exists());

        let commands = runner.commands.lock().unwrap();
        let cache = home.path().join(".conan2").join("p");
        let mount = format!("-v \"{}:/home/conan/.conan2/p\"", cache.display());
        assert!(commands[1].contains(&mount), "{}", commands[1]);
        assert!(commands[1].contains("pip install 'conan>=2'"), "{}", commands[1]);
    }
}
