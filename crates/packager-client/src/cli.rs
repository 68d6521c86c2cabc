//! Package client backed by the `conan` executable.
//!
//! Every invocation is echoed to the execution log as `>> <command>`.
//! Passwords travel through the child environment, never the argument list.

use async_trait::async_trait;
use packager_core::{
    OutputSink, PackageReference, ProcessOutput, ProcessRunner, Secret, ShellCommand,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{
    normalize_reference, ClientApi, CreateOutcome, CreateRequest, PackageClient, PackageInfo,
    RecipeMatch,
};
use crate::error::{ClientError, ClientResult};
use crate::response;

const DEFAULT_PROGRAM: &str = "conan";
const PASSWORD_VAR: &str = "CONAN_PASSWORD";

// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// Quote an argument for a POSIX shell when it needs it.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+,*%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Profile carrying what has no command-line flag: tool requirements, and
/// for V2 the build environment. `None` when the default profile suffices.
pub fn profile_text(api: ClientApi, request: &CreateRequest) -> Option<String> {
    let env_in_profile = api == ClientApi::V2 && !request.env_vars.is_empty();
    if request.build_requires.is_empty() && !env_in_profile {
        return None;
    }

    let mut text = String::from("include(default)\n");
    if !request.build_requires.is_empty() {
        text.push_str(match api {
            ClientApi::V1 => "[build_requires]\n",
            ClientApi::V2 => "[tool_requires]\n",
        });
        for tool in &request.build_requires {
            text.push_str(&format!("*: {tool}\n"));
        }
    }
    if env_in_profile {
        text.push_str("[buildenv]\n");
        for (key, value) in &request.env_vars {
            text.push_str(&format!("{key}={value}\n"));
        }
    }
    Some(text)
}

/// Arguments of the build command, without the program name.
pub fn create_args(
    api: ClientApi,
    request: &CreateRequest,
    profile: Option<&str>,
    json_out: Option<&Path>,
) -> Vec<String> {
    let reference = &request.reference;
    let mut args = vec!["create".to_string(), request.recipe_dir.display().to_string()];

    match api {
        ClientApi::V1 => args.push(reference.to_string()),
        ClientApi::V2 => {
            args.extend(["--name".to_string(), reference.name.clone()]);
            args.extend(["--version".to_string(), reference.version.clone()]);
            if let Some(user) = &reference.user {
                args.extend(["--user".to_string(), user.clone()]);
            }
            if let Some(channel) = &reference.channel {
                args.extend(["--channel".to_string(), channel.clone()]);
            }
        }
    }

    for (key, value) in &request.settings {
        args.extend(["-s".to_string(), format!("{key}={value}")]);
    }
    for (key, value) in &request.options {
        args.extend(["-o".to_string(), format!("{key}={value}")]);
    }
    if api == ClientApi::V1 {
        for (key, value) in &request.env_vars {
            args.extend(["-e".to_string(), format!("{key}={value}")]);
        }
    }
    if let Some(profile) = profile {
        args.extend(["-pr".to_string(), profile.to_string()]);
    }
    if let Some(policy) = &request.build_policy {
        args.push(format!("--build={policy}"));
    }
    match (api, json_out) {
        (ClientApi::V1, Some(path)) => {
            args.extend(["--json".to_string(), path.display().to_string()]);
        }
        (ClientApi::V2, _) => args.push("--format=json".to_string()),
        (ClientApi::V1, None) => {}
    }
    args
}

/// The build command as a shell line, as run inside a container.
pub fn create_command_line(api: ClientApi, request: &CreateRequest, profile: Option<&str>) -> String {
    std::iter::once(DEFAULT_PROGRAM.to_string())
        .chain(create_args(api, request, profile, None).iter().map(|a| shell_quote(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn upload_args(
    api: ClientApi,
    reference: &PackageReference,
    package_id: Option<&str>,
    remote: &str,
    retry: u32,
) -> Vec<String> {
    let mut args = vec!["upload".to_string()];
    match api {
        ClientApi::V1 => {
            let reference = reference.to_string();
            match package_id {
                Some(id) => args.push(format!("{reference}:{id}")),
                None => args.extend([reference, "--all".to_string()]),
            }
            args.extend([
                "-r".to_string(),
                remote.to_string(),
                "--confirm".to_string(),
                "--retry".to_string(),
                retry.to_string(),
            ]);
        }
        ClientApi::V2 => {
            let reference = reference.to_string();
            let reference = normalize_reference(&reference);
            args.push(format!("{reference}:{}", package_id.unwrap_or("*")));
            args.extend(["-r".to_string(), remote.to_string(), "-c".to_string()]);
        }
    }
    args
}

// ---------------------------------------------------------------------------
// CliPackageClient
// ---------------------------------------------------------------------------

/// [`PackageClient`] that shells out to the package manager.
pub struct CliPackageClient {
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
    program: String,
    api: ClientApi,
}

impl CliPackageClient {
    /// Client speaking a fixed API revision.
    pub fn new(runner: Arc<dyn ProcessRunner>, sink: Arc<dyn OutputSink>, api: ClientApi) -> Self {
        Self {
            runner,
            sink,
            program: DEFAULT_PROGRAM.to_string(),
            api,
        }
    }

    /// Ask the installed client for its version and pick the API from it.
    pub async fn detect(
        runner: Arc<dyn ProcessRunner>,
        sink: Arc<dyn OutputSink>,
    ) -> ClientResult<Self> {
        let detector = Self::new(runner, sink, ClientApi::V2);
        let version = detector.version().await?;
        let api = ClientApi::from_version(&version)
            .ok_or_else(|| ClientError::UnknownVersion(version.clone()))?;
        info!(%version, %api, "Detected package client");
        Ok(Self { api, ..detector })
    }

    /// Use another executable name or path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command<I, S>(&self, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ShellCommand::new(self.program.clone()).args(args)
    }

    /// Run and return the output whatever the exit code.
    async fn exec(&self, command: &ShellCommand) -> ClientResult<ProcessOutput> {
        self.sink.line(&format!(">> {}", command.display()));
        Ok(self.runner.run(command, self.sink.as_ref()).await?)
    }

    /// Run and fail on a non-zero exit code.
    async fn run_checked(&self, command: &ShellCommand) -> ClientResult<ProcessOutput> {
        let output = self.exec(command).await?;
        if !output.success() {
            return Err(ClientError::CommandFailed {
                command: command.display(),
                exit_code: output.exit_code,
                tail: output.tail,
            });
        }
        Ok(output)
    }

    /// Run a query whose JSON answer goes to a file (V1) or stdout (V2).
    async fn query(&self, mut args: Vec<String>) -> ClientResult<String> {
        match self.api {
            ClientApi::V1 => {
                let scratch = tempfile::tempdir()?;
                let path = scratch.path().join("result.json");
                args.extend(["--json".to_string(), path.display().to_string()]);
                self.run_checked(&self.command(args).quiet()).await?;
                Ok(tokio::fs::read_to_string(&path).await?)
            }
            ClientApi::V2 => {
                args.push("--format=json".to_string());
                let output = self.run_checked(&self.command(args).quiet()).await?;
                Ok(output.stdout)
            }
        }
    }
}

#[async_trait]
impl PackageClient for CliPackageClient {
    fn api(&self) -> ClientApi {
        self.api
    }

    async fn version(&self) -> ClientResult<String> {
        let output = self.run_checked(&self.command(["--version"]).quiet()).await?;
        let text = output.stdout.trim().to_string();
        Ok(text
            .strip_prefix("Conan version ")
            .map(str::to_string)
            .unwrap_or(text))
    }

    async fn create(&self, request: &CreateRequest) -> ClientResult<CreateOutcome> {
        let scratch = tempfile::tempdir()?;

        let profile = match profile_text(self.api, request) {
            Some(text) => {
                let path = scratch.path().join("build.profile");
                tokio::fs::write(&path, text).await?;
                Some(path.display().to_string())
            }
            None => None,
        };
        let json_path = scratch.path().join("create.json");
        let args = create_args(self.api, request, profile.as_deref(), Some(&json_path));

        let mut command = self.command(args).current_dir(request.recipe_dir.clone());
        for (key, value) in &request.env_vars {
            command = command.env(key.clone(), value.clone());
        }

        let output = self.exec(&command).await?;
        let name_version = request.reference.name_version();

        let package_id = if !output.success() {
            None
        } else {
            let parsed = match self.api {
                ClientApi::V1 => match tokio::fs::read_to_string(&json_path).await {
                    Ok(json) => response::parse_v1_create(&json, &name_version),
                    Err(e) => Err(e.into()),
                },
                ClientApi::V2 => response::parse_v2_create(&output.stdout, &name_version),
            };
            parsed.unwrap_or_else(|e| {
                warn!(error = %e, reference = %request.reference, "Could not read package id");
                None
            })
        };

        Ok(CreateOutcome {
            exit_code: output.exit_code,
            package_id,
            tail: output.tail,
        })
    }

    async fn add_remote(&self, name: &str, url: &str) -> ClientResult<()> {
        debug!(remote = name, "Adding remote");
        self.run_checked(&self.command(["remote", "add", name, url, "--force"]))
            .await?;
        Ok(())
    }

    async fn authenticate(&self, remote: &str, user: &str, password: &Secret) -> ClientResult<()> {
        let args: Vec<&str> = match self.api {
            ClientApi::V1 => vec!["user", user, "-r", remote, "-p"],
            ClientApi::V2 => vec!["remote", "login", remote, user],
        };
        let command = self.command(args).env(PASSWORD_VAR, password.expose());
        match self.run_checked(&command).await {
            Ok(_) => Ok(()),
            Err(ClientError::CommandFailed { .. }) => Err(ClientError::AuthenticationFailed {
                remote: remote.to_string(),
                user: user.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn upload(
        &self,
        reference: &PackageReference,
        package_id: Option<&str>,
        remote: &str,
        retry: u32,
    ) -> ClientResult<()> {
        let command = self.command(upload_args(self.api, reference, package_id, remote, retry));

        // V1 retries on its own via --retry.
        let attempts = match self.api {
            ClientApi::V1 => 1,
            ClientApi::V2 => retry.saturating_add(1),
        };
        let mut attempt = 1;
        loop {
            match self.run_checked(&command).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(error = %e, attempt, %reference, "Upload failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn search_recipes(&self, pattern: &str, remote: &str) -> ClientResult<Vec<RecipeMatch>> {
        match self.api {
            ClientApi::V1 => {
                let json = self
                    .query(vec![
                        "search".into(),
                        pattern.into(),
                        "-r".into(),
                        remote.into(),
                        "--raw".into(),
                    ])
                    .await?;
                response::parse_v1_search(&json)
            }
            ClientApi::V2 => {
                let json = self
                    .query(vec!["list".into(), pattern.into(), "-r".into(), remote.into()])
                    .await?;
                response::parse_v2_list(&json, remote)
            }
        }
    }

    async fn search_packages(
        &self,
        reference: &PackageReference,
        remote: &str,
    ) -> ClientResult<Vec<PackageInfo>> {
        let matches = match self.api {
            ClientApi::V1 => {
                let json = self
                    .query(vec![
                        "search".into(),
                        reference.to_string(),
                        "-r".into(),
                        remote.into(),
                    ])
                    .await?;
                response::parse_v1_search(&json)?
            }
            ClientApi::V2 => {
                let text = reference.to_string();
                let pattern = format!("{}:*", normalize_reference(&text));
                let json = self
                    .query(vec!["list".into(), pattern, "-r".into(), remote.into()])
                    .await?;
                response::parse_v2_list(&json, remote)?
            }
        };
        Ok(matches.into_iter().flat_map(|m| m.packages).collect())
    }

    async fn remove(&self, pattern: &str, remote: &str) -> ClientResult<Vec<String>> {
        let matches = self.search_recipes(pattern, remote).await?;
        if matches.is_empty() {
            debug!(pattern, remote, "Nothing to remove");
            return Ok(Vec::new());
        }

        let confirm = match self.api {
            ClientApi::V1 => "-f",
            ClientApi::V2 => "-c",
        };
        self.run_checked(&self.command(["remove", pattern, "-r", remote, confirm]))
            .await?;
        Ok(matches.into_iter().map(|m| m.reference).collect())
    }

    async fn config_install(&self, url: &str) -> ClientResult<()> {
        self.run_checked(&self.command(["config", "install", url]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> CreateRequest {
        let reference: PackageReference = "zlib/1.2.11@lasote/testing".parse().unwrap();
        CreateRequest {
            recipe_dir: ".".into(),
            reference,
            settings: BTreeMap::from([
                ("arch".to_string(), "x86".to_string()),
                ("compiler".to_string(), "gcc".to_string()),
            ]),
            options: BTreeMap::from([("zlib:shared".to_string(), "True".to_string())]),
            env_vars: BTreeMap::from([("CFLAGS".to_string(), "-O2".to_string())]),
            build_requires: Vec::new(),
            build_policy: Some("missing".to_string()),
        }
    }

    #[test]
    fn test_v1_create_args() {
        let args = create_args(ClientApi::V1, &request(), None, Some(Path::new("/tmp/o.json")));
        assert_eq!(
            args.join(" "),
            "create . zlib/1.2.11@lasote/testing -s arch=x86 -s compiler=gcc \
             -o zlib:shared=True -e CFLAGS=-O2 --build=missing --json /tmp/o.json"
        );
    }

    #[test]
    fn test_v2_create_args() {
        let args = create_args(ClientApi::V2, &request(), Some("p.profile"), None);
        assert_eq!(
            args.join(" "),
            "create . --name zlib --version 1.2.11 --user lasote --channel testing \
             -s arch=x86 -s compiler=gcc -o zlib:shared=True -pr p.profile \
             --build=missing --format=json"
        );
    }

    #[test]
    fn test_profile_text() {
        let mut req = request();
        assert!(profile_text(ClientApi::V1, &req).is_none());
        assert_eq!(
            profile_text(ClientApi::V2, &req).as_deref(),
            Some("include(default)\n[buildenv]\nCFLAGS=-O2\n")
        );
        req.build_requires = vec!["cmake/3.20.0".to_string()];
        assert_eq!(
            profile_text(ClientApi::V1, &req).as_deref(),
            Some("include(default)\n[build_requires]\n*: cmake/3.20.0\n")
        );
    }

    #[test]
    fn test_create_command_line_quotes() {
        let mut req = request();
        req.settings
            .insert("compiler".to_string(), "Visual Studio".to_string());
        let line = create_command_line(ClientApi::V1, &req, None);
        assert!(line.starts_with("conan create . zlib/1.2.11@lasote/testing"));
        assert!(line.contains("-s 'compiler=Visual Studio'"));
    }

    #[test]
    fn test_upload_args() {
        let reference: PackageReference = "zlib/1.2.11@".parse().unwrap();
        assert_eq!(
            upload_args(ClientApi::V1, &reference, None, "upload_repo", 3).join(" "),
            "upload zlib/1.2.11@ --all -r upload_repo --confirm --retry 3"
        );
        assert_eq!(
            upload_args(ClientApi::V2, &reference, Some("abc"), "upload_repo", 3).join(" "),
            "upload zlib/1.2.11:abc -r upload_repo -c"
        );
        assert_eq!(
            upload_args(ClientApi::V2, &reference, None, "upload_repo", 3).join(" "),
            "upload zlib/1.2.11:* -r upload_repo -c"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("arch=x86_64"), "arch=x86_64");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
