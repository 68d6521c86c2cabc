//! Packager - multi-configuration package builder for CI
//!
//! The `packager` command expands a build matrix, builds every configuration
//! natively or in a container, and uploads what the CI ref allows.
//!
//! ## Commands
//!
//! - `run`: Build (and possibly upload) every configuration of this CI job
//! - `matrix`: Print the planned configurations without building
//! - `search`: List recipes on a remote
//! - `remove`: Delete recipes from a remote

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use packager_ci::{MultiPackager, RunReport};
use packager_client::{CliPackageClient, ClientApi, PackageClient};
use packager_core::{
    detect_ci, BuildConfiguration, CommonBuildsOptions, Environment, ExplicitParams, OutputSink,
    ProcessRunner, RunSettings, Secret, StdoutSink, TokioProcessRunner,
};
use packager_core::settings::vars;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "packager")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build a package for every configuration of a matrix", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every configuration assigned to this CI job
    Run {
        #[command(flatten)]
        build: BuildArgs,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the build matrix without building
    Matrix {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Search recipes on a remote
    Search {
        /// Reference pattern, e.g. `zlib/*`
        pattern: String,

        /// Remote name
        #[arg(short, long)]
        remote: String,
    },

    /// Remove recipes matching a pattern from a remote
    Remove {
        /// Reference pattern, e.g. `zlib/1.2.11*`
        pattern: String,

        /// Remote name
        #[arg(short, long)]
        remote: String,
    },
}

/// Options shared by `run` and `matrix`. Unset options fall back to the
/// `CONAN_*` environment, then to defaults.
#[derive(Args, Debug, Clone, Default)]
struct BuildArgs {
    /// JSON file with an explicit list of configurations; replaces the
    /// generated matrix
    #[arg(long)]
    build_list: Option<PathBuf>,

    /// Recipe reference, `name/version[@user/channel]`
    #[arg(long)]
    reference: Option<String>,

    #[arg(long)]
    channel: Option<String>,

    #[arg(long)]
    username: Option<String>,

    /// Upload remote URL
    #[arg(long)]
    upload: Option<String>,

    /// Build inside this container image
    #[arg(long)]
    docker_image: Option<String>,

    /// Extra options passed to the container runtime
    #[arg(long)]
    docker_run_options: Option<String>,

    #[arg(long, value_delimiter = ',')]
    gcc_versions: Option<Vec<String>>,

    #[arg(long, value_delimiter = ',')]
    clang_versions: Option<Vec<String>>,

    #[arg(long, value_delimiter = ',')]
    archs: Option<Vec<String>>,

    #[arg(long, value_delimiter = ',')]
    build_types: Option<Vec<String>>,

    /// Double every configuration with `<name>=True` and `<name>=False`
    #[arg(long)]
    shared_option: Option<String>,

    /// The recipe is plain C (default)
    #[arg(long, overrides_with = "no_pure_c")]
    pure_c: bool,

    /// The recipe is C++; adds the `compiler.libcxx` axis
    #[arg(long, overrides_with = "pure_c")]
    no_pure_c: bool,

    /// Keep building after a failed configuration
    #[arg(long)]
    continue_on_error: bool,

    /// Recipe directory (default: current directory)
    #[arg(long)]
    project_dir: Option<PathBuf>,
}

impl BuildArgs {
    fn explicit_params(&self) -> ExplicitParams {
        ExplicitParams {
            reference: self.reference.clone(),
            username: self.username.clone(),
            channel: self.channel.clone(),
            upload: self.upload.clone(),
            docker_image: self.docker_image.clone(),
            docker_run_options: self.docker_run_options.clone(),
            gcc_versions: self.gcc_versions.clone(),
            clang_versions: self.clang_versions.clone(),
            archs: self.archs.clone(),
            build_types: self.build_types.clone(),
            continue_on_error: self.continue_on_error.then_some(true),
            project_dir: self.project_dir.clone(),
            ..Default::default()
        }
    }

    fn common_builds(&self) -> CommonBuildsOptions {
        CommonBuildsOptions {
            shared_option_name: self.shared_option.clone(),
            pure_c: self.pure_c || !self.no_pure_c,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    packager_core::init_tracing(cli.json, level);

    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let sink: Arc<dyn OutputSink> = Arc::new(StdoutSink);

    match cli.command {
        Commands::Run { build, report } => cmd_run(&build, report.as_deref(), runner, sink).await,
        Commands::Matrix { build } => cmd_matrix(&build, runner, sink),
        Commands::Search { pattern, remote } => cmd_search(&pattern, &remote, runner, sink).await,
        Commands::Remove { pattern, remote } => cmd_remove(&pattern, &remote, runner, sink).await,
    }
}

fn resolve_settings(build: &BuildArgs, env: &Environment) -> Result<RunSettings> {
    RunSettings::resolve(&build.explicit_params(), env).context("Invalid packager configuration")
}

fn load_build_list(path: &Path) -> Result<Vec<BuildConfiguration>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read build list {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse build list {}", path.display()))
}

/// Fill the packager's matrix from the build list or the configured axes.
fn populate(packager: &mut MultiPackager, build: &BuildArgs) -> Result<()> {
    match &build.build_list {
        Some(path) => {
            let configs = load_build_list(path)?;
            let total = configs.len();
            let added = configs
                .into_iter()
                .map(|config| packager.add(config))
                .filter(|new| *new)
                .count();
            info!(total, added, path = %path.display(), "Loaded build list");
        }
        None => {
            packager
                .add_common_builds(build.common_builds())
                .context("Failed to expand build matrix")?;
        }
    }
    Ok(())
}

async fn cmd_run(
    build: &BuildArgs,
    report_path: Option<&Path>,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
) -> Result<()> {
    let env = Environment::capture();
    let settings = resolve_settings(build, &env)?;
    let ci = detect_ci(&env, settings.project_dir());

    let client = CliPackageClient::detect(runner.clone(), sink.clone())
        .await
        .context("Failed to query the package client")?;

    let mut packager = MultiPackager::new(settings, ci, Arc::new(client), runner, sink);
    populate(&mut packager, build)?;

    let report = packager.run().await.context("Packager run failed")?;
    if let Some(path) = report_path {
        write_report(&report, path)?;
    }

    if !report.success() {
        anyhow::bail!("Run {} failed: {}", report.run_id, report.summary());
    }
    Ok(())
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    info!(path = %path.display(), "Wrote run report");
    Ok(())
}

fn cmd_matrix(
    build: &BuildArgs,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
) -> Result<()> {
    let env = Environment::capture();
    let settings = resolve_settings(build, &env)?;
    let ci = detect_ci(&env, settings.project_dir());

    // Printing the matrix never invokes the client.
    let client = CliPackageClient::new(runner.clone(), sink.clone(), ClientApi::V2);
    let mut packager = MultiPackager::new(settings, ci, Arc::new(client), runner, sink);
    populate(&mut packager, build)?;

    let planned = packager.planned_builds()?;
    packager.print_matrix(&planned);
    Ok(())
}

/// Log in to `remote` when the environment carries a password.
async fn login(client: &dyn PackageClient, remote: &str, env: &Environment) -> Result<()> {
    let user = env.get(vars::LOGIN_USERNAME).or_else(|| env.get(vars::USERNAME));
    if let (Some(user), Some(password)) = (user, env.get(vars::PASSWORD)) {
        client
            .authenticate(remote, user, &Secret::new(password))
            .await
            .with_context(|| format!("Login to '{remote}' as '{user}' failed"))?;
    }
    Ok(())
}

async fn cmd_search(
    pattern: &str,
    remote: &str,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
) -> Result<()> {
    let client = CliPackageClient::detect(runner, sink.clone())
        .await
        .context("Failed to query the package client")?;
    login(&client, remote, &Environment::capture()).await?;
    let found = client
        .search_recipes(pattern, remote)
        .await
        .with_context(|| format!("Search for '{pattern}' on '{remote}' failed"))?;

    if found.is_empty() {
        sink.line(&format!("No recipes matching '{pattern}' on {remote}"));
    }
    for recipe in &found {
        sink.line(&recipe.reference);
    }
    Ok(())
}

async fn cmd_remove(
    pattern: &str,
    remote: &str,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
) -> Result<()> {
    let client = CliPackageClient::detect(runner, sink.clone())
        .await
        .context("Failed to query the package client")?;
    login(&client, remote, &Environment::capture()).await?;
    let removed = client
        .remove(pattern, remote)
        .await
        .with_context(|| format!("Removing '{pattern}' from '{remote}' failed"))?;

    sink.line(&format!("Removed {} recipe(s) from {remote}", removed.len()));
    for reference in &removed {
        sink.line(&format!("  {reference}"));
    }
    Ok(())
}
