//! Container invocation construction.
//!
//! Pure functions only: nothing here runs a process. The command line is
//! the segments joined by single spaces, so an empty segment shows up as a
//! doubled space. `<run_options>  <image>` with no extra volumes is the
//! expected form.

use packager_client::ClientApi;
use packager_core::configuration::keys;
use packager_core::settings::vars;
use packager_core::{BuildConfiguration, ConfigResult, ConfigurationError, DockerSettings, RunSettings};
use std::collections::BTreeMap;

const IMAGE_PREFIX: &str = "conanio/";

/// Escape text for use inside a double-quoted shell string.
pub fn escape_double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Image to build `config` in: the configured one, otherwise derived from
/// the compiler as `conanio/<compiler><version without dots>`.
pub fn image_for(docker: &DockerSettings, config: &BuildConfiguration) -> ConfigResult<String> {
    if let Some(image) = &docker.image {
        return Ok(image.clone());
    }

    let no_image = || ConfigurationError::NoDockerImage(config.to_string());
    let compiler = config.compiler().ok_or_else(no_image)?;
    if compiler != "gcc" && compiler != "clang" {
        return Err(no_image());
    }
    let version = config.compiler_version().ok_or_else(no_image)?.replace('.', "");

    let mut image = format!("{IMAGE_PREFIX}{compiler}{version}");
    if docker.use_32_images && config.arch() == Some("x86") {
        image.push_str("-i386");
    }
    Ok(image)
}

/// `[sudo -E ]<runtime> pull <image>`
pub fn pull_command(docker: &DockerSettings, image: &str) -> String {
    let sudo = if docker.use_sudo { "sudo -E " } else { "" };
    format!("{sudo}{} pull {image}", docker.runtime)
}

/// `CPT_SETTINGS_COMPILER_VERSION` for `compiler.version`.
fn setting_var(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("CPT_SETTINGS_{upper}")
}

/// `-e` flags for one build. Values are inlined except the password, which
/// is forwarded by name and must be present in the runtime's environment.
pub fn env_flags(
    settings: &RunSettings,
    config: &BuildConfiguration,
    reference: &packager_core::PackageReference,
) -> Vec<String> {
    let mut values: BTreeMap<String, String> = settings
        .propagated_env()
        .iter()
        .cloned()
        .collect();

    values.insert(vars::REFERENCE.to_string(), reference.name_version());
    if let Some(user) = &reference.user {
        values.insert(vars::USERNAME.to_string(), user.clone());
    }
    if let Some(channel) = &reference.channel {
        values.insert(vars::CHANNEL.to_string(), channel.clone());
    }
    if let Some(policy) = settings.build_policy() {
        values.insert(vars::BUILD_POLICY.to_string(), policy.to_string());
    }
    if let Some(url) = settings.config_url() {
        values.insert(vars::CONFIG_URL.to_string(), url.to_string());
    }
    for (name, value) in config.settings() {
        values.insert(setting_var(name), value.clone());
    }
    if !config.options().is_empty() {
        let options = config
            .options()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        values.insert("CPT_OPTIONS".to_string(), options);
    }
    for (key, value) in config.env_vars() {
        values.insert(key.clone(), value.clone());
    }

    let mut flags: Vec<String> = values
        .iter()
        .map(|(k, v)| format!("-e {k}=\"{}\"", escape_double_quoted(v)))
        .collect();
    if settings.password().is_some() {
        flags.push(format!("-e {}", vars::PASSWORD));
    }
    flags
}

/// Shell script run inside the container.
pub fn bootstrap_script(
    docker: &DockerSettings,
    api: ClientApi,
    config_url: Option<&str>,
    create_line: &str,
) -> String {
    let mut steps = Vec::new();
    if let Some(entry) = &docker.entry_script {
        steps.push(entry.clone());
    }
    let sudo = if docker.pip_use_sudo { "sudo " } else { "" };
    let package = match &docker.pip_package {
        Some(package) => package.clone(),
        None => format!("'{}'", api.pip_requirement()),
    };
    steps.push(format!("{sudo}{} install {package}", docker.pip_command));
    if let Some(url) = config_url {
        steps.push(format!("conan config install {url}"));
    }
    steps.push(format!("cd {}/project", docker.home));
    steps.push(create_line.to_string());
    steps.join(" && ")
}

/// Ordered segments of a `<runtime> run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
    segments: Vec<String>,
}

impl ContainerInvocation {
    /// `storage_dir` is the host package cache, mounted where a client of
    /// revision `api` looks for it.
    pub fn build(
        docker: &DockerSettings,
        api: ClientApi,
        image: &str,
        project_dir: &str,
        storage_dir: &str,
        env_flags: &[String],
        script: &str,
    ) -> Self {
        let home = &docker.home;
        let mut segments = Vec::new();
        if docker.use_sudo {
            segments.push("sudo -E".to_string());
        }
        segments.push(docker.runtime.clone());
        segments.push("run".to_string());
        segments.push("--rm".to_string());
        segments.push(format!("-v \"{project_dir}:{home}/project\""));
        segments.push(format!("-v \"{storage_dir}:{home}/{}\"", api.cache_dir()));
        segments.push(format!("-w {home}/project"));
        segments.extend(env_flags.iter().cloned());
        segments.push(docker.run_options.clone());
        segments.push(
            docker
                .volumes
                .iter()
                .map(|v| format!("-v \"{v}\""))
                .collect::<Vec<_>>()
                .join(" "),
        );
        segments.push(image.to_string());
        segments.push(docker.shell.clone());
        segments.push(format!("\"{}\"", escape_double_quoted(script)));
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn command_line(&self) -> String {
        self.segments.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packager_core::{Environment, ExplicitParams, PackageReference};

    fn docker(run_options: &str) -> DockerSettings {
        DockerSettings {
            image: Some("conanio/gcc8".to_string()),
            runtime: "docker".to_string(),
            run_options: run_options.to_string(),
            use_sudo: false,
            skip_pull: false,
            use_32_images: false,
            shell: "/bin/sh -c".to_string(),
            entry_script: None,
            volumes: Vec::new(),
            home: "/home/conan".to_string(),
            pip_package: None,
            pip_command: "pip".to_string(),
            pip_use_sudo: false,
        }
    }

    fn gcc(version: &str, arch: &str) -> BuildConfiguration {
        BuildConfiguration::new([
            (keys::COMPILER, "gcc"),
            (keys::COMPILER_VERSION, version),
            (keys::ARCH, arch),
        ])
    }

    #[test]
    fn test_run_options_then_double_space_then_image() {
        let inv = ContainerInvocation::build(
            &docker("--cpus=1"),
            ClientApi::V1,
            "conanio/gcc8",
            "/src",
            "/root/.conan/data",
            &[],
            "true",
        );
        let line = inv.command_line();
        assert!(line.contains("--cpus=1  conanio/gcc8"), "{line}");
        assert!(line.starts_with(
            "docker run --rm -v \"/src:/home/conan/project\" \
             -v \"/root/.conan/data:/home/conan/.conan/data\" -w /home/conan/project"
        ));
        assert!(line.ends_with("conanio/gcc8 /bin/sh -c \"true\""));
    }

    #[test]
    fn test_sudo_and_volumes() {
        let mut settings = docker("");
        settings.use_sudo = true;
        settings.volumes = vec!["/cache:/cache".to_string()];
        let line =
            ContainerInvocation::build(&settings, ClientApi::V2, "img", "/src", "/data", &[], "true")
                .command_line();
        assert!(line.starts_with("sudo -E docker run --rm"));
        assert!(line.contains(" -v \"/cache:/cache\" img "));
    }

    #[test]
    fn test_image_derivation() {
        let mut settings = docker("");
        settings.image = None;
        assert_eq!(image_for(&settings, &gcc("6", "x86_64")).unwrap(), "conanio/gcc6");

        settings.use_32_images = true;
        assert_eq!(image_for(&settings, &gcc("4.9", "x86")).unwrap(), "conanio/gcc49-i386");

        let apple = BuildConfiguration::new([(keys::COMPILER, "apple-clang")]);
        assert!(matches!(
            image_for(&settings, &apple),
            Err(ConfigurationError::NoDockerImage(_))
        ));
        assert!(image_for(&settings, &BuildConfiguration::new(Vec::<(String, String)>::new())).is_err());
    }

    #[test]
    fn test_pull_command() {
        let mut settings = docker("");
        assert_eq!(pull_command(&settings, "conanio/gcc8"), "docker pull conanio/gcc8");
        settings.use_sudo = true;
        settings.runtime = "podman".to_string();
        assert_eq!(
            pull_command(&settings, "conanio/gcc8"),
            "sudo -E podman pull conanio/gcc8"
        );
    }

    #[test]
    fn test_bootstrap_script() {
        let mut settings = docker("");
        settings.entry_script = Some("./prepare.sh".to_string());
        settings.pip_use_sudo = true;
        settings.pip_package = Some("conan==1.59.0".to_string());
        let script = bootstrap_script(&settings, ClientApi::V1, Some("https://cfg"), "conan create .");
        assert_eq!(
            script,
            "./prepare.sh && sudo pip install conan==1.59.0 && conan config install https://cfg \
             && cd /home/conan/project && conan create ."
        );
    }

    #[test]
    fn test_unpinned_pip_package_matches_client_api() {
        let settings = docker("");
        let v1 = bootstrap_script(&settings, ClientApi::V1, None, "conan create .");
        assert!(v1.starts_with("pip install 'conan<2' && "), "{v1}");
        let v2 = bootstrap_script(&settings, ClientApi::V2, None, "conan create .");
        assert!(v2.starts_with("pip install 'conan>=2' && "), "{v2}");
    }

    #[test]
    fn test_cache_mount_target_follows_client_api() {
        let v2 = ContainerInvocation::build(
            &docker(""),
            ClientApi::V2,
            "img",
            "/src",
            "/root/.conan2/p",
            &[],
            "true",
        )
        .command_line();
        assert!(v2.contains("-v \"/root/.conan2/p:/home/conan/.conan2/p\""), "{v2}");
        assert!(!v2.contains(".conan/data"));
    }

    #[test]
    fn test_env_flags_forward_password_by_name() {
        let env = Environment::from_pairs([
            ("CONAN_REFERENCE", "zlib/1.2.11"),
            ("CONAN_USERNAME", "lasote"),
            ("CONAN_PASSWORD", "s3cr3t"),
            ("CONAN_UPLOAD", "https://remote"),
            ("CONAN_DOCKER_IMAGE", "conanio/gcc8"),
        ]);
        let settings = RunSettings::resolve(&ExplicitParams::default(), &env).unwrap();
        let reference: PackageReference = "zlib/1.2.11@lasote/testing".parse().unwrap();
        let config = gcc("8", "x86_64").with_option("zlib:shared", "True");

        let flags = env_flags(&settings, &config, &reference);
        let joined = flags.join(" ");
        assert!(joined.contains("-e CONAN_REFERENCE=\"zlib/1.2.11\""));
        assert!(joined.contains("-e CONAN_CHANNEL=\"testing\""));
        assert!(joined.contains("-e CPT_SETTINGS_COMPILER_VERSION=\"8\""));
        assert!(joined.contains("-e CPT_OPTIONS=\"zlib:shared=True\""));
        assert!(!joined.contains("s3cr3t"));
        assert!(!joined.contains("CONAN_DOCKER_IMAGE"));
        assert_eq!(flags.last().map(String::as_str), Some("-e CONAN_PASSWORD"));
    }

    #[test]
    fn test_escape_double_quoted() {
        assert_eq!(escape_double_quoted(r#"a "b" $HOME"#), r#"a \"b\" \$HOME"#);
    }
}
