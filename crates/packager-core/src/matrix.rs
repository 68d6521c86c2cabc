//! Build matrix: axis expansion, deduplication, pruning and job splitting.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::configuration::{keys, BuildConfiguration, ConfigurationId};
use crate::error::{ConfigResult, ConfigurationError};
use crate::host::{Compiler, HostProfile};
use crate::reference::PackageReference;
use crate::settings::AxisSettings;

const DEFAULT_BUILD_TYPES: [&str; 2] = ["Release", "Debug"];

/// Concrete axis value lists ready for expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxes {
    pub os: String,
    pub compilers: Vec<(Compiler, Vec<String>)>,
    pub archs: Vec<String>,
    pub build_types: Vec<String>,
}

impl MatrixAxes {
    /// Fill omitted axes from the host profile.
    ///
    /// Builds inside a container always target `Linux`.
    pub fn from_settings(
        axes: &AxisSettings,
        host: &HostProfile,
        in_container: bool,
    ) -> ConfigResult<Self> {
        let compilers = if axes.has_compilers() {
            [
                (Compiler::Gcc, &axes.gcc_versions),
                (Compiler::Clang, &axes.clang_versions),
                (Compiler::AppleClang, &axes.apple_clang_versions),
                (Compiler::Visual, &axes.visual_versions),
            ]
            .into_iter()
            .filter_map(|(c, versions)| versions.clone().map(|v| (c, v)))
            .collect()
        } else {
            let (compiler, version) = host.compiler.clone().ok_or(ConfigurationError::NoCompiler)?;
            vec![(compiler, vec![version])]
        };

        Ok(Self {
            os: if in_container {
                "Linux".to_string()
            } else {
                host.os.clone()
            },
            compilers,
            archs: axes.archs.clone().unwrap_or_else(|| vec![host.arch.clone()]),
            build_types: axes
                .build_types
                .clone()
                .unwrap_or_else(|| DEFAULT_BUILD_TYPES.iter().map(|s| s.to_string()).collect()),
        })
    }
}

/// Knobs for [`BuildMatrix::add_common_builds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonBuildsOptions {
    /// When set, every configuration is doubled with `<name>=True` / `<name>=False`.
    pub shared_option_name: Option<String>,
    /// Pure C recipes carry no `compiler.libcxx` axis.
    pub pure_c: bool,
    /// Options applied to every expanded configuration.
    pub base_options: BTreeMap<String, String>,
    /// Per-build reference override.
    pub reference: Option<PackageReference>,
}

impl Default for CommonBuildsOptions {
    fn default() -> Self {
        Self {
            shared_option_name: None,
            pure_c: true,
            base_options: BTreeMap::new(),
            reference: None,
        }
    }
}

/// Cartesian product of the axes. Unsupported pairs are dropped silently.
pub fn expand(axes: &MatrixAxes, opts: &CommonBuildsOptions) -> Vec<BuildConfiguration> {
    let mut out = Vec::new();

    for (compiler, versions) in &axes.compilers {
        for raw_version in versions {
            let version = compiler.normalize_version(raw_version);
            for arch in &axes.archs {
                for build_type in &axes.build_types {
                    for libcxx in libcxx_values(*compiler, &version, opts.pure_c) {
                        for runtime in runtime_values(*compiler, build_type) {
                            for shared in shared_values(opts.shared_option_name.as_deref()) {
                                let mut config = BuildConfiguration::new([
                                    (keys::OS, axes.os.as_str()),
                                    (keys::ARCH, arch.as_str()),
                                    (keys::COMPILER, compiler.setting_name()),
                                    (keys::COMPILER_VERSION, version.as_str()),
                                    (keys::BUILD_TYPE, build_type.as_str()),
                                ])
                                .with_options(opts.base_options.clone());
                                if let Some(libcxx) = libcxx {
                                    config = config.with_setting(keys::COMPILER_LIBCXX, libcxx);
                                }
                                if let Some(runtime) = runtime {
                                    config = config.with_setting(keys::COMPILER_RUNTIME, runtime);
                                }
                                if let Some((name, value)) = shared {
                                    config = config.with_option(name, value);
                                }
                                if let Some(reference) = &opts.reference {
                                    config = config.with_reference(reference.clone());
                                }
                                out.push(config);
                            }
                        }
                    }
                }
            }
        }
    }

    out.retain(is_supported);
    out
}

/// Whether the client can build this configuration on its declared OS.
pub fn is_supported(config: &BuildConfiguration) -> bool {
    match (config.compiler(), config.os()) {
        (Some("apple-clang"), Some(os)) => os == "Macos",
        (Some("Visual Studio"), Some(os)) => os == "Windows",
        _ => true,
    }
}

fn libcxx_values(compiler: Compiler, version: &str, pure_c: bool) -> Vec<Option<&'static str>> {
    if pure_c {
        return vec![None];
    }
    match compiler {
        Compiler::Gcc => {
            let major = version
                .split('.')
                .next()
                .and_then(|m| m.parse::<u32>().ok())
                .unwrap_or(0);
            if major >= 5 {
                vec![Some("libstdc++"), Some("libstdc++11")]
            } else {
                vec![Some("libstdc++")]
            }
        }
        Compiler::Clang => vec![Some("libstdc++"), Some("libc++")],
        Compiler::AppleClang => vec![Some("libc++")],
        Compiler::Visual => vec![None],
    }
}

fn runtime_values(compiler: Compiler, build_type: &str) -> Vec<Option<&'static str>> {
    match (compiler, build_type) {
        (Compiler::Visual, "Debug") => vec![Some("MTd"), Some("MDd")],
        (Compiler::Visual, _) => vec![Some("MT"), Some("MD")],
        _ => vec![None],
    }
}

fn shared_values(name: Option<&str>) -> Vec<Option<(&str, &'static str)>> {
    match name {
        Some(name) => vec![Some((name, "True")), Some((name, "False"))],
        None => vec![None],
    }
}

/// Job split: run page `page` (1-based) of `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSplit {
    pub page: usize,
    pub total: usize,
}

/// Ordered, duplicate-free working set of configurations.
///
/// Repeated `add` calls accumulate; the first configuration with a given
/// identity wins and keeps its position.
#[derive(Debug, Clone, Default)]
pub struct BuildMatrix {
    builds: Vec<BuildConfiguration>,
    seen: BTreeSet<ConfigurationId>,
}

impl BuildMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one configuration. Returns `false` when it was a duplicate.
    pub fn add(&mut self, config: BuildConfiguration) -> bool {
        let id = config.id();
        if !self.seen.insert(id.clone()) {
            debug!(config = %config, id = %id.short(), "Skipping duplicate configuration");
            return false;
        }
        self.builds.push(config);
        true
    }

    /// Add many configurations; returns how many were new.
    pub fn extend<I: IntoIterator<Item = BuildConfiguration>>(&mut self, configs: I) -> usize {
        configs.into_iter().filter(|c| self.add(c.clone())).count()
    }

    /// Expand `axes` and union the result into the working set.
    pub fn add_common_builds(&mut self, axes: &MatrixAxes, opts: &CommonBuildsOptions) -> usize {
        self.extend(expand(axes, opts))
    }

    /// Drop every configuration matching `pred`.
    pub fn remove_build_if<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&BuildConfiguration) -> bool,
    {
        let before = self.builds.len();
        self.builds.retain(|c| !pred(c));
        self.rebuild_index();
        before - self.builds.len()
    }

    /// Replace every configuration matching `pred` with `update(config)`.
    /// Rewrites that collide with an existing identity are collapsed.
    pub fn update_build_if<P, U>(&mut self, mut pred: P, mut update: U)
    where
        P: FnMut(&BuildConfiguration) -> bool,
        U: FnMut(BuildConfiguration) -> BuildConfiguration,
    {
        let old = std::mem::take(&mut self.builds);
        self.seen.clear();
        for config in old {
            let config = if pred(&config) { update(config) } else { config };
            self.add(config);
        }
    }

    pub fn builds(&self) -> &[BuildConfiguration] {
        &self.builds
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    /// Configurations belonging to one CI job: position `i` runs on page
    /// `i % total + 1`.
    pub fn paginate(&self, split: JobSplit) -> ConfigResult<Vec<BuildConfiguration>> {
        if split.total == 0 || split.page == 0 || split.page > split.total {
            return Err(ConfigurationError::InvalidJobSplit {
                page: split.page,
                total: split.total,
            });
        }
        Ok(self
            .builds
            .iter()
            .enumerate()
            .filter(|(i, _)| i % split.total == split.page - 1)
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn rebuild_index(&mut self) {
        self.seen = self.builds.iter().map(BuildConfiguration::id).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcc_axes(versions: &[&str], archs: &[&str], build_types: &[&str]) -> MatrixAxes {
        MatrixAxes {
            os: "Linux".to_string(),
            compilers: vec![(
                Compiler::Gcc,
                versions.iter().map(|s| s.to_string()).collect(),
            )],
            archs: archs.iter().map(|s| s.to_string()).collect(),
            build_types: build_types.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_cartesian_product_size() {
        let axes = gcc_axes(&["6", "7"], &["x86", "x86_64"], &["Release", "Debug"]);
        let builds = expand(&axes, &CommonBuildsOptions::default());
        assert_eq!(builds.len(), 8);
    }

    #[test]
    fn test_repeated_axis_values_collapse() {
        let axes = gcc_axes(&["6", "6", "6.3"], &["x86", "x86"], &["Release"]);
        let mut matrix = BuildMatrix::new();
        matrix.add_common_builds(&axes, &CommonBuildsOptions::default());
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn test_libcxx_axis_when_not_pure_c() {
        let axes = gcc_axes(&["4.9", "6"], &["x86_64"], &["Release"]);
        let opts = CommonBuildsOptions {
            pure_c: false,
            ..Default::default()
        };
        let builds = expand(&axes, &opts);
        // gcc 4.9: libstdc++ only; gcc 6: libstdc++ and libstdc++11
        assert_eq!(builds.len(), 3);
        assert!(builds
            .iter()
            .any(|b| b.setting(keys::COMPILER_LIBCXX) == Some("libstdc++11")));
    }

    #[test]
    fn test_shared_option_doubles_matrix() {
        let axes = gcc_axes(&["8"], &["x86_64"], &["Release"]);
        let opts = CommonBuildsOptions {
            shared_option_name: Some("zlib:shared".to_string()),
            ..Default::default()
        };
        let builds = expand(&axes, &opts);
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].options().get("zlib:shared").map(String::as_str), Some("True"));
        assert_eq!(builds[1].options().get("zlib:shared").map(String::as_str), Some("False"));
    }

    #[test]
    fn test_visual_runtime_axis_and_support_filter() {
        let axes = MatrixAxes {
            os: "Windows".to_string(),
            compilers: vec![(Compiler::Visual, vec!["15".to_string()])],
            archs: vec!["x86_64".to_string()],
            build_types: vec!["Release".to_string(), "Debug".to_string()],
        };
        let builds = expand(&axes, &CommonBuildsOptions::default());
        assert_eq!(builds.len(), 4);

        let linux = MatrixAxes {
            os: "Linux".to_string(),
            ..axes
        };
        assert!(expand(&linux, &CommonBuildsOptions::default()).is_empty());
    }

    #[test]
    fn test_incremental_accumulation() {
        let mut matrix = BuildMatrix::new();
        matrix.add_common_builds(
            &gcc_axes(&["6"], &["x86"], &["Release"]),
            &CommonBuildsOptions::default(),
        );
        matrix.add_common_builds(
            &gcc_axes(&["6"], &["x86", "x86_64"], &["Release"]),
            &CommonBuildsOptions::default(),
        );
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.builds()[0].arch(), Some("x86"));
        assert_eq!(matrix.builds()[1].arch(), Some("x86_64"));
    }

    #[test]
    fn test_remove_build_if_can_empty_matrix() {
        let mut matrix = BuildMatrix::new();
        matrix.add_common_builds(
            &gcc_axes(&["6"], &["x86", "x86_64"], &["Release"]),
            &CommonBuildsOptions::default(),
        );
        let removed = matrix.remove_build_if(|_| true);
        assert_eq!(removed, 2);
        assert!(matrix.is_empty());
        // Re-adding after removal works because the index was rebuilt.
        assert!(matrix.add(BuildConfiguration::new([("arch", "x86")])));
    }

    #[test]
    fn test_update_build_if_collapses_collisions() {
        let mut matrix = BuildMatrix::new();
        matrix.add_common_builds(
            &gcc_axes(&["6"], &["x86", "x86_64"], &["Release"]),
            &CommonBuildsOptions::default(),
        );
        matrix.update_build_if(
            |c| c.arch() == Some("x86"),
            |c| c.with_setting(keys::ARCH, "x86_64"),
        );
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn test_paginate_modulo() {
        let mut matrix = BuildMatrix::new();
        matrix.add_common_builds(
            &gcc_axes(&["5", "6", "7"], &["x86", "x86_64"], &["Release"]),
            &CommonBuildsOptions::default(),
        );
        assert_eq!(matrix.len(), 6);
        let page1 = matrix.paginate(JobSplit { page: 1, total: 4 }).unwrap();
        let page4 = matrix.paginate(JobSplit { page: 4, total: 4 }).unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page4.len(), 1);

        let all: usize = (1..=4)
            .map(|page| matrix.paginate(JobSplit { page, total: 4 }).unwrap().len())
            .sum();
        assert_eq!(all, 6);
    }

    #[test]
    fn test_paginate_rejects_bad_split() {
        let matrix = BuildMatrix::new();
        assert!(matrix.paginate(JobSplit { page: 0, total: 2 }).is_err());
        assert!(matrix.paginate(JobSplit { page: 3, total: 2 }).is_err());
        assert!(matrix.paginate(JobSplit { page: 1, total: 0 }).is_err());
    }

    #[test]
    fn test_axes_default_from_host() {
        let host = HostProfile::fixed("Linux", "armv8", Some((Compiler::Gcc, "11.2.0")));
        let axes = MatrixAxes::from_settings(&AxisSettings::default(), &host, false).unwrap();
        assert_eq!(axes.compilers, vec![(Compiler::Gcc, vec!["11".to_string()])]);
        assert_eq!(axes.archs, vec!["armv8".to_string()]);
        assert_eq!(axes.build_types.len(), 2);
    }

    #[test]
    fn test_axes_without_host_compiler() {
        let host = HostProfile::fixed("Linux", "x86_64", None);
        let err = MatrixAxes::from_settings(&AxisSettings::default(), &host, false).unwrap_err();
        assert_eq!(err, ConfigurationError::NoCompiler);
    }

    #[test]
    fn test_container_axes_target_linux() {
        let host = HostProfile::fixed("Macos", "x86_64", None);
        let axes = AxisSettings {
            gcc_versions: Some(vec!["8".to_string()]),
            ..Default::default()
        };
        let axes = MatrixAxes::from_settings(&axes, &host, true).unwrap();
        assert_eq!(axes.os, "Linux");
    }
}
