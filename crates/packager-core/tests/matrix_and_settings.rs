//! Integration tests for matrix expansion and settings precedence.

use packager_core::host::Compiler;
use packager_core::{
    BuildMatrix, CommonBuildsOptions, Environment, ExplicitParams, HostProfile, MatrixAxes,
    RunSettings,
};
use std::collections::BTreeSet;

fn settings(explicit: ExplicitParams, pairs: &[(&str, &str)]) -> RunSettings {
    let env = Environment::from_pairs(
        std::iter::once(("CONAN_REFERENCE", "zlib/1.2.11"))
            .chain(pairs.iter().copied()),
    );
    RunSettings::resolve(&explicit, &env).expect("resolve failed")
}

/// Expansion size equals the number of distinct settings tuples, whatever
/// the repetition in the axis lists.
#[test]
fn test_expansion_is_duplicate_free() {
    let host = HostProfile::fixed("Linux", "x86_64", None);
    let explicit = ExplicitParams {
        gcc_versions: Some(vec!["6".into(), "7".into(), "6".into(), "7.2".into()]),
        clang_versions: Some(vec!["3.9".into(), "3.9.1".into()]),
        archs: Some(vec!["x86".into(), "x86_64".into(), "x86".into()]),
        build_types: Some(vec!["Release".into(), "Release".into(), "Debug".into()]),
        ..Default::default()
    };
    let s = settings(explicit, &[]);
    let axes = MatrixAxes::from_settings(s.axes(), &host, false).unwrap();

    let mut matrix = BuildMatrix::new();
    matrix.add_common_builds(&axes, &CommonBuildsOptions::default());

    // gcc {6,7} + clang {3.9} = 3 compilers, 2 archs, 2 build types
    assert_eq!(matrix.len(), 12);

    let distinct: BTreeSet<_> = matrix
        .builds()
        .iter()
        .map(|b| b.settings().clone())
        .collect();
    assert_eq!(distinct.len(), matrix.len());
}

#[test]
fn test_expansion_is_deterministic() {
    let host = HostProfile::fixed("Linux", "x86_64", Some((Compiler::Gcc, "9")));
    let s = settings(ExplicitParams::default(), &[("CONAN_ARCHS", "x86,x86_64")]);
    let axes = MatrixAxes::from_settings(s.axes(), &host, false).unwrap();

    let mut first = BuildMatrix::new();
    first.add_common_builds(&axes, &CommonBuildsOptions::default());
    let mut second = BuildMatrix::new();
    second.add_common_builds(&axes, &CommonBuildsOptions::default());

    let ids = |m: &BuildMatrix| m.builds().iter().map(|b| b.id()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn test_all_pruned_is_a_valid_empty_matrix() {
    let host = HostProfile::fixed("Linux", "x86_64", None);
    let s = settings(
        ExplicitParams::default(),
        &[("CONAN_APPLE_CLANG_VERSIONS", "12.0")],
    );
    let axes = MatrixAxes::from_settings(s.axes(), &host, false).unwrap();
    let mut matrix = BuildMatrix::new();
    let added = matrix.add_common_builds(&axes, &CommonBuildsOptions::default());
    assert_eq!(added, 0);
    assert!(matrix.is_empty());
}

/// For each field: explicit > env > default.
#[test]
fn test_precedence_law() {
    type Getter = fn(&RunSettings) -> String;
    type Setter = fn(&mut ExplicitParams, String);

    let cases: Vec<(&str, Setter, Getter, &str)> = vec![
        (
            "CONAN_CHANNEL",
            |p, v| p.channel = Some(v),
            |s| s.channel().to_string(),
            "testing",
        ),
        (
            "CONAN_STABLE_CHANNEL",
            |p, v| p.stable_channel = Some(v),
            |s| s.stable_channel().to_string(),
            "stable",
        ),
        (
            "CONAN_DOCKER_RUNTIME",
            |p, v| p.docker_runtime = Some(v),
            |s| s.docker().runtime.clone(),
            "docker",
        ),
        (
            "CONAN_DOCKER_SHELL",
            |p, v| p.docker_shell = Some(v),
            |s| s.docker().shell.clone(),
            "/bin/sh -c",
        ),
        (
            "CONAN_PIP_PACKAGE",
            |p, v| p.pip_package = Some(v),
            |s| s.docker().pip_package.clone().unwrap_or_default(),
            "",
        ),
        (
            "CONAN_DOCKER_HOME",
            |p, v| p.docker_home = Some(v),
            |s| s.docker().home.clone(),
            "/home/conan",
        ),
        (
            "CONAN_DOCKER_RUN_OPTIONS",
            |p, v| p.docker_run_options = Some(v),
            |s| s.docker().run_options.clone(),
            "",
        ),
    ];

    for (var, set, get, default) in cases {
        let defaulted = settings(ExplicitParams::default(), &[]);
        assert_eq!(get(&defaulted), default, "default for {var}");

        let from_env = settings(ExplicitParams::default(), &[(var, "from-env")]);
        assert_eq!(get(&from_env), "from-env", "env for {var}");

        let mut explicit = ExplicitParams::default();
        set(&mut explicit, "from-arg".to_string());
        let from_arg = settings(explicit, &[(var, "from-env")]);
        assert_eq!(get(&from_arg), "from-arg", "explicit for {var}");
    }
}

#[test]
fn test_boolean_precedence_law() {
    let from_env = settings(ExplicitParams::default(), &[("CONAN_UPLOAD_ONLY_WHEN_STABLE", "1")]);
    assert!(from_env.upload_only_when_stable());

    let explicit = ExplicitParams {
        upload_only_when_stable: Some(false),
        ..Default::default()
    };
    let from_arg = settings(explicit, &[("CONAN_UPLOAD_ONLY_WHEN_STABLE", "1")]);
    assert!(!from_arg.upload_only_when_stable());

    let defaulted = settings(ExplicitParams::default(), &[]);
    assert!(!defaulted.upload_only_when_stable());
}
