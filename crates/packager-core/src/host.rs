//! Host detection used when an axis is not supplied.

use std::process::Command;
use tracing::debug;

/// Compiler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Compiler {
    Gcc,
    Clang,
    AppleClang,
    Visual,
}

impl Compiler {
    /// Setting value used by the package client.
    pub fn setting_name(&self) -> &'static str {
        match self {
            Compiler::Gcc => "gcc",
            Compiler::Clang => "clang",
            Compiler::AppleClang => "apple-clang",
            Compiler::Visual => "Visual Studio",
        }
    }

    /// Normalise a version string the way the client expects it.
    ///
    /// gcc >= 5 only keeps the major component; clang variants keep
    /// `major.minor`; Visual Studio keeps the major.
    pub fn normalize_version(&self, version: &str) -> String {
        let mut parts = version.trim().split('.');
        let major = parts.next().unwrap_or_default();
        let minor = parts.next();
        match self {
            Compiler::Gcc => match major.parse::<u32>() {
                Ok(m) if m >= 5 => major.to_string(),
                _ => match minor {
                    Some(minor) => format!("{major}.{minor}"),
                    None => major.to_string(),
                },
            },
            Compiler::Clang | Compiler::AppleClang => match (major.parse::<u32>(), minor) {
                (Ok(m), _) if m >= 8 && *self == Compiler::Clang => major.to_string(),
                (_, Some(minor)) => format!("{major}.{minor}"),
                (_, None) => major.to_string(),
            },
            Compiler::Visual => major.to_string(),
        }
    }
}

/// Description of the machine running the packager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    /// `Linux`, `Macos` or `Windows`.
    pub os: String,
    pub arch: String,
    pub compiler: Option<(Compiler, String)>,
}

impl HostProfile {
    /// Detect OS, architecture and default compiler of the current host.
    pub fn detect() -> Self {
        let compiler = detect_compiler();
        debug!(?compiler, "Detected host compiler");
        Self {
            os: os_setting(std::env::consts::OS).to_string(),
            arch: arch_setting(std::env::consts::ARCH).to_string(),
            compiler,
        }
    }

    /// Fixed profile, for tests and container builds.
    pub fn fixed(os: &str, arch: &str, compiler: Option<(Compiler, &str)>) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            compiler: compiler.map(|(c, v)| (c, c.normalize_version(v))),
        }
    }
}

/// Map a Rust target OS to the client's `os` setting.
pub fn os_setting(os: &str) -> &'static str {
    match os {
        "macos" => "Macos",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        _ => "Linux",
    }
}

/// Map a Rust target arch to the client's `arch` setting.
pub fn arch_setting(arch: &str) -> &'static str {
    match arch {
        "x86" => "x86",
        "aarch64" => "armv8",
        "arm" => "armv7",
        _ => "x86_64",
    }
}

fn detect_compiler() -> Option<(Compiler, String)> {
    let candidates: &[(Compiler, &str, &[&str])] = if cfg!(target_os = "macos") {
        &[(Compiler::AppleClang, "clang", &["-dumpversion"])]
    } else {
        &[
            (Compiler::Gcc, "gcc", &["-dumpfullversion", "-dumpversion"]),
            (Compiler::Clang, "clang", &["-dumpversion"]),
        ]
    };

    candidates.iter().find_map(|(compiler, program, args)| {
        let output = Command::new(program).args(*args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if raw.is_empty() {
            return None;
        }
        Some((*compiler, compiler.normalize_version(&raw)))
    })
}
