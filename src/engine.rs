//! Unreal Engine installation model and on-disk layout checks.
//!
//! An installation root is recognised by its marker files:
//! - `Engine/Build/BatchFiles/RunUAT.bat` on Windows, `RunUAT.sh` elsewhere
//!   (the automation entry point this host can actually run)
//! - `Engine/Binaries/` (compiled engine binaries)
//!
//! The version label comes from `Engine/Build/Build.version`. When that file is
//! missing or unreadable, a folder name such as `UE_5.3` is used instead.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

static FOLDER_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"UE_?(\d+)\.(\d+)").expect("static regex"));

/// `major.minor` engine version, ordered numerically (5.10 sorts after 5.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
}

impl EngineVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    /// Accepts `5.3`, `5.3.2` and the launcher-style `UE_5.3`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix("UE_")
            .or_else(|| trimmed.strip_prefix("UE"))
            .unwrap_or(trimmed);

        let mut parts = bare.split('.');
        let major = parts.next().and_then(|p| p.trim().parse().ok());
        let minor = parts.next().and_then(|p| p.trim().parse().ok());
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Err(format!("invalid engine version label: {s:?}")),
        }
    }
}

impl TryFrom<String> for EngineVersion {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EngineVersion> for String {
    fn from(version: EngineVersion) -> Self {
        version.to_string()
    }
}

/// How an installation entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineSource {
    AutoDetected,
    ManuallyAdded,
}

impl fmt::Display for EngineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineSource::AutoDetected => write!(f, "auto-detected"),
            EngineSource::ManuallyAdded => write!(f, "manual"),
        }
    }
}

/// Target platforms accepted by `RunUAT BuildPlugin`.
///
/// Declaration order is the order platform flags appear on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Platform {
    Win64,
    Win32,
    Mac,
    Linux,
    LinuxArm64,
    Android,
    IOS,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Win64 => "Win64",
            Platform::Win32 => "Win32",
            Platform::Mac => "Mac",
            Platform::Linux => "Linux",
            Platform::LinuxArm64 => "LinuxArm64",
            Platform::Android => "Android",
            Platform::IOS => "IOS",
        }
    }

    pub fn all() -> &'static [Platform] {
        &[
            Platform::Win64,
            Platform::Win32,
            Platform::Mac,
            Platform::Linux,
            Platform::LinuxArm64,
            Platform::Android,
            Platform::IOS,
        ]
    }

    /// The platform the current process is running on, as UAT names it.
    pub fn host() -> Platform {
        if cfg!(target_os = "windows") {
            Platform::Win64
        } else if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(target_arch = "aarch64") {
            Platform::LinuxArm64
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Platform::all()
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown platform: {s:?}"))
    }
}

/// One discovered or manually-added Unreal Engine install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInstallation {
    pub root_path: PathBuf,
    pub version: EngineVersion,
    pub source: EngineSource,
}

impl EngineInstallation {
    /// Validates `path` as an engine root and reads its version.
    ///
    /// A path pointing at the inner `Engine` directory is accepted and
    /// normalised to the installation root.
    pub fn inspect(path: &Path, source: EngineSource) -> Result<Self> {
        let root_path = normalize_root(path);
        check_markers(&root_path)?;

        let version = read_version(&root_path).ok_or_else(|| {
            Error::invalid_engine(
                &root_path,
                "no version found in Engine/Build/Build.version or folder name",
            )
        })?;

        Ok(Self {
            root_path,
            version,
            source,
        })
    }

    pub fn version_label(&self) -> String {
        self.version.to_string()
    }

    /// Path to the build-automation entry point for the host OS.
    pub fn uat_script(&self) -> PathBuf {
        uat_script_path(&self.root_path)
    }

    /// Whether the install ships binaries for `platform`.
    pub fn supports(&self, platform: Platform) -> bool {
        let engine = self.root_path.join("Engine");
        engine.join("Binaries").join(platform.as_str()).is_dir()
            || engine.join("Platforms").join(platform.as_str()).is_dir()
    }

    pub fn supported_platforms(&self) -> Vec<Platform> {
        Platform::all()
            .iter()
            .copied()
            .filter(|p| self.supports(*p))
            .collect()
    }

    /// True if the marker files are still present.
    pub fn is_valid(&self) -> bool {
        check_markers(&self.root_path).is_ok()
    }
}

pub fn uat_script_path(root: &Path) -> PathBuf {
    let script = if cfg!(windows) { "RunUAT.bat" } else { "RunUAT.sh" };
    root.join("Engine")
        .join("Build")
        .join("BatchFiles")
        .join(script)
}

/// Returns true if `path` has the engine marker layout.
pub fn is_engine_root(path: &Path) -> bool {
    check_markers(path).is_ok()
}

fn normalize_root(path: &Path) -> PathBuf {
    if !path.join("Engine").is_dir() && path.file_name().is_some_and(|n| n == "Engine") {
        if let Some(parent) = path.parent() {
            return parent.to_path_buf();
        }
    }
    path.to_path_buf()
}

fn check_markers(root: &Path) -> Result<()> {
    if !root.is_dir() {
        return Err(Error::invalid_engine(root, "directory does not exist"));
    }

    let uat = uat_script_path(root);
    if !uat.is_file() {
        let script = uat.file_name().map(|n| n.to_string_lossy().into_owned());
        return Err(Error::invalid_engine(
            root,
            format!(
                "missing Engine/Build/BatchFiles/{}",
                script.unwrap_or_default()
            ),
        ));
    }

    if !root.join("Engine").join("Binaries").is_dir() {
        return Err(Error::invalid_engine(root, "missing Engine/Binaries"));
    }

    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BuildVersionFile {
    major_version: u32,
    minor_version: u32,
}

/// Reads the engine version from `Build.version`, falling back to the folder name.
pub fn read_version(root: &Path) -> Option<EngineVersion> {
    let version_file = root.join("Engine").join("Build").join("Build.version");
    match fs::read_to_string(&version_file) {
        Ok(content) => match serde_json::from_str::<BuildVersionFile>(&content) {
            Ok(v) => return Some(EngineVersion::new(v.major_version, v.minor_version)),
            Err(e) => tracing::warn!("Error reading version file {:?}: {}", version_file, e),
        },
        Err(e) => tracing::debug!("No version file at {:?}: {}", version_file, e),
    }

    version_from_folder_name(root)
}

fn version_from_folder_name(root: &Path) -> Option<EngineVersion> {
    let name = root.file_name()?.to_string_lossy();
    let caps = FOLDER_VERSION.captures(&name)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some(EngineVersion::new(major, minor))
}
