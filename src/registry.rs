//! Engine registry: discovery, validation and persistence of Unreal Engine installs.
//!
//! # Discovery
//!
//! Candidate roots come from three places:
//! - Standard install folders (`C:/Program Files/Epic Games`, `/Users/Shared/Epic Games`, ...)
//! - Environment variables whose value mentions an engine folder (`UE_5.3`, `UnrealEngine`, ...)
//! - On Windows, the `InstalledDirectory` values the Epic launcher writes to the registry
//!
//! A root is accepted if it is itself an engine install; otherwise its immediate
//! subdirectories are checked. Candidates that fail validation are skipped, since
//! most of them are not engines at all. Only [`EngineRegistry::add_manual`] reports
//! a validation failure to the caller.
//!
//! # Persistence
//!
//! The registry is stored as JSON:
//!
//! ```json
//! { "unreal_engines": { "5.3": { "root": "C:/Program Files/Epic Games/UE_5.3", "source": "auto_detected" } } }
//! ```
//!
//! The older flat form `{"unreal_engines": {"5.3": "C:/..."}}` is read as well.
//! A missing or corrupt file loads as an empty registry.

use crate::engine::{is_engine_root, EngineInstallation, EngineSource, EngineVersion};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

const ENGINE_NAME_HINTS: [&str; 4] = ["Unreal", "UE_", "UE5", "UE4"];

/// Returns the standard directories that may hold engine installs on this platform.
pub fn get_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let home = dirs::home_dir();

    #[cfg(target_os = "windows")]
    {
        roots.push(PathBuf::from(r"C:\Program Files\Epic Games"));
        roots.push(PathBuf::from(r"C:\Epic Games"));
        roots.push(PathBuf::from(r"D:\Epic Games"));
        roots.extend(registry_install_dirs());
    }

    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from("/Users/Shared/Epic Games"));
        roots.push(PathBuf::from("/Applications/Epic Games"));
    }

    if let Some(home) = &home {
        roots.push(home.join("Epic Games"));
        // Source builds are commonly cloned straight into the home directory
        #[cfg(target_os = "linux")]
        roots.push(home.clone());
    }

    roots.extend(env_var_candidates());

    let mut seen = BTreeSet::new();
    roots.retain(|r| seen.insert(r.clone()));
    roots
}

/// Environment variable values that look like engine paths.
fn env_var_candidates() -> Vec<PathBuf> {
    candidates_from_values(std::env::vars_os().map(|(_, value)| value))
}

/// Splits each value as a path list and keeps the entries that mention an
/// engine folder. An entry inside an install (`UE_5.3/Engine/Binaries/Linux`)
/// resolves to the install root.
fn candidates_from_values(values: impl IntoIterator<Item = OsString>) -> Vec<PathBuf> {
    values
        .into_iter()
        .flat_map(|value| std::env::split_paths(&value).collect::<Vec<_>>())
        .filter(|path| {
            let text = path.to_string_lossy();
            ENGINE_NAME_HINTS.iter().any(|hint| text.contains(hint))
        })
        .filter_map(|path| {
            if let Some(root) = path.ancestors().find(|a| is_engine_root(a)) {
                return Some(root.to_path_buf());
            }
            path.is_dir().then_some(path)
        })
        .collect()
}

/// Install directories recorded by the Epic Games launcher.
#[cfg(target_os = "windows")]
fn registry_install_dirs() -> Vec<PathBuf> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    let mut dirs = Vec::new();
    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);

    for key_path in [r"SOFTWARE\EpicGames\Unreal Engine", r"SOFTWARE\EpicGames"] {
        let Ok(key) = hklm.open_subkey(key_path) else {
            continue;
        };
        for name in key.enum_keys().filter_map(|k| k.ok()) {
            if let Ok(subkey) = key.open_subkey(&name) {
                if let Ok(path) = subkey.get_value::<String, _>("InstalledDirectory") {
                    tracing::debug!("Registry entry {} -> {}", name, path);
                    dirs.push(PathBuf::from(path));
                }
            }
        }
    }

    dirs
}

/// Scans `roots` for engine installs. Invalid or unreadable candidates are skipped.
///
/// The result is sorted by version; when two roots report the same version the
/// first one found wins.
pub fn scan(roots: &[PathBuf]) -> Vec<EngineInstallation> {
    let mut found: BTreeMap<EngineVersion, EngineInstallation> = BTreeMap::new();

    for root in roots {
        if !root.exists() {
            continue;
        }

        for install in scan_root(root) {
            if let Some(existing) = found.get(&install.version) {
                tracing::debug!(
                    "Ignoring {:?}: version {} already found at {:?}",
                    install.root_path,
                    install.version,
                    existing.root_path
                );
                continue;
            }
            tracing::info!(
                "Found Unreal Engine {}: {}",
                install.version,
                install.root_path.display()
            );
            found.insert(install.version, install);
        }
    }

    found.into_values().collect()
}

fn scan_root(root: &Path) -> Vec<EngineInstallation> {
    if is_engine_root(root) {
        return inspect_candidate(root).into_iter().collect();
    }

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Error accessing {:?}: {}", root, e);
            return Vec::new();
        }
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| inspect_candidate(&path))
        .collect()
}

fn inspect_candidate(path: &Path) -> Option<EngineInstallation> {
    match EngineInstallation::inspect(path, EngineSource::AutoDetected) {
        Ok(install) => Some(install),
        Err(e) => {
            tracing::trace!("Skipping candidate: {}", e);
            None
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    unreal_engines: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Detailed { root: PathBuf, source: EngineSource },
    Legacy(PathBuf),
}

/// Mapping from version label to installation root.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    config_path: Option<PathBuf>,
    engines: BTreeMap<EngineVersion, EngineInstallation>,
}

impl EngineRegistry {
    /// An empty registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the registry stored at `path`. Missing or corrupt state yields an
    /// empty registry bound to the same path.
    pub fn load(path: &Path) -> Self {
        let mut registry = Self {
            config_path: Some(path.to_path_buf()),
            engines: BTreeMap::new(),
        };

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Configuration file not found: {:?}", path);
                return registry;
            }
            Err(e) => {
                tracing::warn!("Error reading configuration file {:?}: {}", path, e);
                return registry;
            }
        };

        let file: RegistryFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Ignoring corrupt configuration file {:?}: {}", path, e);
                return registry;
            }
        };

        for (label, entry) in file.unreal_engines {
            let Ok(version) = label.parse::<EngineVersion>() else {
                tracing::warn!("Ignoring entry with invalid version label {:?}", label);
                continue;
            };
            let (root_path, source) = match entry {
                StoredEntry::Detailed { root, source } => (root, source),
                StoredEntry::Legacy(root) => (root, EngineSource::AutoDetected),
            };
            registry.engines.insert(
                version,
                EngineInstallation {
                    root_path,
                    version,
                    source,
                },
            );
        }

        tracing::info!(
            "Loaded {} engine(s) from {:?}",
            registry.engines.len(),
            path
        );
        registry
    }

    /// Writes the registry to its configuration file. A registry created with
    /// [`EngineRegistry::in_memory`] has nowhere to go and is left alone.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };

        let file = RegistryFile {
            unreal_engines: self
                .engines
                .values()
                .map(|e| {
                    (
                        e.version_label(),
                        StoredEntry::Detailed {
                            root: e.root_path.clone(),
                            source: e.source,
                        },
                    )
                })
                .collect(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(path, e))?;
        }
        let content =
            serde_json::to_string_pretty(&file).map_err(|e| Error::persistence(path, e))?;
        fs::write(path, content).map_err(|e| Error::persistence(path, e))?;

        tracing::info!("Unreal Engine paths saved to {:?}", path);
        Ok(())
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Validates a user-chosen path and registers it, replacing any entry with
    /// the same version. On failure the registry is left untouched.
    pub fn add_manual(&mut self, path: &Path) -> Result<EngineInstallation> {
        let install = EngineInstallation::inspect(path, EngineSource::ManuallyAdded)?;
        if let Some(previous) = self.insert(install.clone()) {
            tracing::info!(
                "Replacing engine {} at {:?} with {:?}",
                install.version,
                previous.root_path,
                install.root_path
            );
        }
        Ok(install)
    }

    /// Inserts an installation, returning the entry it replaced.
    pub fn insert(&mut self, install: EngineInstallation) -> Option<EngineInstallation> {
        self.engines.insert(install.version, install)
    }

    /// Installations sorted by version, oldest first.
    pub fn list(&self) -> Vec<&EngineInstallation> {
        self.engines.values().collect()
    }

    pub fn get(&self, version: EngineVersion) -> Option<&EngineInstallation> {
        self.engines.get(&version)
    }

    pub fn get_label(&self, label: &str) -> Option<&EngineInstallation> {
        self.get(label.parse().ok()?)
    }

    /// Removes the entry for `label`. Unknown labels are a no-op.
    pub fn remove(&mut self, label: &str) -> Option<EngineInstallation> {
        let version = label.parse::<EngineVersion>().ok()?;
        self.engines.remove(&version)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Drops entries whose root no longer has the engine layout.
    pub fn prune_invalid(&mut self) -> Vec<EngineInstallation> {
        let stale: Vec<EngineVersion> = self
            .engines
            .values()
            .filter(|e| !e.is_valid())
            .map(|e| e.version)
            .collect();

        stale
            .into_iter()
            .filter_map(|version| self.engines.remove(&version))
            .inspect(|e| {
                tracing::warn!(
                    "Engine version {} at path {:?} is no longer valid or complete",
                    e.version,
                    e.root_path
                )
            })
            .collect()
    }

    /// Scans `roots` and merges the results. Stale entries are removed first.
    /// A manually added engine keeps its slot over an auto-detected one with
    /// the same version.
    pub fn rescan(&mut self, roots: &[PathBuf]) -> usize {
        self.prune_invalid();

        let mut added = 0;
        for install in scan(roots) {
            let keep_manual = self
                .engines
                .get(&install.version)
                .is_some_and(|e| e.source == EngineSource::ManuallyAdded);
            if keep_manual {
                continue;
            }
            if self.insert(install).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Startup lifecycle: keep the persisted entries that are still valid, and
    /// fall back to a scan of the default roots when none are left or when
    /// `force_rescan` is set. Changes are persisted; a persistence failure is
    /// logged and otherwise ignored.
    pub fn refresh(&mut self, force_rescan: bool) {
        self.refresh_with(&get_search_roots(), force_rescan);
    }

    /// [`EngineRegistry::refresh`] over explicit search roots. Nothing is
    /// written when the persisted entries were all still valid.
    pub fn refresh_with(&mut self, roots: &[PathBuf], force_rescan: bool) {
        let before = self.len();
        let pruned = self.prune_invalid().len();

        if force_rescan || self.is_empty() {
            if force_rescan {
                tracing::info!("Forced rescan requested");
            } else if before > 0 {
                tracing::warn!("Saved paths are invalid, performing new search");
            }
            self.rescan(roots);
        } else if pruned == 0 {
            return;
        }

        if self.is_empty() {
            tracing::info!("No Unreal Engine installations found; manual entry will be required");
        }
        if let Err(e) = self.persist() {
            tracing::warn!("{}", e);
        }
    }
}
