use crate::engine::EngineVersion;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Read-only snapshot of a `.uplugin` file.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub file_path: PathBuf,
    pub friendly_name: String,
    pub version_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub declared_engine_version: Option<String>,
    pub modules: Vec<ModuleDescriptor>,
    pub supported_target_platforms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(rename = "Type", default)]
    pub module_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDescriptor {
    friendly_name: Option<String>,
    version_name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    engine_version: Option<String>,
    #[serde(default)]
    modules: Vec<ModuleDescriptor>,
    #[serde(default)]
    supported_target_platforms: Vec<String>,
}

impl PluginDescriptor {
    /// Reads the descriptor at `path`. Only the fields listed on the struct are
    /// looked at; the rest of the schema is not validated.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::descriptor(path, "file not found"));
        }
        if path.extension().and_then(|e| e.to_str()) != Some("uplugin") {
            return Err(Error::descriptor(path, "expected a .uplugin file"));
        }

        let content = fs::read_to_string(path).map_err(|e| Error::descriptor(path, e))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        // Descriptors saved by the editor on Windows may carry a BOM.
        let content = content.trim_start_matches('\u{feff}');
        let raw: RawDescriptor =
            serde_json::from_str(content).map_err(|e| Error::descriptor(path, e))?;

        let friendly_name = raw
            .friendly_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "Unknown Plugin".to_string());

        Ok(Self {
            file_path: path.to_path_buf(),
            friendly_name,
            version_name: raw.version_name,
            description: raw.description.filter(|d| !d.is_empty()),
            category: raw.category.filter(|c| !c.is_empty()),
            declared_engine_version: raw.engine_version.filter(|v| !v.trim().is_empty()),
            modules: raw.modules,
            supported_target_platforms: raw.supported_target_platforms,
        })
    }

    /// Plugin name as used for folder naming (the descriptor's file stem).
    pub fn name(&self) -> String {
        self.file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.friendly_name.clone())
    }

    pub fn plugin_dir(&self) -> Option<&Path> {
        self.file_path.parent()
    }

    pub fn declared_version(&self) -> Option<EngineVersion> {
        self.declared_engine_version.as_deref()?.parse().ok()
    }

    /// True when the plugin already declares `target`. The rebuild still runs;
    /// callers use this to show a notice.
    pub fn targets_same_engine(&self, target: EngineVersion) -> bool {
        self.declared_version() == Some(target)
    }
}
