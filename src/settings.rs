//! Application paths and the persisted interface settings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENGINES_FILE: &str = "unreal_engines_config.json";
pub const SETTINGS_FILE: &str = "localization_config.json";

/// Interface languages the front end ships strings for.
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["en", "ru"];

/// Where configuration and logs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    /// The platform config directory (`~/.config/uebuilder`, `%APPDATA%\uebuilder`, ...),
    /// or the working directory when the platform has none.
    pub fn resolve() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_dir(base.join("uebuilder"))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn engines_file(&self) -> PathBuf {
        self.config_dir.join(ENGINES_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_language")]
    pub current_language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            current_language: default_language(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`; anything unreadable falls back to defaults.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Error loading settings {:?}: {}", path, e);
                }
                return Self::default();
            }
        };

        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) if SUPPORTED_LANGUAGES.contains(&settings.current_language.as_str()) => {
                settings
            }
            Ok(settings) => {
                tracing::warn!(
                    "Unsupported language {:?} in {:?}, using default",
                    settings.current_language,
                    path
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Error loading settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(path, e))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::persistence(path, e))?;
        fs::write(path, content).map_err(|e| Error::persistence(path, e))
    }

    /// Switches the interface language. Returns `false` for unsupported codes.
    pub fn set_language(&mut self, code: &str) -> bool {
        let code = code.trim().to_ascii_lowercase();
        if !SUPPORTED_LANGUAGES.contains(&code.as_str()) {
            return false;
        }
        self.current_language = code;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_paths_layout() {
        let paths = AppPaths::with_dir("/cfg");
        assert_eq!(paths.engines_file(), PathBuf::from("/cfg/unreal_engines_config.json"));
        assert_eq!(paths.settings_file(), PathBuf::from("/cfg/localization_config.json"));
        assert_eq!(paths.log_dir(), PathBuf::from("/cfg/logs"));
    }

    #[test]
    fn test_settings_defaults_on_missing_or_corrupt() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(&temp.path().join("nope.json")), Settings::default());

        let corrupt = temp.path().join("bad.json");
        fs::write(&corrupt, "[1, 2").unwrap();
        assert_eq!(Settings::load(&corrupt).current_language, "en");

        let unknown = temp.path().join("unknown.json");
        fs::write(&unknown, r#"{"current_language": "tlh"}"#).unwrap();
        assert_eq!(Settings::load(&unknown).current_language, "en");
    }

    #[test]
    fn test_settings_persist_and_reload() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/localization_config.json");

        let mut settings = Settings::default();
        assert!(settings.set_language("RU"));
        assert!(!settings.set_language("de"));
        settings.persist(&path).unwrap();

        let reloaded = Settings::load(&path);
        assert_eq!(reloaded.current_language, "ru");

        // Files written by older versions also carry the translation tables
        fs::write(
            &path,
            r#"{"current_language": "ru", "translations": {"en": {}, "ru": {}}}"#,
        )
        .unwrap();
        assert_eq!(Settings::load(&path).current_language, "ru");
    }

    #[test]
    fn test_settings_persist_failure_is_typed() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let err = Settings::default()
            .persist(&blocker.join("settings.json"))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigPersistence { .. }));
    }
}
