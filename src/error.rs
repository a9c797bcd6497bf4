use std::path::PathBuf;

use thiserror::Error;

use crate::runner::RunState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not a valid Unreal Engine installation: {path:?} ({reason})")]
    InvalidEngineInstallation { path: PathBuf, reason: String },

    #[error("Cannot read plugin descriptor {path:?}: {reason}")]
    PluginDescriptor { path: PathBuf, reason: String },

    #[error("Invalid build request: {0}")]
    InvalidBuildRequest(String),

    #[error("Failed to launch {program}: {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin build failed with exit code {exit_code}")]
    BuildFailure { exit_code: i32 },

    #[error("Configuration file {path:?} could not be saved: {reason}")]
    ConfigPersistence { path: PathBuf, reason: String },

    #[error("Build run is not pending (state: {0})")]
    RunNotPending(RunState),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_engine(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidEngineInstallation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn descriptor(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::PluginDescriptor {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::ConfigPersistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
