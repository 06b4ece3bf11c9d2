use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Process-wide operator settings, remembered across sessions.
///
/// Loaded explicitly at startup and saved explicitly on change by whoever
/// owns the application loop; injected into [`crate::app::App`] rather than
/// living in ambient global state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub last_workspace: Option<PathBuf>,
    pub last_image: Option<String>,
    pub classification_model: Option<PathBuf>,
    pub train_model: Option<PathBuf>,
}

impl Settings {
    /// Load settings from `path`; a missing file reads as defaults, a
    /// corrupt one falls back to defaults with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        match serde_json::from_str(&text) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("settings file {} is corrupt, using defaults: {e}", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Persist settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::Error::Configuration(format!("settings not serializable: {e}")))?;
        fs::write(path, text)?;
        Ok(())
    }
}
