// Saved pad records and their JSON persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// File name of the snapshot inside the storage directory.
pub const SAVED_PADS_FILE: &str = "sounds.json";

/// Persisted form of one pad: its file path and display color.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedPad {
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Hex `#RRGGBB`; empty or missing means white
    #[serde(default)]
    pub color: String,
}

/// Platform application-storage directory for the soundboard.
pub fn default_storage_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "soundboard", "soundboard")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Load the saved pad list. A missing file is an empty board, not an error.
pub fn load(storage_dir: &Path) -> Result<Vec<SavedPad>> {
    let path = storage_dir.join(SAVED_PADS_FILE);
    if !path.exists() {
        debug!(path = %path.display(), "no saved pads file");
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| Error::PersistenceRead(format!("{}: {}", path.display(), e)))?;
    if content.is_empty() {
        return Ok(Vec::new());
    }

    let pads: Vec<SavedPad> = serde_json::from_str(&content)
        .map_err(|e| Error::PersistenceRead(format!("{}: {}", path.display(), e)))?;

    debug!(count = pads.len(), "loaded saved pads");
    Ok(pads)
}

/// Write the full pad list snapshot.
pub fn save(storage_dir: &Path, pads: &[SavedPad]) -> Result<()> {
    fs::create_dir_all(storage_dir)
        .map_err(|e| Error::PersistenceWrite(format!("{}: {}", storage_dir.display(), e)))?;

    let path = storage_dir.join(SAVED_PADS_FILE);
    let content = serde_json::to_string_pretty(pads)
        .map_err(|e| Error::PersistenceWrite(e.to_string()))?;

    fs::write(&path, content)
        .map_err(|e| Error::PersistenceWrite(format!("{}: {}", path.display(), e)))?;

    debug!(count = pads.len(), path = %path.display(), "saved pads");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_paths_and_colors() {
        let dir = tempfile::tempdir().unwrap();
        let pads = vec![
            SavedPad { file_path: "/sounds/airhorn.wav".into(), color: "#F44336".into() },
            SavedPad { file_path: "/sounds/drum roll.mp3".into(), color: "#2196F3".into() },
        ];

        save(dir.path(), &pads).unwrap();
        let loaded = load(dir.path()).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].file_path, "/sounds/airhorn.wav");
        assert_eq!(loaded[0].color, "#F44336");
        assert_eq!(loaded[1].file_path, "/sounds/drum roll.mp3");
        assert_eq!(loaded[1].color, "#2196F3");
    }

    #[test]
    fn missing_file_means_no_saved_pads() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_color_field_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SAVED_PADS_FILE),
            r#"[{"filePath": "/sounds/fanfare.wav"}]"#,
        )
        .unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].color.is_empty());
    }

    #[test]
    fn corrupt_payload_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SAVED_PADS_FILE), "{not json").unwrap();
        assert!(matches!(load(dir.path()), Err(Error::PersistenceRead(_))));
    }
}
