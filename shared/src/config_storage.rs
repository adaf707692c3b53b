//! Configuration storage for stage settings.
//!
//! All config is stored in ~/.stage_config/ by default.

use crate::stage_config::StageConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration storage manager.
///
/// Manages loading and saving of the stage configuration file from a
/// centralized directory (defaults to ~/.stage_config/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.stage_config)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.stage_config)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".stage_config");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn stage_config_path(&self) -> PathBuf {
        self.root_path.join("stage.json")
    }

    /// Get the stored stage configuration.
    ///
    /// Returns None if no configuration has been saved.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_stage_config(&self) -> Option<Result<StageConfig, std::io::Error>> {
        let path = self.stage_config_path();

        if !path.exists() {
            return None;
        }

        Some(StageConfig::load_from_file(&path))
    }

    /// Save the stage configuration.
    ///
    /// Creates the config directory if it doesn't exist.
    /// Returns the path where the configuration was saved.
    pub fn save_stage_config(&self, config: &StageConfig) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root_path)?;

        let path = self.stage_config_path();
        config.save_to_file(&path)?;
        Ok(path)
    }

    /// Delete the stored stage configuration.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_stage_config(&self) -> std::io::Result<bool> {
        let path = self.stage_config_path();

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(path)?;
        Ok(true)
    }

    /// Resolve the configuration to run with.
    ///
    /// An explicit path wins, then the stored file, then built-in defaults.
    pub fn resolve(&self, explicit: Option<&Path>) -> std::io::Result<StageConfig> {
        if let Some(path) = explicit {
            info!("Loading stage config from {}", path.display());
            return StageConfig::load_from_file(path);
        }

        match self.get_stage_config() {
            Some(result) => {
                info!("Loading stage config from {}", self.stage_config_path().display());
                result
            }
            None => {
                info!("No stored stage config, using defaults");
                Ok(StageConfig::default())
            }
        }
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".stage_config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage_config::Resolution;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn create_test_storage() -> ConfigStorage {
        let temp_dir = std::env::temp_dir().join(format!(
            "stage_config_test_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        ConfigStorage::with_path(temp_dir)
    }

    #[test]
    fn test_stage_config_path() {
        let storage = create_test_storage();
        let path = storage.stage_config_path();

        assert!(path.to_str().unwrap().ends_with("stage.json"));
    }

    #[test]
    fn test_get_nonexistent_stage_config() {
        let storage = create_test_storage();
        assert!(storage.get_stage_config().is_none());
    }

    #[test]
    fn test_save_and_load_stage_config() {
        let storage = create_test_storage();

        let mut config = StageConfig::default();
        config.camera.video = Resolution::new(640, 480);
        config.illumination.initial_duty = 12;

        let path = storage.save_stage_config(&config).unwrap();
        assert!(path.exists());

        let loaded = storage
            .get_stage_config()
            .expect("Config should exist")
            .expect("Config should load successfully");
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(storage.root_path()).ok();
    }

    #[test]
    fn test_corrupt_config_reports_error() {
        let storage = create_test_storage();
        std::fs::create_dir_all(storage.root_path()).unwrap();
        std::fs::write(storage.stage_config_path(), "{ not json").unwrap();

        let result = storage.get_stage_config().expect("File exists");
        assert_eq!(
            result.unwrap_err().kind(),
            std::io::ErrorKind::InvalidData
        );

        std::fs::remove_dir_all(storage.root_path()).ok();
    }

    #[test]
    fn test_delete_stage_config() {
        let storage = create_test_storage();
        storage.save_stage_config(&StageConfig::default()).unwrap();

        assert!(storage.delete_stage_config().unwrap());
        assert!(storage.get_stage_config().is_none());
        assert!(!storage.delete_stage_config().unwrap());

        std::fs::remove_dir_all(storage.root_path()).ok();
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let storage = create_test_storage();

        let mut stored = StageConfig::default();
        stored.illumination.pin = 4;
        storage.save_stage_config(&stored).unwrap();

        let mut explicit = StageConfig::default();
        explicit.illumination.pin = 17;
        let explicit_path = storage.root_path().join("explicit.json");
        explicit.save_to_file(&explicit_path).unwrap();

        assert_eq!(storage.resolve(None).unwrap().illumination.pin, 4);
        assert_eq!(
            storage.resolve(Some(&explicit_path)).unwrap().illumination.pin,
            17
        );

        std::fs::remove_dir_all(storage.root_path()).ok();
    }

    #[test]
    fn test_resolve_defaults_when_empty() {
        let storage = create_test_storage();
        assert_eq!(storage.resolve(None).unwrap(), StageConfig::default());
    }
}
