//! Configuration file support
//!
//! `RecombineConfig` gathers every tunable of the pipeline in one TOML file:
//!
//! ```toml
//! threads = 4
//!
//! [detection]
//! default_min_confidence = 0.35
//! nms_iou = 0.5
//!
//! [layout]
//! two_column = true
//! margin = 50.0
//!
//! [shuffle]
//! seed = 42
//! ```
//!
//! Lookup order: an explicit path, then
//! `<config_dir>/exam-recombiner/config.toml`, then built-in defaults.
//! Missing keys fall back to their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::detection::DetectionOptions;
use crate::layout::LayoutOptions;

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "exam-recombiner";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Shuffle section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Fixed seed; a fresh one is drawn per run when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecombineConfig {
    /// Worker threads for per-page detection processing (default: CPU count)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    pub detection: DetectionOptions,
    pub layout: LayoutOptions,
    pub shuffle: ShuffleConfig,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub seed: Option<u64>,
    pub single_column: bool,
    pub start_number: Option<u32>,
    pub threads: Option<usize>,
}

impl RecombineConfig {
    /// Platform default config path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a file that must exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `explicit` if given, else the default path if present, else defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(seed) = overrides.seed {
            self.shuffle.seed = Some(seed);
        }
        if overrides.single_column {
            self.layout.two_column = false;
        }
        if let Some(number) = overrides.start_number {
            self.layout.start_question_number = number;
        }
        if let Some(threads) = overrides.threads {
            self.threads = Some(threads);
        }
        self
    }

    /// Worker thread count, at least 1
    pub fn effective_threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Label;

    #[test]
    fn test_empty_toml_is_default() {
        let config = RecombineConfig::from_toml_str("").unwrap();
        assert_eq!(config, RecombineConfig::default());
        assert!(config.shuffle.seed.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = RecombineConfig::from_toml_str(
            r#"
threads = 2

[detection]
nms_iou = 0.4
min_confidence = { question_number = 0.6 }

[layout]
page_size = [595.0, 842.0]
two_column = false

[shuffle]
seed = 42
"#,
        )
        .unwrap();

        assert_eq!(config.threads, Some(2));
        assert_eq!(config.detection.nms_iou, 0.4);
        assert_eq!(config.detection.min_confidence_for(&Label::QuestionNumber), 0.6);
        assert_eq!(config.detection.merge_x_overlap, 0.6);
        assert_eq!(config.layout.page_size, (595.0, 842.0));
        assert!(!config.layout.two_column);
        assert_eq!(config.layout.margin, 50.0);
        assert_eq!(config.shuffle.seed, Some(42));
    }

    #[test]
    fn test_invalid_toml() {
        let result = RecombineConfig::from_toml_str("[layout]\nmargin = \"wide\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = RecombineConfig::load(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_load() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("nested").join("config.toml");
        let mut config = RecombineConfig::default();
        config.shuffle.seed = Some(7);
        config.layout.margin = 36.0;
        config.save(&path).unwrap();

        let loaded = RecombineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_resolve_explicit_path() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("c.toml");
        std::fs::write(&path, "[shuffle]\nseed = 9\n").unwrap();
        let config = RecombineConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.shuffle.seed, Some(9));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = RecombineConfig::default();
        config.shuffle.seed = Some(1);
        let config = config.with_overrides(&ConfigOverrides {
            seed: Some(2),
            single_column: true,
            start_number: Some(11),
            threads: None,
        });
        assert_eq!(config.shuffle.seed, Some(2));
        assert!(!config.layout.two_column);
        assert_eq!(config.layout.start_question_number, 11);
        assert!(config.threads.is_none());
    }

    #[test]
    fn test_effective_threads() {
        let mut config = RecombineConfig::default();
        assert!(config.effective_threads() >= 1);
        config.threads = Some(0);
        assert_eq!(config.effective_threads(), 1);
    }

    #[test]
    fn test_default_path_location() {
        if let Some(path) = RecombineConfig::default_path() {
            assert!(path.ends_with("exam-recombiner/config.toml"));
        }
    }
}
