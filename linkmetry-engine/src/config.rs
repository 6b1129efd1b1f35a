//! Configuration types for the analytics engine.
//!
//! Every section carries serde defaults so a partial (or missing) TOML file
//! still produces a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AnalyticsError, Result};

/// Top-level configuration for the analytics engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Where the event store lives.
    pub storage: StorageConfig,
    /// Attribution engine settings.
    pub attribution: AttributionConfig,
    /// Experiment engine settings.
    pub experiment: ExperimentConfig,
    /// Sequential testing policy.
    pub sequential: SequentialConfig,
}

impl AnalyticsConfig {
    /// Default config file location (`<config_dir>/linkmetry/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("linkmetry/config.toml")
    }

    /// Load configuration from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| AnalyticsError::Config(format!("{}: {e}", path.display())))
    }

    /// Write configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| AnalyticsError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageEngine {
    /// Persistent RocksDB-backed CozoDB.
    Rocksdb,
    /// In-memory CozoDB (tests, dry runs).
    Mem,
}

/// Configuration for the event store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage engine.
    pub engine: StorageEngine,
    /// Database path (ignored for the in-memory engine).
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: StorageEngine::Rocksdb,
            db_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("linkmetry/analytics"),
        }
    }
}

/// Configuration for journey reconstruction and weighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Half-life for time-decay weighting, in days (default: 7).
    pub half_life_days: f64,
    /// Most recent touchpoints considered per journey (default: 100).
    pub max_journey_touchpoints: usize,
    /// Look-back window for goals created without one (default: 30).
    pub default_window_days: u32,
    /// Attempts to claim a touchpoint order before giving up (default: 8).
    pub order_retry_limit: u32,
    /// Conversions attributed concurrently when building reports (default: 8).
    pub report_concurrency: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            half_life_days: 7.0,
            max_journey_touchpoints: 100,
            default_window_days: 30,
            order_retry_limit: 8,
            report_concurrency: 8,
        }
    }
}

/// Defaults applied to experiment statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Confidence level in percent (default: 95).
    pub default_confidence: f64,
    /// Statistical power in percent (default: 80).
    pub default_power: f64,
    /// Relative lift used for sample size recommendations (default: 0.05).
    pub minimum_detectable_effect: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            default_confidence: 95.0,
            default_power: 80.0,
            minimum_detectable_effect: 0.05,
        }
    }
}

/// Alpha-spending family used at interim looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendingFunction {
    /// Spends almost nothing early; near fixed-horizon power at the end.
    #[default]
    ObrienFleming,
    /// Spends alpha roughly evenly across looks.
    Pocock,
}

/// Configuration for sequential analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    /// Spending function (default: O'Brien-Fleming type).
    pub spending: SpendingFunction,
    /// Maximum number of interim looks reconstructed from history (default: 10).
    pub max_looks: usize,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            spending: SpendingFunction::ObrienFleming,
            max_looks: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.storage.engine, StorageEngine::Rocksdb);
        assert!(config.storage.db_path.to_string_lossy().contains("linkmetry"));
        assert!((config.attribution.half_life_days - 7.0).abs() < f64::EPSILON);
        assert_eq!(config.attribution.max_journey_touchpoints, 100);
        assert_eq!(config.sequential.spending, SpendingFunction::ObrienFleming);
    }

    #[test]
    fn test_config_serialization() {
        let config = AnalyticsConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: AnalyticsConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.storage.db_path, config.storage.db_path);
        assert_eq!(parsed.experiment.default_power, 80.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: AnalyticsConfig = toml::from_str(
            r#"
            [attribution]
            half_life_days = 3.5

            [sequential]
            spending = "pocock"
            "#,
        )
        .unwrap();
        assert!((parsed.attribution.half_life_days - 3.5).abs() < f64::EPSILON);
        assert_eq!(parsed.attribution.max_journey_touchpoints, 100);
        assert_eq!(parsed.sequential.spending, SpendingFunction::Pocock);
        assert_eq!(parsed.experiment.default_confidence, 95.0);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyticsConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.attribution.default_window_days, 30);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = AnalyticsConfig::default();
        config.storage.engine = StorageEngine::Mem;
        config.attribution.report_concurrency = 2;
        config.save(&path).unwrap();

        let loaded = AnalyticsConfig::load(&path).unwrap();
        assert_eq!(loaded.storage.engine, StorageEngine::Mem);
        assert_eq!(loaded.attribution.report_concurrency, 2);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[attribution\nhalf_life_days = ").unwrap();
        let err = AnalyticsConfig::load(&path).unwrap_err();
        assert!(matches!(err, AnalyticsError::Config(_)));
    }
}
