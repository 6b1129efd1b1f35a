//! CLI command implementations

pub mod attribution;
pub mod experiment;
pub mod stats;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use linkmetry_engine::{AnalyticsConfig, Reporter};
use serde::Serialize;
use tracing::debug;

/// Options shared by every command.
pub struct Context {
    pub config_path: PathBuf,
    pub json: bool,
}

impl Context {
    /// Load the configuration and open the analytics database.
    pub fn reporter(&self) -> Result<Reporter> {
        let config = AnalyticsConfig::load(&self.config_path)
            .with_context(|| format!("loading {}", self.config_path.display()))?;
        debug!(path = %config.storage.db_path.display(), "Opening analytics database");
        Ok(Reporter::open(&config)?)
    }

    /// Print `value` as pretty JSON when `--json` was given.
    ///
    /// Returns whether anything was printed.
    pub fn emit_json<T: Serialize>(&self, value: &T) -> Result<bool> {
        if !self.json {
            return Ok(false);
        }
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(true)
    }
}

/// Table with the house style and cyan headers.
pub(crate) fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );
    table
}

pub(crate) fn percent(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkmetry_engine::{StorageConfig, StorageEngine};

    #[test]
    fn reporter_uses_configured_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        AnalyticsConfig {
            storage: StorageConfig {
                engine: StorageEngine::Mem,
                db_path: dir.path().join("unused"),
            },
            ..Default::default()
        }
        .save(&config_path)
        .unwrap();

        let ctx = Context {
            config_path,
            json: false,
        };
        assert!(ctx.reporter().is_ok());
        assert!(!ctx.emit_json(&serde_json::json!({"ok": true})).unwrap());
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context {
            config_path: dir.path().join("absent.toml"),
            json: true,
        };
        assert!(AnalyticsConfig::load(&ctx.config_path).is_ok());
        assert!(ctx.emit_json(&[1, 2, 3]).unwrap());
    }

    #[test]
    fn percent_formats_rates() {
        assert_eq!(percent(0.1234), "12.34%");
        assert_eq!(percent(0.0), "0.00%");
    }
}
