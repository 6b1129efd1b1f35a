//! CozoDB-backed analytics database
//!
//! `AnalyticsDb` wraps a shared `DbInstance` (RocksDB on disk, or in-memory
//! for tests), applies schema migrations on open, and offers the query helpers
//! the per-engine stores build on.

mod schema;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cozo::{DataValue, DbInstance, NamedRows, ScriptMutability};
use tracing::{debug, info};

use crate::config::{StorageConfig, StorageEngine};
use crate::error::{AnalyticsError, Result};

pub use schema::{
    ATTRIBUTION_SCHEMA, CURRENT_SCHEMA_VERSION, EXPERIMENT_SCHEMA, MIGRATIONS, Migration,
    VERSION_SCHEMA,
};

/// Named script parameters
pub type Params = BTreeMap<String, DataValue>;

/// Shared handle to the analytics database
#[derive(Clone)]
pub struct AnalyticsDb {
    db: Arc<DbInstance>,
}

impl AnalyticsDb {
    /// Open the database described by `config`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        match config.engine {
            StorageEngine::Rocksdb => Self::open_path(&config.db_path),
            StorageEngine::Mem => Self::in_memory(),
        }
    }

    /// Open or create a RocksDB-backed database at `path`.
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AnalyticsError::Database(format!("Failed to create directory: {e}")))?;
        }
        let db = DbInstance::new("rocksdb", path, "")
            .map_err(|e| AnalyticsError::Database(format!("Failed to open database: {e}")))?;
        info!(path = %path.display(), "Opened analytics database");
        Self::initialize(db)
    }

    /// Create a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        let db = DbInstance::new("mem", "", Default::default())
            .map_err(|e| AnalyticsError::Database(format!("Failed to open database: {e}")))?;
        Self::initialize(db)
    }

    fn initialize(db: DbInstance) -> Result<Self> {
        let store = Self { db: Arc::new(db) };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Get the underlying database instance
    pub fn db(&self) -> Arc<DbInstance> {
        self.db.clone()
    }

    /// Get current schema version from database
    pub fn schema_version(&self) -> Result<u32> {
        let rows = self.query("?[version] := *schema_version{version}", Params::new())?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(DataValue::get_int))
            .max()
            .unwrap_or(0) as u32)
    }

    fn has_version_table(&self) -> Result<bool> {
        let rows = self.query("::relations", Params::new())?;
        Ok(rows
            .rows
            .iter()
            .any(|row| row.first().and_then(|v| v.get_str()) == Some("schema_version")))
    }

    fn ensure_schema(&self) -> Result<()> {
        if !self.has_version_table()? {
            self.db
                .run_script(VERSION_SCHEMA, Params::new(), ScriptMutability::Mutable)
                .map_err(|e| AnalyticsError::Database(format!("Schema init failed: {e}")))?;
        }

        let current = self.schema_version()?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply_migration(migration)?;
        }
        Ok(())
    }

    fn apply_migration(&self, migration: &Migration) -> Result<()> {
        self.db
            .run_script(migration.script, Params::new(), ScriptMutability::Mutable)
            .map_err(|e| {
                AnalyticsError::Database(format!("Migration {} failed: {e}", migration.version))
            })?;

        let mut params = Params::new();
        params.insert("version".into(), DataValue::from(migration.version as i64));
        params.insert("applied_at".into(), DataValue::from(Utc::now().timestamp()));
        params.insert("description".into(), DataValue::from(migration.description));
        self.mutate(
            "?[version, applied_at, description] <- [[$version, $applied_at, $description]]
            :put schema_version {version => applied_at, description}",
            params,
        )?;

        debug!(version = migration.version, "Applied schema migration");
        Ok(())
    }

    /// Run a read-only script
    pub fn query(&self, script: &str, params: Params) -> Result<NamedRows> {
        self.db
            .run_script(script, params, ScriptMutability::Immutable)
            .map_err(|e| AnalyticsError::Database(format!("Query failed: {e}")))
    }

    /// Run a mutating script (one transaction)
    pub fn mutate(&self, script: &str, params: Params) -> Result<NamedRows> {
        self.db
            .run_script(script, params, ScriptMutability::Mutable)
            .map_err(|e| AnalyticsError::Database(format!("Mutation failed: {e}")))
    }
}

// Helpers for building parameters and parsing rows

pub(crate) fn opt_str(value: Option<&str>) -> DataValue {
    value.map(DataValue::from).unwrap_or(DataValue::Null)
}

pub(crate) fn millis(at: DateTime<Utc>) -> DataValue {
    DataValue::from(at.timestamp_millis())
}

pub(crate) fn col_str(row: &[DataValue], idx: usize, field: &str) -> Result<String> {
    row.get(idx)
        .and_then(|v| v.get_str())
        .map(str::to_string)
        .ok_or_else(|| AnalyticsError::Database(format!("Invalid {field}")))
}

pub(crate) fn col_opt_str(row: &[DataValue], idx: usize) -> Option<String> {
    row.get(idx).and_then(|v| v.get_str()).map(str::to_string)
}

pub(crate) fn col_int(row: &[DataValue], idx: usize, field: &str) -> Result<i64> {
    row.get(idx)
        .and_then(|v| v.get_int())
        .ok_or_else(|| AnalyticsError::Database(format!("Invalid {field}")))
}

pub(crate) fn col_float(row: &[DataValue], idx: usize, field: &str) -> Result<f64> {
    row.get(idx)
        .and_then(|v| v.get_float())
        .ok_or_else(|| AnalyticsError::Database(format!("Invalid {field}")))
}

pub(crate) fn col_bool(row: &[DataValue], idx: usize, field: &str) -> Result<bool> {
    row.get(idx)
        .and_then(|v| v.get_bool())
        .ok_or_else(|| AnalyticsError::Database(format!("Invalid {field}")))
}

pub(crate) fn col_uuid(row: &[DataValue], idx: usize, field: &str) -> Result<uuid::Uuid> {
    col_str(row, idx, field)?
        .parse()
        .map_err(|e| AnalyticsError::Database(format!("Invalid UUID in {field}: {e}")))
}

pub(crate) fn col_time(row: &[DataValue], idx: usize, field: &str) -> Result<DateTime<Utc>> {
    let ms = col_int(row, idx, field)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AnalyticsError::Database(format!("Invalid timestamp in {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_db_is_migrated() {
        let db = AnalyticsDb::in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_does_not_reapply_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics");
        {
            let db = AnalyticsDb::open_path(&path).unwrap();
            assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        }
        let db = AnalyticsDb::open_path(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_open_from_config() {
        let config = StorageConfig {
            engine: StorageEngine::Mem,
            db_path: "/unused".into(),
        };
        let db = AnalyticsDb::open(&config).unwrap();
        let rows = db.query("?[id] := *experiment{id}", Params::new()).unwrap();
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn test_column_helpers() {
        let row = vec![
            DataValue::from("abc"),
            DataValue::from(42i64),
            DataValue::from(1.5f64),
            DataValue::from(true),
            DataValue::Null,
        ];
        assert_eq!(col_str(&row, 0, "s").unwrap(), "abc");
        assert_eq!(col_int(&row, 1, "i").unwrap(), 42);
        assert_eq!(col_float(&row, 2, "f").unwrap(), 1.5);
        assert!(col_bool(&row, 3, "b").unwrap());
        assert_eq!(col_opt_str(&row, 4), None);
        assert!(col_str(&row, 9, "missing").is_err());
    }
}
