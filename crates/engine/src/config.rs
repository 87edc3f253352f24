use std::collections::BTreeMap;

use serde::Deserialize;
use shapesync_core::statement::DEFAULT_SCHEMA;
use shapesync_core::{ColumnMapper, TableRef};

use crate::error::EngineError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/v1/shape";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub tables: Vec<TableSyncConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            tables: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_table(mut self, table: TableSyncConfig) -> Self {
        self.tables.push(table);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::BTreeSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.table.as_str()) {
                return Err(EngineError::Config(format!(
                    "table {} configured twice",
                    table.table
                )));
            }
        }
        Ok(())
    }

    /// Shape URL for `table`: its explicit url, or `{base_url}/{table}`.
    pub fn url_for(&self, table: &TableSyncConfig) -> String {
        match &table.url {
            Some(url) => url.clone(),
            None => format!("{}/{}", self.base_url.trim_end_matches('/'), table.table),
        }
    }
}

/// How one remote shape is written into one local table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSyncConfig {
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Static `target column -> source column` renames.
    #[serde(default)]
    pub columns: Option<BTreeMap<String, String>>,
    #[serde(skip)]
    pub column_mapper: Option<ColumnMapper>,
}

impl TableSyncConfig {
    pub fn new(table: &str, primary_key: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            schema: default_schema(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            url: None,
            columns: None,
            column_mapper: None,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn with_column_mapper(mut self, mapper: ColumnMapper) -> Self {
        self.column_mapper = Some(mapper);
        self
    }

    pub fn target(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table)
    }

    /// An explicit mapper wins over a rename table; neither means identity.
    pub fn resolve_mapper(&self) -> ColumnMapper {
        match (&self.column_mapper, &self.columns) {
            (Some(mapper), _) => mapper.clone(),
            (None, Some(columns)) => ColumnMapper::Rename(columns.clone()),
            (None, None) => ColumnMapper::Identity,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.table.is_empty() {
            return Err(EngineError::Config("table name is empty".into()));
        }
        if self.primary_key.is_empty() {
            return Err(EngineError::Config(format!(
                "table {} has no primary key",
                self.table
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_config_with_defaults() {
        let config = SyncConfig::from_json_str(
            r#"{
                "tables": [
                    {"table": "todos", "primary_key": ["id"]},
                    {"table": "lists", "primary_key": ["id"], "url": "http://sync.example/v1/shape/lists",
                     "columns": {"list_id": "id", "name": "title"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.tables[0].schema, "main");
        assert_eq!(
            config.url_for(&config.tables[0]),
            "http://localhost:3000/v1/shape/todos"
        );
        assert_eq!(
            config.url_for(&config.tables[1]),
            "http://sync.example/v1/shape/lists"
        );
        assert!(matches!(config.tables[0].resolve_mapper(), ColumnMapper::Identity));
        assert!(matches!(config.tables[1].resolve_mapper(), ColumnMapper::Rename(_)));
    }

    #[test]
    fn explicit_mapper_wins() {
        let mut table = TableSyncConfig::new("todos", &["id"])
            .with_column_mapper(ColumnMapper::sqlite_affinity(["created_at"]));
        table.columns = Some(BTreeMap::from([("a".to_string(), "b".to_string())]));
        assert!(matches!(table.resolve_mapper(), ColumnMapper::Transform(_)));
    }

    #[test]
    fn rejects_missing_primary_key() {
        let err = SyncConfig::from_json_str(r#"{"tables": [{"table": "todos", "primary_key": []}]}"#)
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_tables() {
        let config = SyncConfig::default()
            .with_table(TableSyncConfig::new("todos", &["id"]))
            .with_table(TableSyncConfig::new("todos", &["id"]));
        assert!(config.validate().is_err());
    }
}
