//! Schema metadata returned by `inspect` and consumed by `diff`.
//!
//! These types serialize to YAML (field order as declared) so that two
//! sources' metadata can be diffed textually.

use super::DriverType;
use crate::kind::Kind;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SourceMetadata {
    pub handle: String,
    pub driver: DriverType,
    /// Backend database name (or file name for file-backed sources).
    pub name: String,
    /// Current schema, e.g. `public`, `main`, `dbo`.
    pub schema: String,
    /// Redacted location.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    pub tables: Vec<TableMetadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub db_properties: Vec<(String, String)>,
}

impl SourceMetadata {
    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Table,
    View,
    Virtual,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableMetadata {
    pub name: String,
    pub table_type: TableType,
    pub row_count: i64,
    pub columns: Vec<ColMetadata>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColMetadata {
    pub name: String,
    /// Ordinal position, 1-based.
    pub position: i64,
    pub kind: Kind,
    /// Backend-native type as declared, e.g. `VARCHAR(45)`.
    pub column_type: String,
    /// Backend-native type with modifiers stripped, e.g. `varchar`.
    pub base_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}
