//! Command-layer helpers: output format selection and the YAML config
//! document (collection + options) the binary loads and saves.

pub mod output;

use crate::error::SqError;
use crate::options::Options;
use crate::record::sink::RecordSink;
use crate::source::collection::Collection;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Output formats the thin built-in writers can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
    Csv,
    Tsv,
}

impl Format {
    pub fn from_name(s: &str) -> Result<Format> {
        Ok(match s {
            "text" => Format::Text,
            "json" => Format::Json,
            "csv" => Format::Csv,
            "tsv" => Format::Tsv,
            other => {
                return Err(SqError::invalid_source(format!(
                    "unsupported output format: {other} (want text, json, csv or tsv)"
                ))
                .into())
            }
        })
    }

    /// Builds the record sink for this format.
    pub fn writer<'a, W: Write + 'a>(self, out: W, header: bool) -> Box<dyn RecordSink + 'a> {
        match self {
            Format::Text => Box::new(output::TableWriter::new(out, header)),
            Format::Json => Box::new(output::JsonWriter::new(out)),
            Format::Csv => Box::new(output::CsvWriter::new(out, header, b',')),
            Format::Tsv => Box::new(output::CsvWriter::new(out, header, b'\t')),
        }
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub collection: Collection,
    #[serde(default)]
    pub options: Options,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SqError::io(format!("read config {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| SqError::invalid_source(format!("parse config: {e}")).into())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SqError::io(format!("create config dir: {e}")))?;
        }
        let raw = serde_yaml::to_string(self).map_err(|e| SqError::internal(e.to_string()))?;
        std::fs::write(path, raw)
            .map_err(|e| SqError::io(format!("write config {}: {e}", path.display())).into())
    }
}

/// Resolves the config path: explicit flag, then `SQ_CONFIG`, then
/// `~/.config/sq/sq.yml`.
pub fn config_path(flag: Option<&str>) -> PathBuf {
    if let Some(p) = flag {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("SQ_CONFIG") {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("sq").join("sq.yml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DriverType, Source};

    #[test]
    fn format_names() {
        assert_eq!(Format::from_name("json").unwrap(), Format::Json);
        assert!(Format::from_name("xlsx").is_err());
    }

    #[test]
    fn config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sq.yml");

        let mut cfg = Config::default();
        cfg.collection
            .add(Source::new("@sl1", DriverType::Sqlite3, "sqlite3:///tmp/a.db"))
            .unwrap();
        cfg.collection.set_active("@sl1").unwrap();
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.collection.len(), 1);
        assert_eq!(loaded.collection.active().unwrap().handle, "@sl1");
    }

    #[test]
    fn missing_config_is_default() {
        let cfg = Config::load(Path::new("/definitely/not/here.yml")).unwrap();
        assert!(cfg.collection.is_empty());
    }
}
