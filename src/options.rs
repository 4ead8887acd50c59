//! Open option map: string keys to typed values.
//!
//! Options appear at three levels — global defaults, per-source, and
//! CLI flags — and merge with rightmost precedence via [`Options::effective`].
//! Unknown keys are carried untouched; components look up only the keys they
//! own.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Ingest sample size (rows) used for kind/header detection.
pub const OPT_INGEST_SAMPLE_SIZE: &str = "ingest.sample-size";
/// Tri-state header override for document sources: absent = auto-detect.
pub const OPT_INGEST_HEADER: &str = "ingest.header";
/// Skip the ingest cache and re-ingest the document source.
pub const OPT_INGEST_NO_CACHE: &str = "ingest.no-cache";

pub const DEFAULT_SAMPLE_SIZE: i64 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Bool(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int(v)
    }
}

impl From<&str> for OptValue {
    fn from(v: &str) -> Self {
        OptValue::Str(v.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options(HashMap<String, OptValue>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, key: impl Into<String>, val: impl Into<OptValue>) {
        self.0.insert(key.into(), val.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptValue> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            OptValue::Bool(b) => Some(*b),
            OptValue::Int(i) => Some(*i != 0),
            OptValue::Str(s) => matches!(s.as_str(), "true" | "false")
                .then(|| s == "true"),
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(OptValue::Int(i)) => *i,
            Some(OptValue::Str(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            OptValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Merges option layers, rightmost wins: effective = global ⊕ source ⊕
    /// flags.
    pub fn effective(layers: &[&Options]) -> Options {
        let mut out = Options::new();
        for layer in layers {
            for (k, v) in &layer.0 {
                out.0.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_merge_rightmost_wins() {
        let mut global = Options::new();
        global.set(OPT_INGEST_SAMPLE_SIZE, 1024i64);
        global.set(OPT_INGEST_NO_CACHE, false);

        let mut source = Options::new();
        source.set(OPT_INGEST_SAMPLE_SIZE, 64i64);

        let mut flags = Options::new();
        flags.set(OPT_INGEST_HEADER, true);

        let eff = Options::effective(&[&global, &source, &flags]);
        assert_eq!(eff.get_int(OPT_INGEST_SAMPLE_SIZE, 0), 64);
        assert_eq!(eff.get_bool(OPT_INGEST_NO_CACHE), Some(false));
        assert_eq!(eff.get_bool(OPT_INGEST_HEADER), Some(true));
    }

    #[test]
    fn typed_lookups_coerce_sanely() {
        let mut o = Options::new();
        o.set("flag", "true");
        o.set("n", "42");
        assert_eq!(o.get_bool("flag"), Some(true));
        assert_eq!(o.get_int("n", 0), 42);
        assert_eq!(o.get_bool("missing"), None);
    }
}
