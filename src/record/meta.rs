//! Record metadata: the typed shape of a result set.
//!
//! Each field carries both the backend's original column name and a munged
//! name that is unique within the record. Name collisions happen routinely
//! (joins, `SELECT a.id, b.id`), and the munge rule resolves them by
//! suffixing `_1`, `_2`, … in encounter order.

use crate::kind::Kind;
use hashbrown::HashMap;
use serde::Serialize;

/// Metadata for a single result column.
#[derive(Debug, Clone, Serialize)]
pub struct FieldMeta {
    /// Unique-within-record name, after collision munging.
    pub munged_name: String,
    /// Column name as reported by the backend.
    pub name: String,
    pub kind: Kind,
    /// Backend-native type name, e.g. `VARCHAR` or `int8`.
    pub db_type_name: String,
    /// Whether the column admits NULL; `None` when the backend won't say.
    pub nullable: Option<bool>,
}

/// Ordered field metadata for a record stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordMeta(pub Vec<FieldMeta>);

impl RecordMeta {
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        RecordMeta(fields)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldMeta> {
        self.0.iter()
    }

    /// Original backend names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.name.as_str()).collect()
    }

    /// Munged (unique) names, in order.
    pub fn munged_names(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.munged_name.as_str()).collect()
    }

    pub fn kinds(&self) -> Vec<Kind> {
        self.0.iter().map(|f| f.kind).collect()
    }
}

impl std::ops::Index<usize> for RecordMeta {
    type Output = FieldMeta;

    fn index(&self, i: usize) -> &FieldMeta {
        &self.0[i]
    }
}

impl<'a> IntoIterator for &'a RecordMeta {
    type Item = &'a FieldMeta;
    type IntoIter = std::slice::Iter<'a, FieldMeta>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Resolves duplicate result column names by appending `_1`, `_2`, … to the
/// second and subsequent occurrences, in encounter order.
///
/// `["a","b","a","d"]` → `["a","b","a_1","d"]`.
pub fn munge_result_col_names(names: &[&str]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        match seen.get_mut(name) {
            None => {
                seen.insert(name, 0);
                out.push((*name).to_string());
            }
            Some(n) => {
                *n += 1;
                out.push(format!("{name}_{n}"));
            }
        }
    }

    out
}
