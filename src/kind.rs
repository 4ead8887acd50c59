//! # Column Kinds & Detection
//!
//! A [`Kind`] is the semantic type of a column, distinct from any backend's
//! SQL type name. Drivers map their native column types into kinds; the
//! ingest engine infers kinds from sampled document data via [`Detector`].
//!
//! ## Detection model
//!
//! The detector starts with every kind *possible* and narrows as samples
//! arrive: each sample eliminates the kinds it cannot inhabit. After
//! sampling, `detect` returns the most specific kind still possible,
//! following the specificity chain Int ⊂ Float ⊂ Decimal ⊂ Text. Booleans
//! and temporal kinds sit on side branches of that chain: a sample of
//! `true` eliminates the numeric kinds, while `1` keeps both Bool and Int
//! alive (Int wins on priority).
//!
//! Edge cases:
//!
//! - zero samples → [`Kind::Unknown`]
//! - every sample null (or blank) → [`Kind::Null`]
//! - blank strings are treated as null for non-text kinds
//!
//! `detect` also returns an optional munge function that converts raw
//! values (usually text) into the canonical representation of the detected
//! kind, e.g. `"true"` → `Bool(true)`, `"2011-01-01T12:30:00Z"` →
//! `Datetime`.

use crate::record::{Decimal, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Unknown,
    Null,
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Bytes,
    Time,
    Date,
    Datetime,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Unknown => "unknown",
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Decimal => "decimal",
            Kind::Text => "text",
            Kind::Bytes => "bytes",
            Kind::Time => "time",
            Kind::Date => "date",
            Kind::Datetime => "datetime",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts a raw value into the canonical representation of a kind.
pub type MungeFn = fn(&Value) -> Result<Value>;

/// Per-column kind detector. Feed it samples, then call [`Detector::detect`].
#[derive(Debug)]
pub struct Detector {
    samples: usize,
    nulls: usize,
    bool_possible: bool,
    int_possible: bool,
    float_possible: bool,
    decimal_possible: bool,
    date_possible: bool,
    time_possible: bool,
    datetime_possible: bool,
}

impl Default for Detector {
    fn default() -> Self {
        Detector {
            samples: 0,
            nulls: 0,
            bool_possible: true,
            int_possible: true,
            float_possible: true,
            decimal_possible: true,
            date_possible: true,
            time_possible: true,
            datetime_possible: true,
        }
    }
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one sample. Null values and blank strings narrow nothing.
    pub fn sample(&mut self, val: &Value) {
        self.samples += 1;

        match val {
            Value::Null => {
                self.nulls += 1;
            }
            Value::Text(s) if s.trim().is_empty() => {
                // Blank is null for non-text kinds.
                self.nulls += 1;
            }
            Value::Text(s) => self.sample_text(s),
            Value::Bool(_) => {
                self.int_possible = false;
                self.float_possible = false;
                self.decimal_possible = false;
                self.kill_temporal();
            }
            Value::Int(_) => {
                self.bool_possible = false;
                self.kill_temporal();
            }
            Value::Float(f) => {
                self.bool_possible = false;
                if f.fract() != 0.0 {
                    self.int_possible = false;
                }
                self.kill_temporal();
            }
            Value::Decimal(_) => {
                self.bool_possible = false;
                self.int_possible = false;
                self.float_possible = false;
                self.kill_temporal();
            }
            Value::Datetime(_) => {
                self.kill_numeric();
                self.date_possible = false;
                self.time_possible = false;
            }
            Value::Date(_) => {
                self.kill_numeric();
                self.datetime_possible = false;
                self.time_possible = false;
            }
            Value::Time(_) => {
                self.kill_numeric();
                self.datetime_possible = false;
                self.date_possible = false;
            }
            Value::Bytes(_) => {
                self.kill_numeric();
                self.kill_temporal();
            }
        }
    }

    fn sample_text(&mut self, s: &str) {
        let t = s.trim();

        if self.bool_possible && parse_bool(t).is_none() {
            self.bool_possible = false;
        }
        if self.int_possible && t.parse::<i64>().is_err() {
            self.int_possible = false;
        }
        if self.float_possible && t.parse::<f64>().is_err() {
            self.float_possible = false;
        }
        if self.decimal_possible && Decimal::parse(t).is_err() {
            self.decimal_possible = false;
        }
        if self.datetime_possible && parse_datetime(t).is_none() {
            self.datetime_possible = false;
        }
        if self.date_possible && parse_date(t).is_none() {
            self.date_possible = false;
        }
        if self.time_possible && parse_time(t).is_none() {
            self.time_possible = false;
        }
    }

    fn kill_numeric(&mut self) {
        self.bool_possible = false;
        self.int_possible = false;
        self.float_possible = false;
        self.decimal_possible = false;
    }

    fn kill_temporal(&mut self) {
        self.date_possible = false;
        self.time_possible = false;
        self.datetime_possible = false;
    }

    /// Resolves the accumulated samples into the most specific kind still
    /// possible, plus a munge function for normalizing raw values into that
    /// kind. Text needs no munging.
    pub fn detect(&self) -> (Kind, Option<MungeFn>) {
        if self.samples == 0 {
            return (Kind::Unknown, None);
        }
        if self.nulls == self.samples {
            return (Kind::Null, None);
        }

        let kind = if self.int_possible {
            Kind::Int
        } else if self.float_possible {
            Kind::Float
        } else if self.decimal_possible {
            Kind::Decimal
        } else if self.bool_possible {
            Kind::Bool
        } else if self.datetime_possible {
            Kind::Datetime
        } else if self.date_possible {
            Kind::Date
        } else if self.time_possible {
            Kind::Time
        } else {
            Kind::Text
        };

        (kind, munge_fn(kind))
    }
}

/// Returns the canonicalizing munge function for `kind`, or `None` when no
/// conversion is needed (text, bytes, unknown).
pub fn munge_fn(kind: Kind) -> Option<MungeFn> {
    match kind {
        Kind::Bool => Some(munge_bool),
        Kind::Int => Some(munge_int),
        Kind::Float => Some(munge_float),
        Kind::Decimal => Some(munge_decimal),
        Kind::Datetime => Some(munge_datetime),
        Kind::Date => Some(munge_date),
        Kind::Time => Some(munge_time),
        _ => None,
    }
}

fn blank_is_null(s: &str) -> bool {
    s.trim().is_empty()
}

fn munge_bool(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Bool(_) => Ok(val.clone()),
        Value::Int(i) => Ok(Value::Bool(*i != 0)),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => parse_bool(s.trim())
            .map(Value::Bool)
            .ok_or_else(|| eyre::eyre!("cannot coerce {s:?} to bool")),
        other => eyre::bail!("cannot coerce {:?} to bool", other.kind()),
    }
}

fn munge_int(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Int(_) => Ok(val.clone()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(*f as i64)),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| eyre::eyre!("cannot coerce {s:?} to int: {e}")),
        other => eyre::bail!("cannot coerce {:?} to int", other.kind()),
    }
}

fn munge_float(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Float(_) => Ok(val.clone()),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| eyre::eyre!("cannot coerce {s:?} to float: {e}")),
        other => eyre::bail!("cannot coerce {:?} to float", other.kind()),
    }
}

fn munge_decimal(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Decimal(_) => Ok(val.clone()),
        Value::Int(i) => Ok(Value::Decimal(Decimal::new(*i as i128, 0))),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => Decimal::parse(s).map(Value::Decimal),
        other => eyre::bail!("cannot coerce {:?} to decimal", other.kind()),
    }
}

fn munge_datetime(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Datetime(_) => Ok(val.clone()),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => parse_datetime(s.trim())
            .map(Value::Datetime)
            .ok_or_else(|| eyre::eyre!("cannot coerce {s:?} to datetime")),
        other => eyre::bail!("cannot coerce {:?} to datetime", other.kind()),
    }
}

fn munge_date(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Date(_) => Ok(val.clone()),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => parse_date(s.trim())
            .map(Value::Date)
            .ok_or_else(|| eyre::eyre!("cannot coerce {s:?} to date")),
        other => eyre::bail!("cannot coerce {:?} to date", other.kind()),
    }
}

fn munge_time(val: &Value) -> Result<Value> {
    match val {
        Value::Null => Ok(Value::Null),
        Value::Time(_) => Ok(val.clone()),
        Value::Text(s) if blank_is_null(s) => Ok(Value::Null),
        Value::Text(s) => parse_time(s.trim())
            .map(Value::Time)
            .ok_or_else(|| eyre::eyre!("cannot coerce {s:?} to time")),
        other => eyre::bail!("cannot coerce {:?} to time", other.kind()),
    }
}

/// Accepts true/false/yes/no (case-insensitive) and 1/0. A column of bare
/// `1`/`0` stays ambiguous between Bool and Int; detection priority resolves
/// it to Int.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "TRUE" | "True" | "yes" | "YES" | "Yes" | "1" => Some(true),
        "false" | "FALSE" | "False" | "no" | "NO" | "No" | "0" => Some(false),
        _ => None,
    }
}

/// Parses ISO-8601-ish timestamps: RFC 3339 with offset, or a naive
/// `YYYY-MM-DD[T| ]HH:MM:SS[.fff]` interpreted as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    for f in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    None
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    for f in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, f) {
            return Some(d);
        }
    }
    None
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    for f in ["%H:%M:%S%.f", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, f) {
            return Some(t);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect_strs(samples: &[&str]) -> Kind {
        let mut d = Detector::new();
        for s in samples {
            d.sample(&Value::Text((*s).to_string()));
        }
        d.detect().0
    }

    #[test]
    fn zero_samples_is_unknown() {
        let d = Detector::new();
        assert_eq!(d.detect().0, Kind::Unknown);
    }

    #[test]
    fn all_nulls_is_null() {
        let mut d = Detector::new();
        d.sample(&Value::Null);
        d.sample(&Value::Text("  ".into()));
        assert_eq!(d.detect().0, Kind::Null);
    }

    #[test]
    fn narrows_to_most_specific() {
        assert_eq!(detect_strs(&["1", "2", "3"]), Kind::Int);
        assert_eq!(detect_strs(&["1", "2.5"]), Kind::Float);
        assert_eq!(detect_strs(&["1", "2.5", "banana"]), Kind::Text);
        assert_eq!(detect_strs(&["true", "false"]), Kind::Bool);
        assert_eq!(detect_strs(&["2020-01-01", "1999-12-31"]), Kind::Date);
        assert_eq!(detect_strs(&["13:01:00"]), Kind::Time);
        assert_eq!(
            detect_strs(&["2020-01-01T10:00:00Z", "2020-06-01 23:59:59"]),
            Kind::Datetime
        );
    }

    #[test]
    fn int_beats_bool_for_numeric_samples() {
        assert_eq!(detect_strs(&["0", "1", "1", "0"]), Kind::Int);
        // A bool word knocks out Int and the column resolves Bool.
        assert_eq!(detect_strs(&["1", "true"]), Kind::Bool);
    }

    #[test]
    fn blanks_are_null_for_non_text() {
        assert_eq!(detect_strs(&["1", "", "3"]), Kind::Int);
        assert_eq!(detect_strs(&["a", "", "c"]), Kind::Text);
    }

    #[test]
    fn typed_samples_narrow() {
        let mut d = Detector::new();
        d.sample(&Value::Float(1.0));
        d.sample(&Value::Float(2.0));
        assert_eq!(d.detect().0, Kind::Int);

        let mut d = Detector::new();
        d.sample(&Value::Float(1.5));
        assert_eq!(d.detect().0, Kind::Float);

        let mut d = Detector::new();
        d.sample(&Value::Bool(true));
        assert_eq!(d.detect().0, Kind::Bool);
    }

    #[test]
    fn munge_normalizes_strings() {
        let (kind, munge) = {
            let mut d = Detector::new();
            d.sample(&Value::Text("true".into()));
            d.detect()
        };
        assert_eq!(kind, Kind::Bool);
        let munge = munge.unwrap();
        assert_eq!(munge(&Value::Text("true".into())).unwrap(), Value::Bool(true));
        assert_eq!(munge(&Value::Text("".into())).unwrap(), Value::Null);

        let munge = munge_fn(Kind::Datetime).unwrap();
        let got = munge(&Value::Text("2011-01-01T12:30:00Z".into())).unwrap();
        match got {
            Value::Datetime(dt) => assert_eq!(dt.to_rfc3339(), "2011-01-01T12:30:00+00:00"),
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn munge_int_rejects_garbage() {
        let munge = munge_fn(Kind::Int).unwrap();
        assert!(munge(&Value::Text("abc".into())).is_err());
        assert_eq!(munge(&Value::Float(3.0)).unwrap(), Value::Int(3));
        assert!(munge(&Value::Bytes(vec![1])).is_err());
    }
}
