//! # Record Layer
//!
//! A record is one result row: an ordered tuple of [`Value`]s whose i-th
//! element conforms to the kind declared by the i-th field of the record's
//! metadata ([`meta::RecordMeta`]). Records are fully owned so they can
//! cross thread boundaries (the batch-insert channel) without borrowing
//! from any driver's buffers.
//!
//! ## Scan-target union
//!
//! Rather than reflection over driver-specific row types, every driver maps
//! its native values into the closed union below. `Null` is permitted only
//! where the field metadata says the column is nullable.
//!
//! | Variant | Rust type |
//! |---------|-----------|
//! | Null | - |
//! | Bool | bool |
//! | Int | i64 |
//! | Float | f64 |
//! | Decimal | i128 digits + u32 scale |
//! | Text | String |
//! | Bytes | Vec\<u8\> |
//! | Date | chrono::NaiveDate |
//! | Time | chrono::NaiveTime |
//! | Datetime | chrono::DateTime\<Utc\> |

pub mod batch;
pub mod meta;
pub mod sink;

use crate::kind::Kind;
use eyre::{bail, Result};
use std::fmt;

/// One result row.
pub type Record = Vec<Value>;

/// Fixed-point decimal: `digits` scaled by `10^-scale`. Mirrors how the
/// backends hand us NUMERIC values without dragging in float rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    pub digits: i128,
    pub scale: u32,
}

impl Decimal {
    pub fn new(digits: i128, scale: u32) -> Self {
        Decimal { digits, scale }
    }

    /// Parses a plain decimal literal: optional sign, digits, optional
    /// fractional part. No exponent form.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty decimal literal");
        }

        let (neg, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            bail!("malformed decimal literal: {s}");
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            bail!("malformed decimal literal: {s}");
        }

        let mut digits: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            digits = digits
                .checked_mul(10)
                .and_then(|d| d.checked_add((b - b'0') as i128))
                .ok_or_else(|| eyre::eyre!("decimal overflows 38 digits: {s}"))?;
        }
        if neg {
            digits = -digits;
        }

        Ok(Decimal { digits, scale: frac_part.len() as u32 })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.digits);
        }
        let pow = 10i128.pow(self.scale);
        let int = self.digits / pow;
        let frac = (self.digits % pow).abs();
        if self.digits < 0 && int == 0 {
            write!(f, "-0.{:0width$}", frac, width = self.scale as usize)
        } else {
            write!(f, "{}.{:0width$}", int, frac, width = self.scale as usize)
        }
    }
}

/// Runtime value: the uniform scan target for every driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Datetime(chrono::DateTime<chrono::Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The kind this value inhabits. `Null` maps to [`Kind::Null`].
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Decimal(_) => Kind::Decimal,
            Value::Text(_) => Kind::Text,
            Value::Bytes(_) => Kind::Bytes,
            Value::Date(_) => Kind::Date,
            Value::Time(_) => Kind::Time,
            Value::Datetime(_) => Kind::Datetime,
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => bail!("expected Int, got {:?}", other.kind()),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            other => bail!("expected Float, got {:?}", other.kind()),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => bail!("expected Text, got {:?}", other.kind()),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => bail!("expected Bool, got {:?}", other.kind()),
        }
    }

    /// Renders the value the way the writers print it. `Null` renders empty.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => format!("[{} bytes]", b.len()),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
            Value::Datetime(dt) => dt.to_rfc3339(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_parse_roundtrip() {
        let d = Decimal::parse("123.45").unwrap();
        assert_eq!(d, Decimal::new(12345, 2));
        assert_eq!(d.to_string(), "123.45");

        let d = Decimal::parse("-0.05").unwrap();
        assert_eq!(d, Decimal::new(-5, 2));
        assert_eq!(d.to_string(), "-0.05");

        let d = Decimal::parse("42").unwrap();
        assert_eq!(d, Decimal::new(42, 0));
        assert_eq!(d.to_string(), "42");
    }

    #[test]
    fn decimal_parse_rejects_garbage() {
        assert!(Decimal::parse("").is_err());
        assert!(Decimal::parse("12a.4").is_err());
        assert!(Decimal::parse(".").is_err());
    }

    #[test]
    fn value_kind_mapping() {
        assert_eq!(Value::Null.kind(), Kind::Null);
        assert_eq!(Value::Int(7).kind(), Kind::Int);
        assert_eq!(Value::Text("x".into()).kind(), Kind::Text);
    }

    #[test]
    fn render_null_is_empty() {
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::Bool(true).render(), "true");
    }
}
