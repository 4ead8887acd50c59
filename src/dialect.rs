//! # SQL Dialects
//!
//! A [`Dialect`] packages the per-driver knobs the renderer and the insert
//! machinery need: identifier quoting, placeholder grammar, operator map,
//! supported join types, and the batch-insert ceiling. One value per driver;
//! drivers hand out copies, never share mutable state.
//!
//! ## Placeholder grammars
//!
//! | Style | Drivers | `placeholders(3, 2)` |
//! |-------|---------|----------------------|
//! | `?` positional | sqlite3, mysql | `(?,?,?),(?,?,?)` |
//! | `$n` numbered | postgres | `($1,$2,$3),($4,$5,$6)` |
//! | `@pn` named | sqlserver | `(@p1,@p2,@p3),(@p4,@p5,@p6)` |
//!
//! Indices increase monotonically across rows.

use crate::source::DriverType;
use phf::phf_map;

/// Join types a dialect may support. Not every driver supports each type;
/// MySQL famously lacks FULL OUTER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    FullOuter,
    Cross,
}

impl JoinType {
    /// SQL keyword sequence for this join.
    pub fn sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::FullOuter => "FULL OUTER JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }

    pub fn all() -> &'static [JoinType] {
        ALL_JOINS
    }
}

pub const ALL_JOINS: &[JoinType] = &[
    JoinType::Inner,
    JoinType::Left,
    JoinType::Right,
    JoinType::FullOuter,
    JoinType::Cross,
];

/// Join set for dialects without FULL OUTER support.
pub const JOINS_NO_FULL_OUTER: &[JoinType] = &[
    JoinType::Inner,
    JoinType::Left,
    JoinType::Right,
    JoinType::Cross,
];

/// Default mapping of pipeline operators to their SQL rendering. Dialects
/// may substitute their own map, but in practice the default covers all
/// four backends.
pub static DEFAULT_OPS: phf::Map<&'static str, &'static str> = phf_map! {
    "==" => "=",
    "!=" => "!=",
    "&&" => "AND",
    "||" => "OR",
    "<" => "<",
    "<=" => "<=",
    ">" => ">",
    ">=" => ">=",
    "+" => "+",
    "-" => "-",
    "*" => "*",
    "/" => "/",
};

/// Driver-specific SQL dialect values and functions.
#[derive(Clone, Copy)]
pub struct Dialect {
    pub typ: DriverType,
    /// Emits the VALUES placeholder block for a multi-row insert.
    pub placeholders: fn(n_cols: usize, n_rows: usize) -> String,
    /// Emits the n-th scalar placeholder (1-based) for query parameters.
    pub placeholder: fn(n: usize) -> String,
    /// Quotes and escapes an identifier.
    pub enquote: fn(&str) -> String,
    /// True if the backend stores BOOLEAN as an integer.
    pub int_bool: bool,
    /// Maximum number of values in one batch insert statement.
    pub max_batch_values: usize,
    /// Pipeline-operator → SQL-operator map.
    pub ops: &'static phf::Map<&'static str, &'static str>,
    /// Join types this dialect can render.
    pub joins: &'static [JoinType],
}

impl Dialect {
    pub fn enquote(&self, ident: &str) -> String {
        (self.enquote)(ident)
    }

    pub fn placeholders(&self, n_cols: usize, n_rows: usize) -> String {
        (self.placeholders)(n_cols, n_rows)
    }

    pub fn placeholder(&self, n: usize) -> String {
        (self.placeholder)(n)
    }

    pub fn op(&self, slq_op: &str) -> Option<&'static str> {
        self.ops.get(slq_op).copied()
    }

    pub fn supports_join(&self, jt: JoinType) -> bool {
        self.joins.contains(&jt)
    }
}

impl std::fmt::Debug for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialect").field("typ", &self.typ).finish()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.typ)
    }
}

/// Double-quote quoting, embedded quotes doubled. The SQL-standard default.
pub fn double_quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Backtick quoting (MySQL), embedded backticks doubled.
pub fn backtick_quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// `(?,?,?),(?,?,?)` for `?`-positional drivers.
pub fn placeholders_question(n_cols: usize, n_rows: usize) -> String {
    placeholders_with(n_cols, n_rows, |_, out| out.push('?'))
}

/// `($1,$2,$3),($4,$5,$6)` for numbered-positional drivers.
pub fn placeholders_dollar(n_cols: usize, n_rows: usize) -> String {
    placeholders_with(n_cols, n_rows, |n, out| {
        out.push('$');
        out.push_str(&n.to_string());
    })
}

/// `(@p1,@p2,@p3),(@p4,@p5,@p6)` for SQL Server's named form.
pub fn placeholders_at_p(n_cols: usize, n_rows: usize) -> String {
    placeholders_with(n_cols, n_rows, |n, out| {
        out.push_str("@p");
        out.push_str(&n.to_string());
    })
}

/// Scalar `?` placeholder; the index is not rendered.
pub fn placeholder_question(_n: usize) -> String {
    "?".to_string()
}

/// Scalar `$n` placeholder.
pub fn placeholder_dollar(n: usize) -> String {
    format!("${n}")
}

/// Scalar `@pn` placeholder.
pub fn placeholder_at_p(n: usize) -> String {
    format!("@p{n}")
}

fn placeholders_with(n_cols: usize, n_rows: usize, write: fn(usize, &mut String)) -> String {
    let mut out = String::new();
    let mut n = 1;
    for row in 0..n_rows {
        if row > 0 {
            out.push(',');
        }
        out.push('(');
        for col in 0..n_cols {
            if col > 0 {
                out.push(',');
            }
            write(n, &mut out);
            n += 1;
        }
        out.push(')');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_question_style() {
        assert_eq!(placeholders_question(3, 1), "(?,?,?)");
        assert_eq!(placeholders_question(2, 3), "(?,?),(?,?),(?,?)");
        assert_eq!(placeholders_question(1, 1), "(?)");
    }

    #[test]
    fn placeholders_dollar_style() {
        assert_eq!(placeholders_dollar(3, 1), "($1,$2,$3)");
        assert_eq!(placeholders_dollar(3, 2), "($1,$2,$3),($4,$5,$6)");
    }

    #[test]
    fn placeholders_at_p_style() {
        assert_eq!(placeholders_at_p(3, 2), "(@p1,@p2,@p3),(@p4,@p5,@p6)");
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(double_quote("actor"), "\"actor\"");
        assert_eq!(double_quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(backtick_quote("order"), "`order`");
        assert_eq!(backtick_quote("tick`ed"), "`tick``ed`");
    }

    #[test]
    fn default_ops_minimum_set() {
        assert_eq!(DEFAULT_OPS.get("==").copied(), Some("="));
        assert_eq!(DEFAULT_OPS.get("!=").copied(), Some("!="));
        assert_eq!(DEFAULT_OPS.get("&&").copied(), Some("AND"));
        assert_eq!(DEFAULT_OPS.get("||").copied(), Some("OR"));
    }
}
