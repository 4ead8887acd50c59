//! # Error Taxonomy
//!
//! sq reports all failures through `eyre::Result`, but the command layer and
//! several retry/fallback paths need to distinguish *classes* of failure
//! regardless of which driver produced them. This module provides that
//! classification: a lightweight tagged error (`SqError`) that rides inside
//! an `eyre::Report`, plus predicates that recover the tag from anywhere in
//! the wrap chain.
//!
//! ## Tags
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | NotExist | Handle, table, column, or file missing |
//! | InvalidSource | Malformed URI, unsupported driver, validation failure |
//! | DbError | Generic backend error (wraps driver code / SQLSTATE) |
//! | Auth | Permission denied by the backend |
//! | TypeMismatch | Value cannot be coerced into its declared kind |
//! | UnsupportedOp | Query feature not renderable for the dialect |
//! | Cancelled | Cooperative cancellation |
//! | Io | Filesystem / HTTP transport failure |
//! | Internal | Invariant violation, never expected |
//!
//! Classification happens where the most information exists: each SQL driver
//! maps its backend errors (by SQLSTATE, then numeric code, then message
//! substring) into a tag before the error leaves the driver module.
//!
//! ## Usage
//!
//! ```ignore
//! use sq::error::{SqError, is_not_exist};
//!
//! fn lookup(handle: &str) -> eyre::Result<()> {
//!     Err(SqError::not_exist(format!("source not found: {handle}")).into())
//! }
//!
//! let err = lookup("@nope").unwrap_err();
//! assert!(is_not_exist(&err));
//! ```

use std::fmt;

/// Failure class. Tags, not types: drivers translate their native errors
/// into one of these before the error crosses the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotExist,
    InvalidSource,
    DbError,
    Auth,
    TypeMismatch,
    UnsupportedOp,
    Cancelled,
    Io,
    Internal,
}

impl ErrorKind {
    /// Process exit code for this class of failure.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::NotExist | ErrorKind::InvalidSource | ErrorKind::UnsupportedOp => 1,
            ErrorKind::DbError | ErrorKind::Auth | ErrorKind::TypeMismatch => 2,
            ErrorKind::Io => 2,
            ErrorKind::Cancelled => 1,
            ErrorKind::Internal => 3,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotExist => "not exist",
            ErrorKind::InvalidSource => "invalid source",
            ErrorKind::DbError => "db error",
            ErrorKind::Auth => "auth",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnsupportedOp => "unsupported operation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A tagged error. Constructed by drivers and core components, then wrapped
/// with context (`wrap_err`) as it bubbles toward the command layer. The tag
/// survives wrapping and is recoverable via [`kind_of`].
#[derive(Debug)]
pub struct SqError {
    kind: ErrorKind,
    msg: String,
    /// Backend-native code (SQLSTATE or numeric), when known.
    code: Option<String>,
}

impl SqError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        SqError { kind, msg: msg.into(), code: None }
    }

    pub fn with_code(kind: ErrorKind, msg: impl Into<String>, code: impl Into<String>) -> Self {
        SqError { kind, msg: msg.into(), code: Some(code.into()) }
    }

    pub fn not_exist(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotExist, msg)
    }

    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidSource, msg)
    }

    pub fn db(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DbError, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, msg)
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, msg)
    }

    pub fn unsupported_op(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedOp, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for SqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{}]", self.msg, code),
            None => f.write_str(&self.msg),
        }
    }
}

impl std::error::Error for SqError {}

/// Returns the taxonomy tag of `report`, searching the whole error chain.
/// Returns `None` for untagged errors.
pub fn kind_of(report: &eyre::Report) -> Option<ErrorKind> {
    report
        .chain()
        .find_map(|e| e.downcast_ref::<SqError>().map(|s| s.kind))
}

/// True if `report` is tagged [`ErrorKind::NotExist`], regardless of
/// originating driver.
pub fn is_not_exist(report: &eyre::Report) -> bool {
    kind_of(report) == Some(ErrorKind::NotExist)
}

pub fn is_invalid_source(report: &eyre::Report) -> bool {
    kind_of(report) == Some(ErrorKind::InvalidSource)
}

pub fn is_cancelled(report: &eyre::Report) -> bool {
    kind_of(report) == Some(ErrorKind::Cancelled)
}

pub fn is_type_mismatch(report: &eyre::Report) -> bool {
    kind_of(report) == Some(ErrorKind::TypeMismatch)
}

/// Exit code for `report` per the command-layer contract: 1 for user/input
/// errors, 2 for data-source errors, 3 for internal errors. Untagged errors
/// are treated as internal.
pub fn exit_code(report: &eyre::Report) -> i32 {
    kind_of(report).map_or(3, ErrorKind::exit_code)
}

/// Combines two errors into one report, preserving the first error's tag.
/// Used by the identity-insert retry path, where both the original failure
/// and the retry failure must surface.
pub fn combine(first: eyre::Report, second: eyre::Report) -> eyre::Report {
    first.wrap_err(format!("additionally: {second}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn tag_survives_wrapping() {
        let report: eyre::Report = SqError::not_exist("table \"actor2\" not found").into();
        let wrapped = report
            .wrap_err("tbl drop")
            .wrap_err("flag --src");

        assert!(is_not_exist(&wrapped));
        assert_eq!(kind_of(&wrapped), Some(ErrorKind::NotExist));
        assert!(!is_cancelled(&wrapped));
    }

    #[test]
    fn untagged_error_has_no_kind() {
        let report = eyre::eyre!("something else");
        assert_eq!(kind_of(&report), None);
        assert_eq!(exit_code(&report), 3);
    }

    #[test]
    fn exit_codes_follow_failure_class() {
        let user: eyre::Report = SqError::invalid_source("bad uri").into();
        let data: eyre::Report = SqError::db("connection refused").into();
        let internal: eyre::Report = SqError::internal("impossible").into();

        assert_eq!(exit_code(&user), 1);
        assert_eq!(exit_code(&data), 2);
        assert_eq!(exit_code(&internal), 3);
    }

    #[test]
    fn code_is_recoverable() {
        let err = SqError::with_code(ErrorKind::DbError, "deadlock victim", "1205");
        assert_eq!(err.code(), Some("1205"));
        assert_eq!(err.to_string(), "deadlock victim [1205]");
    }

    #[test]
    fn combine_keeps_first_tag() {
        let first: eyre::Report = SqError::db("identity insert rejected").into();
        let second: eyre::Report = SqError::db("SET IDENTITY_INSERT failed").into();
        let combined = combine(first, second);
        assert_eq!(kind_of(&combined), Some(ErrorKind::DbError));
        assert!(combined.to_string().contains("additionally"));
    }
}
