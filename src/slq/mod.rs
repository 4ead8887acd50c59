//! # Pipeline Query Compiler
//!
//! Compiles the jq-style pipeline language into dialect-specific SQL:
//!
//! ```text
//! query text → Lexer → tokens → Parser → arena AST → render(dialect) → SQL + params
//! ```
//!
//! - `token` / `lexer`: zero-copy tokenizer
//! - `ast`: arena-allocated query tree
//! - `parser`: recursive descent + Pratt expressions
//! - `render`: fragment renderer with per-driver overrides
//!
//! The compiler is pure: it needs a dialect and the `--arg` map, but never
//! touches a connection. Opening databases, resolving handles against the
//! collection, and cross-source materialization are the orchestrator's job
//! (see [`crate::engine`]).

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod token;

pub use parser::parse;
pub use render::{render, Renderer};
