//! Token definitions for the pipeline query language.

use std::fmt;

/// A lexed token. String-carrying variants borrow from the query text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'a> {
    /// `@handle` — the full dotted path, `@` included.
    Handle(&'a str),
    /// `.name` selector (table or column); the dot is consumed.
    Name(&'a str),
    /// Bare identifier: function names, `true`/`false`/`null`, `desc`/`asc`.
    Ident(&'a str),
    /// `$name` query-argument reference; the `$` is consumed.
    Variable(&'a str),
    /// Numeric literal, kept raw until the parser types it.
    Number(&'a str),
    /// String literal, quotes stripped.
    Str(&'a str),

    /// `.[` — start of a row range.
    RangeStart,

    Pipe,
    Comma,
    LParen,
    RParen,
    RBracket,
    Colon,

    EqEq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    AndAnd,
    OrOr,
    Plus,
    Minus,
    Star,
    Slash,

    Eof,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Handle(s) => write!(f, "{s}"),
            Token::Name(s) => write!(f, ".{s}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Variable(s) => write!(f, "${s}"),
            Token::Number(s) => write!(f, "{s}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::RangeStart => f.write_str(".["),
            Token::Pipe => f.write_str("|"),
            Token::Comma => f.write_str(","),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::RBracket => f.write_str("]"),
            Token::Colon => f.write_str(":"),
            Token::EqEq => f.write_str("=="),
            Token::Neq => f.write_str("!="),
            Token::Lt => f.write_str("<"),
            Token::Lte => f.write_str("<="),
            Token::Gt => f.write_str(">"),
            Token::Gte => f.write_str(">="),
            Token::AndAnd => f.write_str("&&"),
            Token::OrOr => f.write_str("||"),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Eof => f.write_str("<eof>"),
        }
    }
}
