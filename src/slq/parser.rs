//! # Pipeline Query Parser
//!
//! Recursive descent over the token stream, Pratt parsing for expressions,
//! AST nodes allocated in a `bumpalo` arena. The parser performs no name
//! resolution: handles are split syntactically (the last dotted segment of
//! `@prod.db1.actor` is the table) and checked against the collection by
//! the orchestrator.
//!
//! ## Expression precedence
//!
//! | Binding power | Operators |
//! |---------------|-----------|
//! | 1 (lowest) | `\|\|` |
//! | 2 | `&&` |
//! | 3 | `==` `!=` `<` `<=` `>` `>=` |
//! | 4 | `+` `-` |
//! | 5 | `*` `/` |
//! | 6 (highest) | unary `-` |

use super::ast::*;
use super::lexer::Lexer;
use super::token::Token;
use crate::dialect::JoinType;
use crate::error::SqError;
use bumpalo::Bump;
use eyre::Result;

/// Parses `input` into a [`Query`] whose nodes live in `arena`.
pub fn parse<'a>(arena: &'a Bump, input: &'a str) -> Result<Query<'a>> {
    let tokens = Lexer::new(input).tokenize()?;
    Parser { arena, tokens, pos: 0 }.parse_query()
}

struct Parser<'a> {
    arena: &'a Bump,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token<'a> {
        self.tokens.get(self.pos).copied().unwrap_or(Token::Eof)
    }

    fn advance(&mut self) -> Token<'a> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token<'a>) -> Result<()> {
        let got = self.advance();
        if got != want {
            return Err(self.err(format!("expected {want}, got {got}")));
        }
        Ok(())
    }

    fn err(&self, msg: impl Into<String>) -> eyre::Report {
        SqError::invalid_source(format!("query syntax: {}", msg.into())).into()
    }

    fn parse_query(&mut self) -> Result<Query<'a>> {
        let table = self.parse_table_ref()?;

        let mut segments = Vec::new();
        while self.peek() == Token::Pipe {
            self.advance();
            segments.push(self.parse_segment()?);
        }

        if self.peek() != Token::Eof {
            return Err(self.err(format!("trailing input at {}", self.peek())));
        }

        Ok(Query {
            table,
            segments: self.arena.alloc_slice_copy(&segments),
        })
    }

    /// `@handle.table` or `.table`. The last dotted segment of a handle
    /// path is the table.
    fn parse_table_ref(&mut self) -> Result<TableRef<'a>> {
        match self.advance() {
            Token::Handle(path) => {
                let Some(dot) = path.rfind('.') else {
                    return Err(
                        self.err(format!("{path} must name a table, e.g. {path}.tbl_name"))
                    );
                };
                Ok(TableRef {
                    handle: Some(&path[..dot]),
                    table: &path[dot + 1..],
                })
            }
            Token::Name(table) => Ok(TableRef { handle: None, table }),
            got => Err(self.err(format!("expected table reference, got {got}"))),
        }
    }

    fn parse_segment(&mut self) -> Result<Segment<'a>> {
        match self.peek() {
            Token::RangeStart => self.parse_range(),
            Token::Ident(name) => {
                if let Some(jt) = JOIN_FUNCS.get(name).copied() {
                    self.advance();
                    return self.parse_join(jt);
                }
                match name {
                    "where" => {
                        self.advance();
                        self.expect(Token::LParen)?;
                        let expr = self.parse_expr(0)?;
                        self.expect(Token::RParen)?;
                        Ok(Segment::Where(self.arena.alloc(expr)))
                    }
                    "order_by" | "sort_by" => {
                        self.advance();
                        self.parse_order_by()
                    }
                    "group_by" => {
                        self.advance();
                        self.parse_group_by()
                    }
                    _ if AGG_FUNCS.contains_key(name) => self.parse_projection(),
                    _ => Err(self.err(format!("unknown function: {name}"))),
                }
            }
            Token::Name(_) => self.parse_projection(),
            got => Err(self.err(format!("expected segment, got {got}"))),
        }
    }

    /// `.[start:end]`, `.[n]`, `.[:end]`, `.[start:]`.
    fn parse_range(&mut self) -> Result<Segment<'a>> {
        self.expect(Token::RangeStart)?;

        let start = self.parse_range_bound()?;
        let range = if self.peek() == Token::Colon {
            self.advance();
            let end = self.parse_range_bound()?;
            Range { start, end }
        } else {
            // Single index selects exactly one row.
            let Some(n) = start else {
                return Err(self.err("empty row range"));
            };
            Range { start: Some(n), end: Some(n + 1) }
        };

        self.expect(Token::RBracket)?;
        Ok(Segment::Range(range))
    }

    fn parse_range_bound(&mut self) -> Result<Option<u64>> {
        match self.peek() {
            Token::Number(raw) => {
                self.advance();
                let n = raw
                    .parse::<u64>()
                    .map_err(|_| self.err(format!("range bound must be a whole number: {raw}")))?;
                Ok(Some(n))
            }
            _ => Ok(None),
        }
    }

    fn parse_join(&mut self, jt: JoinType) -> Result<Segment<'a>> {
        self.expect(Token::LParen)?;
        let target = self.parse_table_ref_or_local()?;

        let on = if self.peek() == Token::Comma {
            self.advance();
            let expr = self.parse_expr(0)?;
            Some(&*self.arena.alloc(expr))
        } else {
            None
        };
        self.expect(Token::RParen)?;

        if jt != JoinType::Cross && on.is_none() {
            return Err(self.err("join requires a condition, e.g. join(@h.tbl, .col)"));
        }
        if jt == JoinType::Cross && on.is_some() {
            return Err(self.err("cross_join takes no condition"));
        }

        Ok(Segment::Join(Join { jt, target, on }))
    }

    /// Join targets may be `@handle.table` or a local `.table`.
    fn parse_table_ref_or_local(&mut self) -> Result<TableRef<'a>> {
        match self.peek() {
            Token::Handle(_) | Token::Name(_) => self.parse_table_ref(),
            got => Err(self.err(format!("expected join target table, got {got}"))),
        }
    }

    fn parse_order_by(&mut self) -> Result<Segment<'a>> {
        self.expect(Token::LParen)?;
        let mut terms = Vec::new();
        loop {
            let col = self.parse_col_ref()?;
            let desc = match self.peek() {
                Token::Ident("desc") => {
                    self.advance();
                    true
                }
                Token::Ident("asc") => {
                    self.advance();
                    false
                }
                _ => false,
            };
            terms.push(OrderTerm { col, desc });

            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                got => return Err(self.err(format!("expected , or ) in order_by, got {got}"))),
            }
        }
        if terms.is_empty() {
            return Err(self.err("order_by requires at least one column"));
        }
        Ok(Segment::OrderBy(self.arena.alloc_slice_copy(&terms)))
    }

    fn parse_group_by(&mut self) -> Result<Segment<'a>> {
        self.expect(Token::LParen)?;
        let mut cols = Vec::new();
        loop {
            cols.push(self.parse_col_ref()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                got => return Err(self.err(format!("expected , or ) in group_by, got {got}"))),
            }
        }
        Ok(Segment::GroupBy(self.arena.alloc_slice_copy(&cols)))
    }

    /// `.col` or `.tbl.col` (two consecutive selectors).
    fn parse_col_ref(&mut self) -> Result<ColRef<'a>> {
        match self.advance() {
            Token::Name(first) => {
                if let Token::Name(second) = self.peek() {
                    self.advance();
                    Ok(ColRef { table: Some(first), col: second })
                } else {
                    Ok(ColRef { table: None, col: first })
                }
            }
            got => Err(self.err(format!("expected column selector, got {got}"))),
        }
    }

    /// A comma-separated list of column selectors and/or aggregate calls.
    fn parse_projection(&mut self) -> Result<Segment<'a>> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Token::Name(_) => {
                    items.push(SelectItem::Col(self.parse_col_ref()?));
                }
                Token::Ident(name) if AGG_FUNCS.contains_key(name) => {
                    self.advance();
                    items.push(SelectItem::Func(self.parse_func_call(name)?));
                }
                got => return Err(self.err(format!("expected projection item, got {got}"))),
            }

            if self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            break;
        }
        Ok(Segment::Projection(self.arena.alloc_slice_copy(&items)))
    }

    fn parse_func_call(&mut self, name: &'a str) -> Result<FuncCall<'a>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Token::RParen {
            loop {
                args.push(self.parse_expr(0)?);
                match self.advance() {
                    Token::Comma => continue,
                    Token::RParen => break,
                    got => {
                        return Err(self.err(format!("expected , or ) in {name}(), got {got}")))
                    }
                }
            }
        } else {
            self.advance();
        }
        Ok(FuncCall {
            name,
            args: self.arena.alloc_slice_copy(&args),
        })
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr<'a>> {
        let mut lhs = self.parse_primary()?;

        loop {
            let (op, bp) = match self.peek() {
                Token::OrOr => ("||", 1),
                Token::AndAnd => ("&&", 2),
                Token::EqEq => ("==", 3),
                Token::Neq => ("!=", 3),
                Token::Lt => ("<", 3),
                Token::Lte => ("<=", 3),
                Token::Gt => (">", 3),
                Token::Gte => (">=", 3),
                Token::Plus => ("+", 4),
                Token::Minus => ("-", 4),
                Token::Star => ("*", 5),
                Token::Slash => ("/", 5),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            self.advance();

            let rhs = self.parse_expr(bp + 1)?;
            lhs = Expr::Binop {
                op,
                lhs: self.arena.alloc(lhs),
                rhs: self.arena.alloc(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr<'a>> {
        match self.peek() {
            Token::Name(_) => Ok(Expr::Col(self.parse_col_ref()?)),
            Token::Number(raw) => {
                self.advance();
                if let Ok(i) = raw.parse::<i64>() {
                    Ok(Expr::Lit(Literal::Int(i)))
                } else {
                    let f = raw
                        .parse::<f64>()
                        .map_err(|_| self.err(format!("bad number: {raw}")))?;
                    Ok(Expr::Lit(Literal::Float(f)))
                }
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Lit(Literal::Str(s)))
            }
            Token::Variable(name) => {
                self.advance();
                Ok(Expr::Arg(name))
            }
            Token::Minus => {
                self.advance();
                let inner = self.parse_expr(6)?;
                Ok(Expr::Unop {
                    op: "-",
                    expr: self.arena.alloc(inner),
                })
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident("true") => {
                self.advance();
                Ok(Expr::Lit(Literal::Bool(true)))
            }
            Token::Ident("false") => {
                self.advance();
                Ok(Expr::Lit(Literal::Bool(false)))
            }
            Token::Ident("null") => {
                self.advance();
                Ok(Expr::Lit(Literal::Null))
            }
            Token::Ident(name) if AGG_FUNCS.contains_key(name) => {
                self.advance();
                Ok(Expr::Func(self.parse_func_call(name)?))
            }
            got => Err(self.err(format!("expected expression, got {got}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::JoinType;

    fn with_query<T>(input: &str, f: impl FnOnce(Query<'_>) -> T) -> T {
        let arena = Bump::new();
        let q = parse(&arena, input).unwrap();
        f(q)
    }

    #[test]
    fn parses_table_and_range() {
        with_query("@sakila_sl3.actor | .[0:5]", |q| {
            assert_eq!(q.table.handle, Some("@sakila_sl3"));
            assert_eq!(q.table.table, "actor");
            assert_eq!(q.segments.len(), 1);
            match q.segments[0] {
                Segment::Range(r) => {
                    assert_eq!(r, Range { start: Some(0), end: Some(5) })
                }
                ref other => panic!("expected range, got {other:?}"),
            }
        });
    }

    #[test]
    fn parses_single_index_range() {
        with_query(".actor | .[2]", |q| match q.segments[0] {
            Segment::Range(r) => assert_eq!(r, Range { start: Some(2), end: Some(3) }),
            ref other => panic!("expected range, got {other:?}"),
        });
        with_query(".actor | .[:7]", |q| match q.segments[0] {
            Segment::Range(r) => assert_eq!(r, Range { start: None, end: Some(7) }),
            ref other => panic!("expected range, got {other:?}"),
        });
        with_query(".actor | .[3:]", |q| match q.segments[0] {
            Segment::Range(r) => assert_eq!(r, Range { start: Some(3), end: None }),
            ref other => panic!("expected range, got {other:?}"),
        });
    }

    #[test]
    fn parses_where_and_projection() {
        with_query(
            "@sakila_ms.actor | where(.actor_id == 1) | .first_name",
            |q| {
                assert_eq!(q.segments.len(), 2);
                match q.segments[0] {
                    Segment::Where(Expr::Binop { op, .. }) => assert_eq!(*op, "=="),
                    ref other => panic!("expected where, got {other:?}"),
                }
                match q.segments[1] {
                    Segment::Projection(items) => {
                        assert_eq!(items.len(), 1);
                        assert!(matches!(
                            items[0],
                            SelectItem::Col(ColRef { table: None, col: "first_name" })
                        ));
                    }
                    ref other => panic!("expected projection, got {other:?}"),
                }
            },
        );
    }

    #[test]
    fn parses_joins() {
        with_query("@my1.person | join(@pg1.address, .uid)", |q| {
            match q.segments[0] {
                Segment::Join(join) => {
                    assert_eq!(join.jt, JoinType::Inner);
                    assert_eq!(join.target.handle, Some("@pg1"));
                    assert_eq!(join.target.table, "address");
                    assert!(matches!(join.on, Some(Expr::Col(_))));
                }
                ref other => panic!("expected join, got {other:?}"),
            }
            assert_eq!(q.handles(), vec!["@my1", "@pg1"]);
        });

        with_query(".actor | cross_join(.film)", |q| match q.segments[0] {
            Segment::Join(join) => {
                assert_eq!(join.jt, JoinType::Cross);
                assert!(join.on.is_none());
            }
            ref other => panic!("expected join, got {other:?}"),
        });
    }

    #[test]
    fn join_condition_rules() {
        let arena = Bump::new();
        assert!(parse(&arena, ".a | join(.b)").is_err());
        assert!(parse(&arena, ".a | cross_join(.b, .c)").is_err());
    }

    #[test]
    fn parses_order_by_and_group_by() {
        with_query(".payment | group_by(.customer_id) | order_by(.amount desc)", |q| {
            match q.segments[0] {
                Segment::GroupBy(cols) => assert_eq!(cols[0].col, "customer_id"),
                ref other => panic!("expected group_by, got {other:?}"),
            }
            match q.segments[1] {
                Segment::OrderBy(terms) => {
                    assert_eq!(terms[0].col.col, "amount");
                    assert!(terms[0].desc);
                }
                ref other => panic!("expected order_by, got {other:?}"),
            }
        });
    }

    #[test]
    fn parses_count_and_aggregates() {
        with_query(".actor | count()", |q| match q.segments[0] {
            Segment::Projection(items) => {
                assert!(matches!(
                    items[0],
                    SelectItem::Func(FuncCall { name: "count", args: [] })
                ));
            }
            ref other => panic!("expected projection, got {other:?}"),
        });

        with_query(".payment | max(.amount), min(.amount)", |q| {
            match q.segments[0] {
                Segment::Projection(items) => assert_eq!(items.len(), 2),
                ref other => panic!("expected projection, got {other:?}"),
            }
        });
    }

    #[test]
    fn expression_precedence() {
        with_query(".t | where(.a == 1 || .b == 2 && .c == 3)", |q| {
            // && binds tighter than ||.
            match q.segments[0] {
                Segment::Where(Expr::Binop { op: "||", rhs, .. }) => {
                    assert!(matches!(rhs, Expr::Binop { op: "&&", .. }));
                }
                ref other => panic!("expected ||-rooted expr, got {other:?}"),
            }
        });
    }

    #[test]
    fn variables_and_strings() {
        with_query(".actor | where(.first_name == $fname)", |q| {
            match q.segments[0] {
                Segment::Where(Expr::Binop { rhs, .. }) => {
                    assert!(matches!(rhs, Expr::Arg("fname")));
                }
                ref other => panic!("expected where, got {other:?}"),
            }
        });
    }

    #[test]
    fn rejects_bare_handle_without_table() {
        let arena = Bump::new();
        assert!(parse(&arena, "@sakila").is_err());
        assert!(parse(&arena, "@sakila | .actor").is_err());
    }

    #[test]
    fn rejects_unknown_function() {
        let arena = Bump::new();
        assert!(parse(&arena, ".a | explode(.b)").is_err());
    }
}
