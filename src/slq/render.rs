//! # SQL Rendering
//!
//! Walks a parsed [`Query`] and emits dialect-specific SQL plus the bound
//! parameter list. Rendering is fragment-based: each pipeline segment
//! contributes to a [`Fragments`] value (select list, from clause, where,
//! group by, order by, range), which is assembled into the final statement
//! at the end.
//!
//! Driver quirks are supplied as a small set of overrides on [`Renderer`]
//! (currently `range` and `pre_render`); the default renderer is a plain
//! value constructed fresh per call and is never mutated by a driver. SQL
//! Server, for example, overrides `range` to emit `OFFSET … FETCH NEXT …`
//! and uses `pre_render` to inject the `ORDER BY (SELECT 0)` that form
//! requires.
//!
//! Literals and `$arg` references in expressions are not inlined: they
//! render as dialect placeholders and surface in the returned parameter
//! list, numbered monotonically left to right.

use super::ast::{
    ColRef, Expr, FuncCall, Literal, Query, Range, Segment, SelectItem, AGG_FUNCS,
};
use crate::dialect::Dialect;
use crate::error::SqError;
use crate::record::meta::munge_result_col_names;
use crate::record::Value;
use eyre::Result;
use hashbrown::HashMap;

/// Renderer with per-driver override points. Construct via `default()` and
/// replace fields as needed.
#[derive(Clone, Copy)]
pub struct Renderer {
    /// Renders the row-range fragment (the LIMIT/OFFSET tail).
    pub range: fn(&Dialect, &Range) -> String,
    /// Runs after all segments have rendered, before assembly. The hook may
    /// adjust fragments to satisfy dialect grammar rules.
    pub pre_render: Option<fn(&mut Fragments, &Dialect) -> Result<()>>,
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer {
            range: default_range,
            pre_render: None,
        }
    }
}

/// Clause bodies accumulated during rendering. Keywords are added at
/// assembly, so overrides can inspect and replace bodies directly.
#[derive(Debug, Default)]
pub struct Fragments {
    /// SELECT list; empty means `*`.
    pub columns: String,
    /// FROM body: quoted table plus any join clauses.
    pub from: String,
    pub where_clause: Option<String>,
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    /// Fully rendered range tail, e.g. `LIMIT 5 OFFSET 0`.
    pub range: Option<String>,
}

/// Renders `query` for `dialect`, returning the SQL and its bound
/// parameters.
pub fn render(
    query: &Query<'_>,
    dialect: &Dialect,
    renderer: &Renderer,
    args: &HashMap<String, String>,
) -> Result<(String, Vec<Value>)> {
    let mut st = RenderState {
        dialect,
        args,
        params: Vec::new(),
    };

    let mut frags = Fragments {
        from: dialect.enquote(query.table.table),
        ..Fragments::default()
    };

    for seg in query.segments {
        match seg {
            Segment::Where(expr) => {
                let rendered = st.render_expr(expr)?;
                frags.where_clause = Some(match frags.where_clause.take() {
                    Some(prev) => format!("{prev} AND {rendered}"),
                    None => rendered,
                });
            }
            Segment::Join(join) => {
                if !dialect.supports_join(join.jt) {
                    return Err(SqError::unsupported_op(format!(
                        "{} does not support {}",
                        dialect.typ,
                        join.jt.sql()
                    ))
                    .into());
                }
                let clause =
                    st.render_join_condition(query.table.table, join.target.table, join.on)?;
                frags.from.push_str(&format!(
                    " {} {}{}",
                    join.jt.sql(),
                    dialect.enquote(join.target.table),
                    clause
                ));
            }
            Segment::Projection(items) => {
                frags.columns = st.render_projection(items)?;
            }
            Segment::GroupBy(cols) => {
                let rendered: Vec<String> =
                    cols.iter().map(|c| st.render_col(c)).collect();
                frags.group_by = Some(rendered.join(", "));
            }
            Segment::OrderBy(terms) => {
                let rendered: Vec<String> = terms
                    .iter()
                    .map(|t| {
                        let col = st.render_col(&t.col);
                        if t.desc {
                            format!("{col} DESC")
                        } else {
                            col
                        }
                    })
                    .collect();
                frags.order_by = Some(rendered.join(", "));
            }
            Segment::Range(range) => {
                if let (Some(s), Some(e)) = (range.start, range.end) {
                    eyre::ensure!(s <= e, "row range start {s} exceeds end {e}");
                }
                frags.range = Some((renderer.range)(dialect, range));
            }
        }
    }

    if let Some(pre_render) = renderer.pre_render {
        pre_render(&mut frags, dialect)?;
    }

    Ok((assemble(&frags), st.params))
}

fn assemble(frags: &Fragments) -> String {
    let mut sql = String::with_capacity(128);
    sql.push_str("SELECT ");
    if frags.columns.is_empty() {
        sql.push('*');
    } else {
        sql.push_str(&frags.columns);
    }
    sql.push_str(" FROM ");
    sql.push_str(&frags.from);

    if let Some(w) = &frags.where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(w);
    }
    if let Some(g) = &frags.group_by {
        sql.push_str(" GROUP BY ");
        sql.push_str(g);
    }
    if let Some(o) = &frags.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(o);
    }
    if let Some(r) = &frags.range {
        sql.push(' ');
        sql.push_str(r);
    }
    sql
}

/// Default range rendering: `LIMIT n OFFSET s`. An unbounded end renders
/// `LIMIT -1` (SQLite's spelling); dialects with other grammar override
/// the whole hook.
pub fn default_range(_dialect: &Dialect, range: &Range) -> String {
    let start = range.start.unwrap_or(0);
    match range.end {
        Some(end) => format!("LIMIT {} OFFSET {}", end - start, start),
        None => format!("LIMIT -1 OFFSET {start}"),
    }
}

struct RenderState<'r> {
    dialect: &'r Dialect,
    args: &'r HashMap<String, String>,
    params: Vec<Value>,
}

impl RenderState<'_> {
    fn push_param(&mut self, val: Value) -> String {
        self.params.push(val);
        self.dialect.placeholder(self.params.len())
    }

    fn render_col(&self, col: &ColRef<'_>) -> String {
        match col.table {
            Some(tbl) => format!(
                "{}.{}",
                self.dialect.enquote(tbl),
                self.dialect.enquote(col.col)
            ),
            None => self.dialect.enquote(col.col),
        }
    }

    fn render_expr(&mut self, expr: &Expr<'_>) -> Result<String> {
        match expr {
            Expr::Col(col) => Ok(self.render_col(col)),
            Expr::Lit(lit) => Ok(match lit {
                Literal::Int(i) => self.push_param(Value::Int(*i)),
                Literal::Float(f) => self.push_param(Value::Float(*f)),
                Literal::Str(s) => self.push_param(Value::Text((*s).to_string())),
                Literal::Bool(b) => self.push_param(Value::Bool(*b)),
                Literal::Null => "NULL".to_string(),
            }),
            Expr::Arg(name) => {
                let val = self.args.get(*name).ok_or_else(|| {
                    SqError::invalid_source(format!("query arg not supplied: ${name}"))
                })?;
                Ok(self.push_param(Value::Text(val.clone())))
            }
            Expr::Binop { op, lhs, rhs } => {
                let sql_op = self.dialect.op(op).ok_or_else(|| {
                    SqError::unsupported_op(format!(
                        "operator {op} not supported by {}",
                        self.dialect.typ
                    ))
                })?;
                let l = self.render_expr(lhs)?;
                let r = self.render_expr(rhs)?;
                Ok(format!("{l} {sql_op} {r}"))
            }
            Expr::Unop { op, expr } => {
                let inner = self.render_expr(expr)?;
                Ok(format!("{op}{inner}"))
            }
            Expr::Func(func) => self.render_func(func),
        }
    }

    fn render_func(&mut self, func: &FuncCall<'_>) -> Result<String> {
        let sql_name = AGG_FUNCS.get(func.name).copied().ok_or_else(|| {
            SqError::unsupported_op(format!("unknown function: {}", func.name))
        })?;

        if func.args.is_empty() {
            if func.name == "count" {
                return Ok("COUNT(*)".to_string());
            }
            return Err(SqError::invalid_source(format!(
                "{}() requires a column argument",
                func.name
            ))
            .into());
        }

        let mut rendered = Vec::with_capacity(func.args.len());
        for arg in func.args {
            rendered.push(self.render_expr(arg)?);
        }
        Ok(format!("{sql_name}({})", rendered.join(", ")))
    }

    fn render_projection(&mut self, items: &[SelectItem<'_>]) -> Result<String> {
        // Munge duplicate result names into unique aliases.
        let base_names: Vec<&str> = items
            .iter()
            .map(|item| match item {
                SelectItem::Col(col) => col.col,
                SelectItem::Func(func) => func.name,
            })
            .collect();
        let munged = munge_result_col_names(&base_names);

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let body = match item {
                SelectItem::Col(col) => self.render_col(col),
                SelectItem::Func(func) => self.render_func(func)?,
            };
            if munged[i] != base_names[i] {
                out.push(format!("{body} AS {}", self.dialect.enquote(&munged[i])));
            } else {
                out.push(body);
            }
        }
        Ok(out.join(", "))
    }

    /// Join condition: a bare `.col` means equi-join on that column in both
    /// tables; anything else renders as an ON expression.
    fn render_join_condition(
        &mut self,
        lhs_tbl: &str,
        rhs_tbl: &str,
        on: Option<&Expr<'_>>,
    ) -> Result<String> {
        let Some(expr) = on else {
            return Ok(String::new()); // cross join
        };

        if let Expr::Col(col) = expr {
            if col.table.is_none() {
                let q = |t: &str, c: &str| {
                    format!("{}.{}", self.dialect.enquote(t), self.dialect.enquote(c))
                };
                return Ok(format!(
                    " ON {} = {}",
                    q(lhs_tbl, col.col),
                    q(rhs_tbl, col.col)
                ));
            }
        }

        Ok(format!(" ON {}", self.render_expr(expr)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{
        self, Dialect, JoinType, ALL_JOINS, DEFAULT_OPS, JOINS_NO_FULL_OUTER,
    };
    use crate::slq::parser::parse;
    use crate::source::DriverType;
    use bumpalo::Bump;

    fn sqlite_dialect() -> Dialect {
        Dialect {
            typ: DriverType::Sqlite3,
            placeholders: dialect::placeholders_question,
            placeholder: dialect::placeholder_question,
            enquote: dialect::double_quote,
            int_bool: true,
            max_batch_values: 500,
            ops: &DEFAULT_OPS,
            joins: ALL_JOINS,
        }
    }

    fn mysql_dialect() -> Dialect {
        Dialect {
            typ: DriverType::Mysql,
            placeholders: dialect::placeholders_question,
            placeholder: dialect::placeholder_question,
            enquote: dialect::backtick_quote,
            int_bool: true,
            max_batch_values: 500,
            ops: &DEFAULT_OPS,
            joins: JOINS_NO_FULL_OUTER,
        }
    }

    fn sqlserver_dialect() -> Dialect {
        Dialect {
            typ: DriverType::Sqlserver,
            placeholders: dialect::placeholders_at_p,
            placeholder: dialect::placeholder_at_p,
            enquote: dialect::double_quote,
            int_bool: false,
            max_batch_values: 1000,
            ops: &DEFAULT_OPS,
            joins: ALL_JOINS,
        }
    }

    fn do_render(
        input: &str,
        dialect: &Dialect,
        renderer: &Renderer,
    ) -> Result<(String, Vec<Value>)> {
        let arena = Bump::new();
        let q = parse(&arena, input)?;
        render(&q, dialect, renderer, &HashMap::new())
    }

    fn render_sqlite(input: &str) -> (String, Vec<Value>) {
        do_render(input, &sqlite_dialect(), &Renderer::default()).unwrap()
    }

    #[test]
    fn renders_select_star_with_range() {
        let (sql, params) = render_sqlite("@sakila_sl3.actor | .[0:5]");
        assert_eq!(sql, r#"SELECT * FROM "actor" LIMIT 5 OFFSET 0"#);
        assert!(params.is_empty());
    }

    #[test]
    fn renders_where_with_params() {
        let (sql, params) =
            render_sqlite("@sakila.actor | where(.actor_id == 1) | .first_name");
        assert_eq!(
            sql,
            r#"SELECT "first_name" FROM "actor" WHERE "actor_id" = ?"#
        );
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn renders_count_star() {
        let (sql, _) = render_sqlite(".actor | count()");
        assert_eq!(sql, r#"SELECT COUNT(*) FROM "actor""#);
    }

    #[test]
    fn renders_aggregates_and_group_by() {
        let (sql, _) = render_sqlite(
            ".payment | group_by(.customer_id) | .customer_id, sum(.amount)",
        );
        assert_eq!(
            sql,
            r#"SELECT "customer_id", SUM("amount") FROM "payment" GROUP BY "customer_id""#
        );
    }

    #[test]
    fn renders_order_by_desc() {
        let (sql, _) = render_sqlite(".actor | order_by(.last_name, .actor_id desc)");
        assert_eq!(
            sql,
            r#"SELECT * FROM "actor" ORDER BY "last_name", "actor_id" DESC"#
        );
    }

    #[test]
    fn renders_join_shorthand() {
        let (sql, _) = render_sqlite(".actor | join(.film_actor, .actor_id)");
        assert_eq!(
            sql,
            r#"SELECT * FROM "actor" INNER JOIN "film_actor" ON "actor"."actor_id" = "film_actor"."actor_id""#
        );
    }

    #[test]
    fn renders_left_join_and_cross_join() {
        let (sql, _) = render_sqlite(".a | left_join(.b, .id)");
        assert!(sql.contains(r#"LEFT JOIN "b" ON "a"."id" = "b"."id""#));

        let (sql, _) = render_sqlite(".a | cross_join(.b)");
        assert_eq!(sql, r#"SELECT * FROM "a" CROSS JOIN "b""#);
    }

    #[test]
    fn mysql_backticks_and_join_set() {
        let (sql, _) = do_render(
            ".actor | where(.actor_id == 1)",
            &mysql_dialect(),
            &Renderer::default(),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM `actor` WHERE `actor_id` = ?");

        let err = do_render(
            ".a | full_outer_join(.b, .id)",
            &mysql_dialect(),
            &Renderer::default(),
        )
        .unwrap_err();
        assert!(crate::error::kind_of(&err) == Some(crate::error::ErrorKind::UnsupportedOp));
    }

    #[test]
    fn sqlserver_params_are_numbered() {
        let (sql, params) = do_render(
            "@sakila_ms.actor | where(.actor_id == 1) | .first_name",
            &sqlserver_dialect(),
            &Renderer::default(),
        )
        .unwrap();
        assert_eq!(
            sql,
            r#"SELECT "first_name" FROM "actor" WHERE "actor_id" = @p1"#
        );
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn projection_collisions_are_aliased() {
        let (sql, _) = render_sqlite(".a | join(.b, .id) | .a.name, .b.name");
        assert_eq!(
            sql,
            r#"SELECT "a"."name", "b"."name" AS "name_1" FROM "a" INNER JOIN "b" ON "a"."id" = "b"."id""#
        );
    }

    #[test]
    fn args_are_parameterized() {
        let arena = Bump::new();
        let q = parse(&arena, ".actor | where(.first_name == $fname)").unwrap();
        let mut args = HashMap::new();
        args.insert("fname".to_string(), "PENELOPE".to_string());

        let (sql, params) =
            render(&q, &sqlite_dialect(), &Renderer::default(), &args).unwrap();
        assert_eq!(sql, r#"SELECT * FROM "actor" WHERE "first_name" = ?"#);
        assert_eq!(params, vec![Value::Text("PENELOPE".into())]);

        let err = render(&q, &sqlite_dialect(), &Renderer::default(), &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("fname") || format!("{err:?}").contains("fname"));
    }

    #[test]
    fn multiple_wheres_conjoin() {
        let (sql, params) =
            render_sqlite(".t | where(.a == 1) | where(.b == 2)");
        assert_eq!(sql, r#"SELECT * FROM "t" WHERE "a" = ? AND "b" = ?"#);
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn unbounded_ranges() {
        let (sql, _) = render_sqlite(".t | .[3:]");
        assert_eq!(sql, r#"SELECT * FROM "t" LIMIT -1 OFFSET 3"#);

        let (sql, _) = render_sqlite(".t | .[:7]");
        assert_eq!(sql, r#"SELECT * FROM "t" LIMIT 7 OFFSET 0"#);
    }

    #[test]
    fn arithmetic_renders_through_op_map() {
        let (sql, params) = render_sqlite(".t | where(.price * 2 > 10)");
        assert_eq!(sql, r#"SELECT * FROM "t" WHERE "price" * ? > ?"#);
        assert_eq!(params, vec![Value::Int(2), Value::Int(10)]);
    }

    #[test]
    fn join_type_validation_uses_dialect_set() {
        // FULL OUTER is fine on sqlite's set here.
        let ok = do_render(
            ".a | full_outer_join(.b, .id)",
            &sqlite_dialect(),
            &Renderer::default(),
        );
        assert!(ok.is_ok());
        assert!(sqlite_dialect().supports_join(JoinType::FullOuter));
    }
}
