//! # Pipeline Query AST
//!
//! AST for the pipeline language, arena-allocated in `bumpalo` with
//! identifiers borrowing straight from the query text. The shape mirrors
//! the surface syntax: a leading table reference followed by pipe-separated
//! segments.
//!
//! ```text
//! Query<'a>
//!     ├── table: TableRef          @sakila.actor  /  .actor
//!     └── segments: &'a [Segment]
//!             ├── Where(&Expr)          where(.actor_id == 1)
//!             ├── Join(Join)            left_join(@h.tbl, .col)
//!             ├── Projection(&[item])   .first_name, .last_name
//!             ├── GroupBy(&[ColRef])    group_by(.store_id)
//!             ├── OrderBy(&[term])      order_by(.name, .id desc)
//!             └── Range(Range)          .[0:5]
//! ```
//!
//! Rendering walks these variants; there is no open node hierarchy.

use crate::dialect::JoinType;
use phf::phf_map;

/// A parsed pipeline query.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub table: TableRef<'a>,
    pub segments: &'a [Segment<'a>],
}

/// `@handle.table` or bare `.table` (resolved against the active source).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRef<'a> {
    pub handle: Option<&'a str>,
    pub table: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub enum Segment<'a> {
    Where(&'a Expr<'a>),
    Join(Join<'a>),
    Projection(&'a [SelectItem<'a>]),
    GroupBy(&'a [ColRef<'a>]),
    OrderBy(&'a [OrderTerm<'a>]),
    Range(Range),
}

#[derive(Debug, Clone, Copy)]
pub struct Join<'a> {
    pub jt: JoinType,
    pub target: TableRef<'a>,
    /// Join condition. `None` only for cross joins. A bare column selector
    /// means equi-join on that column in both tables.
    pub on: Option<&'a Expr<'a>>,
}

/// `.col` or `.tbl.col`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColRef<'a> {
    pub table: Option<&'a str>,
    pub col: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub enum SelectItem<'a> {
    Col(ColRef<'a>),
    Func(FuncCall<'a>),
}

#[derive(Debug, Clone, Copy)]
pub struct FuncCall<'a> {
    pub name: &'a str,
    pub args: &'a [Expr<'a>],
}

#[derive(Debug, Clone, Copy)]
pub struct OrderTerm<'a> {
    pub col: ColRef<'a>,
    pub desc: bool,
}

/// Half-open row range `.[start:end]`; either bound may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Range {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub enum Expr<'a> {
    Col(ColRef<'a>),
    Lit(Literal<'a>),
    /// `$name` argument reference, substituted at render time.
    Arg(&'a str),
    Binop {
        op: &'a str,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
    },
    Unop {
        op: &'a str,
        expr: &'a Expr<'a>,
    },
    Func(FuncCall<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    Int(i64),
    Float(f64),
    Str(&'a str),
    Bool(bool),
    Null,
}

/// Join keyword → join type. `join` is the inner-join alias.
pub static JOIN_FUNCS: phf::Map<&'static str, JoinType> = phf_map! {
    "join" => JoinType::Inner,
    "inner_join" => JoinType::Inner,
    "left_join" => JoinType::Left,
    "right_join" => JoinType::Right,
    "full_outer_join" => JoinType::FullOuter,
    "cross_join" => JoinType::Cross,
};

/// Aggregate and scalar functions the renderer knows how to emit.
pub static AGG_FUNCS: phf::Map<&'static str, &'static str> = phf_map! {
    "count" => "COUNT",
    "sum" => "SUM",
    "avg" => "AVG",
    "max" => "MAX",
    "min" => "MIN",
};

impl<'a> Query<'a> {
    /// All handles referenced by this query, leading table first,
    /// deduplicated, in encounter order.
    pub fn handles(&self) -> Vec<&'a str> {
        let mut out = Vec::new();
        if let Some(h) = self.table.handle {
            out.push(h);
        }
        for seg in self.segments {
            if let Segment::Join(join) = seg {
                if let Some(h) = join.target.handle {
                    if !out.contains(&h) {
                        out.push(h);
                    }
                }
            }
        }
        out
    }
}
