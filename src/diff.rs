//! Source diffing: fetch two sources' metadata concurrently, render each
//! side to YAML, and emit a unified diff. Rendering beyond the unified
//! hunks (color, pager) is the command layer's business.

use crate::error::SqError;
use crate::run::Run;
use crate::source::metadata::SourceMetadata;
use eyre::Result;
use std::io::Write;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct DiffConfig {
    /// Unified-diff context lines.
    pub lines: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        DiffConfig { lines: 3 }
    }
}

/// Which parts of the sources to compare.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffElements {
    pub overview: bool,
    pub db_properties: bool,
    pub schema: bool,
    pub row_counts: bool,
}

/// Diffs `handle1` against `handle2`, writing unified hunks to `out`.
/// Differing sources are not an error; only fetch failures are.
pub fn exec_source_diff(
    run: &Run,
    cfg: DiffConfig,
    elems: DiffElements,
    handle1: &str,
    handle2: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let (md1, md2) = fetch_both(run, handle1, handle2)?;

    if elems.overview {
        let body1 = render_overview_yaml(&md1)?;
        let body2 = render_overview_yaml(&md2)?;
        print_unified(
            out,
            &format!("sq diff --overview {handle1} {handle2}"),
            handle1,
            handle2,
            &body1,
            &body2,
            cfg.lines,
        )?;
    }

    if elems.db_properties {
        let body1 = serde_yaml::to_string(&md1.db_properties)
            .map_err(|e| SqError::internal(e.to_string()))?;
        let body2 = serde_yaml::to_string(&md2.db_properties)
            .map_err(|e| SqError::internal(e.to_string()))?;
        print_unified(
            out,
            &format!("sq diff --dbprops {handle1} {handle2}"),
            handle1,
            handle2,
            &body1,
            &body2,
            cfg.lines,
        )?;
    }

    if elems.schema {
        diff_tables(run, &cfg, &elems, &md1, &md2, out)?;
    }

    Ok(())
}

/// Fetches both sources' metadata concurrently.
fn fetch_both(run: &Run, handle1: &str, handle2: &str) -> Result<(SourceMetadata, SourceMetadata)> {
    let fetch = |handle: &str| -> Result<SourceMetadata> {
        let src = run.collection.get(handle)?;
        let db = crate::driver::DbOpener::open_db(run.pool.as_ref(), src)?;
        db.source_metadata(false)
    };

    let (r1, r2) = std::thread::scope(|scope| {
        let t1 = scope.spawn(|| fetch(handle1));
        let t2 = scope.spawn(|| fetch(handle2));
        (t1.join(), t2.join())
    });

    let md1 = r1.map_err(|_| SqError::internal("metadata fetch thread panicked"))??;
    let md2 = r2.map_err(|_| SqError::internal("metadata fetch thread panicked"))??;
    debug!(handle1, handle2, "fetched metadata for diff");
    Ok((md1, md2))
}

/// Per-table schema diff over the union of both sources' table names, in
/// sorted order. Checks for cancellation at each table.
fn diff_tables(
    run: &Run,
    cfg: &DiffConfig,
    elems: &DiffElements,
    md1: &SourceMetadata,
    md2: &SourceMetadata,
    out: &mut dyn Write,
) -> Result<()> {
    let mut all_names: Vec<&str> = md1.table_names();
    for name in md2.table_names() {
        if !all_names.contains(&name) {
            all_names.push(name);
        }
    }
    all_names.sort_unstable();

    for tbl_name in all_names {
        run.cancel.check()?;

        let body1 = render_table_yaml(md1, tbl_name, elems.row_counts)?;
        let body2 = render_table_yaml(md2, tbl_name, elems.row_counts)?;
        if body1 == body2 {
            continue;
        }

        print_unified(
            out,
            &format!("sq diff {}.{tbl_name} {}.{tbl_name}", md1.handle, md2.handle),
            &md1.handle,
            &md2.handle,
            &body1,
            &body2,
            cfg.lines,
        )?;
    }
    Ok(())
}

/// Overview = the metadata blob without its per-table schema.
fn render_overview_yaml(md: &SourceMetadata) -> Result<String> {
    let mut slim = md.clone();
    slim.tables = Vec::new();
    slim.db_properties = Vec::new();
    serde_yaml::to_string(&slim).map_err(|e| SqError::internal(e.to_string()).into())
}

fn render_table_yaml(md: &SourceMetadata, tbl: &str, row_counts: bool) -> Result<String> {
    match md.table(tbl) {
        None => Ok(String::new()),
        Some(tbl_md) => {
            let mut tbl_md = tbl_md.clone();
            if !row_counts {
                tbl_md.row_count = 0;
            }
            serde_yaml::to_string(&tbl_md).map_err(|e| SqError::internal(e.to_string()).into())
        }
    }
}

fn print_unified(
    out: &mut dyn Write,
    header: &str,
    name1: &str,
    name2: &str,
    body1: &str,
    body2: &str,
    context_lines: usize,
) -> Result<()> {
    if body1 == body2 {
        return Ok(());
    }

    let diff = similar::TextDiff::from_lines(body1, body2);
    let unified = diff
        .unified_diff()
        .context_radius(context_lines)
        .header(name1, name2)
        .to_string();

    writeln!(out, "{header}").and_then(|()| write!(out, "{unified}"))
        .map_err(|e| SqError::io(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;
    use crate::source::metadata::{ColMetadata, TableMetadata, TableType};
    use crate::source::DriverType;

    fn meta(handle: &str, rows: i64) -> SourceMetadata {
        SourceMetadata {
            handle: handle.to_string(),
            driver: DriverType::Sqlite3,
            name: "sakila.db".into(),
            schema: "main".into(),
            location: "sqlite3:///tmp/sakila.db".into(),
            size: None,
            tables: vec![TableMetadata {
                name: "actor".into(),
                table_type: TableType::Table,
                row_count: rows,
                columns: vec![ColMetadata {
                    name: "actor_id".into(),
                    position: 1,
                    kind: Kind::Int,
                    column_type: "INTEGER".into(),
                    base_type: "integer".into(),
                    nullable: false,
                    primary_key: true,
                }],
            }],
            db_properties: vec![],
        }
    }

    #[test]
    fn unified_diff_emitted_for_differing_blobs() {
        let md1 = meta("@a", 100);
        let md2 = meta("@b", 200);

        let y1 = serde_yaml::to_string(&md1.tables[0]).unwrap();
        let y2 = serde_yaml::to_string(&md2.tables[0]).unwrap();

        let mut out = Vec::new();
        print_unified(&mut out, "hdr", "@a", "@b", &y1, &y2, 3).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("hdr"));
        assert!(text.contains("-row_count: 100"));
        assert!(text.contains("+row_count: 200"));
    }

    #[test]
    fn identical_blobs_emit_nothing() {
        let md = meta("@a", 1);
        let y = serde_yaml::to_string(&md).unwrap();
        let mut out = Vec::new();
        print_unified(&mut out, "hdr", "@a", "@b", &y, &y, 3).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn overview_excludes_tables() {
        let yaml = render_overview_yaml(&meta("@a", 5)).unwrap();
        assert!(!yaml.contains("actor"));
        assert!(yaml.contains("sakila.db"));
    }
}
