//! # Output Writers
//!
//! Thin record sinks that print result streams: an aligned text table
//! (MySQL style), streaming JSON, and CSV/TSV. Richer formats live
//! outside the core; anything that can consume the sink interface can be
//! a writer.

use crate::error::SqError;
use crate::record::meta::RecordMeta;
use crate::record::sink::RecordSink;
use crate::record::{Record, Value};
use eyre::Result;
use std::io::Write;

const MAX_COLUMN_WIDTH: usize = 50;

/// Buffers the result set, then renders an aligned ASCII table on flush:
///
/// ```text
/// +----------+------------+
/// | actor_id | first_name |
/// +----------+------------+
/// |        1 | PENELOPE   |
/// +----------+------------+
/// ```
pub struct TableWriter<W: Write> {
    out: W,
    header: bool,
    meta: Option<RecordMeta>,
    rows: Vec<Vec<String>>,
}

impl<W: Write> TableWriter<W> {
    pub fn new(out: W, header: bool) -> Self {
        TableWriter {
            out,
            header,
            meta: None,
            rows: Vec::new(),
        }
    }
}

impl<W: Write> RecordSink for TableWriter<W> {
    fn meta(&mut self, meta: &RecordMeta) -> Result<()> {
        self.meta = Some(meta.clone());
        Ok(())
    }

    fn record(&mut self, rec: Record) -> Result<()> {
        self.rows
            .push(rec.iter().map(|v| clip(&render_cell(v))).collect());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(meta) = &self.meta else {
            return Ok(());
        };

        let headers: Vec<&str> = meta.munged_names();
        let mut widths: Vec<usize> = if self.header {
            headers.iter().map(|h| h.len().max(1)).collect()
        } else {
            vec![1; headers.len()]
        };
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len()).min(MAX_COLUMN_WIDTH);
                }
            }
        }

        let right_align: Vec<bool> = meta
            .iter()
            .map(|f| {
                matches!(
                    f.kind,
                    crate::kind::Kind::Int | crate::kind::Kind::Float | crate::kind::Kind::Decimal
                )
            })
            .collect();

        let render = |out: &mut dyn Write, cells: &[String], align: bool| -> Result<()> {
            let mut line = String::from("|");
            for (i, width) in widths.iter().enumerate() {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                if align && right_align.get(i).copied().unwrap_or(false) {
                    line.push_str(&format!(" {cell:>width$} |"));
                } else {
                    line.push_str(&format!(" {cell:<width$} |"));
                }
            }
            writeln!(out, "{line}").map_err(io_err)
        };

        let sep = separator(&widths);
        writeln!(self.out, "{sep}").map_err(io_err)?;
        if self.header {
            let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
            render(&mut self.out, &header_cells, false)?;
            writeln!(self.out, "{sep}").map_err(io_err)?;
        }
        for row in &self.rows {
            render(&mut self.out, row, true)?;
        }
        writeln!(self.out, "{sep}").map_err(io_err)?;
        self.out.flush().map_err(io_err)
    }
}

fn separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(w + 2));
        s.push('+');
    }
    s
}

fn render_cell(val: &Value) -> String {
    match val {
        Value::Null => "NULL".to_string(),
        other => other.render(),
    }
}

fn clip(s: &str) -> String {
    if s.len() <= MAX_COLUMN_WIDTH {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_COLUMN_WIDTH - 3).collect();
    out.push_str("...");
    out
}

/// Streams records as a JSON array of objects keyed by munged column
/// names.
pub struct JsonWriter<W: Write> {
    out: W,
    meta: Option<RecordMeta>,
    wrote_any: bool,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        JsonWriter {
            out,
            meta: None,
            wrote_any: false,
        }
    }
}

impl<W: Write> RecordSink for JsonWriter<W> {
    fn meta(&mut self, meta: &RecordMeta) -> Result<()> {
        self.meta = Some(meta.clone());
        write!(self.out, "[").map_err(io_err)
    }

    fn record(&mut self, rec: Record) -> Result<()> {
        let meta = self
            .meta
            .as_ref()
            .ok_or_else(|| SqError::internal("record before metadata"))?;

        let mut obj = String::new();
        obj.push('{');
        for (i, val) in rec.iter().enumerate() {
            if i > 0 {
                obj.push(',');
            }
            obj.push_str(&json_string(meta[i].munged_name.as_str()));
            obj.push(':');
            obj.push_str(&json_value(val));
        }
        obj.push('}');

        if self.wrote_any {
            write!(self.out, ",").map_err(io_err)?;
        }
        write!(self.out, "\n  {obj}").map_err(io_err)?;
        self.wrote_any = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.wrote_any {
            writeln!(self.out, "\n]").map_err(io_err)?;
        } else {
            writeln!(self.out, "]").map_err(io_err)?;
        }
        self.out.flush().map_err(io_err)
    }
}

fn json_value(val: &Value) -> String {
    match val {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(_) => "null".to_string(),
        Value::Decimal(d) => d.to_string(),
        other => json_string(&other.render()),
    }
}

fn json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Streams records as CSV (or TSV) rows.
pub struct CsvWriter<W: Write> {
    inner: csv::Writer<W>,
    header: bool,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W, header: bool, delimiter: u8) -> Self {
        CsvWriter {
            inner: csv::WriterBuilder::new().delimiter(delimiter).from_writer(out),
            header,
        }
    }
}

impl<W: Write> RecordSink for CsvWriter<W> {
    fn meta(&mut self, meta: &RecordMeta) -> Result<()> {
        if self.header {
            self.inner
                .write_record(meta.munged_names())
                .map_err(|e| SqError::io(e.to_string()))?;
        }
        Ok(())
    }

    fn record(&mut self, rec: Record) -> Result<()> {
        let cells: Vec<String> = rec.iter().map(Value::render).collect();
        self.inner
            .write_record(&cells)
            .map_err(|e| SqError::io(e.to_string()).into())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| SqError::io(e.to_string()).into())
    }
}

fn io_err(e: std::io::Error) -> eyre::Report {
    SqError::io(e.to_string()).into()
}
