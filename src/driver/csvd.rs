//! # CSV / TSV Document Driver
//!
//! One driver type per delimiter. A CSV source presents exactly one table,
//! `data`, materialized in the scratch database on first open (monotable).
//!
//! Format detection reads a head sample and scores delimiter consistency:
//! the score is the fraction of sampled lines whose delimiter count
//! matches the first line's (zero-delimiter or binary-looking files score
//! nothing).

use super::{Database, DocumentDriver, Driver, DriverMetadata};
use crate::cancel::CancelToken;
use crate::error::SqError;
use crate::files::Files;
use crate::ingest::{ingest_csv, IngestOptions};
use crate::scratch::ScratchDbs;
use crate::source::{DriverType, Source, STDIN_HANDLE};
use eyre::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DETECT_SAMPLE_BYTES: usize = 8 * 1024;

pub struct CsvDriver {
    typ: DriverType,
    delimiter: u8,
    files: Arc<Files>,
    scratch: Arc<ScratchDbs>,
}

impl CsvDriver {
    pub fn csv(files: Arc<Files>, scratch: Arc<ScratchDbs>) -> Arc<Self> {
        Arc::new(CsvDriver {
            typ: DriverType::Csv,
            delimiter: b',',
            files,
            scratch,
        })
    }

    pub fn tsv(files: Arc<Files>, scratch: Arc<ScratchDbs>) -> Arc<Self> {
        Arc::new(CsvDriver {
            typ: DriverType::Tsv,
            delimiter: b'\t',
            files,
            scratch,
        })
    }
}

impl Driver for CsvDriver {
    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            typ: self.typ,
            description: if self.typ == DriverType::Csv {
                "Comma-separated values"
            } else {
                "Tab-separated values"
            },
            doc_url: "https://en.wikipedia.org/wiki/Comma-separated_values",
            is_sql: false,
            monotable: true,
            default_port: None,
        }
    }

    fn validate_source(&self, src: &Source) -> Result<Source> {
        if src.typ != self.typ {
            return Err(SqError::invalid_source(format!(
                "expected driver type {} but got {}",
                self.typ, src.typ
            ))
            .into());
        }
        let mut out = src.clone();
        out.location = canonical_doc_location(&src.location)?;
        Ok(out)
    }

    fn open(&self, src: &Source, cancel: &CancelToken) -> Result<Database> {
        debug!(handle = %src.handle, typ = %self.typ, "open document source");

        let path = self.files.local_path(src)?;
        let fingerprint = Files::fingerprint(&path)?;
        let opts = IngestOptions::from_options(&src.options);

        self.scratch
            .ensure_ingested(src, fingerprint, opts.no_cache, |db| {
                ingest_csv(&path, self.delimiter, opts, db, cancel)
            })?;

        self.scratch.open_for(&src.handle, src.clone())
    }

    fn ping(&self, src: &Source, _cancel: &CancelToken) -> Result<()> {
        let path = self.files.local_path(src)?;
        File::open(&path)
            .map(|_| ())
            .map_err(|e| SqError::io(format!("ping {}: {e}", src.handle)).into())
    }

    fn truncate(
        &self,
        src: &Source,
        _tbl: &str,
        _reset: bool,
        _cancel: &CancelToken,
    ) -> Result<i64> {
        Err(SqError::unsupported_op(format!(
            "truncate is not supported for {} sources: {}",
            self.typ, src.handle
        ))
        .into())
    }

    fn as_document(&self) -> Option<&dyn DocumentDriver> {
        Some(self)
    }
}

impl DocumentDriver for CsvDriver {
    fn detect(&self, path: &Path) -> Result<Option<f32>> {
        let mut head = vec![0u8; DETECT_SAMPLE_BYTES];
        let mut f = File::open(path).map_err(|e| SqError::io(format!("detect: {e}")))?;
        let mut filled = 0;
        while filled < head.len() {
            let n = f
                .read(&mut head[filled..])
                .map_err(|e| SqError::io(format!("detect: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);

        Ok(score_delimited(&head, self.delimiter))
    }
}

/// Scores delimiter consistency over the head sample.
pub(crate) fn score_delimited(head: &[u8], delimiter: u8) -> Option<f32> {
    if head.is_empty() || head.contains(&0) {
        return None;
    }

    let counts: Vec<usize> = head
        .split(|&b| b == b'\n')
        .map(|line| line.iter().filter(|&&b| b == delimiter).count())
        .take(10)
        .collect();

    // Drop a trailing partial/empty line.
    let counts: Vec<usize> = counts
        .into_iter()
        .enumerate()
        .filter(|(i, c)| *c > 0 || *i == 0)
        .map(|(_, c)| c)
        .collect();

    let first = *counts.first()?;
    if first == 0 {
        return None;
    }

    let matching = counts.iter().filter(|&&c| c == first).count();
    Some(0.9 * matching as f32 / counts.len() as f32)
}

/// Canonicalizes a document location: http(s) URLs and the stdin handle
/// pass through; filesystem paths become absolute.
pub(crate) fn canonical_doc_location(loc: &str) -> Result<String> {
    if loc.trim().is_empty() {
        return Err(SqError::invalid_source("location is empty").into());
    }
    if loc == STDIN_HANDLE || loc.starts_with("http://") || loc.starts_with("https://") {
        return Ok(loc.to_string());
    }

    let path = std::path::PathBuf::from(loc);
    if path.is_absolute() {
        return Ok(loc.to_string());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| SqError::io(format!("cannot resolve current dir: {e}")))?;
    Ok(cwd.join(path).to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_delimiters_score_high() {
        let head = b"a,b,c\n1,2,3\n4,5,6\n";
        let score = score_delimited(head, b',').unwrap();
        assert!(score > 0.8, "score was {score}");
    }

    #[test]
    fn inconsistent_delimiters_score_lower() {
        let head = b"a,b,c\n1,2\n4,5,6,7\nplain text line,\n";
        let consistent = score_delimited(b"a,b,c\n1,2,3\n", b',').unwrap();
        let inconsistent = score_delimited(head, b',').unwrap();
        assert!(inconsistent < consistent);
    }

    #[test]
    fn non_delimited_content_scores_none() {
        assert!(score_delimited(b"just some prose\nwith lines\n", b',').is_none());
        assert!(score_delimited(b"", b',').is_none());
        assert!(score_delimited(b"bin\0ary", b',').is_none());
    }

    #[test]
    fn tsv_scoring_uses_tabs() {
        let head = b"a\tb\n1\t2\n";
        assert!(score_delimited(head, b'\t').unwrap() > 0.8);
        assert!(score_delimited(head, b',').is_none());
    }
}
