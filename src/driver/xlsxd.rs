//! # XLSX Document Driver
//!
//! Excel workbooks ingest one scratch table per sheet. Detection simply
//! attempts to open the workbook: success scores 1.0, anything else is
//! not an XLSX.

use super::{Database, DocumentDriver, Driver, DriverMetadata};
use crate::cancel::CancelToken;
use crate::error::SqError;
use crate::files::Files;
use crate::ingest::{ingest_xlsx, IngestOptions};
use crate::scratch::ScratchDbs;
use crate::source::{DriverType, Source};
use calamine::{Reader, Xlsx};
use eyre::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct XlsxDriver {
    files: Arc<Files>,
    scratch: Arc<ScratchDbs>,
}

impl XlsxDriver {
    pub fn new(files: Arc<Files>, scratch: Arc<ScratchDbs>) -> Arc<Self> {
        Arc::new(XlsxDriver { files, scratch })
    }
}

impl Driver for XlsxDriver {
    fn metadata(&self) -> DriverMetadata {
        DriverMetadata {
            typ: DriverType::Xlsx,
            description: "Microsoft Excel XLSX",
            doc_url: "https://en.wikipedia.org/wiki/Office_Open_XML",
            is_sql: false,
            monotable: false,
            default_port: None,
        }
    }

    fn validate_source(&self, src: &Source) -> Result<Source> {
        if src.typ != DriverType::Xlsx {
            return Err(SqError::invalid_source(format!(
                "expected driver type xlsx but got {}",
                src.typ
            ))
            .into());
        }
        let mut out = src.clone();
        out.location = super::csvd::canonical_doc_location(&src.location)?;
        Ok(out)
    }

    fn open(&self, src: &Source, cancel: &CancelToken) -> Result<Database> {
        debug!(handle = %src.handle, "open xlsx source");

        let path = self.files.local_path(src)?;
        let fingerprint = Files::fingerprint(&path)?;
        let opts = IngestOptions::from_options(&src.options);

        self.scratch
            .ensure_ingested(src, fingerprint, opts.no_cache, |db| {
                ingest_xlsx(&path, opts, db, cancel)
            })?;

        self.scratch.open_for(&src.handle, src.clone())
    }

    fn ping(&self, src: &Source, _cancel: &CancelToken) -> Result<()> {
        let path = self.files.local_path(src)?;
        open_xlsx(&path)
            .map(|_| ())
            .map_err(|e| e.wrap_err(format!("ping {}", src.handle)))
    }

    fn truncate(
        &self,
        src: &Source,
        _tbl: &str,
        _reset: bool,
        _cancel: &CancelToken,
    ) -> Result<i64> {
        Err(SqError::unsupported_op(format!(
            "truncate is not supported for xlsx sources: {}",
            src.handle
        ))
        .into())
    }

    fn as_document(&self) -> Option<&dyn DocumentDriver> {
        Some(self)
    }
}

impl DocumentDriver for XlsxDriver {
    fn detect(&self, path: &Path) -> Result<Option<f32>> {
        match open_xlsx(path) {
            Ok(_) => Ok(Some(1.0)),
            Err(_) => Ok(None),
        }
    }
}

/// Opens a workbook by content, not extension, so piped/spooled files
/// detect correctly.
fn open_xlsx(path: &Path) -> Result<Xlsx<std::io::BufReader<std::fs::File>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| SqError::io(format!("open {}: {e}", path.display())))?;
    Xlsx::new(std::io::BufReader::new(file))
        .map_err(|e| SqError::invalid_source(format!("not an xlsx workbook: {e}")).into())
}
