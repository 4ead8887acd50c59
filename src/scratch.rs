//! The scratch database: ephemeral SQLite files under OS temp where
//! document sources are ingested and cross-source joins are staged.
//!
//! One temp directory per run holds one SQLite file per ingested source
//! (so two CSVs can both present a `data` table) plus a `join` file for
//! cross-source staging. The whole directory is deleted when the run
//! closes.
//!
//! Ingest is idempotent per (handle, content fingerprint): re-opening an
//! unchanged source skips re-ingest. A changed fingerprint or the
//! no-cache option forces a fresh ingest.

use crate::driver::sqlite::SqliteDriver;
use crate::driver::Database;
use crate::error::SqError;
use crate::source::{DriverType, Source};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

pub struct ScratchDbs {
    dir: TempDir,
    sqlite: Arc<SqliteDriver>,
    ingested: Mutex<HashMap<String, u64>>,
}

impl ScratchDbs {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("sq-scratch-")
            .tempdir()
            .map_err(|e| SqError::io(format!("create scratch dir: {e}")))?;
        Ok(ScratchDbs {
            dir,
            sqlite: SqliteDriver::new(),
            ingested: Mutex::new(HashMap::new()),
        })
    }

    fn file_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.path().join(format!("{safe}.sqlite"))
    }

    /// Opens a database on the scratch file for `name`, reporting itself
    /// under `handle`.
    pub fn open(&self, name: &str, handle: &str) -> Result<Database> {
        let path = self.file_for(name);
        let src = Source::new(
            handle,
            DriverType::Sqlite3,
            format!("sqlite3://{}", path.display()),
        );
        self.sqlite.open_path(src, &path)
    }

    /// Opens the scratch file for `name`, but reporting `src` (the
    /// document source it backs) as the database's source.
    pub fn open_for(&self, name: &str, src: Source) -> Result<Database> {
        let path = self.file_for(name);
        self.sqlite.open_path(src, &path)
    }

    /// Ensures `src` has been ingested into its scratch file, running
    /// `ingest` when the cached fingerprint is stale or `no_cache` is set.
    pub fn ensure_ingested(
        &self,
        src: &Source,
        fingerprint: u64,
        no_cache: bool,
        ingest: impl FnOnce(&Arc<Database>) -> Result<()>,
    ) -> Result<()> {
        let mut ingested = self.ingested.lock();
        if !no_cache && ingested.get(&src.handle) == Some(&fingerprint) {
            debug!(handle = %src.handle, "ingest cache hit");
            return Ok(());
        }

        let db = Arc::new(self.open(&src.handle, &src.handle)?);
        ingest(&db)?;
        ingested.insert(src.handle.clone(), fingerprint);
        Ok(())
    }

    /// Opens the scratch database used to stage cross-source joins.
    pub fn open_join(&self) -> Result<Database> {
        self.open("join", "@join")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::record::sink::RecordBuffer;

    #[test]
    fn ingest_runs_once_per_fingerprint() {
        let scratch = ScratchDbs::new().unwrap();
        let src = Source::new("@data", DriverType::Csv, "/tmp/data.csv");

        let mut runs = 0;
        for _ in 0..2 {
            scratch
                .ensure_ingested(&src, 42, false, |db| {
                    runs += 1;
                    db.exec("CREATE TABLE IF NOT EXISTS data (n INTEGER)", &[])?;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(runs, 1);

        // Fingerprint change forces re-ingest.
        scratch
            .ensure_ingested(&src, 43, false, |_| {
                runs += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(runs, 2);

        // Explicit no-cache forces re-ingest.
        scratch
            .ensure_ingested(&src, 43, true, |_| {
                runs += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(runs, 3);
    }

    #[test]
    fn per_source_files_are_isolated() {
        let scratch = ScratchDbs::new().unwrap();

        let db1 = scratch.open("@one", "@one").unwrap();
        db1.exec("CREATE TABLE data (n INTEGER)", &[]).unwrap();
        db1.exec("INSERT INTO data VALUES (1)", &[]).unwrap();

        let db2 = scratch.open("@two", "@two").unwrap();
        db2.exec("CREATE TABLE data (n INTEGER)", &[]).unwrap();

        let mut buf = RecordBuffer::new();
        db2.query("SELECT COUNT(*) FROM data", &[], &mut buf, &CancelToken::new())
            .unwrap();
        assert_eq!(buf.recs[0][0], crate::record::Value::Int(0));
    }
}
