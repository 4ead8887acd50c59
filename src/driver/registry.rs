//! Driver registry and the per-run database pool.
//!
//! The registry is constructed once at startup (document drivers are wired
//! to the run's file manager and scratch owner) and frozen thereafter — it
//! is the only shared mutable-free state in the process. The pool caches
//! one open [`Database`] per handle for the life of the run; databases are
//! closed by the run's cleanup stack, never per query.

use super::csvd::CsvDriver;
use super::mysql::MysqlDriver;
use super::postgres::PostgresDriver;
use super::sqlite::SqliteDriver;
use super::sqlserver::SqlServerDriver;
use super::xlsxd::XlsxDriver;
use super::{Database, DbOpener, Driver, DriverMetadata, JoinDbOpener, ScratchDbOpener};
use crate::cancel::CancelToken;
use crate::error::SqError;
use crate::files::Files;
use crate::scratch::ScratchDbs;
use crate::source::{DriverType, Source};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct Registry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl Registry {
    /// Builds the full driver set. Document drivers capture the run's file
    /// manager and scratch owner.
    pub fn new(files: Arc<Files>, scratch: Arc<ScratchDbs>) -> Arc<Self> {
        let drivers: Vec<Arc<dyn Driver>> = vec![
            SqliteDriver::new(),
            PostgresDriver::new(),
            MysqlDriver::new(),
            SqlServerDriver::new(),
            CsvDriver::csv(files.clone(), scratch.clone()),
            CsvDriver::tsv(files.clone(), scratch.clone()),
            XlsxDriver::new(files, scratch),
        ];
        Arc::new(Registry { drivers })
    }

    pub fn drivers(&self) -> &[Arc<dyn Driver>] {
        &self.drivers
    }

    pub fn drivers_metadata(&self) -> Vec<DriverMetadata> {
        self.drivers.iter().map(|d| d.metadata()).collect()
    }

    pub fn driver_for(&self, typ: DriverType) -> Result<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|d| d.metadata().typ == typ)
            .cloned()
            .ok_or_else(|| SqError::invalid_source(format!("no driver for type: {typ}")).into())
    }

    /// Runs every document driver's detector over `path`, returning the
    /// type with the highest confidence.
    pub fn detect_type(&self, path: &Path) -> Result<Option<DriverType>> {
        let mut best: Option<(DriverType, f32)> = None;

        for drvr in &self.drivers {
            let Some(doc) = drvr.as_document() else {
                continue;
            };
            if let Some(score) = doc.detect(path)? {
                debug!(typ = %drvr.metadata().typ, score, "detector score");
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((drvr.metadata().typ, score));
                }
            }
        }
        Ok(best.map(|(typ, _)| typ))
    }
}

/// Per-run cache of open databases, one per source handle. Implements the
/// opener interfaces the query context needs.
pub struct DatabasePool {
    registry: Arc<Registry>,
    scratch: Arc<ScratchDbs>,
    cancel: CancelToken,
    dbs: Mutex<HashMap<String, Arc<Database>>>,
}

impl DatabasePool {
    pub fn new(registry: Arc<Registry>, scratch: Arc<ScratchDbs>, cancel: CancelToken) -> Arc<Self> {
        Arc::new(DatabasePool {
            registry,
            scratch,
            cancel,
            dbs: Mutex::new(HashMap::new()),
        })
    }

    /// Drops all cached databases. Called from the run's cleanup stack.
    pub fn close_all(&self) -> Result<()> {
        let mut dbs = self.dbs.lock();
        debug!(count = dbs.len(), "closing pooled databases");
        dbs.clear();
        Ok(())
    }
}

impl DbOpener for DatabasePool {
    fn open_db(&self, src: &Source) -> Result<Arc<Database>> {
        let mut dbs = self.dbs.lock();
        if let Some(db) = dbs.get(&src.handle) {
            return Ok(db.clone());
        }

        let drvr = self.registry.driver_for(src.typ)?;
        let db = Arc::new(drvr.open(src, &self.cancel)?);
        dbs.insert(src.handle.clone(), db.clone());
        Ok(db)
    }
}

impl ScratchDbOpener for DatabasePool {
    fn open_scratch(&self, name: &str) -> Result<Arc<Database>> {
        let key = format!("#scratch:{name}");
        let mut dbs = self.dbs.lock();
        if let Some(db) = dbs.get(&key) {
            return Ok(db.clone());
        }
        let db = Arc::new(self.scratch.open(name, "@scratch")?);
        dbs.insert(key, db.clone());
        Ok(db)
    }
}

impl JoinDbOpener for DatabasePool {
    fn open_join(&self, srcs: &[&Source]) -> Result<Arc<Database>> {
        let mut key = String::from("#join");
        for src in srcs {
            key.push(':');
            key.push_str(&src.handle);
        }

        let mut dbs = self.dbs.lock();
        if let Some(db) = dbs.get(&key) {
            return Ok(db.clone());
        }
        let db = Arc::new(self.scratch.open_join()?);
        dbs.insert(key, db.clone());
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (Arc<Registry>, Arc<ScratchDbs>) {
        let files = Arc::new(Files::new().unwrap());
        let scratch = Arc::new(ScratchDbs::new().unwrap());
        (Registry::new(files, scratch.clone()), scratch)
    }

    #[test]
    fn all_driver_types_registered() {
        let (reg, _) = registry();
        let metas = reg.drivers_metadata();
        assert_eq!(metas.len(), 7);

        for typ in [
            DriverType::Sqlite3,
            DriverType::Postgres,
            DriverType::Mysql,
            DriverType::Sqlserver,
            DriverType::Csv,
            DriverType::Tsv,
            DriverType::Xlsx,
        ] {
            let drvr = reg.driver_for(typ).unwrap();
            assert_eq!(drvr.metadata().typ, typ);
        }
    }

    #[test]
    fn sql_and_doc_capabilities_are_disjoint() {
        let (reg, _) = registry();
        for drvr in reg.drivers() {
            let meta = drvr.metadata();
            assert_eq!(meta.is_sql, drvr.as_sql().is_some(), "{}", meta.typ);
            assert_eq!(!meta.is_sql, drvr.as_document().is_some(), "{}", meta.typ);
            if meta.is_sql {
                let dialect = drvr.as_sql().unwrap().dialect();
                assert_eq!(dialect.typ, meta.typ);
            }
        }
    }

    #[test]
    fn detects_csv_over_tsv(){
        let (reg, _) = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, "a,b,c\n1,2,3\n4,5,6\n").unwrap();

        let typ = reg.detect_type(&path).unwrap();
        assert_eq!(typ, Some(DriverType::Csv));
    }

    #[test]
    fn pool_caches_by_handle() {
        let (reg, scratch) = registry();
        let pool = DatabasePool::new(reg, scratch, CancelToken::new());

        let dir = tempfile::tempdir().unwrap();
        let loc = format!("sqlite3://{}/t.db", dir.path().display());
        let src = Source::new("@t", DriverType::Sqlite3, loc);

        let db1 = pool.open_db(&src).unwrap();
        let db2 = pool.open_db(&src).unwrap();
        assert!(Arc::ptr_eq(&db1, &db2));

        pool.close_all().unwrap();
    }
}
