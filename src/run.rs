//! The run: the container for one command execution's injectable state —
//! collection, driver registry, file manager, scratch owner, database
//! pool, cancellation token — plus the cleanup stack that tears it all
//! down in LIFO order.

use crate::cancel::CancelToken;
use crate::driver::registry::{DatabasePool, Registry};
use crate::engine::QueryContext;
use crate::files::Files;
use crate::scratch::ScratchDbs;
use crate::source::collection::Collection;
use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// LIFO stack of cleanup functions. The first error is returned; any
/// further errors are folded into it.
#[derive(Default)]
pub struct Cleanup {
    fns: Mutex<Vec<Box<dyn FnOnce() -> Result<()> + Send>>>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, f: impl FnOnce() -> Result<()> + Send + 'static) {
        self.fns.lock().push(Box::new(f));
    }

    pub fn len(&self) -> usize {
        self.fns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.lock().is_empty()
    }

    /// Runs all cleanup functions in reverse registration order.
    pub fn run(&self) -> Result<()> {
        let fns = std::mem::take(&mut *self.fns.lock());
        let mut first_err: Option<eyre::Report> = None;

        for f in fns.into_iter().rev() {
            if let Err(e) = f() {
                warn!(err = %e, "cleanup step failed");
                first_err = Some(match first_err {
                    None => e,
                    Some(prev) => crate::error::combine(prev, e),
                });
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Injectable state for one command execution. Owns every open database,
/// the scratch directory, and the cleanup stack; components borrow them
/// for the duration of a call.
pub struct Run {
    pub collection: Collection,
    pub files: Arc<Files>,
    pub scratch: Arc<ScratchDbs>,
    pub registry: Arc<Registry>,
    pub pool: Arc<DatabasePool>,
    pub cancel: CancelToken,
    pub cleanup: Cleanup,
}

impl Run {
    pub fn new(collection: Collection) -> Result<Run> {
        let files = Arc::new(Files::new()?);
        let scratch = Arc::new(ScratchDbs::new()?);
        let registry = Registry::new(files.clone(), scratch.clone());
        let cancel = CancelToken::new();
        let pool = DatabasePool::new(registry.clone(), scratch.clone(), cancel.clone());

        let cleanup = Cleanup::new();
        let pool_for_cleanup = pool.clone();
        cleanup.push(move || pool_for_cleanup.close_all());

        Ok(Run {
            collection,
            files,
            scratch,
            registry,
            pool,
            cancel,
            cleanup,
        })
    }

    /// Builds a query context over this run's collection and pool.
    pub fn query_context(&self, args: HashMap<String, String>) -> QueryContext<'_> {
        QueryContext {
            collection: &self.collection,
            db_opener: self.pool.as_ref(),
            join_db_opener: self.pool.as_ref(),
            scratch_db_opener: self.pool.as_ref(),
            args,
        }
    }

    /// Disposes of all resources held by the run. The scratch directory
    /// and staged files are removed when their owners drop at the end of
    /// this call.
    pub fn close(self) -> Result<()> {
        self.cleanup.run().wrap_err("close run")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_runs_lifo() {
        let cleanup = Cleanup::new();
        let slots: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let slots = slots.clone();
            cleanup.push(move || {
                slots.lock().push(i);
                Ok(())
            });
        }

        cleanup.run().unwrap();
        assert_eq!(*slots.lock(), vec![2, 1, 0]);
        assert!(cleanup.is_empty());
    }

    #[test]
    fn cleanup_returns_first_error_and_keeps_going() {
        let cleanup = Cleanup::new();
        let ran: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let r = ran.clone();
        cleanup.push(move || {
            r.lock().push("inner");
            Ok(())
        });
        cleanup.push(|| eyre::bail!("second failure"));
        cleanup.push(|| eyre::bail!("first failure"));

        let err = cleanup.run().unwrap_err();
        // Last-registered runs first, so its error is the one returned.
        assert!(format!("{err:?}").contains("first failure"));
        assert_eq!(*ran.lock(), vec!["inner"]);
    }

    #[test]
    fn run_wires_and_closes() {
        let run = Run::new(Collection::new()).unwrap();
        assert_eq!(run.cleanup.len(), 1);
        run.close().unwrap();
    }
}
