//! Record sinks: the downstream half of the streaming pipeline.
//!
//! Drivers *push* result rows into a [`RecordSink`] as they scan them. This
//! keeps the whole read path streaming (no buffering inside drivers) and
//! sidesteps the borrow gymnastics a pull-iterator over a live statement
//! would require.
//!
//! `meta` is delivered exactly once, before the first record. A sink that
//! returns an error stops the stream; the driver surfaces that error to the
//! caller after releasing its statement.

use super::meta::RecordMeta;
use super::Record;
use eyre::Result;

/// Receives a typed record stream.
pub trait RecordSink {
    /// Called once, before any record.
    fn meta(&mut self, meta: &RecordMeta) -> Result<()>;

    /// Called for each row, in backend order.
    fn record(&mut self, rec: Record) -> Result<()>;

    /// Called after the final record (also on empty result sets).
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Append-only sink that buffers everything. Used by tests and by callers
/// that genuinely need the full result set in memory (e.g. `--insert`
/// destination probing).
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pub meta: Option<RecordMeta>,
    pub recs: Vec<Record>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The metadata delivered to this sink. Panics if the stream never
    /// started.
    pub fn rec_meta(&self) -> &RecordMeta {
        self.meta.as_ref().expect("sink received no metadata")
    }
}

impl RecordSink for RecordBuffer {
    fn meta(&mut self, meta: &RecordMeta) -> Result<()> {
        self.meta = Some(meta.clone());
        Ok(())
    }

    fn record(&mut self, rec: Record) -> Result<()> {
        self.recs.push(rec);
        Ok(())
    }
}
