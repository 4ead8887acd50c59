//! # Batch Insert
//!
//! Producer/consumer bridge for write paths (`--insert`, table copy,
//! document ingest). The producer pushes records into a bounded channel; a
//! consumer thread groups them into batches and drives a prepared
//! multi-row INSERT.
//!
//! Protocol:
//!
//! - Dropping the sender (via [`BatchInsert::finish`]) signals end of
//!   input; the consumer flushes any partial batch and reports the total
//!   affected count.
//! - On an exec error the consumer reports the error and then drains the
//!   record channel so a blocked producer wakes up promptly.
//! - Insertion order is preserved within the stream; no guarantee is made
//!   against other concurrent writers.

use crate::cancel::CancelToken;
use crate::driver::Database;
use crate::record::{Record, Value};
use eyre::Result;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

pub struct BatchInsert {
    tx: Option<SyncSender<Record>>,
    result_rx: Receiver<Result<i64>>,
    early: Option<Result<i64>>,
    consumer: Option<JoinHandle<()>>,
}

impl BatchInsert {
    /// Starts a consumer thread inserting into `db.tbl`. `batch_size` is
    /// the requested rows per INSERT; it is clamped so a full batch never
    /// exceeds the dialect's `max_batch_values`.
    pub fn new(
        db: Arc<Database>,
        tbl: &str,
        cols: Vec<String>,
        batch_size: usize,
        cancel: CancelToken,
    ) -> Self {
        let n_cols = cols.len().max(1);
        let max_rows = (db.dialect().max_batch_values / n_cols).max(1);
        let rows_per_batch = batch_size.clamp(1, max_rows);

        let (tx, rx) = sync_channel::<Record>(rows_per_batch * 2);
        let (result_tx, result_rx) = sync_channel::<Result<i64>>(1);

        let tbl = tbl.to_string();
        let consumer = std::thread::spawn(move || {
            let res = consume(&db, &tbl, &cols, rows_per_batch, &cancel, &rx);
            if res.is_err() {
                // Unblock the producer before reporting.
                while rx.recv().is_ok() {}
            }
            let _ = result_tx.send(res);
        });

        BatchInsert {
            tx: Some(tx),
            result_rx,
            early: None,
            consumer: Some(consumer),
        }
    }

    /// Sends one record, blocking while the channel is full. Fails fast if
    /// the consumer has already reported.
    pub fn send(&mut self, rec: Record) -> Result<()> {
        if self.early.is_some() {
            eyre::bail!("batch insert already terminated");
        }
        if let Ok(res) = self.result_rx.try_recv() {
            let msg = match &res {
                Ok(n) => format!("batch insert terminated early ({n} rows)"),
                Err(e) => format!("batch insert failed: {e}"),
            };
            self.early = Some(res);
            eyre::bail!(msg);
        }

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| eyre::eyre!("batch insert already finished"))?;

        // A plain send would deadlock if the consumer died between the
        // try_recv above and here, so loop with a bounded try_send.
        let mut rec = rec;
        loop {
            match tx.try_send(rec) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(r)) => {
                    rec = r;
                    if let Ok(res) = self.result_rx.try_recv() {
                        self.early = Some(res);
                        eyre::bail!("batch insert failed mid-stream");
                    }
                    std::thread::yield_now();
                }
                Err(TrySendError::Disconnected(_)) => {
                    let res = self.result_rx.recv().unwrap_or_else(|_| {
                        Err(eyre::eyre!("batch insert consumer vanished"))
                    });
                    let msg = format!(
                        "batch insert terminated: {}",
                        match &res {
                            Ok(n) => format!("{n} rows"),
                            Err(e) => e.to_string(),
                        }
                    );
                    self.early = Some(res);
                    eyre::bail!(msg);
                }
            }
        }
    }

    /// Signals end of input and waits for the consumer. Returns total
    /// affected rows.
    pub fn finish(mut self) -> Result<i64> {
        self.tx.take(); // close the channel
        let res = match self.early.take() {
            Some(res) => res,
            None => self
                .result_rx
                .recv()
                .unwrap_or_else(|_| Err(eyre::eyre!("batch insert consumer vanished"))),
        };
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        res
    }
}

fn consume(
    db: &Database,
    tbl: &str,
    cols: &[String],
    rows_per_batch: usize,
    cancel: &CancelToken,
    rx: &Receiver<Record>,
) -> Result<i64> {
    let col_refs: Vec<&str> = cols.iter().map(String::as_str).collect();

    db.with_conn(|drvr, conn| {
        let mut execer = drvr.prepare_insert_stmt(conn, tbl, &col_refs, rows_per_batch)?;

        let mut pending: Vec<Value> = Vec::with_capacity(rows_per_batch * col_refs.len());
        let mut pending_rows = 0usize;
        let mut total: i64 = 0;

        for rec in rx.iter() {
            cancel.check()?;
            let mut rec = rec;
            execer.munge(&mut rec)?;
            pending.extend(rec);
            pending_rows += 1;

            if pending_rows == rows_per_batch {
                total += execer.exec(&pending)?;
                pending.clear();
                pending_rows = 0;
            }
        }

        if pending_rows > 0 {
            total += execer.exec(&pending)?;
        }
        debug!(tbl, total, "batch insert complete");
        Ok(total)
    })
}
