//! In-memory write-ahead log implementation
//!
//! Lines are kept in a shared buffer rather than a file. Clones share the
//! buffer, so a test can drop an actor, build a new one over a clone of the
//! same log, and observe exactly what a restarted process would replay.

use collage_wal::{Record, Replay, Result, WalError, WriteAheadLog, encode_line};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory log for testing
pub struct MemoryWal<R> {
    lines: Arc<Mutex<Vec<String>>>,
    fail_appends: Arc<AtomicBool>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> MemoryWal<R> {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            fail_appends: Arc::new(AtomicBool::new(false)),
            _record: PhantomData,
        }
    }

    /// Make every following append fail with an I/O error
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Decoded copy of every record, in write order
    pub fn records(&self) -> Result<Vec<R>> {
        self.replay()?.collect()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> Clone for MemoryWal<R> {
    fn clone(&self) -> Self {
        Self {
            lines: self.lines.clone(),
            fail_appends: self.fail_appends.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> Default for MemoryWal<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> WriteAheadLog<R> for MemoryWal<R> {
    fn append(&self, record: &R) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(WalError::Io(std::io::Error::other("injected append failure")));
        }

        let line = encode_line(record)?;
        self.lines
            .lock()
            .push(line.trim_end_matches('\n').to_string());
        Ok(())
    }

    fn replay(&self) -> Result<Replay<R>> {
        let snapshot = self.lines.lock().clone();
        Ok(Replay::from_lines(snapshot.into_iter().map(Ok)))
    }

    fn compact(&self, records: &[R]) -> Result<()> {
        let mut encoded = Vec::with_capacity(records.len());
        for record in records {
            encoded.push(encode_line(record)?.trim_end_matches('\n').to_string());
        }
        *self.lines.lock() = encoded;
        Ok(())
    }
}
