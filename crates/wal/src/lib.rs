//! Write-ahead log trait and types for commit actors
//!
//! Every actor (the coordinator and each participant) owns one log. The log
//! is the only thing recovery trusts: records are appended and durably
//! flushed before the caller acts on them, and replayed in write order on
//! startup.
//!
//! Records are stored one per line as JSON. The codec lives here so that
//! every backend produces the same layout.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::io;
use std::marker::PhantomData;
use thiserror::Error;

/// Write-ahead log errors
#[derive(Debug, Error)]
pub enum WalError {
    #[error("Log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Corrupt record at line {line}: {reason}")]
    Decode { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, WalError>;

/// A typed record stored in a write-ahead log
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Transaction this record belongs to
    fn txn(&self) -> &str;

    /// Whether this record erases its transaction from recoverable state
    fn is_terminal(&self) -> bool;
}

/// Trait for write-ahead log backends
pub trait WriteAheadLog<R: Record>: Send + Sync {
    /// Append one record
    ///
    /// Must not return `Ok` until the record survives a crash. Concurrent
    /// appends are serialized; each one is atomic.
    fn append(&self, record: &R) -> Result<()>;

    /// Read every record in original write order
    ///
    /// Intended for startup only. May be called repeatedly.
    fn replay(&self) -> Result<Replay<R>>;

    /// Atomically replace the whole log with `records`
    fn compact(&self, records: &[R]) -> Result<()>;
}

/// Encode a record as one log line, including the trailing newline
pub fn encode_line<R: Record>(record: &R) -> Result<String> {
    let mut line = serde_json::to_string(record).map_err(WalError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Decode one log line (without its newline)
pub fn decode_line<R: Record>(line: &str, line_no: usize) -> Result<R> {
    serde_json::from_str(line).map_err(|e| WalError::Decode {
        line: line_no,
        reason: e.to_string(),
    })
}

type LineIter = Box<dyn Iterator<Item = io::Result<String>> + Send>;

/// Lazy, finite sequence of records produced by [`WriteAheadLog::replay`]
pub struct Replay<R> {
    lines: LineIter,
    line_no: usize,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Replay<R> {
    /// Build a replay over raw lines (newline already stripped)
    pub fn from_lines(lines: impl Iterator<Item = io::Result<String>> + Send + 'static) -> Self {
        Self {
            lines: Box::new(lines),
            line_no: 0,
            _record: PhantomData,
        }
    }
}

impl<R: Record> Iterator for Replay<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(WalError::Io(e))),
            };

            // Blank lines carry no record
            if line.trim().is_empty() {
                continue;
            }

            return Some(decode_line(&line, self.line_no));
        }
    }
}

/// Records of transactions that have no terminal record, in log order
pub fn unfinished<R: Record>(records: Vec<R>) -> Vec<R> {
    let finished: HashSet<String> = records
        .iter()
        .filter(|r| r.is_terminal())
        .map(|r| r.txn().to_string())
        .collect();

    records
        .into_iter()
        .filter(|r| !finished.contains(r.txn()))
        .collect()
}
