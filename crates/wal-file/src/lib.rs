//! Filesystem-based write-ahead log
//!
//! Records are appended as single lines and forced to disk with
//! `sync_data` before `append` returns. A crash in the middle of an append
//! can leave a partial last line behind; it is cut off when the log is
//! reopened, since its append never reported success. A failed append in a
//! running process is rolled back the same way before the next one.

use collage_wal::{Record, Replay, Result, WriteAheadLog, decode_line, encode_line};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Log file name used by an actor in its working directory
pub const DEFAULT_LOG_FILE: &str = "log.txt";

/// Append-only log stored in a single file
pub struct FileWal<R> {
    /// Location of the log file
    path: PathBuf,
    /// Append handle; the lock serializes appends and compaction
    tail: Mutex<Tail>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> FileWal<R> {
    /// Open (or create) the log at `path`, repairing a torn last line
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        repair_torn_tail::<R>(&path)?;

        let tail = Tail::open(&path)?;

        Ok(Self {
            path,
            tail: Mutex::new(tail),
            _record: PhantomData,
        })
    }

    /// Open the log named [`DEFAULT_LOG_FILE`] inside `dir`
    pub fn open_in(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(dir.as_ref().join(DEFAULT_LOG_FILE))
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Record> WriteAheadLog<R> for FileWal<R> {
    fn append(&self, record: &R) -> Result<()> {
        let line = encode_line(record)?;

        let mut tail = self.tail.lock();
        tail.append(line.as_bytes())
    }

    fn replay(&self) -> Result<Replay<R>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Replay::from_lines(std::iter::empty()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Replay::from_lines(BufReader::new(file).lines()))
    }

    fn compact(&self, records: &[R]) -> Result<()> {
        // Holding the append lock keeps concurrent appends out of the old file
        let mut tail = self.tail.lock();

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in records {
                tmp.write_all(encode_line(record)?.as_bytes())?;
            }
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        *tail = Tail::open(&self.path)?;

        tracing::debug!(
            "Compacted log {:?} to {} records",
            self.path,
            records.len()
        );
        Ok(())
    }
}

/// Append handle plus the length of the log up to its last complete record
struct Tail {
    file: File,
    len: u64,
}

impl Tail {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// Write and sync one line, or leave the log as it was
    fn append(&mut self, line: &[u8]) -> Result<()> {
        // A write that failed half way may have left bytes past `len`
        if self.file.metadata()?.len() != self.len {
            tracing::warn!("Discarding partial record at byte {} of log", self.len);
            self.file.set_len(self.len)?;
        }

        let written = self
            .file
            .write_all(line)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(self.len) {
                tracing::error!("Could not roll back failed append: {}", rollback);
            }
            return Err(e.into());
        }

        self.len += line.len() as u64;
        Ok(())
    }
}

fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

/// Cut off a trailing record whose append never completed
///
/// The last line is torn when it lacks its newline or does not decode. Any
/// other undecodable line means the log is damaged and is reported.
fn repair_torn_tail<R: Record>(path: &Path) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut offset = 0usize;
    let mut line_no = 0usize;
    let mut truncate_to = None;

    while offset < bytes.len() {
        line_no += 1;
        let (end, terminated) = match bytes[offset..].iter().position(|b| *b == b'\n') {
            Some(pos) => (offset + pos, true),
            None => (bytes.len(), false),
        };
        let next = if terminated { end + 1 } else { end };
        let is_last = next >= bytes.len();

        let text = String::from_utf8_lossy(&bytes[offset..end]);
        if !text.trim().is_empty() {
            let torn = match decode_line::<R>(&text, line_no) {
                Ok(_) => !terminated,
                Err(_) if is_last => true,
                Err(e) => return Err(e),
            };
            if torn {
                truncate_to = Some(offset);
            }
        }

        offset = next;
    }

    if let Some(len) = truncate_to {
        tracing::warn!(
            "Truncating torn record at byte {} of log {:?}",
            len,
            path
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len as u64)?;
        file.sync_all()?;
    }

    Ok(())
}

impl<R> std::fmt::Debug for FileWal<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWal").field("path", &self.path).finish()
    }
}
