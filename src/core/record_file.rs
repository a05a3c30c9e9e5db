// Record file facade: open/close lifecycle over the slot allocator and block store.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::slots::SlotAllocator;
use crate::core::store::{BlockStore, Durability};

/// One fixed-length record and its position in append order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub seq: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
pub struct RecordFileOptions {
    pub record_len: u32,
    /// Discard existing contents on open. When false, writing resumes after
    /// the last (possibly partial) record and reading starts from record 0.
    pub truncate: bool,
    pub durability: Durability,
}

impl RecordFileOptions {
    pub fn new(record_len: u32) -> Self {
        Self {
            record_len,
            truncate: true,
            durability: Durability::Fast,
        }
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

/// A file of fixed-length records shared by concurrent writers and readers.
///
/// Writers and readers each claim the next sequence number without locking,
/// then perform positional I/O under a shared/exclusive lock. A reader whose
/// sequence has not been written yet sleeps until a writer publishes it.
///
/// The on-disk format is the bare concatenation of records: record `n` lives
/// at byte `n * record_len`. Nothing in the file records `record_len`.
#[derive(Debug)]
pub struct RecordFile {
    slots: SlotAllocator,
    store: BlockStore,
    record_len: u32,
}

impl RecordFile {
    /// Creates (or truncates) the file at `path`.
    pub fn open(path: impl AsRef<Path>, record_len: u32) -> Result<Self, Error> {
        Self::open_with(path, RecordFileOptions::new(record_len))
    }

    pub fn open_with(path: impl AsRef<Path>, options: RecordFileOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if options.record_len == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("record length must be positive")
                .with_path(&path));
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(open_error_kind(&err)).with_path(&path).with_source(err))?;

        file.try_lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("record file is held by another owner")
                .with_path(&path)
                .with_source(err)
        })?;

        let existing = existing_records(&file, &path, options)?;
        debug!(
            path = %path.display(),
            record_len = options.record_len,
            existing,
            "record file opened"
        );

        Ok(Self {
            slots: SlotAllocator::resume(options.record_len, existing, 0),
            store: BlockStore::new(
                path,
                file,
                options.record_len,
                options.durability,
                existing,
            ),
            record_len: options.record_len,
        })
    }

    /// Appends one record and returns its sequence number.
    ///
    /// `data` longer than the record length is cut to fit; shorter data
    /// leaves a hole at the end of the slot.
    pub fn write(&self, data: &[u8]) -> Result<u64, Error> {
        let slot = self.slots.reserve_write();
        self.store.write(slot, data)?;
        Ok(slot.seq)
    }

    /// Reads the next unread record, blocking until it has been written.
    pub fn read(&self) -> Result<Record, Error> {
        let slot = self.slots.reserve_read();
        let data = self.store.read(slot, None)?;
        Ok(Record {
            seq: slot.seq,
            data,
        })
    }

    /// Like [`read`](Self::read), but gives up after `timeout`.
    ///
    /// The sequence number is consumed even when the read times out. The
    /// returned error carries it (`Error::seq`) so the caller can retry with
    /// [`read_at`](Self::read_at).
    pub fn read_timeout(&self, timeout: Duration) -> Result<Record, Error> {
        let slot = self.slots.reserve_read();
        let data = self.store.read(slot, Some(Instant::now() + timeout))?;
        Ok(Record {
            seq: slot.seq,
            data,
        })
    }

    /// Reads record `seq` without advancing the read cursor.
    pub fn read_at(&self, seq: u64, timeout: Option<Duration>) -> Result<Record, Error> {
        let slot = self.slots.slot_for_seq(seq)?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let data = self.store.read(slot, deadline)?;
        Ok(Record { seq, data })
    }

    /// Sequence number the next write reservation will receive.
    pub fn current_write_seq(&self) -> u64 {
        self.slots.write_seq()
    }

    /// Sequence number the next read reservation will receive.
    pub fn current_read_seq(&self) -> u64 {
        self.slots.read_seq()
    }

    /// Number of records readable without waiting.
    pub fn published_seq(&self) -> Result<u64, Error> {
        self.store.published()
    }

    pub fn record_len(&self) -> u32 {
        self.record_len
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// True after `close`, and also after a thread panicked while holding
    /// the file lock, since no further I/O can succeed either way.
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    /// Releases the file. Blocked readers fail with `ErrorKind::Closed`, as
    /// does every later read or write. Closing twice is not an error.
    pub fn close(&self) -> Result<(), Error> {
        self.store.close()
    }
}

fn existing_records(file: &File, path: &Path, options: RecordFileOptions) -> Result<u64, Error> {
    if options.truncate {
        file.set_len(0)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        return Ok(0);
    }
    let len = file
        .metadata()
        .map(|meta| meta.len())
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    Ok(len.div_ceil(u64::from(options.record_len)))
}

fn open_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
