// Shared/exclusive guarded positional I/O over the backing file.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind, closed, poisoned};
use crate::core::frontier::{Admission, Frontier};
use crate::core::slots::Slot;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Durability {
    /// Leave flushing to the OS page cache.
    #[default]
    Fast,
    /// `sync_data` after every record, inside the exclusive section.
    Flush,
}

/// Backing file behind a readers-share/writer-excludes lock.
///
/// `None` means the store has been closed; every later access fails with
/// `ErrorKind::Closed`.
#[derive(Debug)]
pub(crate) struct BlockStore {
    path: PathBuf,
    record_len: usize,
    durability: Durability,
    file: RwLock<Option<File>>,
    frontier: Frontier,
}

impl BlockStore {
    pub(crate) fn new(
        path: PathBuf,
        file: File,
        record_len: u32,
        durability: Durability,
        published: u64,
    ) -> Self {
        Self {
            path,
            record_len: record_len as usize,
            durability,
            file: RwLock::new(Some(file)),
            frontier: Frontier::new(published),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn published(&self) -> Result<u64, Error> {
        self.frontier.published()
    }

    /// A poisoned lock also reports closed: every later read or write fails,
    /// with `ErrorKind::Internal` rather than `Closed`.
    pub(crate) fn is_closed(&self) -> bool {
        match self.file.read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// Writes at most `record_len` bytes of `data` into `slot`, then publishes it.
    ///
    /// Bytes beyond `record_len` are dropped. A shorter payload leaves the tail
    /// of the slot untouched.
    pub(crate) fn write(&self, slot: Slot, data: &[u8]) -> Result<(), Error> {
        let bytes = &data[..data.len().min(self.record_len)];
        let result = {
            let exclusive = self.file.write().map_err(poisoned)?;
            let file = exclusive.as_ref().ok_or_else(|| closed().with_seq(slot.seq))?;
            write_slot(file, slot.offset, bytes).and_then(|()| match self.durability {
                Durability::Fast => Ok(()),
                Durability::Flush => file.sync_data(),
            })
        };

        // A failed slot is still published as a hole; otherwise every later
        // reader would wait on it forever.
        if let Err(err) = &result {
            warn!(seq = slot.seq, offset = slot.offset, error = %err, "record write failed");
        }
        self.frontier.publish(slot.seq)?;

        result.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("write record")
                .with_path(&self.path)
                .with_seq(slot.seq)
                .with_offset(slot.offset)
                .with_source(err)
        })
    }

    /// Reads the full record in `slot`, waiting until the slot is published.
    ///
    /// `deadline` bounds the wait; `None` waits until a writer publishes the
    /// slot or the store is closed.
    pub(crate) fn read(&self, slot: Slot, deadline: Option<Instant>) -> Result<Vec<u8>, Error> {
        loop {
            let shared = self.file.read().map_err(poisoned)?;
            if shared.is_none() {
                return Err(closed().with_seq(slot.seq));
            }
            let shared = match self.frontier.admit(slot.seq, shared, deadline)? {
                Admission::Ready(shared) => shared,
                Admission::Retry => continue,
            };
            let file = shared.as_ref().ok_or_else(|| closed().with_seq(slot.seq))?;

            let mut buf = vec![0u8; self.record_len];
            read_slot(file, slot.offset, &mut buf).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("read record")
                    .with_path(&self.path)
                    .with_seq(slot.seq)
                    .with_offset(slot.offset)
                    .with_source(err)
            })?;
            return Ok(buf);
        }
    }

    /// Releases the backing file and fails all waiting readers.
    ///
    /// Returns `Ok(())` without doing anything when already closed.
    pub(crate) fn close(&self) -> Result<(), Error> {
        let file = self.file.write().map_err(poisoned)?.take();
        let Some(file) = file else {
            return Ok(());
        };
        self.frontier.close()?;
        debug!(path = %self.path.display(), "record file closed");

        file.unlock().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("release file lock")
                .with_path(&self.path)
                .with_source(err)
        })
    }
}

/// Fills `buf` from `offset`; bytes past end-of-file are left as zero.
fn read_slot(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let mut total = 0;
    while total < buf.len() {
        match read_at(file, &mut buf[total..], advance(offset, total)?) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn write_slot(file: &File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    let mut total = 0;
    while total < bytes.len() {
        match write_at(file, &bytes[total..], advance(offset, total)?) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "positional write returned 0",
                ));
            }
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn advance(offset: u64, total: usize) -> io::Result<u64> {
    offset.checked_add(total as u64).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "record offset overflows u64")
    })
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}
