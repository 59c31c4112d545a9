//! Append-only file of length-prefixed record frames.
//!
//! Each frame is an 8-byte big-endian length followed by that many payload
//! bytes. Frames are addressed by the byte position of their length header,
//! handed out by [`Store::append`] and recorded in the segment's index, so
//! reads never scan. Writes go through a user-space buffer; reads flush it
//! first so the process always observes its own appends.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::Result;

/// Width of the length prefix framing each payload.
pub const LEN_WIDTH: u64 = 8;

#[derive(Debug)]
pub struct Store {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    writer: BufWriter<File>,
    reader: File,
    size: u64,
}

impl Store {
    /// Opens (creating if absent) the store file at `path`. The current
    /// file length seeds the in-memory size so appends continue where the
    /// previous process left off.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        let reader = file.try_clone()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                reader,
                size,
            }),
        })
    }

    /// Appends a length-prefixed frame, returning the number of bytes
    /// written and the position of the frame's length header.
    pub fn append(&self, p: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.size;
        inner.writer.write_all(&(p.len() as u64).to_be_bytes())?;
        inner.writer.write_all(p)?;
        let written = LEN_WIDTH + p.len() as u64;
        inner.size += written;
        Ok((written, pos))
    }

    /// Reads the frame whose length header sits at `pos`.
    pub fn read(&self, pos: u64) -> Result<Bytes> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        inner.reader.read_exact_at(&mut len_buf, pos)?;
        let len = u64::from_be_bytes(len_buf);

        let mut payload = vec![0u8; len as usize];
        inner.reader.read_exact_at(&mut payload, pos + LEN_WIDTH)?;
        Ok(Bytes::from(payload))
    }

    /// Raw positional read, used by the log's sequential reader.
    pub fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        Ok(inner.reader.read_at(buf, pos)?)
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.lock().unwrap().writer.flush()?;
        Ok(())
    }

    /// Flushes buffered frames and syncs the file to disk.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Snapshot of the underlying file for lock-free sequential reads:
    /// flushes pending frames, then clones the handle and the size.
    pub(crate) fn snapshot(&self) -> Result<(File, u64)> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush()?;
        Ok((inner.reader.try_clone()?, inner.size))
    }
}
