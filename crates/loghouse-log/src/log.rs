//! The log: an ordered set of segments under one directory.
//!
//! Appends go to the active (last) segment and roll over to a fresh
//! segment once the active one reaches a size cap. Reads locate the
//! owning segment by offset. The segment set is guarded by a read-write
//! lock: appends, truncation and structural changes take the write lock,
//! reads and range queries the read lock.

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use loghouse_proto::v1::Record;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::segment::Segment;

pub struct Log {
    dir: PathBuf,
    config: Config,
    inner: RwLock<Inner>,
    append_notify: Notify,
}

struct Inner {
    /// Ordered by base offset; the last segment is the active one and the
    /// only one appended to.
    segments: Vec<Segment>,
    closed: bool,
}

impl Log {
    /// Opens the log under `dir`, creating the directory if needed and
    /// recovering any segments already on disk.
    pub fn open(dir: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let segments = load_segments(&dir, &config)?;
        info!(dir = %dir.display(), segments = segments.len(), "opened log");
        Ok(Self {
            dir,
            config,
            inner: RwLock::new(Inner {
                segments,
                closed: false,
            }),
            append_notify: Notify::new(),
        })
    }

    /// Appends a record to the active segment, rolling over to a new
    /// segment if the active one is maxed afterwards. Returns the
    /// assigned offset.
    pub async fn append(&self, record: Record) -> Result<u64> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(Error::Closed);
        }

        let active = inner.segments.last_mut().expect("log has an active segment");
        let offset = active.append(record)?;

        if active.is_maxed() {
            let segment = Segment::open(&self.dir, offset + 1, self.config.clone())?;
            debug!(base_offset = offset + 1, "rolled over to new segment");
            inner.segments.push(segment);
        }
        drop(inner);

        self.append_notify.notify_waiters();
        Ok(offset)
    }

    /// Reads the record at `offset`.
    pub async fn read(&self, offset: u64) -> Result<Record> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(Error::Closed);
        }

        let segment = inner
            .segments
            .iter()
            .find(|segment| segment.contains(offset))
            .ok_or(Error::OffsetOutOfRange { offset })?;

        segment.read(offset).map_err(|err| match err {
            Error::IndexOutOfRange { .. } => Error::OffsetOutOfRange { offset },
            other => other,
        })
    }

    pub async fn lowest_offset(&self) -> Result<u64> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(Error::Closed);
        }
        Ok(inner.segments.first().map(Segment::base_offset).unwrap_or(0))
    }

    pub async fn highest_offset(&self) -> Result<u64> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(Error::Closed);
        }
        let next = inner.segments.last().map(Segment::next_offset).unwrap_or(0);
        Ok(next.saturating_sub(1))
    }

    /// Removes every segment whose highest offset is at most `lowest`. If
    /// nothing survives, a fresh segment is created at `lowest + 1` so the
    /// log always has an active segment.
    pub async fn truncate(&self, lowest: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(Error::Closed);
        }

        let old = std::mem::take(&mut inner.segments);
        for segment in old {
            if segment.next_offset() <= lowest + 1 {
                segment.remove()?;
            } else {
                inner.segments.push(segment);
            }
        }
        if inner.segments.is_empty() {
            inner
                .segments
                .push(Segment::open(&self.dir, lowest + 1, self.config.clone())?);
        }
        info!(lowest, "truncated log");
        Ok(())
    }

    /// A sequential reader over the raw store bytes of every segment, in
    /// segment order, the wholesale transfer format of the log. The
    /// segment set and sizes are snapshotted up front, so the reader does
    /// not hold the log's lock while being consumed.
    pub async fn reader(&self) -> Result<LogReader> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(Error::Closed);
        }
        let mut parts = Vec::with_capacity(inner.segments.len());
        for segment in &inner.segments {
            parts.push(segment.store_snapshot()?);
        }
        Ok(LogReader {
            parts,
            current: 0,
            pos: 0,
        })
    }

    /// Waits until the next successful append. Used by tailing consumers;
    /// callers should pair it with a timeout since a racing append may
    /// fire before the wait starts.
    pub async fn wait_for_append(&self) {
        self.append_notify.notified().await;
    }

    /// Closes every segment in order. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        close_segments(&mut inner)?;
        info!(dir = %self.dir.display(), "closed log");
        Ok(())
    }

    /// Closes the log and deletes its directory.
    pub async fn remove(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        close_segments(&mut inner)?;
        inner.segments.clear();
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Removes the log and sets it up again from an empty directory.
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        close_segments(&mut inner)?;
        inner.segments.clear();
        fs::remove_dir_all(&self.dir)?;
        fs::create_dir_all(&self.dir)?;
        inner.segments = load_segments(&self.dir, &self.config)?;
        inner.closed = false;
        info!(dir = %self.dir.display(), "reset log");
        Ok(())
    }
}

fn close_segments(inner: &mut Inner) -> Result<()> {
    if inner.closed {
        return Ok(());
    }
    for segment in inner.segments.iter_mut() {
        segment.close()?;
    }
    inner.closed = true;
    Ok(())
}

/// Scans `dir` for segment files and opens one segment per base offset
/// (each base appears once per file kind, so the set is deduped). An
/// empty directory gets a fresh segment at the configured initial offset.
fn load_segments(dir: &Path, config: &Config) -> Result<Vec<Segment>> {
    let mut base_offsets = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let Ok(base_offset) = stem.parse::<u64>() else {
            continue;
        };
        base_offsets.push(base_offset);
    }
    base_offsets.sort_unstable();
    base_offsets.dedup();

    let mut segments = Vec::with_capacity(base_offsets.len().max(1));
    for base_offset in base_offsets {
        segments.push(Segment::open(dir, base_offset, config.clone())?);
    }
    if segments.is_empty() {
        segments.push(Segment::open(
            dir,
            config.segment.initial_offset,
            config.clone(),
        )?);
    }
    Ok(segments)
}

/// Sequential reader over the concatenated raw store bytes of a log
/// snapshot. Yields length-prefixed frames exactly as stored.
pub struct LogReader {
    parts: Vec<(File, u64)>,
    current: usize,
    pos: u64,
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let Some((file, size)) = self.parts.get(self.current) else {
                return Ok(0);
            };
            if self.pos >= *size {
                self.current += 1;
                self.pos = 0;
                continue;
            }
            let want = buf.len().min((*size - self.pos) as usize);
            let n = file.read_at(&mut buf[..want], self.pos)?;
            if n == 0 {
                self.current += 1;
                self.pos = 0;
                continue;
            }
            self.pos += n as u64;
            return Ok(n);
        }
    }
}
