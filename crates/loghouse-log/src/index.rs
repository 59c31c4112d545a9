//! Memory-mapped offset index.
//!
//! Fixed 12-byte entries of big-endian `(relative_offset: u32, position:
//! u64)`, where the position points at a frame in the segment's store. The
//! backing file is grown to its full capacity at open so the mapping has
//! room, and truncated back to the committed size on close so the next
//! open can recompute occupancy from the file length.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, Result};

const OFFSET_WIDTH: u64 = 4;
const POSITION_WIDTH: u64 = 8;

/// Width of one `(relative_offset, position)` entry.
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

#[derive(Debug)]
pub struct Index {
    file: File,
    mmap: MmapMut,
    size: u64,
}

impl Index {
    /// Opens the index at `path`, sizing the file to `max_index_bytes`.
    /// The file length before resizing determines how many entries are
    /// already committed.
    pub fn open(path: &Path, max_index_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len();
        file.set_len(max_index_bytes)?;
        // SAFETY: the file stays open and exclusively owned by this index
        // for the lifetime of the mapping.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, mmap, size })
    }

    /// Appends an entry at the current write position.
    pub fn write(&mut self, rel_offset: u32, position: u64) -> Result<()> {
        if self.size + ENTRY_WIDTH > self.mmap.len() as u64 {
            return Err(Error::IndexFull);
        }
        let at = self.size as usize;
        self.mmap[at..at + OFFSET_WIDTH as usize].copy_from_slice(&rel_offset.to_be_bytes());
        self.mmap[at + OFFSET_WIDTH as usize..at + ENTRY_WIDTH as usize]
            .copy_from_slice(&position.to_be_bytes());
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Reads entry `n`; `-1` reads the last committed entry.
    pub fn read(&self, n: i64) -> Result<(u32, u64)> {
        let entries = self.size / ENTRY_WIDTH;
        if entries == 0 {
            return Err(Error::IndexOutOfRange { n });
        }
        let slot = if n < 0 { entries - 1 } else { n as u64 };
        if slot >= entries {
            return Err(Error::IndexOutOfRange { n });
        }
        let at = (slot * ENTRY_WIDTH) as usize;
        let rel_offset = u32::from_be_bytes(
            self.mmap[at..at + OFFSET_WIDTH as usize].try_into().unwrap(),
        );
        let position = u64::from_be_bytes(
            self.mmap[at + OFFSET_WIDTH as usize..at + ENTRY_WIDTH as usize]
                .try_into()
                .unwrap(),
        );
        Ok((rel_offset, position))
    }

    /// Committed bytes; the next write position.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether one more entry would exceed capacity.
    pub fn is_full(&self) -> bool {
        self.size + ENTRY_WIDTH > self.mmap.len() as u64
    }

    /// Flushes the mapping and truncates the file back to the committed
    /// size, so reopening derives the entry count from the file length.
    pub fn close(&mut self) -> Result<()> {
        self.mmap.flush()?;
        self.file.set_len(self.size)?;
        self.file.sync_all()?;
        Ok(())
    }
}
