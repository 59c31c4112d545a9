//! A segment: one store plus one index sharing a base offset.
//!
//! Records held by a segment have absolute offsets in `[base_offset,
//! next_offset)`. The files are named `<base_offset>.store` and
//! `<base_offset>.index`; reopening a segment recovers `next_offset` from
//! the last index entry.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use loghouse_proto::v1::Record;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::Index;
use crate::store::Store;

const STORE_SUFFIX: &str = "store";
const INDEX_SUFFIX: &str = "index";

/// Width of the fixed offset header prefixing every stored payload.
const RECORD_OFFSET_WIDTH: usize = 8;

pub struct Segment {
    store: Store,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: Config,
    store_path: PathBuf,
    index_path: PathBuf,
}

impl Segment {
    /// Opens (creating if absent) the segment with the given base offset
    /// under `dir`.
    pub fn open(dir: &Path, base_offset: u64, config: Config) -> Result<Self> {
        let store_path = dir.join(format!("{base_offset}.{STORE_SUFFIX}"));
        let index_path = dir.join(format!("{base_offset}.{INDEX_SUFFIX}"));

        let store = Store::open(&store_path)?;
        let index = Index::open(&index_path, config.segment.max_index_bytes)?;

        // An empty index means an empty segment; otherwise the last entry
        // tells us how far the previous process got.
        let next_offset = match index.read(-1) {
            Ok((rel, _)) => base_offset + u64::from(rel) + 1,
            Err(_) => base_offset,
        };
        debug!(base_offset, next_offset, "opened segment");

        Ok(Self {
            store,
            index,
            base_offset,
            next_offset,
            config,
            store_path,
            index_path,
        })
    }

    /// Assigns the next offset to `record`, frames it into the store and
    /// indexes the frame's position. Returns the assigned offset.
    pub fn append(&mut self, mut record: Record) -> Result<u64> {
        let offset = self.next_offset;
        record.offset = offset;

        let payload = encode_record(&record);
        let (_, position) = self.store.append(&payload)?;
        self.index
            .write((offset - self.base_offset) as u32, position)?;
        self.next_offset += 1;
        Ok(offset)
    }

    /// Reads the record with the given absolute offset.
    pub fn read(&self, offset: u64) -> Result<Record> {
        let (_, position) = self.index.read((offset - self.base_offset) as i64)?;
        let payload = self.store.read(position)?;
        decode_record(&payload)
    }

    /// Whether the segment has reached either size cap. A maxed segment is
    /// ineligible for further appends; the log rolls over to a new one.
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.segment.max_store_bytes || self.index.is_full()
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// One past the highest offset held by this segment.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Whether `offset` falls inside this segment's range.
    pub fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()?;
        self.index.close()?;
        Ok(())
    }

    /// Closes the segment and unlinks both files.
    pub fn remove(mut self) -> Result<()> {
        self.close()?;
        fs::remove_file(&self.store_path)?;
        fs::remove_file(&self.index_path)?;
        debug!(base_offset = self.base_offset, "removed segment");
        Ok(())
    }

    pub(crate) fn store_snapshot(&self) -> Result<(std::fs::File, u64)> {
        self.store.snapshot()
    }
}

fn encode_record(record: &Record) -> Bytes {
    let mut buf = BytesMut::with_capacity(RECORD_OFFSET_WIDTH + record.value.len());
    buf.put_u64(record.offset);
    buf.put_slice(&record.value);
    buf.freeze()
}

fn decode_record(payload: &[u8]) -> Result<Record> {
    if payload.len() < RECORD_OFFSET_WIDTH {
        return Err(Error::Corrupt {
            len: payload.len(),
        });
    }
    let offset = u64::from_be_bytes(payload[..RECORD_OFFSET_WIDTH].try_into().unwrap());
    Ok(Record {
        offset,
        value: payload[RECORD_OFFSET_WIDTH..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::index::ENTRY_WIDTH;
    use crate::store::LEN_WIDTH;

    fn record(value: &str) -> Record {
        Record {
            offset: 0,
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn append_read_and_roll_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let value = "hello world";
        let config = Config {
            segment: SegmentConfig {
                max_store_bytes: 1024,
                max_index_bytes: ENTRY_WIDTH * 3,
                initial_offset: 0,
            },
        };

        let mut segment = Segment::open(dir.path(), 16, config).unwrap();
        assert_eq!(segment.next_offset(), 16);
        assert!(!segment.is_maxed());

        for i in 0..3u64 {
            let offset = segment.append(record(value)).unwrap();
            assert_eq!(offset, 16 + i);

            let got = segment.read(offset).unwrap();
            assert_eq!(got.offset, offset);
            assert_eq!(got.value, value.as_bytes());
        }

        // Index cap reached: three entries fill the index.
        assert!(segment.is_maxed());
        assert!(!segment.contains(19));
    }

    #[test]
    fn maxed_by_store_size() {
        let dir = tempfile::tempdir().unwrap();
        let value = "hello, it is test";
        let frame = LEN_WIDTH + RECORD_OFFSET_WIDTH as u64 + value.len() as u64;
        let config = Config {
            segment: SegmentConfig {
                max_store_bytes: frame * 3,
                max_index_bytes: 1024,
                initial_offset: 0,
            },
        };

        let mut segment = Segment::open(dir.path(), 0, config).unwrap();
        for _ in 0..3 {
            segment.append(record(value)).unwrap();
        }
        assert!(segment.is_maxed());
    }

    #[test]
    fn reopen_recovers_next_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let mut segment = Segment::open(dir.path(), 0, config.clone()).unwrap();
        for _ in 0..4 {
            segment.append(record("payload")).unwrap();
        }
        segment.close().unwrap();

        let segment = Segment::open(dir.path(), 0, config).unwrap();
        assert_eq!(segment.next_offset(), 4);
        assert_eq!(segment.read(3).unwrap().value, b"payload");
    }

    #[test]
    fn lost_index_makes_store_frames_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let mut segment = Segment::open(dir.path(), 0, config.clone()).unwrap();
        for _ in 0..2 {
            segment.append(record("orphaned")).unwrap();
        }
        segment.close().unwrap();

        // A crash can leave a store without its index. The index is
        // authoritative: recovery restarts at the base offset and the
        // unindexed frames are simply never addressed again.
        std::fs::remove_file(dir.path().join("0.index")).unwrap();
        let mut segment = Segment::open(dir.path(), 0, config).unwrap();
        assert_eq!(segment.next_offset(), 0);

        let offset = segment.append(record("fresh")).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(segment.read(0).unwrap().value, b"fresh");
    }

    #[test]
    fn remove_unlinks_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 7, Config::default()).unwrap();
        segment.append(record("x")).unwrap();

        segment.remove().unwrap();
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
