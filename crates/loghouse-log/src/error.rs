use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Read target is outside the log's current range.
    #[error("offset out of range: {offset}")]
    OffsetOutOfRange { offset: u64 },

    /// The index has no entry at the requested slot. Converted to
    /// [`Error::OffsetOutOfRange`] at the log boundary.
    #[error("no index entry at {n}")]
    IndexOutOfRange { n: i64 },

    /// Writing one more entry would exceed the index capacity. Never
    /// user-visible: the log treats it as "segment is maxed" and rolls
    /// over before it can occur.
    #[error("index is full")]
    IndexFull,

    /// A store frame too short to hold the record header.
    #[error("record frame too short: {len} bytes")]
    Corrupt { len: usize },

    #[error("log is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
