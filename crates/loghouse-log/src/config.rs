use serde::{Deserialize, Serialize};

/// Log configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub segment: SegmentConfig,
}

/// Per-segment size caps and the base offset of the first segment.
///
/// The defaults are deliberately small so segment roll-over is exercised
/// under test; production deployments raise them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Maximum bytes in a segment's store file before the segment is
    /// considered maxed.
    pub max_store_bytes: u64,

    /// Maximum bytes in a segment's index file; also the size the index
    /// file is pre-allocated to while open.
    pub max_index_bytes: u64,

    /// Base offset of the first segment created in an empty directory.
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: 1024,
            max_index_bytes: 1024,
            initial_offset: 0,
        }
    }
}
