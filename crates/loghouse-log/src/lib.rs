//! Segmented on-disk commit log.
//!
//! A [`Log`] is an ordered set of segments under one directory. Each
//! segment pairs a [`Store`] (length-prefixed record frames) with an
//! [`Index`] (memory-mapped fixed-width offset entries) sharing a base
//! offset. Appends go to the active tail segment and roll over to a new
//! segment when the tail reaches its configured size caps; reads locate
//! the owning segment by offset. Reopening a directory recovers the
//! segment set and the next offset from what is on disk.
//!
//! ```text
//! dir/
//!   0.store      0.index       <- sealed
//!   12.store     12.index      <- sealed
//!   31.store     31.index      <- active tail
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod log;
pub mod segment;
pub mod store;

pub use config::{Config, SegmentConfig};
pub use error::{Error, Result};
pub use index::Index;
pub use log::{Log, LogReader};
pub use segment::Segment;
pub use store::Store;
