//! Wire encoding of log-range errors.
//!
//! Every surface that reports an out-of-range offset goes through
//! [`offset_out_of_range`] so servers, the replication engine and tests all
//! agree on the status code and payload.

use bytes::Bytes;
use tonic::{Code, Status};

/// Width of the binary status detail carrying the offending offset.
const OFFSET_DETAIL_WIDTH: usize = 8;

/// Builds the canonical status for a read past the log's current range.
///
/// The offending offset is carried both in the message and as an 8-byte
/// big-endian status detail, so callers can recover it without parsing
/// text (see [`offset_from_status`]).
pub fn offset_out_of_range(offset: u64) -> Status {
    Status::with_details(
        Code::OutOfRange,
        format!("offset out of range: {offset}"),
        Bytes::copy_from_slice(&offset.to_be_bytes()),
    )
}

/// Whether `status` is the out-of-range error produced by
/// [`offset_out_of_range`].
pub fn is_offset_out_of_range(status: &Status) -> bool {
    status.code() == Code::OutOfRange
}

/// Recovers the offending offset from an out-of-range status, if present.
pub fn offset_from_status(status: &Status) -> Option<u64> {
    if !is_offset_out_of_range(status) {
        return None;
    }
    let details: [u8; OFFSET_DETAIL_WIDTH] = status.details().try_into().ok()?;
    Some(u64::from_be_bytes(details))
}
