//! The serialization contract: encode/decode the persistent subset of
//! every LISTED request across a restart.
//!
//! Each record is a fixed-width, little-endian encoding of
//! `fxid, dbid, size, start_logged, end_logged, start_unlogged,
//! end_unlogged`. Retry time is an in-memory extra and is intentionally
//! dropped: every restored request comes back as if it had never
//! failed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{Dbid, Fxid, UndoRecPtr, UndoRequestInfo};

/// Width in bytes of one encoded record: `u64 + u32 + u64 * 5`.
pub const RECORD_WIDTH: usize = 8 + 4 + 8 * 5;

pub(crate) fn encode_record(buf: &mut BytesMut, info: &UndoRequestInfo) {
    buf.put_u64_le(info.fxid.0);
    buf.put_u32_le(info.dbid.0);
    buf.put_u64_le(info.size);
    buf.put_u64_le(info.start_logged.0);
    buf.put_u64_le(info.end_logged.0);
    buf.put_u64_le(info.start_unlogged.0);
    buf.put_u64_le(info.end_unlogged.0);
}

/// Decodes one record. `src` must hold at least [`RECORD_WIDTH`] bytes;
/// callers are expected to have already validated the overall blob
/// length is a whole multiple of `RECORD_WIDTH`.
pub(crate) fn decode_record(src: &mut impl Buf) -> UndoRequestInfo {
    let fxid = Fxid(src.get_u64_le());
    let dbid = Dbid(src.get_u32_le());
    let size = src.get_u64_le();
    let start_logged = UndoRecPtr(src.get_u64_le());
    let end_logged = UndoRecPtr(src.get_u64_le());
    let start_unlogged = UndoRecPtr(src.get_u64_le());
    let end_unlogged = UndoRecPtr(src.get_u64_le());
    UndoRequestInfo {
        fxid,
        dbid,
        size,
        start_logged,
        end_logged,
        start_unlogged,
        end_unlogged,
    }
}

pub(crate) fn encode_all(records: &[UndoRequestInfo]) -> Bytes {
    let mut buf = BytesMut::with_capacity(records.len() * RECORD_WIDTH);
    for info in records {
        encode_record(&mut buf, info);
    }
    buf.freeze()
}
