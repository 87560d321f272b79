//! On-disk layout of the data file: a fixed header followed by a sequence
//! of checksummed commit frames.
//!
//! A frame is the unit of durability. Replay walks frames from the start
//! of the file and stops at the first frame whose magic, sequence or
//! checksum fails validation; a torn final write is therefore
//! indistinguishable from "that commit never happened". Value bytes keep
//! their position in the file forever, which is what lets the state layer
//! hand out mapped `(offset, len)` references.

use xxhash_rust::xxh64::xxh64;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{DbError, DbResult, StoreErrorKind};
use crate::schema::MapId;

use super::state::{MapState, Root, ValueRef, stores_mapped};

type LE = LittleEndian;

/// Fixed size of the file header. Frames start at this offset.
pub(crate) const FILE_HEADER_SIZE: u64 = 64;

pub(crate) const FILE_MAGIC: u64 = u64::from_le_bytes(*b"xrefdb\0\x01");

/// Version of the container format (frames, ops). Distinct from the
/// schema version, which governs map layouts.
pub(crate) const FORMAT_VERSION: u32 = 1;

pub(crate) const FRAME_MAGIC: u32 = u32::from_le_bytes(*b"XFRM");

/// Per-op overhead in a frame payload: tag, map id, key length, value
/// length.
pub(crate) const OP_HEADER_SIZE: usize = 8;

#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct FileHeader {
    pub magic: U64<LE>,
    pub format_version: U32<LE>,
    pub reserved: [u8; 52],
}

impl FileHeader {
    pub fn current() -> FileHeader {
        FileHeader {
            magic: U64::new(FILE_MAGIC),
            format_version: U32::new(FORMAT_VERSION),
            reserved: [0; 52],
        }
    }
}

#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct FrameHeader {
    pub magic: U32<LE>,
    pub payload_len: U32<LE>,
    pub seq: U64<LE>,
    pub checksum: U64<LE>,
}

impl FrameHeader {
    pub const SIZE: usize = 24;

    pub fn new(seq: u64, payload: &[u8]) -> FrameHeader {
        FrameHeader {
            magic: U32::new(FRAME_MAGIC),
            payload_len: U32::new(payload.len() as u32),
            seq: U64::new(seq),
            checksum: U64::new(xxh64(payload, 0)),
        }
    }
}

/// Total bytes a frame with `payload_len` occupies, including the 8-byte
/// tail padding that keeps successive frames aligned.
pub(crate) fn frame_span(payload_len: usize) -> u64 {
    (FrameHeader::SIZE + payload_len).next_multiple_of(8) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum OpKind {
    Put = 1,
    DelKey = 2,
    DelDup = 3,
}

impl OpKind {
    fn from_u8(value: u8) -> Option<OpKind> {
        match value {
            1 => Some(Self::Put),
            2 => Some(Self::DelKey),
            3 => Some(Self::DelDup),
            _ => None,
        }
    }
}

/// Append one op to a frame payload under construction. Returns the
/// offset of the value bytes relative to the start of the payload.
pub(crate) fn append_op(
    payload: &mut Vec<u8>,
    kind: OpKind,
    map: MapId,
    key: &[u8],
    value: &[u8],
) -> usize {
    payload.push(kind as u8);
    payload.push(map as u8);
    payload.extend_from_slice(U16::<LE>::new(key.len() as u16).as_bytes());
    payload.extend_from_slice(U32::<LE>::new(value.len() as u32).as_bytes());
    payload.extend_from_slice(key);
    let value_offset = payload.len();
    payload.extend_from_slice(value);
    value_offset
}

fn corrupted(op: &'static str) -> DbError {
    DbError::store(op, StoreErrorKind::Corrupted)
}

/// Apply one frame payload to the working maps. `payload_file_offset` is
/// the absolute file offset of the payload's first byte, used to record
/// mapped value references.
pub(crate) fn apply_payload(
    maps: &mut [MapState],
    payload: &[u8],
    payload_file_offset: u64,
) -> DbResult<()> {
    let mut cursor = 0usize;
    while cursor < payload.len() {
        if payload.len() - cursor < OP_HEADER_SIZE {
            return Err(corrupted("replay"));
        }
        let kind = OpKind::from_u8(payload[cursor]).ok_or_else(|| corrupted("replay"))?;
        let map = MapId::from_u8(payload[cursor + 1]).ok_or_else(|| corrupted("replay"))?;
        let key_len =
            u16::from_le_bytes([payload[cursor + 2], payload[cursor + 3]]) as usize;
        let val_len = u32::from_le_bytes([
            payload[cursor + 4],
            payload[cursor + 5],
            payload[cursor + 6],
            payload[cursor + 7],
        ]) as usize;

        let key_start = cursor + OP_HEADER_SIZE;
        let val_start = key_start + key_len;
        let end = val_start + val_len;
        if end > payload.len() {
            return Err(corrupted("replay"));
        }
        let key = &payload[key_start..val_start];
        let value = &payload[val_start..end];

        let state = &mut maps[map.index()];
        match kind {
            OpKind::Put => {
                if map.flags().dup_sorted {
                    state.insert_dup(key, value);
                } else if stores_mapped(map) {
                    state.put_single(
                        key,
                        ValueRef::Mapped {
                            offset: payload_file_offset + val_start as u64,
                            len: val_len as u32,
                        },
                    );
                } else {
                    state.put_single(key, ValueRef::Inline(value.into()));
                }
            }
            OpKind::DelKey => {
                state.remove_key(key);
            }
            OpKind::DelDup => {
                state.remove_dup(key, value);
            }
        }
        cursor = end;
    }
    Ok(())
}

/// Rebuild the committed root from the mapped file.
///
/// Header validation failures are fatal (`Corrupted` / `VersionMismatch`);
/// a bad frame merely ends replay, truncating to the last good commit.
pub(crate) fn replay(data: &[u8]) -> DbResult<Root> {
    if data.len() < FILE_HEADER_SIZE as usize {
        return Err(corrupted("open"));
    }
    let header = FileHeader::read_from(&data[..FILE_HEADER_SIZE as usize])
        .ok_or_else(|| corrupted("open"))?;
    if header.magic.get() != FILE_MAGIC {
        return Err(corrupted("open"));
    }
    if header.format_version.get() != FORMAT_VERSION {
        return Err(DbError::store("open", StoreErrorKind::VersionMismatch));
    }

    let mut root = Root::empty(FILE_HEADER_SIZE);
    let mut maps: Vec<MapState> = root.maps.iter().map(|m| (**m).clone()).collect();
    let mut offset = FILE_HEADER_SIZE as usize;
    let mut seq = 0u64;

    loop {
        if offset + FrameHeader::SIZE > data.len() {
            break;
        }
        let Some(frame) = FrameHeader::read_from(&data[offset..offset + FrameHeader::SIZE])
        else {
            break;
        };
        if frame.magic.get() != FRAME_MAGIC || frame.seq.get() != seq + 1 {
            break;
        }
        let payload_len = frame.payload_len.get() as usize;
        let payload_start = offset + FrameHeader::SIZE;
        if payload_start + payload_len > data.len() {
            break;
        }
        let payload = &data[payload_start..payload_start + payload_len];
        if xxh64(payload, 0) != frame.checksum.get() {
            break;
        }

        apply_payload(&mut maps, payload, payload_start as u64)?;
        seq = frame.seq.get();
        offset += frame_span(payload_len) as usize;
    }

    root.maps = maps.into_iter().map(std::sync::Arc::new).collect();
    root.seq = seq;
    root.append_offset = offset as u64;
    Ok(root)
}
