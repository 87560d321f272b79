//! Read and write transaction handles.
//!
//! A read transaction pins one committed root (an `Arc` clone) plus the
//! current mapping, and registers with the reader gate so the map cannot
//! be grown underneath it. A write transaction works on a copy-on-write
//! clone of the root and a frame payload buffer; nothing reaches the file
//! until `commit`, so dropping the handle discards the transaction.

use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::MutexGuard;
use zerocopy::AsBytes;

use crate::error::{DbResult, DbError, StoreErrorKind};
use crate::schema::MapId;

use super::Environment;
use super::frames::{self, FrameHeader, OpKind, frame_span};
use super::state::{MapState, Root, ValueRef, stores_mapped};

/// Snapshot-isolated read handle.
pub struct ReadTxn<'env> {
    env: &'env Environment,
    root: Arc<Root>,
    data: Arc<Mmap>,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn new(env: &'env Environment, root: Arc<Root>, data: Arc<Mmap>) -> ReadTxn<'env> {
        ReadTxn { env, root, data }
    }

    /// Sequence number of the commit this snapshot observes.
    pub fn seq(&self) -> u64 {
        self.root.seq
    }

    fn resolve<'a>(&'a self, value: &'a ValueRef) -> &'a [u8] {
        match value {
            ValueRef::Inline(bytes) => bytes,
            ValueRef::Mapped { offset, len } => {
                let start = *offset as usize;
                &self.data[start..start + *len as usize]
            }
        }
    }

    /// Single-valued lookup. Missing keys are `None`, not an error.
    pub fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]> {
        self.root.map(map).get(key).map(|v| self.resolve(v))
    }

    pub fn contains_key(&self, map: MapId, key: &[u8]) -> bool {
        self.root.map(map).contains_key(key)
    }

    /// Duplicate values of `key` in sort order. Empty for a missing key.
    pub fn dups(&self, map: MapId, key: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
        self.root
            .map(map)
            .dups(key)
            .into_iter()
            .flat_map(|set| set.iter())
            .map(|v| v.as_ref())
    }

    pub fn dup_contains(&self, map: MapId, key: &[u8], value: &[u8]) -> bool {
        self.root.map(map).contains_dup(key, value)
    }

    pub fn dups_with_prefix<'a>(
        &'a self,
        map: MapId,
        key: &[u8],
        prefix: &'a [u8],
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.root.map(map).dups_with_prefix(key, prefix)
    }

    pub fn dup_count(&self, map: MapId, key: &[u8]) -> usize {
        self.root.map(map).dups(key).map_or(0, |set| set.len())
    }

    /// Keys of `map` in sort order.
    pub fn scan_keys(&self, map: MapId) -> impl Iterator<Item = &[u8]> + '_ {
        self.root.map(map).iter().map(|(key, _)| key)
    }

    /// Entries of a single-valued map, values resolved.
    pub fn scan_single(&self, map: MapId) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.root.map(map).iter().filter_map(move |(key, slot)| {
            match slot {
                super::state::Slot::Single(value) => Some((key, self.resolve(value))),
                super::state::Slot::Dups(_) => None,
            }
        })
    }

    pub fn entry_count(&self, map: MapId) -> usize {
        self.root.map(map).len()
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        self.env.reader_done();
    }
}

/// Exclusive write handle. At most one exists per environment at a time.
pub struct WriteTxn<'env> {
    env: &'env Environment,
    _guard: MutexGuard<'env, ()>,
    data: Arc<Mmap>,
    maps: Vec<Arc<MapState>>,
    base_seq: u64,
    frame_start: u64,
    capacity: u64,
    ops: Vec<u8>,
    committed: bool,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        guard: MutexGuard<'env, ()>,
        root: &Root,
        data: Arc<Mmap>,
    ) -> WriteTxn<'env> {
        let capacity = data.len() as u64;
        WriteTxn {
            env,
            _guard: guard,
            data,
            maps: root.maps.clone(),
            base_seq: root.seq,
            frame_start: root.append_offset,
            capacity,
            ops: Vec::new(),
            committed: false,
        }
    }

    fn resolve<'a>(&'a self, value: &'a ValueRef) -> &'a [u8] {
        match value {
            ValueRef::Inline(bytes) => bytes,
            ValueRef::Mapped { offset, len } => {
                let start = *offset as usize;
                let pending_base = self.frame_start as usize + FrameHeader::SIZE;
                if start >= pending_base {
                    // Written by this transaction; the bytes are still in
                    // the frame buffer.
                    let rel = start - pending_base;
                    &self.ops[rel..rel + *len as usize]
                } else {
                    &self.data[start..start + *len as usize]
                }
            }
        }
    }

    /// Append an op to the pending frame, failing with `MapFull` when the
    /// frame would no longer fit in the mapped region. Returns the
    /// absolute file offset the value bytes will occupy after commit.
    fn push_op(
        &mut self,
        kind: OpKind,
        map: MapId,
        key: &[u8],
        value: &[u8],
        op: &'static str,
    ) -> DbResult<u64> {
        let key = super::state::bound_key(key);
        let projected =
            self.ops.len() + frames::OP_HEADER_SIZE + key.len() + value.len();
        if self.frame_start + frame_span(projected) > self.capacity {
            return Err(DbError::store(op, StoreErrorKind::MapFull));
        }
        let rel = frames::append_op(&mut self.ops, kind, map, key, value);
        Ok(self.frame_start + FrameHeader::SIZE as u64 + rel as u64)
    }

    fn state_mut(&mut self, map: MapId) -> &mut MapState {
        Arc::make_mut(&mut self.maps[map.index()])
    }

    // Reads observe this transaction's own writes.

    pub fn get(&self, map: MapId, key: &[u8]) -> Option<&[u8]> {
        self.maps[map.index()].get(key).map(|v| self.resolve(v))
    }

    pub fn contains_key(&self, map: MapId, key: &[u8]) -> bool {
        self.maps[map.index()].contains_key(key)
    }

    pub fn dups(&self, map: MapId, key: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
        self.maps[map.index()]
            .dups(key)
            .into_iter()
            .flat_map(|set| set.iter())
            .map(|v| v.as_ref())
    }

    pub fn dup_contains(&self, map: MapId, key: &[u8], value: &[u8]) -> bool {
        self.maps[map.index()].contains_dup(key, value)
    }

    pub fn dups_with_prefix<'a>(
        &'a self,
        map: MapId,
        key: &[u8],
        prefix: &'a [u8],
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.maps[map.index()].dups_with_prefix(key, prefix)
    }

    pub fn dup_count(&self, map: MapId, key: &[u8]) -> usize {
        self.maps[map.index()].dups(key).map_or(0, |set| set.len())
    }

    /// Replace the value of a single-valued key.
    pub fn put(&mut self, map: MapId, key: &[u8], value: &[u8]) -> DbResult<()> {
        debug_assert!(!map.flags().dup_sorted, "put on a sorted-duplicates map");
        let value_offset = self.push_op(OpKind::Put, map, key, value, "put")?;
        let mapped = stores_mapped(map);
        let len = value.len() as u32;
        let state = self.state_mut(map);
        if mapped {
            state.put_single(
                key,
                ValueRef::Mapped {
                    offset: value_offset,
                    len,
                },
            );
        } else {
            state.put_single(key, ValueRef::Inline(value.into()));
        }
        Ok(())
    }

    /// Idempotent insert: an existing key is left untouched (`KeyExist`
    /// absorbed) and `false` is returned.
    pub fn put_if_absent(&mut self, map: MapId, key: &[u8], value: &[u8]) -> DbResult<bool> {
        if self.contains_key(map, key) {
            return Ok(false);
        }
        self.put(map, key, value)?;
        Ok(true)
    }

    /// Insert into a sorted-duplicates map. Returns `false` when the exact
    /// `(key, value)` pair already exists.
    pub fn insert_dup(&mut self, map: MapId, key: &[u8], value: &[u8]) -> DbResult<bool> {
        debug_assert!(map.flags().dup_sorted, "insert_dup on a single-valued map");
        if let Some(size) = map.flags().fixed_dup_size {
            debug_assert_eq!(value.len(), size, "fixed-size duplicate has wrong width");
        }
        if self.dup_contains(map, key, value) {
            return Ok(false);
        }
        self.push_op(OpKind::Put, map, key, value, "insert_dup")?;
        self.state_mut(map).insert_dup(key, value);
        Ok(true)
    }

    /// Remove one `(key, value)` pair. Returns `false` when it was absent.
    pub fn remove_dup(&mut self, map: MapId, key: &[u8], value: &[u8]) -> DbResult<bool> {
        if !self.dup_contains(map, key, value) {
            return Ok(false);
        }
        self.push_op(OpKind::DelDup, map, key, value, "remove_dup")?;
        self.state_mut(map).remove_dup(key, value);
        Ok(true)
    }

    /// Remove a key and everything under it.
    pub fn remove_key(&mut self, map: MapId, key: &[u8]) -> DbResult<bool> {
        if !self.maps[map.index()].contains_key(super::state::bound_key(key)) {
            return Ok(false);
        }
        self.push_op(OpKind::DelKey, map, key, &[], "remove_key")?;
        self.state_mut(map).remove_key(key);
        Ok(true)
    }

    /// Atomically publish every change made in this transaction.
    ///
    /// The frame is written and flushed before the new root becomes
    /// visible, so a crash either preserves the previous commit or this
    /// one, never a mixture. An empty transaction is a no-op.
    pub fn commit(mut self) -> DbResult<u64> {
        self.committed = true;
        if self.ops.is_empty() {
            return Ok(self.base_seq);
        }

        let seq = self.base_seq + 1;
        let span = frame_span(self.ops.len()) as usize;
        let mut frame = Vec::with_capacity(span);
        frame.extend_from_slice(FrameHeader::new(seq, &self.ops).as_bytes());
        frame.extend_from_slice(&self.ops);
        frame.resize(span, 0);

        self.env.write_frame(self.frame_start, &frame)?;
        let root = Root {
            maps: std::mem::take(&mut self.maps),
            seq,
            append_offset: self.frame_start + span as u64,
        };
        self.env.publish(root);
        self.env.fire_commit_hooks(seq);
        Ok(seq)
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::trace!("write transaction discarded without commit");
        }
    }
}
