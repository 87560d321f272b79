//! In-memory shape of the committed database state.
//!
//! The environment keeps one ordered map per schema map. Values either
//! live inline (small rows, duplicate values) or as `(offset, len)`
//! references into the mapped data file (`UnitInfoByCode` records, which
//! must be readable without copying). A committed root is immutable and
//! shared: readers pin it with an `Arc` clone, the writer copies only the
//! maps it touches.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use crate::schema::{MAP_COUNT, MAX_KEY_SIZE, MapId};

/// Clamp a key to the maximum key size. The truncated bytes are the
/// lookup identity, applied uniformly on reads and writes.
pub(crate) fn bound_key(key: &[u8]) -> &[u8] {
    &key[..key.len().min(MAX_KEY_SIZE)]
}

/// Maps whose single values are stored as references into the data file
/// rather than copied inline. Only unit records need the zero-copy read
/// path.
pub(crate) fn stores_mapped(map: MapId) -> bool {
    matches!(map, MapId::UnitInfoByCode)
}

/// Where a committed value's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValueRef {
    Inline(Box<[u8]>),
    /// Absolute offset and length of the value bytes inside the data file.
    Mapped { offset: u64, len: u32 },
}

/// One key's committed content.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Single(ValueRef),
    Dups(BTreeSet<Box<[u8]>>),
}

/// One named map's committed entries, ordered by key bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct MapState {
    entries: BTreeMap<Box<[u8]>, Slot>,
}

impl MapState {
    pub fn get(&self, key: &[u8]) -> Option<&ValueRef> {
        match self.entries.get(bound_key(key)) {
            Some(Slot::Single(value)) => Some(value),
            _ => None,
        }
    }

    pub fn dups(&self, key: &[u8]) -> Option<&BTreeSet<Box<[u8]>>> {
        match self.entries.get(bound_key(key)) {
            Some(Slot::Dups(values)) => Some(values),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(bound_key(key))
    }

    pub fn contains_dup(&self, key: &[u8], value: &[u8]) -> bool {
        self.dups(key).is_some_and(|set| set.contains(value))
    }

    /// Duplicate values of `key` starting with `prefix`, in sort order.
    pub fn dups_with_prefix<'a>(
        &'a self,
        key: &[u8],
        prefix: &'a [u8],
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.dups(key)
            .into_iter()
            .flat_map(move |set| {
                set.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            })
            .take_while(move |value| value.starts_with(prefix))
            .map(|value| value.as_ref())
    }

    pub fn put_single(&mut self, key: &[u8], value: ValueRef) {
        self.entries
            .insert(bound_key(key).into(), Slot::Single(value));
    }

    /// Returns false when the exact value was already present.
    pub fn insert_dup(&mut self, key: &[u8], value: &[u8]) -> bool {
        match self
            .entries
            .entry(bound_key(key).into())
            .or_insert_with(|| Slot::Dups(BTreeSet::new()))
        {
            Slot::Dups(set) => set.insert(value.into()),
            Slot::Single(_) => {
                debug_assert!(false, "insert_dup on single-valued key");
                false
            }
        }
    }

    /// Returns true when the value existed. Removes the key entirely when
    /// its duplicate set empties.
    pub fn remove_dup(&mut self, key: &[u8], value: &[u8]) -> bool {
        let key = bound_key(key);
        let (removed, emptied) = match self.entries.get_mut(key) {
            Some(Slot::Dups(set)) => (set.remove(value), set.is_empty()),
            _ => (false, false),
        };
        if emptied {
            self.entries.remove(key);
        }
        removed
    }

    pub fn remove_key(&mut self, key: &[u8]) -> bool {
        self.entries.remove(bound_key(key)).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Slot)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One committed version of the whole database.
#[derive(Debug, Clone)]
pub(crate) struct Root {
    pub maps: Vec<Arc<MapState>>,
    /// Sequence number of the last committed frame (0 for a fresh file).
    pub seq: u64,
    /// File offset where the next commit frame starts.
    pub append_offset: u64,
}

impl Root {
    pub fn empty(append_offset: u64) -> Root {
        Root {
            maps: (0..MAP_COUNT).map(|_| Arc::new(MapState::default())).collect(),
            seq: 0,
            append_offset,
        }
    }

    pub fn map(&self, map: MapId) -> &MapState {
        &self.maps[map.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_put_get() {
        let mut state = MapState::default();
        state.put_single(b"k", ValueRef::Inline(b"v1".as_slice().into()));
        state.put_single(b"k", ValueRef::Inline(b"v2".as_slice().into()));
        assert_eq!(
            state.get(b"k"),
            Some(&ValueRef::Inline(b"v2".as_slice().into()))
        );
        assert!(state.get(b"missing").is_none());
    }

    #[test]
    fn test_dup_sorted_order() {
        let mut state = MapState::default();
        assert!(state.insert_dup(b"k", b"bb"));
        assert!(state.insert_dup(b"k", b"aa"));
        assert!(!state.insert_dup(b"k", b"aa"));

        let values: Vec<&[u8]> = state.dups(b"k").unwrap().iter().map(|v| v.as_ref()).collect();
        assert_eq!(values, vec![b"aa".as_slice(), b"bb".as_slice()]);
    }

    #[test]
    fn test_remove_last_dup_removes_key() {
        let mut state = MapState::default();
        state.insert_dup(b"k", b"v");
        assert!(state.remove_dup(b"k", b"v"));
        assert!(!state.contains_key(b"k"));
        assert!(!state.remove_dup(b"k", b"v"));
    }

    #[test]
    fn test_prefix_scan() {
        let mut state = MapState::default();
        state.insert_dup(b"k", b"aa-1");
        state.insert_dup(b"k", b"aa-2");
        state.insert_dup(b"k", b"ab-1");

        let hits: Vec<&[u8]> = state.dups_with_prefix(b"k", b"aa").collect();
        assert_eq!(hits, vec![b"aa-1".as_slice(), b"aa-2".as_slice()]);

        assert_eq!(state.dups_with_prefix(b"k", b"zz").count(), 0);
    }

    #[test]
    fn test_key_truncation_identity() {
        let mut state = MapState::default();
        let long_key = vec![7u8; MAX_KEY_SIZE + 1];
        state.put_single(&long_key, ValueRef::Inline(b"v".as_slice().into()));
        assert!(state.get(&long_key[..MAX_KEY_SIZE]).is_some());
        assert!(state.get(&long_key).is_some());
    }
}
