//! Deduplicating string storage.
//!
//! Every distinct byte sequence is stored once; columns store the returned 64-bit offset.
//! A pool is populated by a single writer and then shared read-only (usually behind an
//! `Arc`) by every column produced in the same decode or write scope.

use ahash::{AHashMap, RandomState};
use smallvec::SmallVec;

/// Offset marking a missing string.
pub const NONE_OFFSET: u64 = u64::MAX;
/// Offset marking a NaN placeholder written in place of a string.
pub const NAN_OFFSET: u64 = u64::MAX - 1;

const HEADER_BYTES: usize = 8;

/// Whether `offset` is one of the reserved sentinels rather than a pool entry.
pub fn is_sentinel(offset: u64) -> bool {
    offset == NONE_OFFSET || offset == NAN_OFFSET
}

#[derive(Clone, Debug, Default)]
pub struct StringPool {
    /// Entries laid out back to back as `[u64 little-endian length][bytes]`.
    data: Vec<u8>,
    /// Hash of the entry bytes -> offsets of entries with that hash.
    index: AHashMap<u64, SmallVec<[u64; 1]>>,
    hasher: RandomState,
    entries: usize,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct strings interned.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Total bytes held, including per-entry headers.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Intern `view`, returning the offset of the (possibly pre-existing) entry.
    pub fn get(&mut self, view: &[u8]) -> u64 {
        let hash = self.hasher.hash_one(view);
        if let Some(offset) = self.lookup(hash, view) {
            return offset;
        }

        let offset = self.data.len() as u64;
        self.data.extend_from_slice(&(view.len() as u64).to_le_bytes());
        self.data.extend_from_slice(view);
        self.index.entry(hash).or_default().push(offset);
        self.entries += 1;
        offset
    }

    pub fn get_str(&mut self, value: &str) -> u64 {
        self.get(value.as_bytes())
    }

    /// Offset of `view` if it has already been interned.
    pub fn find(&self, view: &[u8]) -> Option<u64> {
        self.lookup(self.hasher.hash_one(view), view)
    }

    /// The exact bytes interned at `offset`, or `None` for sentinels and out-of-range offsets.
    pub fn get_view(&self, offset: u64) -> Option<&[u8]> {
        if is_sentinel(offset) {
            return None;
        }
        let start = usize::try_from(offset).ok()?;
        let header = self.data.get(start..start.checked_add(HEADER_BYTES)?)?;
        let mut raw = [0u8; HEADER_BYTES];
        raw.copy_from_slice(header);
        let len = usize::try_from(u64::from_le_bytes(raw)).ok()?;
        let body = start + HEADER_BYTES;
        self.data.get(body..body.checked_add(len)?)
    }

    pub fn get_str_view(&self, offset: u64) -> Option<&str> {
        std::str::from_utf8(self.get_view(offset)?).ok()
    }

    /// Iterate `(offset, bytes)` for every entry in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        let mut pos = 0usize;
        std::iter::from_fn(move || {
            let offset = pos as u64;
            let view = self.get_view(offset)?;
            pos += HEADER_BYTES + view.len();
            Some((offset, view))
        })
    }

    fn lookup(&self, hash: u64, view: &[u8]) -> Option<u64> {
        self.index
            .get(&hash)?
            .iter()
            .copied()
            .find(|&offset| self.get_view(offset) == Some(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_share_an_offset() {
        let mut pool = StringPool::new();
        let a = pool.get_str("mene");
        let b = pool.get_str("tekel");
        let c = pool.get_str("mene");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get_str_view(b), Some("tekel"));
    }

    #[test]
    fn empty_string_is_a_real_entry() {
        let mut pool = StringPool::new();
        let empty = pool.get(b"");
        assert!(!is_sentinel(empty));
        assert_eq!(pool.get_view(empty), Some(&b""[..]));
        assert_eq!(pool.find(b""), Some(empty));
    }

    #[test]
    fn sentinels_and_garbage_offsets_have_no_view() {
        let mut pool = StringPool::new();
        pool.get_str("x");
        assert_eq!(pool.get_view(NONE_OFFSET), None);
        assert_eq!(pool.get_view(NAN_OFFSET), None);
        assert_eq!(pool.get_view(1_000), None);
    }

    #[test]
    fn iter_walks_entries_in_insertion_order() {
        let mut pool = StringPool::new();
        for s in ["b", "a", "b", "upharsin"] {
            pool.get_str(s);
        }
        let seen: Vec<&[u8]> = pool.iter().map(|(_, v)| v).collect();
        assert_eq!(seen, vec![&b"b"[..], &b"a"[..], &b"upharsin"[..]]);
    }
}
