//! The array hash table: a bucket-indexed hash table where every bucket owns
//! a single packed byte region holding `(length-prefixed key, value)`
//! records, rather than a separate heap allocation per entry.
//!
//! This is the leaf container a [`crate::trie::HatTrie`] bursts into once a
//! branch's worth of suffixes grows too large to stay as one flat table; it
//! is also usable on its own as a plain byte-keyed counter map.

use crate::hash::hash32;
use crate::varint;
use std::fmt;

/// Value type this crate stores: a fixed-width unsigned counter. Generic
/// value types are explicitly out of scope (see SPEC_FULL.md Non-goals).
pub type Value = u64;

const VALUE_WIDTH: usize = std::mem::size_of::<Value>();

/// Default number of buckets a freshly created table starts with. Must stay
/// a power of two; all bucket-index arithmetic relies on it.
pub const DEFAULT_BUCKETS: usize = 16;

/// Default load factor at which the bucket array doubles.
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 1.0;

/// Tunables for constructing an [`ArrayHashTable`] away from the defaults.
#[derive(Clone, Copy, Debug)]
pub struct AhtConfig {
    pub initial_buckets: usize,
    pub max_load_factor: f32,
}

impl Default for AhtConfig {
    fn default() -> Self {
        Self {
            initial_buckets: DEFAULT_BUCKETS,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }
}

/// One bucket's packed slot region: a sequence of zero or more records laid
/// out back to back as `[varint keylen][keylen key bytes][8 byte value]`.
#[derive(Default)]
pub(crate) struct Bucket {
    data: Vec<u8>,
    /// Number of records currently packed into `data`. Tracked alongside the
    /// byte buffer so sizing a transient sort buffer doesn't require either
    /// a full scan or conflating byte length with record count.
    count: usize,
}

impl Bucket {
    /// Returns `(record_start, key_end, value_start)` for the record whose
    /// key matches `key`, if present. `record_start` is the offset of the
    /// record's varint length header, needed to splice the whole record out
    /// on removal.
    fn find(&self, key: &[u8]) -> Option<(usize, usize, usize)> {
        let mut offset = 0;
        while offset < self.data.len() {
            let record_start = offset;
            let (keylen, consumed) = varint::read(&self.data[offset..]);
            let key_start = offset + consumed;
            let key_end = key_start + keylen;
            let value_start = key_end;
            let value_end = value_start + VALUE_WIDTH;
            if &self.data[key_start..key_end] == key {
                return Some((record_start, key_end, value_start));
            }
            offset = value_end;
        }
        None
    }

    fn value_at(&self, value_start: usize) -> Value {
        let bytes: [u8; VALUE_WIDTH] = self.data[value_start..value_start + VALUE_WIDTH]
            .try_into()
            .expect("record value field is exactly VALUE_WIDTH bytes");
        Value::from_ne_bytes(bytes)
    }

    fn set_value_at(&mut self, value_start: usize, value: Value) {
        self.data[value_start..value_start + VALUE_WIDTH].copy_from_slice(&value.to_ne_bytes());
    }

    /// Appends a brand new zero-valued record for `key`, returning the byte
    /// offset of its value field.
    fn append(&mut self, key: &[u8]) -> usize {
        varint::write(&mut self.data, key.len());
        self.data.extend_from_slice(key);
        let value_start = self.data.len();
        self.data.extend_from_slice(&Value::to_ne_bytes(0));
        self.count += 1;
        value_start
    }

    /// Removes the record matching `key`, compacting the slot region.
    /// Returns `true` if a record was removed.
    fn remove(&mut self, key: &[u8]) -> bool {
        let Some((record_start, _, value_start)) = self.find(key) else {
            return false;
        };
        let record_end = value_start + VALUE_WIDTH;
        self.data.drain(record_start..record_end);
        self.count -= 1;
        true
    }

    fn record_count(&self) -> usize {
        self.count
    }

    fn iter_unordered(&self) -> BucketIter<'_> {
        BucketIter {
            data: &self.data,
            offset: 0,
        }
    }

    fn byte_size(&self) -> usize {
        self.data.capacity()
    }
}

/// Lazily decodes records from a single bucket's slot region, front to back.
pub(crate) struct BucketIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for BucketIter<'a> {
    type Item = (&'a [u8], Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let (keylen, consumed) = varint::read(&self.data[self.offset..]);
        let key_start = self.offset + consumed;
        let key_end = key_start + keylen;
        let value_start = key_end;
        let value_end = value_start + VALUE_WIDTH;
        let key = &self.data[key_start..key_end];
        let bytes: [u8; VALUE_WIDTH] = self.data[value_start..value_end]
            .try_into()
            .expect("record value field is exactly VALUE_WIDTH bytes");
        self.offset = value_end;
        Some((key, Value::from_ne_bytes(bytes)))
    }
}

/// A handle to a single value cell inside an [`ArrayHashTable`], borrowing
/// the table mutably so that the handle cannot outlive the next mutating
/// call (which might move or free the bytes it points at).
pub struct AhtValueRef<'a> {
    bucket: &'a mut Bucket,
    value_start: usize,
}

impl AhtValueRef<'_> {
    pub fn get(&self) -> Value {
        self.bucket.value_at(self.value_start)
    }

    pub fn set(&mut self, value: Value) {
        self.bucket.set_value_at(self.value_start, value);
    }
}

impl std::ops::AddAssign<Value> for AhtValueRef<'_> {
    fn add_assign(&mut self, rhs: Value) {
        let v = self.get().wrapping_add(rhs);
        self.set(v);
    }
}

/// A bucket-indexed hash table whose buckets each own one packed byte
/// region of records. See module docs and SPEC_FULL.md §3.2/§4.1.
pub struct ArrayHashTable {
    buckets: Vec<Bucket>,
    n_records: usize,
    max_load_factor: f32,
}

impl ArrayHashTable {
    pub fn new() -> Self {
        Self::with_config(AhtConfig::default())
    }

    pub fn with_config(config: AhtConfig) -> Self {
        assert!(config.initial_buckets.is_power_of_two());
        assert!(config.max_load_factor > 0.0);
        let mut buckets = Vec::with_capacity(config.initial_buckets);
        buckets.resize_with(config.initial_buckets, Bucket::default);
        Self {
            buckets,
            n_records: 0,
            max_load_factor: config.max_load_factor,
        }
    }

    #[inline]
    fn bucket_index(&self, key: &[u8]) -> usize {
        hash32(key) as usize & (self.buckets.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.n_records
    }

    pub fn is_empty(&self) -> bool {
        self.n_records == 0
    }

    pub fn buckets_len(&self) -> usize {
        self.buckets.len()
    }

    /// Looks up `key`, inserting a zero-valued record if absent, and returns
    /// a handle to its value cell plus whether the record was newly
    /// inserted.
    pub fn get_or_create(&mut self, key: &[u8]) -> (AhtValueRef<'_>, bool) {
        let (vref, inserted, _len) = self.get_or_create_with_len(key);
        (vref, inserted)
    }

    /// As [`ArrayHashTable::get_or_create`], but also hands back the table's
    /// record count after the call, so a caller deciding whether to burst
    /// (e.g. [`crate::trie::HatTrie`]) doesn't need a second call just to
    /// read `len()` once the value handle's borrow has ended.
    pub(crate) fn get_or_create_with_len(&mut self, key: &[u8]) -> (AhtValueRef<'_>, bool, usize) {
        let idx = self.bucket_index(key);
        if let Some((_, _, value_start)) = self.buckets[idx].find(key) {
            let len = self.n_records;
            return (
                AhtValueRef {
                    bucket: &mut self.buckets[idx],
                    value_start,
                },
                false,
                len,
            );
        }

        let value_start = self.buckets[idx].append(key);
        self.n_records += 1;

        if self.n_records as f32 > self.buckets.len() as f32 * self.max_load_factor {
            self.resize();
            // Bucket index and offset both change after a resize; find the
            // record again in its new home. It is guaranteed to be present.
            let idx = self.bucket_index(key);
            let (_, _, value_start) = self.buckets[idx]
                .find(key)
                .expect("just-inserted record must be found after resize");
            let len = self.n_records;
            return (
                AhtValueRef {
                    bucket: &mut self.buckets[idx],
                    value_start,
                },
                true,
                len,
            );
        }

        let len = self.n_records;
        (
            AhtValueRef {
                bucket: &mut self.buckets[idx],
                value_start,
            },
            true,
            len,
        )
    }

    /// Read-only lookup; never mutates, never resizes.
    pub fn try_get(&self, key: &[u8]) -> Option<Value> {
        let idx = self.bucket_index(key);
        self.buckets[idx]
            .find(key)
            .map(|(_, _, value_start)| self.buckets[idx].value_at(value_start))
    }

    /// Removes `key`, returning `true` if it was present.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let idx = self.bucket_index(key);
        let removed = self.buckets[idx].remove(key);
        if removed {
            self.n_records -= 1;
        }
        removed
    }

    fn resize(&mut self) {
        let old_buckets = std::mem::replace(&mut self.buckets, Vec::new());
        let new_len = old_buckets.len() * 2;
        log::trace!(
            "aht resize: {} -> {} buckets, {} records",
            old_buckets.len(),
            new_len,
            self.n_records
        );
        let mut new_buckets = Vec::with_capacity(new_len);
        new_buckets.resize_with(new_len, Bucket::default);

        for bucket in &old_buckets {
            for (key, value) in bucket.iter_unordered() {
                let new_idx = hash32(key) as usize & (new_len - 1);
                let value_start = new_buckets[new_idx].append(key);
                new_buckets[new_idx].set_value_at(value_start, value);
            }
        }

        self.buckets = new_buckets;
    }

    /// Visits every `(suffix, value)` pair in bucket-index order, within a
    /// bucket front-to-back as stored. No ordering guarantee beyond that.
    pub fn iter_unordered(&self) -> impl Iterator<Item = (&[u8], Value)> {
        self.buckets.iter().flat_map(|b| b.iter_unordered())
    }

    /// Visits every `(suffix, value)` pair with buckets in index order, but
    /// within each bucket sorts records by key bytes first (a transient
    /// index sized to that bucket's record count), yielding overall
    /// lexicographic order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&[u8], Value)> {
        self.buckets.iter().flat_map(|b| {
            let mut records: Vec<(&[u8], Value)> = Vec::with_capacity(b.record_count());
            records.extend(b.iter_unordered());
            records.sort_by(|a, b| a.0.cmp(b.0));
            records.into_iter()
        })
    }

    /// Consumes the table, yielding owned `(suffix, value)` pairs. Used by
    /// [`crate::trie`] when bursting a leaf: the old table is destroyed as
    /// part of redistributing its records into child tables.
    pub(crate) fn into_records(self) -> Vec<(Vec<u8>, Value)> {
        let mut out = Vec::with_capacity(self.n_records);
        for bucket in &self.buckets {
            for (key, value) in bucket.iter_unordered() {
                out.push((key.to_vec(), value));
            }
        }
        out
    }

    /// Best-effort retained-byte estimate: sum of each bucket's allocated
    /// capacity plus the table's own bucket-array allocation. Diagnostic
    /// only, not asserted on by tests (see SPEC_FULL.md §6).
    pub fn size_of_estimate(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.buckets.capacity() * std::mem::size_of::<Bucket>()
            + self.buckets.iter().map(Bucket::byte_size).sum::<usize>()
    }
}

impl Default for ArrayHashTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArrayHashTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayHashTable")
            .field("n_buckets", &self.buckets.len())
            .field("n_records", &self.n_records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn get_or_create_initializes_to_zero() {
        let mut t = ArrayHashTable::new();
        let (v, inserted) = t.get_or_create(b"hello");
        assert!(inserted);
        assert_eq!(v.get(), 0);
    }

    #[test]
    fn increment_then_read_back() {
        let mut t = ArrayHashTable::new();
        {
            let (mut v, _) = t.get_or_create(b"hello");
            v += 1;
            v += 1;
        }
        assert_eq!(t.try_get(b"hello"), Some(2));
    }

    #[test]
    fn get_or_create_with_len_reports_post_insert_count() {
        let mut t = ArrayHashTable::new();
        let (_, inserted, len) = t.get_or_create_with_len(b"a");
        assert!(inserted);
        assert_eq!(len, 1);
        let (_, inserted, len) = t.get_or_create_with_len(b"b");
        assert!(inserted);
        assert_eq!(len, 2);
        let (_, inserted, len) = t.get_or_create_with_len(b"a");
        assert!(!inserted);
        assert_eq!(len, 2);
    }

    #[test]
    fn try_get_absent_is_none() {
        let t = ArrayHashTable::new();
        assert_eq!(t.try_get(b"missing"), None);
    }

    #[test]
    fn del_removes_and_compacts() {
        let mut t = ArrayHashTable::new();
        t.get_or_create(b"a").0.set(1);
        t.get_or_create(b"b").0.set(2);
        t.get_or_create(b"c").0.set(3);
        assert!(t.del(b"b"));
        assert_eq!(t.try_get(b"b"), None);
        assert_eq!(t.try_get(b"a"), Some(1));
        assert_eq!(t.try_get(b"c"), Some(3));
        assert_eq!(t.len(), 2);
        assert!(!t.del(b"b"));
    }

    #[test]
    fn empty_key_is_a_valid_record() {
        let mut t = ArrayHashTable::new();
        t.get_or_create(b"").0.set(42);
        assert_eq!(t.try_get(b""), Some(42));
    }

    #[test]
    fn nul_byte_keys_do_not_collide() {
        let mut t = ArrayHashTable::new();
        t.get_or_create(&[0x00, 0x14]).0.set(7);
        t.get_or_create(&[0x00, 0x14, 0x00]).0.set(14);
        assert_eq!(t.try_get(&[0x00, 0x14]), Some(7));
        assert_eq!(t.try_get(&[0x00, 0x14, 0x00]), Some(14));
    }

    #[test]
    fn resize_preserves_all_records() {
        let mut t = ArrayHashTable::with_config(AhtConfig {
            initial_buckets: 2,
            max_load_factor: 1.0,
        });
        for i in 0..500u64 {
            let key = i.to_le_bytes();
            t.get_or_create(&key).0.set(i);
        }
        assert!(t.buckets_len() > 2);
        for i in 0..500u64 {
            let key = i.to_le_bytes();
            assert_eq!(t.try_get(&key), Some(i));
        }
        assert_eq!(t.len(), 500);
    }

    #[test]
    fn unordered_iteration_visits_each_record_once() {
        let mut t = ArrayHashTable::new();
        let mut reference: HashMap<Vec<u8>, u64> = HashMap::new();
        for i in 0..200u64 {
            let key = format!("key-{i}").into_bytes();
            t.get_or_create(&key).0.set(i);
            reference.insert(key, i);
        }
        let mut seen = 0;
        for (key, value) in t.iter_unordered() {
            assert_eq!(reference.get(key), Some(&value));
            seen += 1;
        }
        assert_eq!(seen, reference.len());
    }

    #[test]
    fn sorted_iteration_is_lexicographically_nondecreasing() {
        let mut t = ArrayHashTable::new();
        for i in 0..300u64 {
            let key = format!("k{i}").into_bytes();
            t.get_or_create(&key).0.set(i);
        }
        let mut prev: Option<Vec<u8>> = None;
        let mut count = 0;
        for (key, _) in t.iter_sorted() {
            if let Some(p) = &prev {
                assert!(p.as_slice() <= key, "not sorted: {p:?} > {key:?}");
            }
            prev = Some(key.to_vec());
            count += 1;
        }
        assert_eq!(count, 300);
    }

    #[test]
    fn into_records_drains_every_entry_exactly_once() {
        let mut t = ArrayHashTable::new();
        for i in 0..64u64 {
            t.get_or_create(&i.to_le_bytes()).0.set(i);
        }
        let records = t.into_records();
        assert_eq!(records.len(), 64);
    }
}
