// String interner - every string in the interpreter is canonicalized here,
// so value equality is handle equality and hashing is a cached u64.
//
// The map buckets by content hash; each bucket holds the ids of live
// interned strings with that hash. Strings condemned by the collector
// (carrying the stale white) are skipped during lookup and purged from
// their bucket when the sweep actually frees them; a still-current-white
// string that gets re-interned mid-cycle is resurrected by marking it
// black (strings have no children, so black is immediately correct).

use ahash::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use super::gc_object::StringId;
use super::object_pool::ObjectPool;

pub struct StringInterner {
    map: HashMap<u64, Vec<StringId>, RandomState>,
    hash_builder: RandomState,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hash_builder: RandomState::new(),
        }
    }

    /// Intern a byte string: returns the existing id when the content is
    /// already present, allocates (and registers) a new string otherwise.
    pub fn intern(&mut self, bytes: &[u8], pool: &mut ObjectPool, current_white: u8) -> StringId {
        let hash = self.hash_bytes(bytes);
        let other_white = 1 - current_white;

        if let Some(bucket) = self.map.get(&hash) {
            for &id in bucket {
                let obj = match pool.strings.get(id.0) {
                    Some(o) => o,
                    None => continue,
                };
                if obj.header.is_dead(other_white) {
                    // Condemned by the finished mark phase; the sweeper
                    // will purge it. Pretend it is gone.
                    continue;
                }
                if obj.data.as_bytes() == bytes {
                    if obj.header.is_white() {
                        if let Some(o) = pool.strings.get_mut(id.0) {
                            o.header.make_black();
                        }
                    }
                    return id;
                }
            }
        }

        let id = pool.alloc_string(bytes.to_vec().into_boxed_slice(), hash, current_white);
        self.map.entry(hash).or_default().push(id);
        id
    }

    /// Look up without allocating. Used by tests and by `rawequal`-style
    /// paths that must not disturb the heap.
    pub fn find(&self, bytes: &[u8], pool: &ObjectPool) -> Option<StringId> {
        let hash = self.hash_bytes(bytes);
        let bucket = self.map.get(&hash)?;
        bucket
            .iter()
            .copied()
            .find(|id| matches!(pool.strings.get(id.0), Some(o) if o.data.as_bytes() == bytes))
    }

    /// Drop a freed string from its bucket. Called by the sweeper with
    /// the hash read out of the object before release.
    pub fn remove_dead(&mut self, hash: u64, id: StringId) {
        if let Some(bucket) = self.map.get_mut(&hash) {
            bucket.retain(|&i| i != id);
            if bucket.is_empty() {
                self.map.remove(&hash);
            }
        }
    }

    #[inline(always)]
    fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        bytes.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_identity() {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let a = interner.intern(b"hello", &mut pool, 0);
        let b = interner.intern(b"hello", &mut pool, 0);
        let c = interner.intern(b"world", &mut pool, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.string(a).as_bytes(), b"hello");
    }

    #[test]
    fn test_intern_non_utf8() {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let a = interner.intern(&[0xff, 0x00, 0x80], &mut pool, 0);
        let b = interner.intern(&[0xff, 0x00, 0x80], &mut pool, 0);
        assert_eq!(a, b);
    }
}
