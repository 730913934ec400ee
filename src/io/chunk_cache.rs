use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

/// Default number of resident data chunks.
///
/// A full-scale chunk of a 512x512-tile slide is typically 0.5-2MB, so the
/// default bounds resident chunk data to a few GB on a fully panned session.
pub const DEFAULT_MAX_RESIDENT_CHUNKS: usize = 2048;

/// Resident data-chunk store with LRU eviction.
///
/// Each entry is a single owned buffer covering a chunk's whole byte range,
/// shared read-only by every codeblock of every tile that indexes into it.
///
/// Eviction never invalidates in-flight work: decompression tasks hold their
/// own `Bytes` handle, and a tile whose H coefficients are still needed simply
/// requests the chunk again on a later pass.
pub struct ChunkCache {
    cache: Mutex<LruCache<usize, Bytes>>,
}

impl ChunkCache {
    /// Create a new chunk cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RESIDENT_CHUNKS)
    }

    /// Create a new chunk cache bounded to `capacity` resident chunks.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Get a resident chunk, marking it as recently used.
    pub fn get(&self, chunk_index: usize) -> Option<Bytes> {
        self.cache.lock().get(&chunk_index).cloned()
    }

    /// Check whether a chunk is resident without updating LRU order.
    pub fn contains(&self, chunk_index: usize) -> bool {
        self.cache.lock().contains(&chunk_index)
    }

    /// Store a chunk, evicting the least-recently-used one if at capacity.
    ///
    /// Returns the index of the evicted chunk, if any.
    pub fn insert(&self, chunk_index: usize, data: Bytes) -> Option<usize> {
        let mut cache = self.cache.lock();
        match cache.push(chunk_index, data) {
            Some((evicted, _)) if evicted != chunk_index => Some(evicted),
            _ => None,
        }
    }

    /// Number of resident chunks.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether no chunk is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes held by resident chunks.
    pub fn resident_bytes(&self) -> usize {
        self.cache.lock().iter().map(|(_, data)| data.len()).sum()
    }

    /// Maximum number of resident chunks.
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    #[test]
    fn test_insert_and_get() {
        let cache = ChunkCache::with_capacity(4);
        assert!(cache.is_empty());

        cache.insert(7, chunk(16, 1));
        assert!(cache.contains(7));
        assert_eq!(cache.get(7).unwrap().len(), 16);
        assert_eq!(cache.resident_bytes(), 16);
        assert!(cache.get(8).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ChunkCache::with_capacity(2);

        assert_eq!(cache.insert(0, chunk(4, 0)), None);
        assert_eq!(cache.insert(1, chunk(4, 1)), None);

        // Touch chunk 0 so chunk 1 becomes least recently used
        cache.get(0);

        assert_eq!(cache.insert(2, chunk(4, 2)), Some(1));
        assert!(cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_contains_does_not_touch() {
        let cache = ChunkCache::with_capacity(2);
        cache.insert(0, chunk(4, 0));
        cache.insert(1, chunk(4, 1));

        // peek-style check leaves chunk 0 as the eviction candidate
        assert!(cache.contains(0));
        assert_eq!(cache.insert(2, chunk(4, 2)), Some(0));
    }

    #[test]
    fn test_reinsert_same_chunk_is_not_eviction() {
        let cache = ChunkCache::with_capacity(1);
        cache.insert(3, chunk(4, 0));
        assert_eq!(cache.insert(3, chunk(8, 1)), None);
        assert_eq!(cache.get(3).unwrap().len(), 8);
    }

    #[test]
    fn test_evicted_bytes_stay_valid_for_holders() {
        let cache = ChunkCache::with_capacity(1);
        cache.insert(0, chunk(4, 9));
        let held = cache.get(0).unwrap();

        cache.insert(1, chunk(4, 1));
        assert!(!cache.contains(0));
        assert_eq!(&held[..], &[9, 9, 9, 9]);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let cache = ChunkCache::with_capacity(0);
        assert_eq!(cache.capacity(), 1);
    }
}
