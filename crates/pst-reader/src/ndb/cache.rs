//! LRU caches hanging off the open file.
//!
//! Caches are opaque to correctness; every hit could be recomputed from the
//! backing file. Insertions happen under one mutex so lookups never observe
//! torn entries.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::page::BbtEntry;

/// Soft bound on cached decoded leaf payloads (up to 8 KiB each).
const BLOCK_CACHE_CAPACITY: usize = 256;
/// Soft bound on cached BBT lookups.
const ENTRY_CACHE_CAPACITY: usize = 1024;

pub(crate) struct NdbCaches {
    pub(crate) blocks: LruCache<u64, Arc<Vec<u8>>>,
    pub(crate) entries: LruCache<u64, BbtEntry>,
}

impl NdbCaches {
    pub(crate) fn new() -> Self {
        Self {
            blocks: LruCache::new(NonZeroUsize::new(BLOCK_CACHE_CAPACITY).unwrap()),
            entries: LruCache::new(NonZeroUsize::new(ENTRY_CACHE_CAPACITY).unwrap()),
        }
    }
}
