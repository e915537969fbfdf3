// Chunk Store (C1): size-bounded, content-addressed chunk cache with
// oldest-first eviction, plus the inbound storage-request FIFO that feeds
// the chunk transfer protocol's unsolicited-push path.
//
// Eviction order is insertion order, not access order: `lru::LruCache` is
// configured here as a strict FIFO by only ever reading through `peek`,
// never `get`, so a hot chunk is not spared just because it was recently
// served.

use std::collections::VecDeque;
use std::sync::Mutex;

use libp2p::PeerId;
use lru::LruCache;

use crate::error::FileZapResult;

/// A pending, not-yet-validated chunk pushed by a peer.
#[derive(Debug, Clone)]
pub struct StorageRequest {
    pub chunk_hash: String,
    pub data: Vec<u8>,
    pub owner: PeerId,
}

struct Inner {
    chunks: LruCache<String, Vec<u8>>,
    total_bytes: usize,
    pending: VecDeque<StorageRequest>,
}

/// Size-bounded chunk store with oldest-first eviction under a single mutex.
pub struct ChunkStore {
    inner: Mutex<Inner>,
    max_chunk_size: usize,
    max_total_size: usize,
}

impl ChunkStore {
    pub fn new(max_chunk_size: usize, max_total_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                // Capacity is unbounded from lru's perspective; we enforce the
                // byte budget ourselves and evict by insertion order.
                chunks: LruCache::unbounded(),
                total_bytes: 0,
                pending: VecDeque::new(),
            }),
            max_chunk_size,
            max_total_size,
        }
    }

    /// Store a chunk under its content hash, evicting the oldest entries to
    /// make room if necessary. Returns `false` without changing any state if
    /// the chunk cannot fit even after evicting everything evictable (i.e.
    /// it exceeds `max_chunk_size` or `max_total_size` outright).
    pub fn store(&self, hash: String, bytes: Vec<u8>) -> FileZapResult<bool> {
        if hash.is_empty() || bytes.len() > self.max_chunk_size || bytes.len() > self.max_total_size {
            return Ok(false);
        }

        let mut inner = self.inner.lock().unwrap();

        if let Some(existing) = inner.chunks.peek(&hash) {
            if existing.len() == bytes.len() {
                return Ok(true);
            }
        }

        while inner.total_bytes + bytes.len() > self.max_total_size {
            match inner.chunks.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes -= evicted.len();
                }
                None => return Ok(false),
            }
        }

        let len = bytes.len();
        if let Some(old) = inner.chunks.put(hash, bytes) {
            inner.total_bytes -= old.len();
        }
        inner.total_bytes += len;
        Ok(true)
    }

    /// Look up a chunk by hash without promoting it (peek-only, preserves FIFO order).
    pub fn get(&self, hash: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.chunks.peek(hash).cloned()
    }

    pub fn remove(&self, hash: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.chunks.pop(hash);
        if let Some(bytes) = &removed {
            inner.total_bytes -= bytes.len();
        }
        removed
    }

    pub fn contains(&self, hash: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.chunks.contains(hash)
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue an unsolicited chunk push for later validation.
    pub fn enqueue_inbound(&self, request: StorageRequest) {
        self.inner.lock().unwrap().pending.push_back(request);
    }

    /// Pop the oldest queued inbound push, if any.
    pub fn next_pending(&self) -> Option<StorageRequest> {
        self.inner.lock().unwrap().pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> PeerId {
        PeerId::random()
    }

    #[test]
    fn store_and_get_round_trips() {
        let store = ChunkStore::new(1024, 4096);
        assert!(store.store("h1".into(), vec![1, 2, 3]).unwrap());
        assert_eq!(store.get("h1"), Some(vec![1, 2, 3]));
        assert_eq!(store.total_bytes(), 3);
    }

    #[test]
    fn oversized_chunk_is_rejected_without_side_effects() {
        let store = ChunkStore::new(4, 4096);
        assert!(!store.store("big".into(), vec![0u8; 5]).unwrap());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn eviction_drops_oldest_first_regardless_of_reads() {
        let store = ChunkStore::new(10, 10);
        assert!(store.store("a".into(), vec![0u8; 4]).unwrap());
        assert!(store.store("b".into(), vec![0u8; 4]).unwrap());
        // Reading "a" must NOT protect it from eviction (peek-only policy).
        let _ = store.get("a");
        assert!(store.store("c".into(), vec![0u8; 4]).unwrap());
        assert!(store.get("a").is_none(), "oldest entry should have been evicted");
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn store_fails_cleanly_when_nothing_evictable_makes_room() {
        let store = ChunkStore::new(10, 10);
        assert!(!store.store("too-big".into(), vec![0u8; 11]).unwrap());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn inbound_queue_is_fifo() {
        let store = ChunkStore::new(1024, 4096);
        let owner = pid();
        store.enqueue_inbound(StorageRequest {
            chunk_hash: "x".into(),
            data: vec![1],
            owner,
        });
        store.enqueue_inbound(StorageRequest {
            chunk_hash: "y".into(),
            data: vec![2],
            owner,
        });
        assert_eq!(store.next_pending().unwrap().chunk_hash, "x");
        assert_eq!(store.next_pending().unwrap().chunk_hash, "y");
        assert!(store.next_pending().is_none());
    }
}
