/*!
 * Process-wide LRU byte cache keyed by instance ID.
 *
 * Miss path reads the full instance from the host once, computes MD5 on
 * ingest, and stores it under a size budget. Concurrent misses for the
 * same ID are coalesced into a single load.
 */

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};

use crate::bucket::TransferBucket;
use crate::config::BucketCompression;
use crate::error::{Result, TransferError};
use crate::toolbox::{gzip_compress, md5_hex};

/// What the host provides to satisfy a cache miss: the full bytes of one
/// instance. The cache itself never talks to the network; it is handed a
/// closure (or any `Fn`) that does.
pub type HostLoader<'a> = dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync + 'a;

#[derive(Clone)]
struct CachedInstance {
    bytes: Arc<Vec<u8>>,
    md5: String,
}

enum Slot {
    Loading,
    Ready(CachedInstance),
}

struct Inner {
    entries: LruCache<String, Slot>,
    used_bytes: u64,
    budget_bytes: u64,
}

/// Shared, thread-safe LRU cache. Cloning an `InstanceCache` clones the
/// `Arc`, giving every job a handle to the same process-wide budget.
#[derive(Clone)]
pub struct InstanceCache {
    inner: Arc<Mutex<Inner>>,
    condvar: Arc<Condvar>,
}

impl InstanceCache {
    pub fn new(budget_bytes: u64) -> Self {
        // Capacity is nominal (entry count); actual eviction is driven by
        // `used_bytes` vs `budget_bytes` since instances vary wildly in
        // size. A generous nominal cap avoids the LRU itself silently
        // evicting before the byte budget would.
        let nominal_cap = NonZeroUsize::new(1_000_000).unwrap();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::new(nominal_cap),
                used_bytes: 0,
                budget_bytes,
            })),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// `GetInstanceInfo`: returns `(size, md5)`, reading through the
    /// loader on a miss.
    pub fn get_instance_info(&self, id: &str, loader: &HostLoader) -> Result<(u64, String)> {
        let cached = self.get_or_load(id, loader)?;
        Ok((cached.bytes.len() as u64, cached.md5))
    }

    /// `GetChunk`: returns `(bytes, md5_of_slice)`. `offset + size >
    /// size(id)` fails with `OutOfRange`.
    pub fn get_chunk(
        &self,
        id: &str,
        offset: u64,
        size: u64,
        loader: &HostLoader,
    ) -> Result<(Vec<u8>, String)> {
        let cached = self.get_or_load(id, loader)?;
        let total = cached.bytes.len() as u64;
        if offset + size > total {
            return Err(TransferError::OutOfRange(format!(
                "chunk {}+{} exceeds instance {} of size {}",
                offset, size, id, total
            )));
        }
        let start = offset as usize;
        let end = start + size as usize;
        let slice = &cached.bytes[start..end];
        Ok((slice.to_vec(), md5_hex(slice)))
    }

    fn get_or_load(&self, id: &str, loader: &HostLoader) -> Result<CachedInstance> {
        loop {
            let mut guard = self.inner.lock().unwrap();
            match guard.entries.get(id) {
                Some(Slot::Ready(cached)) => return Ok(cached.clone()),
                Some(Slot::Loading) => {
                    // Someone else is loading this id; wait and retry.
                    guard = self.condvar.wait(guard).unwrap();
                    drop(guard);
                    continue;
                }
                None => {
                    guard.entries.put(id.to_string(), Slot::Loading);
                    drop(guard);
                    break;
                }
            }
        }

        // Only the thread that installed the Loading marker reaches here
        // for a given id, so the actual network/disk read happens once.
        let result = loader(id);

        let mut guard = self.inner.lock().unwrap();
        match result {
            Ok(bytes) => {
                let md5 = md5_hex(&bytes);
                let cached = CachedInstance {
                    bytes: Arc::new(bytes),
                    md5,
                };
                guard.used_bytes += cached.bytes.len() as u64;
                guard.entries.put(id.to_string(), Slot::Ready(cached.clone()));
                evict_over_budget(&mut guard);
                drop(guard);
                self.condvar.notify_all();
                Ok(cached)
            }
            Err(e) => {
                guard.entries.pop(id);
                drop(guard);
                self.condvar.notify_all();
                Err(e)
            }
        }
    }

    /// Assembles the wire payload for one bucket by reading every chunk
    /// through the cache (coalescing hits) and concatenating them in
    /// bucket order, gzip-compressing the result if requested. Serves
    /// both the sender side of a Push Job and the `/transfers/chunks`
    /// serving handler.
    pub fn assemble_bucket(
        &self,
        bucket: &TransferBucket,
        loader: &HostLoader,
        compression: BucketCompression,
    ) -> Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(bucket.total_size() as usize);
        for chunk in &bucket.chunks {
            let (bytes, _md5) = self.get_chunk(&chunk.instance_id, chunk.offset, chunk.size, loader)?;
            raw.extend_from_slice(&bytes);
        }
        match compression {
            BucketCompression::None => Ok(raw),
            BucketCompression::Gzip => gzip_compress(&raw),
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().unwrap().used_bytes
    }

    /// Drain the whole cache (part of graceful shutdown, §5).
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.entries.clear();
        guard.used_bytes = 0;
    }
}

fn evict_over_budget(inner: &mut Inner) {
    while inner.used_bytes > inner.budget_bytes {
        match inner.entries.pop_lru() {
            Some((_, Slot::Ready(cached))) => {
                inner.used_bytes = inner.used_bytes.saturating_sub(cached.bytes.len() as u64);
            }
            Some((_, Slot::Loading)) => {
                // Never evict an in-flight load; put it back and stop.
                break;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn miss_then_hit_reads_loader_once() {
        let cache = InstanceCache::new(1024 * 1024);
        let calls = AtomicUsize::new(0);
        let loader = |_id: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"0123456789".to_vec())
        };
        let (size, md5) = cache.get_instance_info("A", &loader).unwrap();
        assert_eq!(size, 10);
        assert_eq!(md5, "781e5e245d69b566979b86e28d23f2c7");

        cache.get_instance_info("A", &loader).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chunk_out_of_range_fails() {
        let cache = InstanceCache::new(1024 * 1024);
        let loader = |_id: &str| Ok(b"abc".to_vec());
        let result = cache.get_chunk("A", 0, 10, &loader);
        assert!(matches!(result, Err(TransferError::OutOfRange(_))));
    }

    #[test]
    fn chunk_md5_is_over_the_slice_not_whole_instance() {
        let cache = InstanceCache::new(1024 * 1024);
        let loader = |_id: &str| Ok(b"0123456789".to_vec());
        let (bytes, md5) = cache.get_chunk("A", 0, 4, &loader).unwrap();
        assert_eq!(bytes, b"0123");
        assert_eq!(md5, md5_hex(b"0123"));
    }

    #[test]
    fn eviction_keeps_used_bytes_under_budget() {
        let cache = InstanceCache::new(15);
        let loader = |_id: &str| Ok(vec![0u8; 10]);
        cache.get_instance_info("A", &loader).unwrap();
        cache.get_instance_info("B", &loader).unwrap();
        assert!(cache.used_bytes() <= 15);
    }

    #[test]
    fn assemble_bucket_concatenates_chunks_in_order() {
        use crate::bucket::Chunk;

        let cache = InstanceCache::new(1024 * 1024);
        let loader = |id: &str| match id {
            "A" => Ok(b"abc".to_vec()),
            "B" => Ok(b"hello".to_vec()),
            _ => panic!("unexpected id"),
        };

        let mut bucket = TransferBucket::new();
        bucket.push(Chunk::new("A", 0, 3));
        bucket.push(Chunk::new("B", 0, 5));

        let payload = cache
            .assemble_bucket(&bucket, &loader, BucketCompression::None)
            .unwrap();
        assert_eq!(payload, b"abchello");
    }

    #[test]
    fn assemble_bucket_compresses_when_requested() {
        use crate::bucket::Chunk;

        let cache = InstanceCache::new(1024 * 1024);
        let data = b"0123456789".repeat(50);
        let loader = move |_id: &str| Ok(data.clone());

        let mut bucket = TransferBucket::new();
        bucket.push(Chunk::new("A", 0, 500));

        let compressed = cache
            .assemble_bucket(&bucket, &loader, BucketCompression::Gzip)
            .unwrap();
        let decompressed = crate::toolbox::gzip_decompress(&compressed).unwrap();
        assert_eq!(decompressed.len(), 500);
    }
}
