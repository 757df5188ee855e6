/*!
 * ActivePushTransactions (§4.5): the bounded, TTL-swept table of
 * in-flight inbound push transactions that backs the receiver side of
 * `/transfers/push*`.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::area::DownloadArea;
use crate::bucket::TransferBucket;
use crate::config::BucketCompression;
use crate::error::{Result, TransferError};
use crate::host::Host;
use crate::instance::InstanceInfo;

struct Transaction {
    area: Arc<DownloadArea>,
    buckets: Vec<TransferBucket>,
    compression: BucketCompression,
    last_touch: Instant,
}

struct Inner {
    transactions: HashMap<Uuid, Transaction>,
    capacity: usize,
}

/// Shared, thread-safe. Cloning gives every request handler a handle to
/// the same process-wide table.
#[derive(Clone)]
pub struct ActivePushTransactions {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
    commit_worker_threads: usize,
    stop_sweeper: Arc<AtomicBool>,
}

impl ActivePushTransactions {
    pub fn new(capacity: usize, ttl: Duration, commit_worker_threads: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                transactions: HashMap::new(),
                capacity,
            })),
            ttl,
            commit_worker_threads: commit_worker_threads.max(1),
            stop_sweeper: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Create`: `0` capacity disables receiving pushes entirely (§6).
    pub fn create(
        &self,
        instances: &[InstanceInfo],
        buckets: Vec<TransferBucket>,
        compression: BucketCompression,
    ) -> Result<Uuid> {
        let mut guard = self.inner.lock().unwrap();
        if guard.capacity == 0 {
            return Err(TransferError::Capacity(
                "receiving pushes is disabled (MaxPushTransactions=0)".into(),
            ));
        }

        if guard.transactions.len() >= guard.capacity {
            let evictable = guard
                .transactions
                .iter()
                .filter(|(_, tx)| tx.last_touch.elapsed() > self.ttl)
                .min_by_key(|(_, tx)| tx.last_touch)
                .map(|(id, _)| *id);

            match evictable {
                Some(id) => {
                    guard.transactions.remove(&id);
                }
                None => {
                    return Err(TransferError::Capacity(format!(
                        "active push transactions at capacity ({})",
                        guard.capacity
                    )));
                }
            }
        }

        let area = Arc::new(DownloadArea::setup(instances)?);
        let id = Uuid::new_v4();
        guard.transactions.insert(
            id,
            Transaction {
                area,
                buckets,
                compression,
                last_touch: Instant::now(),
            },
        );
        Ok(id)
    }

    /// `Store`: writes bucket `chunk_index` into the transaction's area.
    /// The area I/O runs outside the map lock so concurrent `Store`
    /// calls against different transactions (or different instances
    /// within the same one) don't serialize on each other.
    pub fn store(&self, id: Uuid, chunk_index: usize, bytes: &[u8]) -> Result<()> {
        let (area, bucket, compression) = {
            let mut guard = self.inner.lock().unwrap();
            let tx = guard
                .transactions
                .get_mut(&id)
                .ok_or_else(|| TransferError::Unknown(format!("unknown transaction: {}", id)))?;
            let bucket = tx
                .buckets
                .get(chunk_index)
                .cloned()
                .ok_or_else(|| TransferError::OutOfRange(format!("bucket index {} out of range", chunk_index)))?;
            tx.last_touch = Instant::now();
            (tx.area.clone(), bucket, tx.compression)
        };

        area.write_bucket(&bucket, bytes, compression)
    }

    /// `Commit`: removes the transaction from the table unconditionally
    /// (success or failure — per §4.5, a failed commit is discarded)
    /// and runs its area's commit pipeline.
    pub fn commit(&self, id: Uuid, host: &Arc<dyn Host>) -> Result<()> {
        let tx = {
            let mut guard = self.inner.lock().unwrap();
            guard
                .transactions
                .remove(&id)
                .ok_or_else(|| TransferError::Unknown(format!("unknown transaction: {}", id)))?
        };
        tx.area.commit(host, self.commit_worker_threads)
    }

    /// `Discard`: idempotent on an unknown id.
    pub fn discard(&self, id: Uuid) {
        let tx = self.inner.lock().unwrap().transactions.remove(&id);
        if let Some(tx) = tx {
            tx.area.clear();
        }
    }

    /// Background sweeper (§4.5, §5): discards every transaction idle
    /// longer than the TTL. Call periodically, or hand off to a
    /// dedicated thread via `spawn_sweeper`.
    pub fn sweep(&self) {
        let expired: Vec<Uuid> = {
            let guard = self.inner.lock().unwrap();
            guard
                .transactions
                .iter()
                .filter(|(_, tx)| tx.last_touch.elapsed() > self.ttl)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in expired {
            self.discard(id);
        }
    }

    /// Spawns a background thread that calls `sweep()` on `interval`
    /// until `stop_sweeping` is called. Part of graceful shutdown (§5):
    /// the caller should stop the sweeper, then call `discard` on
    /// whatever remains so every area's scratch files are released.
    pub fn spawn_sweeper(&self, interval: Duration) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        let stop = self.stop_sweeper.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                this.sweep();
            }
        })
    }

    pub fn stop_sweeping(&self) {
        self.stop_sweeper.store(true, Ordering::SeqCst);
    }

    /// Graceful shutdown step (iii) of §5: discard everything still
    /// outstanding regardless of TTL.
    pub fn discard_all(&self) {
        let ids: Vec<Uuid> = self.inner.lock().unwrap().transactions.keys().copied().collect();
        for id in ids {
            self.discard(id);
        }
    }
}
