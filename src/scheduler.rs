/*!
 * TransferScheduler: the bucket packer.
 *
 * Walks an ordered instance list and produces a deterministic sequence of
 * buckets bounded by `target_size`/`max_size`, splitting oversized
 * instances only at bucket boundaries.
 */

use crate::bucket::{Chunk, TransferBucket};
use crate::error::{Result, TransferError};
use crate::instance::InstanceInfo;

#[derive(Debug, Clone)]
pub struct PackedTransfer {
    pub buckets: Vec<TransferBucket>,
    pub total_bytes: u64,
    pub total_instances: usize,
}

pub struct TransferScheduler {
    target_size: u64,
    max_size: u64,
}

impl TransferScheduler {
    /// `max_size` defaults to `2 * target_size` when not given explicitly
    /// (§9 Open Question (a): no additional hard cap is imposed beyond
    /// this parameter).
    pub fn new(target_size: u64, max_size: Option<u64>) -> Result<Self> {
        if target_size == 0 {
            return Err(TransferError::Internal(
                "target_size must be greater than zero".into(),
            ));
        }
        let max_size = max_size.unwrap_or(target_size * 2);
        if max_size < target_size {
            return Err(TransferError::Internal(
                "max_size must be >= target_size".into(),
            ));
        }
        Ok(Self {
            target_size,
            max_size,
        })
    }

    pub fn target_size(&self) -> u64 {
        self.target_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Pack `instances` (in input order) into buckets per the algorithm in
    /// §4.1. Deterministic given input order.
    pub fn pack(&self, instances: &[InstanceInfo]) -> PackedTransfer {
        let mut buckets = Vec::new();
        let mut current = TransferBucket::new();
        let mut current_size: u64 = 0;
        let mut total_bytes: u64 = 0;

        for info in instances {
            total_bytes += info.size;
            let mut remaining_offset: u64 = 0;
            let mut remaining_size: u64 = info.size;

            loop {
                if remaining_size == 0 {
                    break;
                }

                let room = self.max_size - current_size;

                if current_size == 0 && remaining_size <= self.max_size {
                    // Rule 1: whole instance (or whole remaining tail) fits
                    // as the sole occupant of a fresh bucket.
                    current.push(Chunk::new(&info.id, remaining_offset, remaining_size));
                    current_size += remaining_size;
                    remaining_offset += remaining_size;
                    remaining_size = 0;
                } else if current_size + remaining_size <= self.max_size {
                    // Rule 2: the rest fits in the current bucket.
                    current.push(Chunk::new(&info.id, remaining_offset, remaining_size));
                    current_size += remaining_size;
                    remaining_offset += remaining_size;
                    remaining_size = 0;
                } else {
                    // Rule 3: would exceed max_size. Fill the current
                    // bucket with a head chunk if room remains, emit it,
                    // and keep packing the tail into a fresh bucket.
                    if room > 0 {
                        current.push(Chunk::new(&info.id, remaining_offset, room));
                        remaining_offset += room;
                        remaining_size -= room;
                        current_size += room;
                    }
                    buckets.push(std::mem::take(&mut current));
                    current_size = 0;
                }

                if current_size >= self.target_size {
                    buckets.push(std::mem::take(&mut current));
                    current_size = 0;
                }
            }
        }

        if !current.is_empty() {
            buckets.push(current);
        }

        PackedTransfer {
            buckets,
            total_bytes,
            total_instances: instances.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_small_instance_one_bucket_one_chunk() {
        let scheduler = TransferScheduler::new(4096, None).unwrap();
        let instances = vec![InstanceInfo::new(
            "A",
            10,
            "781e5e245d69b566979b86e28d23f2c7",
        )];
        let packed = scheduler.pack(&instances);
        assert_eq!(packed.buckets.len(), 1);
        assert_eq!(packed.buckets[0].chunks.len(), 1);
        assert_eq!(packed.buckets[0].chunks[0], Chunk::new("A", 0, 10));
        assert_eq!(packed.buckets[0].total_size(), 10);
    }

    #[test]
    fn two_instances_packed_into_one_bucket() {
        let scheduler = TransferScheduler::new(1024, None).unwrap();
        let instances = vec![
            InstanceInfo::new("A", 3, "a"),
            InstanceInfo::new("B", 5, "b"),
        ];
        let packed = scheduler.pack(&instances);
        assert_eq!(packed.buckets.len(), 1);
        assert_eq!(
            packed.buckets[0].chunks,
            vec![Chunk::new("A", 0, 3), Chunk::new("B", 0, 5)]
        );
        assert_eq!(packed.buckets[0].total_size(), 8);
    }

    #[test]
    fn large_instance_split_across_buckets() {
        let scheduler = TransferScheduler::new(1024, Some(1024)).unwrap();
        let instances = vec![InstanceInfo::new("A", 1500, "a")];
        let packed = scheduler.pack(&instances);
        assert_eq!(packed.buckets.len(), 2);
        assert_eq!(packed.buckets[0].chunks, vec![Chunk::new("A", 0, 1024)]);
        assert_eq!(packed.buckets[1].chunks, vec![Chunk::new("A", 1024, 476)]);
    }

    #[test]
    fn packing_conservation_holds() {
        let scheduler = TransferScheduler::new(100, None).unwrap();
        let instances = vec![
            InstanceInfo::new("A", 37, "a"),
            InstanceInfo::new("B", 250, "b"),
            InstanceInfo::new("C", 1, "c"),
            InstanceInfo::new("D", 999, "d"),
        ];
        let expected_total: u64 = instances.iter().map(|i| i.size).sum();
        let packed = scheduler.pack(&instances);

        let actual_total: u64 = packed.buckets.iter().map(|b| b.total_size()).sum();
        assert_eq!(actual_total, expected_total);
        assert_eq!(packed.total_bytes, expected_total);

        // Every chunk is well-formed and non-empty.
        for bucket in &packed.buckets {
            for chunk in &bucket.chunks {
                assert!(chunk.size > 0);
            }
        }
    }

    #[test]
    fn packing_bound_respected() {
        let scheduler = TransferScheduler::new(100, Some(150)).unwrap();
        let instances = vec![
            InstanceInfo::new("A", 40, "a"),
            InstanceInfo::new("B", 40, "b"),
            InstanceInfo::new("C", 40, "c"),
            InstanceInfo::new("D", 40, "d"),
            InstanceInfo::new("E", 40, "e"),
        ];
        let packed = scheduler.pack(&instances);
        let last = packed.buckets.len() - 1;
        for (i, bucket) in packed.buckets.iter().enumerate() {
            assert!(bucket.total_size() <= 150);
            if i != last {
                assert!(bucket.total_size() >= 100);
            }
        }
    }

    #[test]
    fn instance_larger_than_max_size_splits_into_many_buckets() {
        let scheduler = TransferScheduler::new(100, Some(100)).unwrap();
        let instances = vec![InstanceInfo::new("A", 350, "a")];
        let packed = scheduler.pack(&instances);
        assert_eq!(packed.buckets.len(), 4);
        let sizes: Vec<u64> = packed.buckets.iter().map(|b| b.total_size()).collect();
        assert_eq!(sizes, vec![100, 100, 100, 50]);
    }

    #[test]
    fn rejects_max_size_below_target_size() {
        assert!(TransferScheduler::new(1024, Some(512)).is_err());
    }

    #[test]
    fn empty_input_produces_no_buckets() {
        let scheduler = TransferScheduler::new(4096, None).unwrap();
        let packed = scheduler.pack(&[]);
        assert!(packed.buckets.is_empty());
        assert_eq!(packed.total_bytes, 0);
    }
}
