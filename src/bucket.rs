/*!
 * TransferBucket: an ordered sequence of chunks forming one HTTP payload.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, TransferError};

/// A `(instance_id, offset, size)` slice of an instance. `size` is always
/// `> 0`; the packer never emits zero-length chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "ID")]
    pub instance_id: String,
    #[serde(rename = "Offset")]
    pub offset: u64,
    #[serde(rename = "Size")]
    pub size: u64,
}

impl Chunk {
    pub fn new(instance_id: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            instance_id: instance_id.into(),
            offset,
            size,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferBucket {
    #[serde(rename = "Chunks")]
    pub chunks: Vec<Chunk>,
}

impl TransferBucket {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    pub fn push(&mut self, chunk: Chunk) {
        debug_assert!(chunk.size > 0, "packer must never emit zero-length chunks");
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Decodes the compact `/transfers/chunks/<id1.id2…>?offset=&size=`
/// representation back into the ordered chunk list it stands for: a
/// single starting `offset` into the first id, then full instances
/// until `size` bytes total have been consumed (`size == 0` means
/// unlimited — take everything from `offset` onward across all ids).
/// This is the inverse of how the Bucket Packer's own boundary rule
/// produces a bucket: every id but the first is taken from its start,
/// and only the first and last chunks can be partial.
pub fn reconstruct(ids: &[String], offset: u64, size: u64, sizes: &HashMap<String, u64>) -> Result<TransferBucket> {
    let unlimited = size == 0;
    let mut remaining = size;
    let mut bucket = TransferBucket::new();

    for (idx, id) in ids.iter().enumerate() {
        if !unlimited && remaining == 0 {
            break;
        }
        let total = *sizes
            .get(id)
            .ok_or_else(|| TransferError::Unknown(format!("unknown instance: {}", id)))?;
        let start = if idx == 0 { offset } else { 0 };
        if start > total {
            return Err(TransferError::OutOfRange(format!(
                "offset {} exceeds instance {} of size {}",
                start, id, total
            )));
        }
        let available = total - start;
        let take = if unlimited { available } else { available.min(remaining) };
        if take > 0 {
            bucket.push(Chunk::new(id.clone(), start, take));
            if !unlimited {
                remaining -= take;
            }
        }
    }

    Ok(bucket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_size_sums_chunks() {
        let mut bucket = TransferBucket::new();
        bucket.push(Chunk::new("A", 0, 3));
        bucket.push(Chunk::new("B", 0, 5));
        assert_eq!(bucket.total_size(), 8);
    }

    #[test]
    fn serializes_as_chunks_array() {
        let mut bucket = TransferBucket::new();
        bucket.push(Chunk::new("A", 0, 10));
        let json = serde_json::to_string(&bucket).unwrap();
        assert!(json.contains("\"Chunks\""));
        assert!(json.contains("\"Offset\":0"));
    }

    fn sizes(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn reconstruct_single_id_with_offset_and_size() {
        let bucket = reconstruct(
            &["A".to_string()],
            10,
            5,
            &sizes(&[("A", 100)]),
        )
        .unwrap();
        assert_eq!(bucket.chunks, vec![Chunk::new("A", 10, 5)]);
    }

    #[test]
    fn reconstruct_spans_multiple_ids_from_their_start() {
        let bucket = reconstruct(
            &["A".to_string(), "B".to_string()],
            90,
            30,
            &sizes(&[("A", 100), ("B", 100)]),
        )
        .unwrap();
        assert_eq!(
            bucket.chunks,
            vec![Chunk::new("A", 90, 10), Chunk::new("B", 0, 20)]
        );
    }

    #[test]
    fn reconstruct_zero_size_means_unlimited() {
        let bucket = reconstruct(
            &["A".to_string(), "B".to_string()],
            0,
            0,
            &sizes(&[("A", 10), ("B", 20)]),
        )
        .unwrap();
        assert_eq!(bucket.total_size(), 30);
    }

    #[test]
    fn reconstruct_unknown_id_fails() {
        let result = reconstruct(&["ghost".to_string()], 0, 5, &HashMap::new());
        assert!(matches!(result, Err(TransferError::Unknown(_))));
    }
}
