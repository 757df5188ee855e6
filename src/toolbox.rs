/*!
 * Size conversions, MD5 helper, and wire-protocol constants shared by the
 * rest of the crate.
 */

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use std::io::{Read, Write};

use crate::error::{Result, TransferError};

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * 1024;

pub const JOB_TYPE_PULL: &str = "PullTransfer";
pub const JOB_TYPE_PUSH: &str = "PushTransfer";
pub const PLUGIN_NAME: &str = "transfers";

pub const URI_CHUNKS: &str = "/transfers/chunks";
pub const URI_JOBS: &str = "/jobs";
pub const URI_LOOKUP: &str = "/transfers/lookup";
pub const URI_PEERS: &str = "/transfers/peers";
pub const URI_PLUGINS: &str = "/plugins";
pub const URI_PULL: &str = "/transfers/pull";
pub const URI_PUSH: &str = "/transfers/push";
pub const URI_SEND: &str = "/transfers/send";

pub const HEADER_SENDER_TRANSFER_ID: &str = "sender-transfer-id";

pub fn convert_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / MB as f64
}

pub fn convert_to_kilobytes(bytes: u64) -> f64 {
    bytes as f64 / KB as f64
}

/// Compute the lowercase-hex MD5 of a byte slice.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Gzip-compress `data` at the default compression level. Used to shrink
/// bucket payloads before they go over the wire.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Gzip-decompress a bucket payload. A malformed stream is a protocol
/// error, not a transport one: the bytes arrived fine, they just aren't
/// valid gzip, which only happens if sender and receiver disagree on
/// `compression`.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TransferError::Protocol(format!("invalid gzip payload: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_instance() {
        assert_eq!(md5_hex(b"0123456789"), "781e5e245d69b566979b86e28d23f2c7");
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(convert_to_kilobytes(2048), 2.0);
        assert_eq!(convert_to_megabytes(2 * MB), 2.0);
    }

    #[test]
    fn gzip_round_trips() {
        let original = b"abcdefghij".repeat(200);
        let compressed = gzip_compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        let decompressed = gzip_decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn gzip_decompress_rejects_garbage() {
        let result = gzip_decompress(b"not gzip");
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }
}
