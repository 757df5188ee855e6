/*!
 * Configuration structures and defaults for the transfer accelerator.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, TransferError};

/// How a bucket payload is compressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketCompression {
    None,
    Gzip,
}

impl Default for BucketCompression {
    fn default() -> Self {
        Self::None
    }
}

impl BucketCompression {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(TransferError::Config(format!(
                "unknown bucket compression: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketCompression::None => "none",
            BucketCompression::Gzip => "gzip",
        }
    }
}

/// Process-wide configuration, corresponding to the bidirectional option
/// table: Threads, BucketSize, CacheSize, MaxPushTransactions,
/// MaxHttpRetries, PeerConnectivityTimeout, PeerCommitTimeout,
/// CommitWorkerThreadsCount, BidirectionalPeers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// HTTP worker threads per job.
    pub threads: usize,

    /// Target bucket size in bytes (config value is KB; `bucket_size_bytes()`
    /// does the conversion).
    pub bucket_size_kb: u64,

    /// Instance cache budget in bytes (config value is MB).
    pub cache_size_mb: u64,

    /// Capacity of the Active Push Transactions table; `0` disables
    /// receiving pushes.
    pub max_push_transactions: usize,

    /// Per-query retry ceiling.
    pub max_http_retries: u32,

    /// Seconds, used for `/plugins` peer detection.
    pub peer_connectivity_timeout_secs: u64,

    /// Seconds, used for the commit POST and the CreateTransaction POST.
    pub peer_commit_timeout_secs: u64,

    /// Commit workers per download area.
    pub commit_worker_threads_count: usize,

    /// Idle TTL before a transaction is eligible for eviction, in seconds.
    pub transaction_ttl_secs: u64,

    /// Map peer name -> our own self-name as known by that peer. Presence
    /// enables pull-from-sender mode for `/transfers/send`.
    pub bidirectional_peers: HashMap<String, String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            threads: 6,
            bucket_size_kb: 4096,
            cache_size_mb: 512,
            max_push_transactions: 16,
            max_http_retries: 4,
            peer_connectivity_timeout_secs: 2,
            peer_commit_timeout_secs: 120,
            commit_worker_threads_count: 1,
            transaction_ttl_secs: 600,
            bidirectional_peers: HashMap::new(),
        }
    }
}

impl TransferConfig {
    pub fn bucket_size_bytes(&self) -> u64 {
        self.bucket_size_kb * 1024
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb * 1024 * 1024
    }

    pub fn is_bidirectional(&self, peer: &str) -> bool {
        self.bidirectional_peers.contains_key(peer)
    }
}

/// TOML-loadable overlay; only fields present in the file override the
/// built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub transfers: ConfigOverlay,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverlay {
    pub threads: Option<usize>,
    pub bucket_size_kb: Option<u64>,
    pub cache_size_mb: Option<u64>,
    pub max_push_transactions: Option<usize>,
    pub max_http_retries: Option<u32>,
    pub peer_connectivity_timeout_secs: Option<u64>,
    pub peer_commit_timeout_secs: Option<u64>,
    pub commit_worker_threads_count: Option<usize>,
    pub transaction_ttl_secs: Option<u64>,
    #[serde(default)]
    pub bidirectional_peers: HashMap<String, String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TransferError::Config(format!("failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| TransferError::Config(format!("failed to parse config file: {}", e)))
    }

    /// Fallback priority: ./transfers.toml (project-specific), then
    /// ~/.transfers/transfers.toml (user defaults), then built-in defaults.
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("transfers.toml")) {
            return config;
        }

        if let Some(home) = home_dir() {
            let user_config = home.join(".transfers").join("transfers.toml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    pub fn apply_to(&self, config: &mut TransferConfig) {
        let o = &self.transfers;
        if let Some(v) = o.threads {
            config.threads = v;
        }
        if let Some(v) = o.bucket_size_kb {
            config.bucket_size_kb = v;
        }
        if let Some(v) = o.cache_size_mb {
            config.cache_size_mb = v;
        }
        if let Some(v) = o.max_push_transactions {
            config.max_push_transactions = v;
        }
        if let Some(v) = o.max_http_retries {
            config.max_http_retries = v;
        }
        if let Some(v) = o.peer_connectivity_timeout_secs {
            config.peer_connectivity_timeout_secs = v;
        }
        if let Some(v) = o.peer_commit_timeout_secs {
            config.peer_commit_timeout_secs = v;
        }
        if let Some(v) = o.commit_worker_threads_count {
            config.commit_worker_threads_count = v;
        }
        if let Some(v) = o.transaction_ttl_secs {
            config.transaction_ttl_secs = v;
        }
        config
            .bidirectional_peers
            .extend(o.bidirectional_peers.clone());
    }
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(std::path::PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_compression_parsing() {
        assert_eq!(
            BucketCompression::from_str("gzip").unwrap(),
            BucketCompression::Gzip
        );
        assert_eq!(
            BucketCompression::from_str("NONE").unwrap(),
            BucketCompression::None
        );
        assert!(BucketCompression::from_str("lz4").is_err());
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.threads, 6);
        assert_eq!(config.bucket_size_bytes(), 4096 * 1024);
        assert_eq!(config.cache_size_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn overlay_applies_only_present_fields() {
        let mut config = TransferConfig::default();
        let overlay = ConfigFile {
            transfers: ConfigOverlay {
                threads: Some(12),
                ..Default::default()
            },
        };
        overlay.apply_to(&mut config);
        assert_eq!(config.threads, 12);
        assert_eq!(config.bucket_size_kb, 4096);
    }
}
