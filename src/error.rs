/*!
 * Error taxonomy for the transfer accelerator core.
 */

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, TransferError>;

/// The kinds of failure the core can produce. These map directly onto the
/// propagation policy: only `Transport` is retried, everything else is
/// fatal to whatever job or transaction raised it.
#[derive(Debug)]
pub enum TransferError {
    /// Malformed body, wrong shape, or a bucket payload whose decompressed
    /// length disagrees with its declared total size.
    Protocol(String),
    /// A referenced instance, transaction, or peer does not exist.
    Unknown(String),
    /// An offset/size pair falls outside a bucket or instance's bounds.
    OutOfRange(String),
    /// MD5 mismatch at commit time.
    Corrupted(String),
    /// Network failure, timeout, or 5xx answer. The only kind retried.
    Transport(String),
    /// Active Push Transactions is full and no entry is evictable.
    Capacity(String),
    /// An invariant was violated; always fatal, always logged.
    Internal(String),
    /// Bad configuration value.
    Config(String),
    Io(io::Error),
    Json(serde_json::Error),
}

impl TransferError {
    /// Only `Transport` failures are recovered locally via retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Transport(_))
    }

    /// Everything except `Transport` is fatal to the job/transaction that
    /// raised it (and `Transport` itself becomes fatal once retries are
    /// exhausted, at which point callers re-wrap it before propagating).
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Protocol(_) => ErrorCategory::Protocol,
            TransferError::Unknown(_) => ErrorCategory::Unknown,
            TransferError::OutOfRange(_) => ErrorCategory::OutOfRange,
            TransferError::Corrupted(_) => ErrorCategory::Corrupted,
            TransferError::Transport(_) => ErrorCategory::Transport,
            TransferError::Capacity(_) => ErrorCategory::Capacity,
            TransferError::Internal(_) => ErrorCategory::Internal,
            TransferError::Config(_) => ErrorCategory::Config,
            TransferError::Io(_) => ErrorCategory::IoError,
            TransferError::Json(_) => ErrorCategory::Protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Protocol,
    Unknown,
    OutOfRange,
    Corrupted,
    Transport,
    Capacity,
    Internal,
    Config,
    IoError,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            TransferError::Unknown(msg) => write!(f, "unknown resource: {}", msg),
            TransferError::OutOfRange(msg) => write!(f, "out of range: {}", msg),
            TransferError::Corrupted(msg) => write!(f, "corrupted: {}", msg),
            TransferError::Transport(msg) => write!(f, "transport error: {}", msg),
            TransferError::Capacity(msg) => write!(f, "at capacity: {}", msg),
            TransferError::Internal(msg) => write!(f, "internal error: {}", msg),
            TransferError::Config(msg) => write!(f, "configuration error: {}", msg),
            TransferError::Io(e) => write!(f, "I/O error: {}", e),
            TransferError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Io(e) => Some(e),
            TransferError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Json(e)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        TransferError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_transient() {
        assert!(TransferError::Transport("timeout".into()).is_transient());
        assert!(!TransferError::Protocol("bad json".into()).is_transient());
        assert!(!TransferError::Corrupted("md5".into()).is_transient());
    }

    #[test]
    fn category_mapping() {
        assert_eq!(
            TransferError::Capacity("full".into()).category(),
            ErrorCategory::Capacity
        );
        assert_eq!(
            TransferError::Unknown("tx".into()).category(),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn io_error_roundtrip_source() {
        let err: TransferError = io::Error::other("disk full").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
