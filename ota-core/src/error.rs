use std::fmt;

use crate::storage::StorageError;
use crate::transport::TransportError;

/// Everything that can go wrong during a check or an install.
///
/// All of these are recoverable: the state machine records the `Display`
/// text as the session message and the next cycle starts from `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// Metadata endpoint answered with a non-success HTTP status
    NetworkError(u16),
    /// Metadata body was not the JSON we expect
    ParseError(String),
    /// Metadata had no `tag_name`
    MissingTag,
    /// Firmware download answered with a non-success HTTP status
    DownloadError(u16),
    /// Content-Length missing or zero
    UnknownSize,
    /// Storage could not provide a region of the requested size
    InsufficientSpace,
    PartialWrite { written: u64, expected: u64 },
    DigestMismatch { expected: String, actual: String },
    CommitFailure(String),
    AlreadyInProgress,
    NoPendingUpdate,
    /// The request never produced a response (DNS, TLS, timeout...)
    Transport(String),
    Storage(String),
    /// The update worker is gone and cannot take commands
    WorkerUnavailable,
    /// Upload password missing or wrong
    Unauthorized,
    /// No upload password configured, so pushed images are refused
    UploadDisabled,
}

impl OtaError {
    /// Rejections happen before any transition and leave the session alone.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            OtaError::AlreadyInProgress
                | OtaError::NoPendingUpdate
                | OtaError::Unauthorized
                | OtaError::UploadDisabled
        )
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::NetworkError(code) => write!(f, "Failed to check for updates: {}", code),
            OtaError::ParseError(detail) => write!(f, "Failed to parse update response: {}", detail),
            OtaError::MissingTag => write!(f, "Invalid response from update server"),
            OtaError::DownloadError(code) => write!(f, "Download failed: {}", code),
            OtaError::UnknownSize => write!(f, "Invalid firmware size"),
            OtaError::InsufficientSpace => write!(f, "Not enough space for update"),
            OtaError::PartialWrite { written, expected } => {
                write!(f, "Partial update: {}/{}", written, expected)
            }
            OtaError::DigestMismatch { expected, actual } => {
                write!(f, "Firmware digest mismatch: expected {}, got {}", expected, actual)
            }
            OtaError::CommitFailure(detail) => write!(f, "Update failed: {}", detail),
            OtaError::AlreadyInProgress => write!(f, "Update already in progress"),
            OtaError::NoPendingUpdate => write!(f, "No pending update to install"),
            OtaError::Transport(detail) => write!(f, "Network error: {}", detail),
            OtaError::Storage(detail) => write!(f, "Storage error: {}", detail),
            OtaError::WorkerUnavailable => write!(f, "Update worker is not running"),
            OtaError::Unauthorized => write!(f, "Invalid OTA password"),
            OtaError::UploadDisabled => write!(f, "Firmware upload is disabled"),
        }
    }
}

impl std::error::Error for OtaError {}

impl From<TransportError> for OtaError {
    fn from(err: TransportError) -> Self {
        OtaError::Transport(err.to_string())
    }
}

impl From<StorageError> for OtaError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NoSpace { .. } => OtaError::InsufficientSpace,
            StorageError::Commit(detail) => OtaError::CommitFailure(detail),
            other => OtaError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_device_wording() {
        assert_eq!(OtaError::NetworkError(404).to_string(), "Failed to check for updates: 404");
        assert_eq!(
            OtaError::PartialWrite { written: 10, expected: 20 }.to_string(),
            "Partial update: 10/20"
        );
        assert_eq!(OtaError::InsufficientSpace.to_string(), "Not enough space for update");
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: OtaError = StorageError::NoSpace { requested: 10, available: 5 }.into();
        assert_eq!(err, OtaError::InsufficientSpace);

        let err: OtaError = StorageError::Commit("image invalid".into()).into();
        assert_eq!(err, OtaError::CommitFailure("image invalid".into()));
    }

    #[test]
    fn test_rejections() {
        assert!(OtaError::AlreadyInProgress.is_rejection());
        assert!(OtaError::NoPendingUpdate.is_rejection());
        assert!(OtaError::Unauthorized.is_rejection());
        assert!(!OtaError::UnknownSize.is_rejection());
    }
}
