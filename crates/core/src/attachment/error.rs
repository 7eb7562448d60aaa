//! Attachment error types.

use thiserror::Error;

use crate::storage::StorageError;

/// The file is not acceptable for the mounted attribute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// Extension missing from the allow-list.
    #[error("extension '{extension}' is not allowed, allowed types: {allowed}")]
    ExtensionNotAllowed {
        /// Lowercased extension of the assigned file (empty if none).
        extension: String,
        /// Comma separated allow-list.
        allowed: String,
    },

    /// Content type missing from the allow-list.
    #[error("content type '{content_type}' is not allowed")]
    ContentTypeNotAllowed {
        /// Declared or guessed content type.
        content_type: String,
    },

    /// Nothing usable is left of the filename after sanitizing.
    #[error("filename '{filename}' has no usable name")]
    EmptyFilename {
        /// Name as assigned.
        filename: String,
    },

    /// File larger than the configured maximum.
    #[error("file size {size} bytes exceeds maximum allowed {max} bytes")]
    FileTooLarge {
        /// Actual file size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },
}

/// A processing step rejected the file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("processing step '{step}' failed: {reason}")]
pub struct ProcessingError {
    /// Name of the failing step.
    pub step: String,
    /// Reason reported by the step.
    pub reason: String,
}

impl ProcessingError {
    /// Create a processing error.
    #[must_use]
    pub fn new(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while caching an assigned file.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Disallowed file type, content type or size.
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// A processing step failed.
    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// Writing the cache failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Hard failures from record operations.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// No uploader is mounted under this attribute.
    #[error("no uploader mounted as '{0}'")]
    UnknownAttachment(String),

    /// Cache name is malformed.
    #[error("invalid cache name: {0}")]
    InvalidCacheName(String),

    /// Cache name is well formed but nothing is cached there.
    #[error("cached file not found: {0}")]
    CacheNotFound(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Repository operation failed.
    #[error("repository error: {0}")]
    Repository(String),
}

impl AttachmentError {
    /// Create an unknown attachment error.
    #[must_use]
    pub fn unknown_attachment(name: impl Into<String>) -> Self {
        Self::UnknownAttachment(name.into())
    }

    /// Create a repository error.
    #[must_use]
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }
}
