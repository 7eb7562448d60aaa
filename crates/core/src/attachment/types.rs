//! Attachment types and data structures.

use bytes::Bytes;
use stowage_shared::CacheId;

use crate::storage::sanitize_filename;

/// A file handed to a mounted attribute.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Name the client sent, possibly with a directory part.
    pub filename: String,
    /// File content.
    pub content: Bytes,
    /// Declared MIME type, if any.
    pub content_type: Option<String>,
}

impl UploadedFile {
    /// Create an uploaded file.
    #[must_use]
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            content_type: None,
        }
    }

    /// Set the declared MIME type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// An empty upload: no usable name or no content. Assigning one is a
    /// no-op. A name with nothing left after sanitizing (`"photos/"`) counts
    /// as no name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filename.trim().is_empty()
            || sanitize_filename(&self.filename).is_empty()
            || self.content.is_empty()
    }
}

/// A file sitting in the cache, waiting for a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// Cache directory name.
    pub cache_id: CacheId,
    /// Name as assigned, before sanitizing.
    pub original_filename: String,
    /// Sanitized name used inside the cache directory.
    pub filename: String,
    /// Declared or guessed MIME type.
    pub content_type: Option<String>,
    /// Size after processing.
    pub size: u64,
}

impl CachedFile {
    /// Handle for re-assigning this cached file: `<cache_id>/<filename>`.
    #[must_use]
    pub fn cache_name(&self) -> String {
        format!("{}/{}", self.cache_id, self.filename)
    }
}

/// Where a stored file lives: the store directory it was resolved against
/// and the identifier written to the column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredLocation {
    /// Store directory at the time of storing.
    pub store_dir: String,
    /// Filename persisted in the backing column.
    pub identifier: String,
}

impl StoredLocation {
    /// Create a location.
    #[must_use]
    pub fn new(store_dir: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            store_dir: store_dir.into().trim_end_matches('/').to_string(),
            identifier: identifier.into(),
        }
    }

    /// Full storage key: `<store_dir>/<identifier>`.
    #[must_use]
    pub fn path(&self) -> String {
        join_key(&self.store_dir, &self.identifier)
    }

    /// Storage key of a version: `<store_dir>/<version>_<identifier>`.
    #[must_use]
    pub fn version_path(&self, version: &str) -> String {
        join_key(&self.store_dir, &format!("{version}_{}", self.identifier))
    }
}

/// Join a directory and a file name into a storage key.
pub(crate) fn join_key(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Stage of a record's save, as driven by the lifecycle coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleStage {
    /// Nothing attempted since the record was built or reloaded.
    #[default]
    Unvalidated,
    /// Validation in progress.
    Validating,
    /// Validation passed.
    Valid,
    /// Validation failed; nothing was stored.
    Invalid,
    /// Files are being stored and the record written.
    Persisting,
    /// The record and its files are committed.
    Persisted,
    /// The repository refused the write; staged files were undone.
    RolledBack,
    /// The record was deleted and its files removed.
    Destroyed,
}

/// Result of a save that did not hit a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record and its attachments were persisted.
    Persisted,
    /// Validation failed; see `Record::errors`.
    Invalid,
}
