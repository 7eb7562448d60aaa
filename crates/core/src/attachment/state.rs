//! Per-record, per-attribute attachment state.

use tracing::warn;

use super::error::{IntegrityError, ProcessingError, UploadError};
use super::types::{StoredLocation, UploadedFile};
use super::uploader::Uploader;
use crate::storage::StorageError;

/// State of one mounted attribute on one record.
///
/// Owned by its `Record`; never shared between records.
pub struct AttachmentState<M> {
    pub(crate) current: Option<Uploader<M>>,
    pub(crate) changed: bool,
    pub(crate) pending_removal: bool,
    pub(crate) error: Option<UploadError>,
    pub(crate) persisted: Option<StoredLocation>,
}

impl<M> Default for AttachmentState<M> {
    fn default() -> Self {
        Self {
            current: None,
            changed: false,
            pending_removal: false,
            error: None,
            persisted: None,
        }
    }
}

impl<M> std::fmt::Debug for AttachmentState<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentState")
            .field("current", &self.current)
            .field("changed", &self.changed)
            .field("pending_removal", &self.pending_removal)
            .field("error", &self.error)
            .field("persisted", &self.persisted)
            .finish()
    }
}

impl<M> AttachmentState<M> {
    /// State of an attribute whose file was persisted at `location`.
    pub(crate) fn persisted_at(location: StoredLocation) -> Self {
        Self {
            persisted: Some(location),
            ..Self::default()
        }
    }

    /// Cache `file` into `fresh` and make it current.
    ///
    /// Empty input is ignored. Integrity and processing failures are kept for
    /// validation and leave the current uploader in place; storage failures
    /// are returned.
    pub(crate) async fn assign(
        &mut self,
        mut fresh: Uploader<M>,
        file: UploadedFile,
    ) -> Result<(), StorageError> {
        if file.is_empty() {
            return Ok(());
        }

        match fresh.cache(file).await {
            Ok(()) => {
                self.current = Some(fresh);
                self.changed = true;
                self.error = None;
                Ok(())
            }
            Err(UploadError::Storage(err)) => Err(err),
            Err(err) => {
                warn!(attribute = fresh.mounted_as(), error = %err, "upload rejected");
                self.error = Some(err);
                Ok(())
            }
        }
    }

    /// Make an already cached uploader current.
    pub(crate) fn assign_cached(&mut self, cached: Uploader<M>) {
        self.current = Some(cached);
        self.changed = true;
        self.error = None;
    }

    /// The in-memory uploader, if one was built.
    #[must_use]
    pub fn current(&self) -> Option<&Uploader<M>> {
        self.current.as_ref()
    }

    /// True once a new file was assigned since the last load or save.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// True when the next save should remove the file.
    #[must_use]
    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal
    }

    /// Error captured by the last assignment.
    #[must_use]
    pub fn error(&self) -> Option<&UploadError> {
        self.error.as_ref()
    }

    /// Integrity error captured by the last assignment.
    #[must_use]
    pub fn integrity_error(&self) -> Option<&IntegrityError> {
        match &self.error {
            Some(UploadError::Integrity(err)) => Some(err),
            _ => None,
        }
    }

    /// Processing error captured by the last assignment.
    #[must_use]
    pub fn processing_error(&self) -> Option<&ProcessingError> {
        match &self.error {
            Some(UploadError::Processing(err)) => Some(err),
            _ => None,
        }
    }

    /// Location committed by the last save or load.
    #[must_use]
    pub fn persisted_location(&self) -> Option<&StoredLocation> {
        self.persisted.as_ref()
    }
}
