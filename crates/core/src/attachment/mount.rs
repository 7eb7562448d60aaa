//! Mounting uploaders on host records.
//!
//! `Mounts` is the per-model declaration table: which attributes carry a
//! file and how each is configured. `Record` pairs one model instance with
//! the attachment state of every mounted attribute.

use std::collections::HashMap;
use std::sync::Arc;

use validator::{Validate, ValidationErrors};

use super::error::{AttachmentError, IntegrityError, ProcessingError};
use super::options::MountOptions;
use super::state::AttachmentState;
use super::types::{LifecycleStage, StoredLocation, UploadedFile};
use super::uploader::Uploader;
use crate::storage::StorageService;

/// A host record that can carry attachments.
///
/// Columns hold the stored identifier of each mounted attribute; an empty
/// string and `None` both mean "no file".
pub trait Model: Validate + Send + Sync {
    /// Current value of a column.
    fn column(&self, name: &str) -> Option<String>;

    /// Overwrite a column.
    fn set_column(&mut self, name: &str, value: Option<String>);
}

/// Mounted attributes of one model type.
pub struct Mounts<M> {
    storage: Arc<StorageService>,
    entries: Vec<(&'static str, Arc<MountOptions<M>>)>,
}

impl<M> std::fmt::Debug for Mounts<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mounts")
            .field("storage", &self.storage)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<M> Mounts<M> {
    /// Create an empty table backed by `storage`.
    #[must_use]
    pub fn new(storage: Arc<StorageService>) -> Self {
        Self {
            storage,
            entries: Vec::new(),
        }
    }

    /// Mount an uploader on `attribute`. Mounting the same attribute twice
    /// replaces the earlier options.
    #[must_use]
    pub fn mount(mut self, attribute: &'static str, options: MountOptions<M>) -> Self {
        let options = Arc::new(options);
        match self.entries.iter_mut().find(|(name, _)| *name == attribute) {
            Some(entry) => entry.1 = options,
            None => self.entries.push((attribute, options)),
        }
        self
    }

    /// Mounted attribute names, in mount order.
    pub fn attributes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Shared storage.
    #[must_use]
    pub fn storage(&self) -> &Arc<StorageService> {
        &self.storage
    }

    /// Look up an attribute.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttachment` if nothing is mounted as `attribute`.
    pub fn lookup(
        &self,
        attribute: &str,
    ) -> Result<(&'static str, &Arc<MountOptions<M>>), AttachmentError> {
        self.entries
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(name, options)| (*name, options))
            .ok_or_else(|| AttachmentError::unknown_attachment(attribute))
    }

    pub(crate) fn entries(&self) -> &[(&'static str, Arc<MountOptions<M>>)] {
        &self.entries
    }
}

/// A host model together with its attachment state.
pub struct Record<M> {
    pub(crate) model: M,
    pub(crate) mounts: Arc<Mounts<M>>,
    pub(crate) states: HashMap<&'static str, AttachmentState<M>>,
    pub(crate) persisted: bool,
    pub(crate) errors: ValidationErrors,
    pub(crate) stage: LifecycleStage,
}

impl<M> std::fmt::Debug for Record<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("states", &self.states)
            .field("persisted", &self.persisted)
            .field("errors", &self.errors)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Record<M> {
    /// Wrap a record that has never been saved.
    #[must_use]
    pub fn new(model: M, mounts: Arc<Mounts<M>>) -> Self {
        Self {
            model,
            mounts,
            states: HashMap::new(),
            persisted: false,
            errors: ValidationErrors::new(),
            stage: LifecycleStage::default(),
        }
    }

    /// Wrap a record loaded from the data store.
    ///
    /// The stored location of every non-empty column is resolved now, so a
    /// later change to the fields a store directory rule reads cannot orphan
    /// the file.
    #[must_use]
    pub fn loaded(model: M, mounts: Arc<Mounts<M>>) -> Self {
        let states = loaded_states(&model, &mounts);
        Self {
            model,
            mounts,
            states,
            persisted: true,
            errors: ValidationErrors::new(),
            stage: LifecycleStage::default(),
        }
    }

    /// Assign a file to `attribute`.
    ///
    /// `None` or an empty upload leaves the attribute untouched. A file that
    /// fails its integrity or processing checks is not an error here; it
    /// fails the next validation instead.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttachment` for an unmounted attribute, or a storage
    /// error if the cache cannot be written.
    pub async fn set(
        &mut self,
        attribute: &str,
        file: Option<UploadedFile>,
    ) -> Result<(), AttachmentError> {
        let (name, options) = self.mounts.lookup(attribute)?;
        let Some(file) = file else {
            return Ok(());
        };

        let fresh = Uploader::blank(Arc::clone(self.mounts.storage()), Arc::clone(options), name);
        self.states
            .entry(name)
            .or_default()
            .assign(fresh, file)
            .await?;
        Ok(())
    }

    /// Re-assign a file cached by an earlier request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCacheName` or `CacheNotFound` if the cache entry
    /// cannot be used.
    pub async fn assign_cached(
        &mut self,
        attribute: &str,
        cache_name: &str,
    ) -> Result<(), AttachmentError> {
        let (name, options) = self.mounts.lookup(attribute)?;
        let cached = Uploader::retrieve_from_cache(
            Arc::clone(self.mounts.storage()),
            Arc::clone(options),
            name,
            cache_name,
        )
        .await?;
        self.states.entry(name).or_default().assign_cached(cached);
        Ok(())
    }

    /// The uploader mounted on `attribute`.
    ///
    /// Built on first access: from the column when it holds an identifier,
    /// blank otherwise.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttachment` for an unmounted attribute.
    pub fn get(&mut self, attribute: &str) -> Result<&Uploader<M>, AttachmentError> {
        let (name, options) = self.mounts.lookup(attribute)?;
        let storage = self.mounts.storage();
        let state = self.states.entry(name).or_default();

        if state.current.is_none() {
            let location = state
                .persisted
                .clone()
                .or_else(|| column_location(&self.model, options, name));
            let uploader = match location {
                Some(location) => Uploader::retrieve_from_store(
                    Arc::clone(storage),
                    Arc::clone(options),
                    name,
                    location,
                ),
                None => Uploader::blank(Arc::clone(storage), Arc::clone(options), name),
            };
            state.current = Some(uploader);
        }

        state
            .current
            .as_ref()
            .ok_or_else(|| AttachmentError::unknown_attachment(attribute))
    }

    /// True when a new file was assigned since the last load or save.
    #[must_use]
    pub fn is_changed(&self, attribute: &str) -> bool {
        self.state(attribute).is_some_and(AttachmentState::is_changed)
    }

    /// Flag the file on `attribute` for deletion on the next save.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttachment` for an unmounted attribute.
    pub fn mark_for_removal(
        &mut self,
        attribute: &str,
        remove: bool,
    ) -> Result<(), AttachmentError> {
        let (name, _) = self.mounts.lookup(attribute)?;
        self.states.entry(name).or_default().pending_removal = remove;
        Ok(())
    }

    /// Integrity error captured by the last assignment to `attribute`.
    #[must_use]
    pub fn integrity_error(&self, attribute: &str) -> Option<&IntegrityError> {
        self.state(attribute)?.integrity_error()
    }

    /// Processing error captured by the last assignment to `attribute`.
    #[must_use]
    pub fn processing_error(&self, attribute: &str) -> Option<&ProcessingError> {
        self.state(attribute)?.processing_error()
    }

    /// Identifier currently written in the column of `attribute`.
    #[must_use]
    pub fn identifier(&self, attribute: &str) -> Option<String> {
        let (name, options) = self.mounts.lookup(attribute).ok()?;
        self.model
            .column(options.column_for(name))
            .filter(|value| !value.is_empty())
    }

    /// Attachment state of `attribute`, if it was touched.
    #[must_use]
    pub fn state(&self, attribute: &str) -> Option<&AttachmentState<M>> {
        self.states.get(attribute)
    }

    /// Replace the model with a freshly loaded copy and drop in-memory state.
    ///
    /// Files cached but never saved stay in the cache until it is cleaned.
    pub fn reload(&mut self, model: M) {
        self.states = loaded_states(&model, &self.mounts);
        self.model = model;
        self.persisted = true;
        self.errors = ValidationErrors::new();
        self.stage = LifecycleStage::default();
    }

    /// Errors of the last validation.
    #[must_use]
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// True once the record exists in the data store.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Lifecycle stage reached by the last operation.
    #[must_use]
    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    /// The host model.
    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the host model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Unwrap the host model.
    #[must_use]
    pub fn into_inner(self) -> M {
        self.model
    }
}

/// Stored location named by the column of `attribute`.
pub(crate) fn column_location<M: Model>(
    model: &M,
    options: &MountOptions<M>,
    attribute: &'static str,
) -> Option<StoredLocation> {
    model
        .column(options.column_for(attribute))
        .filter(|identifier| !identifier.is_empty())
        .map(|identifier| StoredLocation::new(options.store_dir_for(model, attribute), identifier))
}

fn loaded_states<M: Model>(
    model: &M,
    mounts: &Mounts<M>,
) -> HashMap<&'static str, AttachmentState<M>> {
    mounts
        .entries()
        .iter()
        .filter_map(|(name, options)| {
            column_location(model, options, name).map(|l| (*name, AttachmentState::persisted_at(l)))
        })
        .collect()
}
