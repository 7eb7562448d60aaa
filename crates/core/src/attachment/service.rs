//! Save and destroy lifecycle for records with attachments.

use std::borrow::Cow;
use std::sync::Arc;

use stowage_shared::LocaleSettings;
use tracing::{debug, info, warn};
use validator::{ValidationError, ValidationErrors};

use super::error::{AttachmentError, UploadError};
use super::messages::{
    DefaultMessages, LocaleMessages, MessageKey, MessageResolver, resolve_or_default,
};
use super::mount::{Model, Record, column_location};
use super::state::AttachmentState;
use super::types::{LifecycleStage, SaveOutcome, StoredLocation};
use super::uploader::{Uploader, remove_location};

/// Repository trait for record persistence.
///
/// Implemented by the host on top of its data store. Column values written
/// by the lifecycle are part of the model passed in.
pub trait RecordRepository<M>: Send + Sync {
    /// Insert or update the record.
    fn save(
        &self,
        model: &M,
    ) -> impl std::future::Future<Output = Result<(), AttachmentError>> + Send;

    /// Delete the record.
    fn delete(&self, model: &M)
    -> impl std::future::Future<Output = Result<(), AttachmentError>> + Send;
}

/// One column write made while persisting, kept so it can be undone.
#[derive(Debug)]
struct ColumnWrite {
    attribute: &'static str,
    column: &'static str,
    previous: Option<String>,
    removal: bool,
}

/// Drives validation, saving and destruction of records with attachments.
pub struct AttachmentLifecycle<R> {
    repo: Arc<R>,
    messages: Arc<dyn MessageResolver>,
    locale: String,
}

impl<R> AttachmentLifecycle<R> {
    /// Create a lifecycle with English messages.
    #[must_use]
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            messages: Arc::new(DefaultMessages),
            locale: "en".to_string(),
        }
    }

    /// Resolve validation messages through `messages` in `locale`.
    #[must_use]
    pub fn with_messages(
        mut self,
        messages: Arc<dyn MessageResolver>,
        locale: impl Into<String>,
    ) -> Self {
        self.messages = messages;
        self.locale = locale.into();
        self
    }

    /// Use the message overrides and default locale from configuration.
    #[must_use]
    pub fn with_locale_settings(self, settings: &LocaleSettings) -> Self {
        let locale = settings.default_locale.clone();
        self.with_messages(Arc::new(LocaleMessages::from_settings(settings)), locale)
    }

    /// Run attachment checks and the model's own validations.
    ///
    /// Errors are stored on the record; returns true when there are none.
    pub fn validate<M: Model>(&self, record: &mut Record<M>) -> bool {
        record.stage = LifecycleStage::Validating;

        let mut errors = match validator::Validate::validate(&record.model) {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        for (name, options) in record.mounts.entries() {
            let Some(state) = record.states.get(name) else {
                continue;
            };
            let key = match &state.error {
                Some(UploadError::Integrity(_)) if options.validates_integrity() => {
                    MessageKey::IntegrityError
                }
                Some(UploadError::Processing(_)) if options.validates_processing() => {
                    MessageKey::ProcessingError
                }
                _ => continue,
            };

            let mut error = ValidationError::new(key.as_str());
            error.message = Some(Cow::Owned(resolve_or_default(
                self.messages.as_ref(),
                key,
                &self.locale,
            )));
            errors.add(*name, error);
        }

        let valid = errors.is_empty();
        record.errors = errors;
        record.stage = if valid {
            LifecycleStage::Valid
        } else {
            LifecycleStage::Invalid
        };
        valid
    }

    /// Validate, store assigned files and save the record.
    ///
    /// An invalid record is left untouched: nothing is stored, no column is
    /// written and cached files stay in the cache. When the repository fails
    /// the columns are restored, freshly stored copies are deleted and the
    /// uploaders go back to their cached state.
    ///
    /// # Errors
    ///
    /// Returns the repository error after rolling back, or a storage error
    /// from storing or removing files.
    pub async fn save<M: Model>(
        &self,
        record: &mut Record<M>,
    ) -> Result<SaveOutcome, AttachmentError>
    where
        R: RecordRepository<M>,
    {
        if !self.validate(record) {
            info!(errors = %record.errors, "record invalid, nothing stored");
            return Ok(SaveOutcome::Invalid);
        }

        record.stage = LifecycleStage::Persisting;
        let mut writes = Vec::new();
        let result = match store_assigned(record, &mut writes).await {
            Ok(()) => self.repo.save(&record.model).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(error = %err, "save failed, rolling back attachments");
            roll_back(record, &writes).await;
            record.stage = LifecycleStage::RolledBack;
            return Err(err);
        }

        record.persisted = true;
        commit(record, writes).await?;
        record.stage = LifecycleStage::Persisted;
        info!("record saved");
        Ok(SaveOutcome::Persisted)
    }

    /// Delete the record, then every stored file it references.
    ///
    /// Validations are not run.
    ///
    /// # Errors
    ///
    /// Returns the repository error, in which case no file is touched, or a
    /// storage error from removing files.
    pub async fn destroy<M: Model>(&self, record: &mut Record<M>) -> Result<(), AttachmentError>
    where
        R: RecordRepository<M>,
    {
        self.repo.delete(&record.model).await?;

        let mounts = Arc::clone(&record.mounts);
        for (name, options) in mounts.entries() {
            let name = *name;
            let location = record
                .states
                .get(name)
                .and_then(|state| {
                    state.persisted.clone().or_else(|| {
                        state
                            .current
                            .as_ref()
                            .and_then(|u| u.stored_location().cloned())
                    })
                })
                .or_else(|| column_location(&record.model, options, name));

            if let Some(location) = location {
                remove_location(mounts.storage(), options, &location).await?;
                info!(
                    attribute = name,
                    path = %location.path(),
                    "removed attachment of destroyed record"
                );
            }
            record.states.insert(name, AttachmentState::default());
        }

        record.persisted = false;
        record.stage = LifecycleStage::Destroyed;
        Ok(())
    }
}

/// Store every changed, cached attachment and write its identifier; write
/// `""` for attachments flagged for removal.
async fn store_assigned<M: Model>(
    record: &mut Record<M>,
    writes: &mut Vec<ColumnWrite>,
) -> Result<(), AttachmentError> {
    let mounts = Arc::clone(&record.mounts);
    for (name, options) in mounts.entries() {
        let name = *name;
        let column = options.column_for(name);
        let Some(state) = record.states.get_mut(name) else {
            continue;
        };
        let previous = record.model.column(column);

        if state.pending_removal {
            writes.push(ColumnWrite {
                attribute: name,
                column,
                previous,
                removal: true,
            });
            record.model.set_column(column, Some(String::new()));
            continue;
        }

        if !state.changed {
            continue;
        }
        let Some(uploader) = state.current.as_mut().filter(|u| u.is_cached()) else {
            continue;
        };

        uploader.store(&record.model).await?;
        let identifier = uploader.identifier().map(str::to_string);
        writes.push(ColumnWrite {
            attribute: name,
            column,
            previous,
            removal: false,
        });
        record.model.set_column(column, identifier);
    }
    Ok(())
}

/// Undo `store_assigned` after a failed repository save.
async fn roll_back<M: Model>(record: &mut Record<M>, writes: &[ColumnWrite]) {
    for write in writes.iter().rev() {
        record.model.set_column(write.column, write.previous.clone());
        if write.removal {
            continue;
        }

        let Some(state) = record.states.get_mut(write.attribute) else {
            continue;
        };
        let keep = state.persisted.as_ref();
        if let Some(uploader) = state.current.as_mut()
            && let Err(err) = uploader.unstore(keep).await
        {
            warn!(attribute = write.attribute, error = %err, "failed to delete stored copy");
        }
    }
}

/// Finish a successful save: drop cache copies, delete stale and removed
/// files, and remember where each file now lives.
async fn commit<M: Model>(
    record: &mut Record<M>,
    writes: Vec<ColumnWrite>,
) -> Result<(), AttachmentError> {
    let mounts = Arc::clone(&record.mounts);
    for write in writes {
        let (name, options) = mounts.lookup(write.attribute)?;
        let previous_location = record
            .states
            .get_mut(name)
            .and_then(|state| state.persisted.take())
            .or_else(|| {
                write
                    .previous
                    .filter(|identifier| !identifier.is_empty())
                    .map(|identifier| {
                        StoredLocation::new(options.store_dir_for(&record.model, name), identifier)
                    })
            });
        let state = record.states.entry(name).or_default();

        if write.removal {
            if let Some(location) = &previous_location {
                remove_location(mounts.storage(), options, location).await?;
                info!(attribute = name, path = %location.path(), "removed attachment");
            }
            *state = AttachmentState::default();
            state.current = Some(Uploader::blank(
                Arc::clone(mounts.storage()),
                Arc::clone(options),
                name,
            ));
            continue;
        }

        let Some(uploader) = state.current.as_mut() else {
            continue;
        };
        uploader.release_cache().await?;
        let location = uploader.stored_location().cloned();

        if let Some(old) = &previous_location
            && options.removes_previously_stored_files()
            && location.as_ref().is_none_or(|new| new.path() != old.path())
        {
            remove_location(mounts.storage(), options, old).await?;
            debug!(attribute = name, path = %old.path(), "removed previously stored file");
        }

        state.persisted = location;
        state.changed = false;
    }
    Ok(())
}
