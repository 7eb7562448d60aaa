//! The uploader: one physical file attached to one record attribute.
//!
//! An uploader is always in exactly one state:
//!
//! ```text
//!            cache()                store()
//!   Blank ────────────▶ Cached ────────────▶ Stored
//!     ▲                   ▲                    │
//!     │                   └──── unstore() ─────┤  (rollback)
//!     └────────────────── remove() ────────────┘
//! ```
//!
//! A stored uploader may still hold its cache copy until the save commits and
//! `release_cache` runs; that copy is what a rollback returns to.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value, json};
use stowage_shared::CacheId;
use tracing::debug;

use super::error::{AttachmentError, IntegrityError, UploadError};
use super::options::MountOptions;
use super::processing::run_pipeline;
use super::types::{CachedFile, StoredLocation, UploadedFile, join_key};
use crate::storage::{StorageError, StorageService, sanitize_filename};

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileState {
    Blank,
    Cached(CachedFile),
    Stored {
        location: StoredLocation,
        cached: Option<CachedFile>,
    },
}

/// Uploader mounted on one attribute of one record.
pub struct Uploader<M> {
    storage: Arc<StorageService>,
    options: Arc<MountOptions<M>>,
    mounted_as: &'static str,
    state: FileState,
}

impl<M> fmt::Debug for Uploader<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("mounted_as", &self.mounted_as)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<M> Uploader<M> {
    /// A blank uploader.
    #[must_use]
    pub fn blank(
        storage: Arc<StorageService>,
        options: Arc<MountOptions<M>>,
        mounted_as: &'static str,
    ) -> Self {
        Self {
            storage,
            options,
            mounted_as,
            state: FileState::Blank,
        }
    }

    /// An uploader pointing at an already stored file.
    #[must_use]
    pub fn retrieve_from_store(
        storage: Arc<StorageService>,
        options: Arc<MountOptions<M>>,
        mounted_as: &'static str,
        location: StoredLocation,
    ) -> Self {
        Self {
            storage,
            options,
            mounted_as,
            state: FileState::Stored {
                location,
                cached: None,
            },
        }
    }

    /// Rebuild a cached uploader from a cache name (`<cache_id>/<filename>`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidCacheName` for malformed names and `CacheNotFound` when
    /// the cache entry is gone.
    pub async fn retrieve_from_cache(
        storage: Arc<StorageService>,
        options: Arc<MountOptions<M>>,
        mounted_as: &'static str,
        cache_name: &str,
    ) -> Result<Self, AttachmentError> {
        let (id, filename) = cache_name
            .split_once('/')
            .ok_or_else(|| AttachmentError::InvalidCacheName(cache_name.to_string()))?;
        let cache_id: CacheId = id
            .parse()
            .map_err(|_| AttachmentError::InvalidCacheName(cache_name.to_string()))?;
        if filename.is_empty() || sanitize_filename(filename) != filename {
            return Err(AttachmentError::InvalidCacheName(cache_name.to_string()));
        }

        let key = join_key(
            options.cache_dir_path(),
            &format!("{cache_id}/{filename}"),
        );
        let metadata = storage.metadata(&key).await.map_err(|e| match e {
            StorageError::NotFound { .. } => AttachmentError::CacheNotFound(cache_name.to_string()),
            other => AttachmentError::Storage(other),
        })?;

        let cached = CachedFile {
            cache_id,
            original_filename: filename.to_string(),
            filename: filename.to_string(),
            content_type: metadata.content_type.or_else(|| guess_content_type(filename)),
            size: metadata.file_size,
        };

        Ok(Self {
            storage,
            options,
            mounted_as,
            state: FileState::Cached(cached),
        })
    }

    /// Validate, process and write `file` into the cache.
    ///
    /// On failure the uploader keeps its previous state.
    ///
    /// # Errors
    ///
    /// Returns `Integrity` for a rejected file, `Processing` when a step fails
    /// and `Storage` when the cache cannot be written.
    pub async fn cache(&mut self, file: UploadedFile) -> Result<(), UploadError> {
        let filename = sanitize_filename(&file.filename);
        if filename.is_empty() {
            return Err(IntegrityError::EmptyFilename {
                filename: file.filename,
            }
            .into());
        }
        let content_type = file
            .content_type
            .clone()
            .or_else(|| guess_content_type(&filename));
        let size = file.content.len() as u64;

        self.options
            .check_integrity(&filename, content_type.as_deref(), size)?;

        let content = run_pipeline(self.options.processors(), file.content)?;
        let mut renditions = Vec::with_capacity(self.options.versions().len());
        for version in self.options.versions() {
            let rendition = run_pipeline(version.processors(), content.clone())?;
            renditions.push((version.name(), rendition));
        }

        let cached = CachedFile {
            cache_id: CacheId::new(),
            original_filename: file.filename,
            filename,
            content_type,
            size: content.len() as u64,
        };

        let cache_path = self.cache_key(&cached, None);
        self.storage.write(&cache_path, content).await?;
        for (version, rendition) in renditions {
            let key = self.cache_key(&cached, Some(version));
            self.storage.write(&key, rendition).await?;
        }

        debug!(
            attribute = self.mounted_as,
            path = %cache_path,
            size = cached.size,
            "cached upload"
        );
        self.state = FileState::Cached(cached);
        Ok(())
    }

    /// Promote the cached file into the store directory.
    ///
    /// The filename and store directory are resolved against `model` now,
    /// not when the file was cached. Already stored uploaders are left as is.
    ///
    /// # Errors
    ///
    /// Returns `NotCached` for a blank uploader, or the copy failure.
    pub async fn store(&mut self, model: &M) -> Result<(), StorageError> {
        let cached = match &self.state {
            FileState::Blank => return Err(StorageError::not_cached(self.mounted_as)),
            FileState::Stored { .. } => return Ok(()),
            FileState::Cached(cached) => cached.clone(),
        };

        let location = StoredLocation::new(
            self.options.store_dir_for(model, self.mounted_as),
            self.options.filename_for(model, &cached.filename),
        );

        self.storage
            .copy(&self.cache_key(&cached, None), &location.path())
            .await?;
        for version in self.options.versions() {
            self.storage
                .copy(
                    &self.cache_key(&cached, Some(version.name())),
                    &location.version_path(version.name()),
                )
                .await?;
        }

        debug!(
            attribute = self.mounted_as,
            path = %location.path(),
            "stored upload"
        );
        self.state = FileState::Stored {
            location,
            cached: Some(cached),
        };
        Ok(())
    }

    /// Drop the cache copy of a stored file.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache copy cannot be deleted.
    pub(crate) async fn release_cache(&mut self) -> Result<(), StorageError> {
        let FileState::Stored { cached, .. } = &mut self.state else {
            return Ok(());
        };
        let Some(released) = cached.take() else {
            return Ok(());
        };

        self.storage.delete(&self.cache_key(&released, None)).await?;
        for version in self.options.versions() {
            self.storage
                .delete(&self.cache_key(&released, Some(version.name())))
                .await?;
        }
        Ok(())
    }

    /// Undo a `store` whose save was rolled back.
    ///
    /// The stored copy is deleted unless it sits at `keep`, the path the
    /// record had persisted before; that path belongs to the old file.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored copy cannot be deleted.
    pub(crate) async fn unstore(
        &mut self,
        keep: Option<&StoredLocation>,
    ) -> Result<(), StorageError> {
        let FileState::Stored {
            location,
            cached: Some(cached),
        } = &self.state
        else {
            return Ok(());
        };

        if keep != Some(location) {
            remove_location(&self.storage, &self.options, location).await?;
        }
        self.state = FileState::Cached(cached.clone());
        Ok(())
    }

    /// Delete the stored file and its versions.
    ///
    /// A file that is already gone counts as removed. Cached and blank
    /// uploaders are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete fails.
    pub async fn remove(&mut self) -> Result<(), StorageError> {
        let FileState::Stored { location, .. } = &self.state else {
            return Ok(());
        };
        remove_location(&self.storage, &self.options, location).await?;
        debug!(attribute = self.mounted_as, path = %location.path(), "removed upload");
        self.state = FileState::Blank;
        Ok(())
    }

    /// Read the current file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a blank uploader or a missing file.
    pub async fn read(&self) -> Result<Bytes, StorageError> {
        let path = self
            .current_path()
            .ok_or_else(|| StorageError::not_found(self.mounted_as))?;
        self.storage.read(&path).await
    }

    /// Attribute this uploader is mounted as.
    #[must_use]
    pub fn mounted_as(&self) -> &'static str {
        self.mounted_as
    }

    /// True when neither cached nor stored.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self.state, FileState::Blank)
    }

    /// True while a file waits in the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self.state, FileState::Cached(_))
    }

    /// True once the file is in the store directory.
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self.state, FileState::Stored { .. })
    }

    /// Stored filename; `None` unless stored.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.stored_location().map(|l| l.identifier.as_str())
    }

    /// Where the stored file lives.
    #[must_use]
    pub fn stored_location(&self) -> Option<&StoredLocation> {
        match &self.state {
            FileState::Stored { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Store path; `None` unless stored.
    #[must_use]
    pub fn store_path(&self) -> Option<String> {
        self.stored_location().map(StoredLocation::path)
    }

    /// Cache path; `None` unless cached.
    #[must_use]
    pub fn cache_path(&self) -> Option<String> {
        match &self.state {
            FileState::Cached(cached) => Some(self.cache_key(cached, None)),
            _ => None,
        }
    }

    /// Store path if stored, else cache path if cached.
    #[must_use]
    pub fn current_path(&self) -> Option<String> {
        self.path_for(None)
    }

    /// Path of a version, following the same rule as `current_path`.
    #[must_use]
    pub fn version_path(&self, version: &str) -> Option<String> {
        self.options
            .versions()
            .iter()
            .any(|v| v.name() == version)
            .then(|| self.path_for(Some(version)))
            .flatten()
    }

    /// Handle for re-assigning the cached file after a failed save.
    #[must_use]
    pub fn cache_name(&self) -> Option<String> {
        match &self.state {
            FileState::Cached(cached) => Some(cached.cache_name()),
            _ => None,
        }
    }

    /// Name as originally assigned; `None` for retrieved or blank uploaders.
    #[must_use]
    pub fn original_filename(&self) -> Option<&str> {
        match &self.state {
            FileState::Cached(cached)
            | FileState::Stored {
                cached: Some(cached),
                ..
            } => Some(&cached.original_filename),
            _ => None,
        }
    }

    /// Public URL of the current file.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.current_path().map(|p| self.storage.url(&p))
    }

    /// Public URL of a version.
    #[must_use]
    pub fn version_url(&self, version: &str) -> Option<String> {
        self.version_path(version).map(|p| self.storage.url(&p))
    }

    /// `{ "url": ..., "<version>": { "url": ... } }`
    #[must_use]
    pub fn as_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("url".to_string(), json!(self.url()));
        for version in self.options.versions() {
            object.insert(
                version.name().to_string(),
                json!({ "url": self.version_url(version.name()) }),
            );
        }
        Value::Object(object)
    }

    fn path_for(&self, version: Option<&str>) -> Option<String> {
        match (&self.state, version) {
            (FileState::Blank, _) => None,
            (FileState::Cached(cached), version) => Some(self.cache_key(cached, version)),
            (FileState::Stored { location, .. }, None) => Some(location.path()),
            (FileState::Stored { location, .. }, Some(version)) => {
                Some(location.version_path(version))
            }
        }
    }

    fn cache_key(&self, cached: &CachedFile, version: Option<&str>) -> String {
        let name = match version {
            Some(version) => format!("{version}_{}", cached.filename),
            None => cached.filename.clone(),
        };
        join_key(
            self.options.cache_dir_path(),
            &format!("{}/{name}", cached.cache_id),
        )
    }
}

/// Delete a stored file and its versions.
pub(crate) async fn remove_location<M>(
    storage: &StorageService,
    options: &MountOptions<M>,
    location: &StoredLocation,
) -> Result<(), StorageError> {
    storage.delete(&location.path()).await?;
    for version in options.versions() {
        storage.delete(&location.version_path(version.name())).await?;
    }
    Ok(())
}

fn guess_content_type(filename: &str) -> Option<String> {
    mime_guess::from_path(filename)
        .first_raw()
        .map(str::to_string)
}
