//! Storage service implementation using Apache OpenDAL.

use std::collections::HashSet;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use opendal::layers::RetryLayer;
use opendal::{ErrorKind, Operator, services};
use stowage_shared::{CacheId, StorageSettings};
use tracing::{debug, warn};

use super::config::{StorageConfig, StorageProvider};
use super::error::StorageError;

/// Metadata about a stored or cached file.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes.
    pub file_size: u64,
    /// Content type, when the backend records one.
    pub content_type: Option<String>,
}

/// Storage service shared by every uploader.
pub struct StorageService {
    operator: Operator,
    config: StorageConfig,
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("provider", &self.config.provider.name())
            .field("bucket", &self.config.provider.bucket())
            .finish_non_exhaustive()
    }
}

impl StorageService {
    /// Create a new storage service from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage provider cannot be initialized.
    pub fn from_config(config: StorageConfig) -> Result<Self, StorageError> {
        let operator = Self::create_operator(&config.provider, config.max_retries)?;
        Ok(Self { operator, config })
    }

    /// Create a storage service from loaded settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are incomplete or the provider cannot
    /// be initialized.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StorageError> {
        Self::from_config(StorageConfig::from_settings(settings)?)
    }

    /// In-memory storage, for tests and previews.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory service cannot be initialized.
    pub fn memory() -> Result<Self, StorageError> {
        Self::from_config(StorageConfig::new(StorageProvider::Memory))
    }

    /// Create OpenDAL operator from provider config.
    fn create_operator(
        provider: &StorageProvider,
        max_retries: usize,
    ) -> Result<Operator, StorageError> {
        let retry = RetryLayer::new().with_max_times(max_retries);

        match provider {
            StorageProvider::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
            } => {
                let builder = services::S3::default()
                    .endpoint(endpoint)
                    .bucket(bucket)
                    .access_key_id(access_key_id)
                    .secret_access_key(secret_access_key)
                    .region(region);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .layer(retry)
                    .finish()
                    .pipe(Ok)
            }
            StorageProvider::AzureBlob {
                account,
                access_key,
                container,
            } => {
                let builder = services::Azblob::default()
                    .account_name(account)
                    .account_key(access_key)
                    .container(container);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .layer(retry)
                    .finish()
                    .pipe(Ok)
            }
            StorageProvider::LocalFs { root } => {
                let builder = services::Fs::default().root(
                    root.to_str()
                        .ok_or_else(|| StorageError::configuration("invalid path"))?,
                );

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .layer(retry)
                    .finish()
                    .pipe(Ok)
            }
            StorageProvider::Memory => Operator::new(services::Memory::default())
                .map_err(|e| StorageError::configuration(e.to_string()))?
                .layer(retry)
                .finish()
                .pipe(Ok),
        }
    }

    /// Write a file, replacing whatever the key held.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    pub async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        validate_key(key)?;
        debug!(key, size = data.len(), "writing file");
        self.operator.write(key, data).await?;
        Ok(())
    }

    /// Read a whole file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is stored at `key`.
    pub async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;
        let buffer = self.operator.read(key).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::not_found(key),
            _ => StorageError::from(e),
        })?;
        Ok(buffer.to_bytes())
    }

    /// Copy `from` to `to`, overwriting `to`.
    ///
    /// Backends without a native copy fall back to read then write.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `from` does not exist, or an operation error.
    pub async fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_key(from)?;
        validate_key(to)?;
        if from == to {
            return Ok(());
        }

        debug!(from, to, "copying file");
        if self.operator.info().full_capability().copy {
            self.operator.copy(from, to).await.map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::not_found(from),
                _ => StorageError::from(e),
            })
        } else {
            let data = self.read(from).await?;
            self.write(to, data).await
        }
    }

    /// Delete a file from storage.
    ///
    /// A missing file counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails for any other reason.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        match self.operator.delete(key).await {
            Ok(()) => {
                debug!(key, "deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key, "file already gone");
                Ok(())
            }
            Err(e) => Err(StorageError::from(e)),
        }
    }

    /// Check if a file exists in storage.
    pub async fn exists(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        self.operator.stat(key).await.is_ok()
    }

    /// Stat a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be accessed.
    pub async fn metadata(&self, key: &str) -> Result<FileMetadata, StorageError> {
        validate_key(key)?;
        let meta = self.operator.stat(key).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::not_found(key),
            _ => StorageError::from(e),
        })?;

        Ok(FileMetadata {
            file_size: meta.content_length(),
            content_type: meta.content_type().map(String::from),
        })
    }

    /// Delete cache entries under `cache_dir` older than `max_age`.
    ///
    /// Cache entries live in `<cache_dir>/<cache_id>/`, and the cache id is a
    /// UUID v7, so its age is read from the id itself. Entries whose directory
    /// name is not a cache id are left alone. Returns the number of cache
    /// entries removed.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or deleting fails.
    pub async fn clean_cached_files(
        &self,
        cache_dir: &str,
        max_age: chrono::Duration,
    ) -> Result<usize, StorageError> {
        let prefix = format!("{}/", cache_dir.trim_end_matches('/'));
        validate_key(&prefix)?;

        let entries = match self.operator.list_with(&prefix).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::from(e)),
        };

        let cutoff = Utc::now() - max_age;
        let mut removed = HashSet::new();
        for entry in entries {
            if !entry.metadata().mode().is_file() {
                continue;
            }
            let Some(rest) = entry.path().strip_prefix(&prefix) else {
                continue;
            };
            let Some((segment, _)) = rest.split_once('/') else {
                continue;
            };
            let Ok(cache_id) = CacheId::from_str(segment) else {
                continue;
            };
            if cache_created_at(cache_id).is_some_and(|created| created < cutoff) {
                self.delete(entry.path()).await?;
                removed.insert(cache_id);
            }
        }

        if !removed.is_empty() {
            debug!(cache_dir, removed = removed.len(), "cleaned cached files");
        }
        Ok(removed.len())
    }

    /// Public URL for a key.
    #[must_use]
    pub fn url(&self, key: &str) -> String {
        self.config.url_for(key)
    }

    /// Get the storage provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.config.provider.name()
    }
}

/// Creation time encoded in a v7 cache id.
fn cache_created_at(cache_id: CacheId) -> Option<DateTime<Utc>> {
    let (secs, nanos) = cache_id.into_inner().get_timestamp()?.to_unix();
    DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
}

/// Reject keys that could escape the storage root.
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\0')
        || key.contains('\\')
        || key.split('/').any(|segment| segment == "..")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Sanitize filename for storage key.
///
/// Drops any directory part, then replaces every character other than ASCII
/// alphanumerics, dots, hyphens and underscores with `_`. A name made only of
/// dots becomes underscores so it can never address a parent directory.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        "_".repeat(sanitized.len())
    } else {
        sanitized
    }
}

/// Extension trait for pipe operator.
trait Pipe: Sized {
    fn pipe<F, R>(self, f: F) -> R
    where
        F: FnOnce(Self) -> R,
    {
        f(self)
    }
}

impl<T> Pipe for T {}
