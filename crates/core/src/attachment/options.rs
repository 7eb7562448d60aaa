//! Per-mount uploader options.

use std::fmt;
use std::sync::Arc;

use stowage_shared::UploadSettings;

use super::error::IntegrityError;
use super::processing::{Processor, Version};
use crate::storage::sanitize_filename;

/// Computes a store directory from the model and the mounted attribute name.
pub type StoreDirRule<M> = Arc<dyn Fn(&M, &str) -> String + Send + Sync>;

/// Computes the stored filename from the model and the sanitized original name.
pub type NamingRule<M> = Arc<dyn Fn(&M, &str) -> String + Send + Sync>;

enum StoreDir<M> {
    Fixed(String),
    Derived(StoreDirRule<M>),
}

/// Options of one mounted attribute.
///
/// Built once when the mount table is declared and shared by every record.
pub struct MountOptions<M> {
    column: Option<&'static str>,
    store_dir: StoreDir<M>,
    cache_dir: String,
    extension_allowlist: Option<Vec<String>>,
    content_type_allowlist: Option<Vec<String>>,
    max_file_size: Option<u64>,
    processors: Vec<Arc<dyn Processor>>,
    versions: Vec<Version>,
    naming: Option<NamingRule<M>>,
    validate_integrity: bool,
    validate_processing: bool,
    remove_previously_stored_files_after_update: bool,
}

impl<M> Default for MountOptions<M> {
    fn default() -> Self {
        Self::from_settings(&UploadSettings::default())
    }
}

impl<M> MountOptions<M> {
    /// Options with the default directories (`uploads`, `uploads/tmp`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options using the configured directories.
    #[must_use]
    pub fn from_settings(settings: &UploadSettings) -> Self {
        Self {
            column: None,
            store_dir: StoreDir::Fixed(settings.store_dir.clone()),
            cache_dir: settings.cache_dir.clone(),
            extension_allowlist: None,
            content_type_allowlist: None,
            max_file_size: None,
            processors: Vec::new(),
            versions: Vec::new(),
            naming: None,
            validate_integrity: true,
            validate_processing: true,
            remove_previously_stored_files_after_update: true,
        }
    }

    /// Persist the identifier in `column` instead of the attribute name.
    #[must_use]
    pub fn mount_on(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Fixed store directory.
    #[must_use]
    pub fn store_dir(mut self, dir: impl Into<String>) -> Self {
        self.store_dir = StoreDir::Fixed(dir.into());
        self
    }

    /// Store directory derived from the model, resolved at store time.
    #[must_use]
    pub fn store_dir_with<F>(mut self, rule: F) -> Self
    where
        F: Fn(&M, &str) -> String + Send + Sync + 'static,
    {
        self.store_dir = StoreDir::Derived(Arc::new(rule));
        self
    }

    /// Cache directory.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Accept only these extensions (case-insensitive, without the dot).
    #[must_use]
    pub fn extension_allowlist<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extension_allowlist = Some(
            extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Accept only these content types. `type/*` matches a whole family.
    #[must_use]
    pub fn content_type_allowlist<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_type_allowlist = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Reject files larger than `max` bytes.
    #[must_use]
    pub fn max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = Some(max);
        self
    }

    /// Append a processing step for the main file.
    #[must_use]
    pub fn process(mut self, step: Arc<dyn Processor>) -> Self {
        self.processors.push(step);
        self
    }

    /// Add a version.
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.versions.push(version);
        self
    }

    /// Override the stored filename. Evaluated at store time, so it sees
    /// attributes set after the file was assigned.
    #[must_use]
    pub fn filename_with<F>(mut self, rule: F) -> Self
    where
        F: Fn(&M, &str) -> String + Send + Sync + 'static,
    {
        self.naming = Some(Arc::new(rule));
        self
    }

    /// Report integrity errors as validation errors (default on).
    #[must_use]
    pub fn validate_integrity(mut self, enabled: bool) -> Self {
        self.validate_integrity = enabled;
        self
    }

    /// Report processing errors as validation errors (default on).
    #[must_use]
    pub fn validate_processing(mut self, enabled: bool) -> Self {
        self.validate_processing = enabled;
        self
    }

    /// Delete the previous stored file when a save changes its path
    /// (default on).
    #[must_use]
    pub fn remove_previously_stored_files_after_update(mut self, enabled: bool) -> Self {
        self.remove_previously_stored_files_after_update = enabled;
        self
    }

    /// Backing column, defaulting to the attribute name.
    #[must_use]
    pub fn column_for<'a>(&self, attribute: &'a str) -> &'a str {
        self.column.unwrap_or(attribute)
    }

    /// Store directory for `model`.
    #[must_use]
    pub fn store_dir_for(&self, model: &M, attribute: &str) -> String {
        match &self.store_dir {
            StoreDir::Fixed(dir) => dir.clone(),
            StoreDir::Derived(rule) => rule(model, attribute),
        }
    }

    /// Stored filename for `model`, sanitized.
    ///
    /// Falls back to `original` when the naming rule yields nothing usable.
    #[must_use]
    pub fn filename_for(&self, model: &M, original: &str) -> String {
        let Some(rule) = &self.naming else {
            return original.to_string();
        };
        let name = sanitize_filename(&rule(model, original));
        if name.is_empty() {
            original.to_string()
        } else {
            name
        }
    }

    /// Cache directory.
    #[must_use]
    pub fn cache_dir_path(&self) -> &str {
        &self.cache_dir
    }

    /// Configured versions.
    #[must_use]
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub(crate) fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    pub(crate) fn validates_integrity(&self) -> bool {
        self.validate_integrity
    }

    pub(crate) fn validates_processing(&self) -> bool {
        self.validate_processing
    }

    pub(crate) fn removes_previously_stored_files(&self) -> bool {
        self.remove_previously_stored_files_after_update
    }

    /// Run the integrity checks for a sanitized filename.
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub fn check_integrity(
        &self,
        filename: &str,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<(), IntegrityError> {
        if let Some(allowed) = &self.extension_allowlist {
            let extension = extension_of(filename).unwrap_or_default().to_ascii_lowercase();
            if !allowed.iter().any(|a| *a == extension) {
                return Err(IntegrityError::ExtensionNotAllowed {
                    extension,
                    allowed: allowed.join(", "),
                });
            }
        }

        if let Some(allowed) = &self.content_type_allowlist {
            let content_type = content_type.unwrap_or("application/octet-stream");
            if !allowed.iter().any(|a| content_type_matches(a, content_type)) {
                return Err(IntegrityError::ContentTypeNotAllowed {
                    content_type: content_type.to_string(),
                });
            }
        }

        if let Some(max) = self.max_file_size
            && size > max
        {
            return Err(IntegrityError::FileTooLarge { size, max });
        }

        Ok(())
    }
}

impl<M> fmt::Debug for MountOptions<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store_dir = match &self.store_dir {
            StoreDir::Fixed(dir) => dir.as_str(),
            StoreDir::Derived(_) => "<derived>",
        };
        f.debug_struct("MountOptions")
            .field("column", &self.column)
            .field("store_dir", &store_dir)
            .field("cache_dir", &self.cache_dir)
            .field("extension_allowlist", &self.extension_allowlist)
            .field("content_type_allowlist", &self.content_type_allowlist)
            .field("max_file_size", &self.max_file_size)
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

/// Extension of a filename, without the dot.
#[must_use]
pub fn extension_of(filename: &str) -> Option<&str> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        None
    } else {
        Some(extension)
    }
}

fn content_type_matches(pattern: &str, content_type: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(family) => content_type
            .split_once('/')
            .is_some_and(|(head, _)| head.eq_ignore_ascii_case(family)),
        None => pattern.eq_ignore_ascii_case(content_type),
    }
}
