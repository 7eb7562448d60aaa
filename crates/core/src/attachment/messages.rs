//! Validation message keys and their resolution.
//!
//! Message text is looked up by key and locale through a `MessageResolver`
//! supplied by the host. `DefaultMessages` carries the English defaults and
//! `LocaleMessages` carries per-locale overrides from configuration.

use std::collections::HashMap;

use stowage_shared::LocaleSettings;

/// Keys of the validation messages attachments can add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// The assigned file failed the integrity checks.
    IntegrityError,
    /// A processing step failed.
    ProcessingError,
}

impl MessageKey {
    /// Key string, also used as the validation error code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IntegrityError => "carrierwave_integrity_error",
            Self::ProcessingError => "carrierwave_processing_error",
        }
    }

    /// English text used when no resolver has an entry.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::IntegrityError => "is not an allowed file type",
            Self::ProcessingError => "failed to be processed",
        }
    }
}

/// Resolves a message key in a locale.
pub trait MessageResolver: Send + Sync {
    /// Text for `key` in `locale`, or `None` to fall back to the default.
    fn resolve(&self, key: MessageKey, locale: &str) -> Option<String>;
}

/// English defaults for every locale.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessages;

impl MessageResolver for DefaultMessages {
    fn resolve(&self, key: MessageKey, _locale: &str) -> Option<String> {
        Some(key.default_message().to_string())
    }
}

/// Per-locale overrides.
#[derive(Debug, Clone, Default)]
pub struct LocaleMessages {
    table: HashMap<String, HashMap<String, String>>,
}

impl LocaleMessages {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[locale.messages]` configuration section.
    #[must_use]
    pub fn from_settings(settings: &LocaleSettings) -> Self {
        Self {
            table: settings.messages.clone(),
        }
    }

    /// Add one override.
    #[must_use]
    pub fn with(mut self, locale: &str, key: MessageKey, text: impl Into<String>) -> Self {
        self.table
            .entry(locale.to_string())
            .or_default()
            .insert(key.as_str().to_string(), text.into());
        self
    }
}

impl MessageResolver for LocaleMessages {
    fn resolve(&self, key: MessageKey, locale: &str) -> Option<String> {
        self.table.get(locale)?.get(key.as_str()).cloned()
    }
}

/// Resolve with a fallback to the English default.
pub(crate) fn resolve_or_default(
    resolver: &dyn MessageResolver,
    key: MessageKey,
    locale: &str,
) -> String {
    resolver
        .resolve(key, locale)
        .unwrap_or_else(|| key.default_message().to_string())
}
