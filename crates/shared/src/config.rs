//! Configuration management.

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StowageConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Upload path defaults.
    #[serde(default)]
    pub uploads: UploadSettings,
    /// Locale and message overrides.
    #[serde(default)]
    pub locale: LocaleSettings,
}

/// Which storage service backs the uploaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// Local filesystem rooted at `root`.
    #[default]
    Local,
    /// In-process memory (tests).
    Memory,
    /// S3-compatible object storage.
    S3,
    /// Azure Blob Storage.
    AzureBlob,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Backend kind.
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Root directory for the local backend.
    #[serde(default = "default_root")]
    pub root: String,
    /// S3 endpoint URL.
    pub endpoint: Option<String>,
    /// S3 bucket or Azure container.
    pub bucket: Option<String>,
    /// S3 access key ID or Azure account name.
    pub access_key_id: Option<String>,
    /// S3 secret access key or Azure account key.
    pub secret_access_key: Option<String>,
    /// S3 region.
    pub region: Option<String>,
    /// Retries for transient storage failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Prefix joined in front of stored paths to build URLs.
    #[serde(default)]
    pub base_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            root: default_root(),
            endpoint: None,
            bucket: None,
            access_key_id: None,
            secret_access_key: None,
            region: None,
            max_retries: default_max_retries(),
            base_url: String::new(),
        }
    }
}

fn default_root() -> String {
    "public".to_string()
}

fn default_max_retries() -> usize {
    3
}

/// Default upload directories, relative to the storage root.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSettings {
    /// Directory for permanently stored files.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    /// Directory for cached files awaiting a save.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_store_dir() -> String {
    "uploads".to_string()
}

fn default_cache_dir() -> String {
    "uploads/tmp".to_string()
}

/// Locale selection and message overrides.
///
/// `messages` maps a locale to a table of message key → text, for example
/// `messages.fr.carrierwave_integrity_error = "n'est pas un type de fichier autorisé"`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocaleSettings {
    /// Locale used when the caller does not pick one.
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// Per-locale message overrides.
    #[serde(default)]
    pub messages: HashMap<String, HashMap<String, String>>,
}

impl Default for LocaleSettings {
    fn default() -> Self {
        Self {
            default_locale: default_locale(),
            messages: HashMap::new(),
        }
    }
}

fn default_locale() -> String {
    "en".to_string()
}

impl StowageConfig {
    /// Loads configuration from `.env`, config files and the environment.
    ///
    /// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
    /// then `STOWAGE__*` environment variables (`__` separates sections).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("STOWAGE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Loads configuration from a TOML string, for embedding and tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
