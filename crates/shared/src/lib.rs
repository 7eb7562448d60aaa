//! Shared configuration and identifier types for Stowage.
//!
//! This crate provides common types used across the workspace:
//! - Typed IDs for cache entries
//! - Configuration management for storage, uploads and locale messages

pub mod config;
pub mod types;


pub use config::{
    LocaleSettings, StorageBackendKind, StorageSettings, StowageConfig, UploadSettings,
};
pub use types::CacheId;
