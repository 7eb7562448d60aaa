//! Storage backend for uploaded files using Apache OpenDAL.
//!
//! Uploaders only need a narrow surface: write a cached file, copy it into the
//! store directory, check that a path exists, and delete it again. OpenDAL
//! makes the backend interchangeable:
//! - S3-compatible: Cloudflare R2, Supabase Storage, AWS S3, DigitalOcean Spaces
//! - Azure Blob Storage
//! - Local filesystem
//! - In-process memory (tests)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Apache OpenDAL                              │
//! │              (Unified Storage API + RetryLayer)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ op.write("key", data)      │ op.copy("from", "to")              │
//! │ op.read("key")             │ op.stat("key")                     │
//! │ op.delete("key")           │ op.list_with("dir").recursive(..)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod service;

pub use config::{StorageConfig, StorageProvider};
pub use error::StorageError;
pub use service::{FileMetadata, StorageService, sanitize_filename};
