//! File attachments for persisted records.
//!
//! This crate holds the attachment lifecycle and the storage layer it runs
//! on. It has no web or database dependencies; hosts plug in their data store
//! through `RecordRepository` and their models through `Model`.
//!
//! # Modules
//!
//! - `attachment` - Mounted uploaders, validation and the save/destroy lifecycle
//! - `storage` - Object storage over OpenDAL (local fs, memory, S3, Azure Blob)

pub mod attachment;
pub mod storage;
