//! Attachments mounted on host records.
//!
//! A file assigned to a mounted attribute moves through three places:
//!
//! ```text
//!   set()                save()                      save() commits
//! ───────▶ cache dir ─────────────▶ store dir ──────────────────────▶ column = identifier
//!          (validated,             (copied, cache               (stale file deleted,
//!           processed)              copy kept for rollback)      cache copy released)
//! ```
//!
//! - `Mounts` declares which attributes of a model carry a file.
//! - `Record` pairs a model with the state of each mounted attribute.
//! - `AttachmentLifecycle` validates, saves and destroys records.
//! - `Uploader` owns one physical file and its versions.

mod error;
mod messages;
mod mount;
mod options;
mod processing;
mod service;
mod state;
mod types;
mod uploader;

pub use error::{AttachmentError, IntegrityError, ProcessingError, UploadError};
pub use messages::{DefaultMessages, LocaleMessages, MessageKey, MessageResolver};
pub use mount::{Model, Mounts, Record};
pub use options::{MountOptions, NamingRule, StoreDirRule, extension_of};
pub use processing::{Processor, Version, processor};
pub use service::{AttachmentLifecycle, RecordRepository};
pub use state::AttachmentState;
pub use types::{CachedFile, LifecycleStage, SaveOutcome, StoredLocation, UploadedFile};
pub use uploader::Uploader;
