//! End-to-end attachment lifecycle tests against a local filesystem store.
//!
//! Every test gets its own temporary root, so paths can be checked directly
//! on disk as well as through the storage service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::join_all;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use validator::Validate;

use stowage_core::attachment::{
    AttachmentError, AttachmentLifecycle, LifecycleStage, LocaleMessages, MessageKey, Model,
    MountOptions, Mounts, Record, RecordRepository, SaveOutcome, UploadedFile, Version,
    extension_of, processor,
};
use stowage_core::storage::{StorageConfig, StorageProvider, StorageService};

#[derive(Debug, Clone, Default, Validate)]
struct Article {
    #[validate(length(min = 1))]
    title: String,
    image: Option<String>,
    document_file: Option<String>,
}

impl Model for Article {
    fn column(&self, name: &str) -> Option<String> {
        match name {
            "image" => self.image.clone(),
            "document_file" => self.document_file.clone(),
            _ => None,
        }
    }

    fn set_column(&mut self, name: &str, value: Option<String>) {
        match name {
            "image" => self.image = value,
            "document_file" => self.document_file = value,
            _ => {}
        }
    }
}

#[derive(Default)]
struct InMemoryArticles {
    rows: Mutex<HashMap<String, Article>>,
    fail: AtomicBool,
}

impl InMemoryArticles {
    fn find(&self, title: &str) -> Option<Article> {
        self.rows.lock().unwrap().get(title).cloned()
    }
}

impl RecordRepository<Article> for InMemoryArticles {
    async fn save(&self, model: &Article) -> Result<(), AttachmentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AttachmentError::repository("deadlock detected"));
        }
        self.rows
            .lock()
            .unwrap()
            .insert(model.title.clone(), model.clone());
        Ok(())
    }

    async fn delete(&self, model: &Article) -> Result<(), AttachmentError> {
        self.rows.lock().unwrap().remove(&model.title);
        Ok(())
    }
}

struct Harness {
    root: TempDir,
    storage: Arc<StorageService>,
    mounts: Arc<Mounts<Article>>,
    repo: Arc<InMemoryArticles>,
    lifecycle: AttachmentLifecycle<InMemoryArticles>,
}

impl Harness {
    fn on_disk(&self, key: &str) -> bool {
        self.root.path().join(key).exists()
    }

    fn new_article(&self, title: &str) -> Record<Article> {
        Record::new(
            Article {
                title: title.to_string(),
                ..Article::default()
            },
            Arc::clone(&self.mounts),
        )
    }

    fn load(&self, title: &str) -> Record<Article> {
        let article = self.repo.find(title).expect("saved article");
        Record::loaded(article, Arc::clone(&self.mounts))
    }
}

fn png(name: &str, content: &'static str) -> Option<UploadedFile> {
    Some(UploadedFile::new(name, content))
}

#[fixture]
fn harness() -> Harness {
    let root = TempDir::new().unwrap();
    let storage = Arc::new(
        StorageService::from_config(StorageConfig::new(StorageProvider::local_fs(root.path())))
            .unwrap(),
    );
    let mounts = Arc::new(
        Mounts::new(Arc::clone(&storage))
            .mount(
                "image",
                MountOptions::new()
                    .store_dir("articles")
                    .extension_allowlist(["png", "jpg"]),
            )
            .mount(
                "document",
                MountOptions::new()
                    .mount_on("document_file")
                    .store_dir("documents")
                    .process(processor("require-pdf", |content: Bytes| {
                        if content.starts_with(b"%PDF") {
                            Ok(content)
                        } else {
                            Err("missing PDF header".to_string())
                        }
                    })),
            ),
    );
    let repo = Arc::new(InMemoryArticles::default());
    let lifecycle = AttachmentLifecycle::new(Arc::clone(&repo));
    Harness {
        root,
        storage,
        mounts,
        repo,
        lifecycle,
    }
}

#[rstest]
#[tokio::test]
async fn test_blank_attachment(harness: Harness) {
    let mut record = harness.new_article("Empty");

    let uploader = record.get("image").unwrap();
    assert!(uploader.is_blank());
    assert_eq!(uploader.current_path(), None);
    assert_eq!(uploader.url(), None);

    harness.lifecycle.save(&mut record).await.unwrap();
    assert_eq!(record.model().image, None);
    assert!(record.get("image").unwrap().is_blank());
}

#[rstest]
#[tokio::test]
async fn test_save_stores_file_and_writes_identifier(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("cover.png", "png-1")).await.unwrap();
    assert!(!harness.on_disk("articles/cover.png"));

    let outcome = harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Persisted);
    assert!(record.is_persisted());
    let uploader = record.get("image").unwrap();
    assert_eq!(uploader.current_path().as_deref(), Some("articles/cover.png"));
    assert_eq!(uploader.identifier(), Some("cover.png"));
    assert_eq!(record.model().image.as_deref(), Some("cover.png"));
    assert!(harness.on_disk("articles/cover.png"));
    assert_eq!(
        harness.repo.find("Launch").unwrap().image.as_deref(),
        Some("cover.png")
    );
}

#[rstest]
#[tokio::test]
async fn test_disallowed_extension_is_a_validation_error(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("payload.exe", "exe")).await.unwrap();

    let outcome = harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Invalid);
    assert_eq!(record.stage(), LifecycleStage::Invalid);
    let errors = record.errors().field_errors();
    let image = errors.get("image").unwrap();
    assert_eq!(image[0].code, "carrierwave_integrity_error");
    assert_eq!(image[0].message.as_deref(), Some("is not an allowed file type"));
    assert!(!harness.on_disk("uploads"));
    assert!(!harness.on_disk("articles"));
    assert_eq!(record.model().image, None);
    assert!(harness.repo.find("Launch").is_none());
}

#[rstest]
#[tokio::test]
async fn test_processing_failure_is_a_validation_error(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record
        .set("document", Some(UploadedFile::new("brief.pdf", "not a pdf")))
        .await
        .unwrap();
    assert_eq!(
        record.processing_error("document").map(|e| e.step.as_str()),
        Some("require-pdf")
    );

    let outcome = harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Invalid);
    let errors = record.errors().field_errors();
    let document = errors.get("document").unwrap();
    assert_eq!(document[0].code, "carrierwave_processing_error");
    assert_eq!(document[0].message.as_deref(), Some("failed to be processed"));
    assert_eq!(record.model().document_file, None);
}

#[rstest]
#[tokio::test]
async fn test_unrelated_validation_failure_keeps_cache(harness: Harness) {
    let mut record = harness.new_article("");
    record.set("image", png("cover.png", "png")).await.unwrap();
    let cache_path = record.get("image").unwrap().current_path().unwrap();

    let outcome = harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Invalid);
    assert!(record.errors().field_errors().contains_key("title"));
    assert!(!record.errors().field_errors().contains_key("image"));
    assert_eq!(record.get("image").unwrap().current_path(), Some(cache_path.clone()));
    assert!(harness.on_disk(&cache_path));
    assert!(!harness.on_disk("articles/cover.png"));
    assert_eq!(record.model().image, None);
}

#[rstest]
#[tokio::test]
async fn test_replacing_file_deletes_previous(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("old.png", "old")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    let mut record = harness.load("Launch");
    record.set("image", png("new.png", "new")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    assert!(!harness.on_disk("articles/old.png"));
    assert!(harness.on_disk("articles/new.png"));
    assert_eq!(record.identifier("image").as_deref(), Some("new.png"));
}

#[rstest]
#[tokio::test]
async fn test_same_identifier_overwrites_in_place(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("cover.png", "first")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    record.set("image", png("cover.png", "second")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    assert!(harness.on_disk("articles/cover.png"));
    assert_eq!(
        harness.storage.read("articles/cover.png").await.unwrap(),
        "second"
    );
}

#[rstest]
#[tokio::test]
async fn test_name_from_unchanged_field_overwrites_in_place(harness: Harness) {
    let mounts = Arc::new(Mounts::new(Arc::clone(&harness.storage)).mount(
        "image",
        MountOptions::new()
            .store_dir("articles")
            .filename_with(|article: &Article, original| {
                format!("{}.{}", article.title, extension_of(original).unwrap_or("bin"))
            }),
    ));
    let mut record = Record::new(
        Article {
            title: "Launch".to_string(),
            ..Article::default()
        },
        mounts,
    );
    record.set("image", png("first.png", "one")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();
    assert_eq!(record.model().image.as_deref(), Some("Launch.png"));

    record.set("image", png("second.png", "two")).await.unwrap();
    let outcome = harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Persisted);
    assert!(harness.on_disk("articles/Launch.png"));
    assert_eq!(
        harness.storage.read("articles/Launch.png").await.unwrap(),
        "two"
    );
    assert_eq!(record.model().image.as_deref(), Some("Launch.png"));
    assert!(!harness.on_disk("articles/second.png"));
}

#[rstest]
#[tokio::test]
async fn test_empty_generated_name_stores_original(harness: Harness) {
    let mounts = Arc::new(Mounts::new(Arc::clone(&harness.storage)).mount(
        "image",
        MountOptions::new()
            .store_dir("articles")
            .filename_with(|_: &Article, _| String::new()),
    ));
    let mut record = Record::new(
        Article {
            title: "Launch".to_string(),
            ..Article::default()
        },
        mounts,
    );
    record.set("image", png("cover.png", "cover")).await.unwrap();

    let outcome = harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(outcome, SaveOutcome::Persisted);
    assert!(harness.on_disk("articles/cover.png"));
    assert_eq!(record.model().image.as_deref(), Some("cover.png"));
}

#[rstest]
#[tokio::test]
async fn test_store_dir_from_changed_field_deletes_old_path(harness: Harness) {
    let mounts = Arc::new(Mounts::new(Arc::clone(&harness.storage)).mount(
        "image",
        MountOptions::new().store_dir_with(|article: &Article, attribute| {
            format!("articles/{}/{attribute}", article.title)
        }),
    ));
    let mut record = Record::new(
        Article {
            title: "Launch".to_string(),
            ..Article::default()
        },
        mounts,
    );
    record.set("image", png("cover.png", "old")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();
    assert!(harness.on_disk("articles/Launch/image/cover.png"));

    record.model_mut().title = "Relaunch".to_string();
    record.set("image", png("cover.png", "new")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    assert!(!harness.on_disk("articles/Launch/image/cover.png"));
    assert!(harness.on_disk("articles/Relaunch/image/cover.png"));
    assert_eq!(
        harness
            .storage
            .read("articles/Relaunch/image/cover.png")
            .await
            .unwrap(),
        "new"
    );
}

#[rstest]
#[tokio::test]
async fn test_keeping_previous_files_when_disabled(harness: Harness) {
    let mounts = Arc::new(Mounts::new(Arc::clone(&harness.storage)).mount(
        "image",
        MountOptions::new()
            .store_dir("articles")
            .remove_previously_stored_files_after_update(false),
    ));
    let mut record = Record::new(
        Article {
            title: "Launch".to_string(),
            ..Article::default()
        },
        mounts,
    );
    record.set("image", png("old.png", "old")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();
    record.set("image", png("new.png", "new")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    assert!(harness.on_disk("articles/old.png"));
    assert!(harness.on_disk("articles/new.png"));
}

#[rstest]
#[tokio::test]
async fn test_mark_for_removal(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("cover.png", "png")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    let mut record = harness.load("Launch");
    record.mark_for_removal("image", true).unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(record.model().image.as_deref(), Some(""));
    assert!(!harness.on_disk("articles/cover.png"));
    assert!(record.get("image").unwrap().is_blank());
    assert!(!record.state("image").unwrap().is_pending_removal());
}

#[rstest]
#[tokio::test]
async fn test_destroy_removes_file(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("cover.png", "png")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    let mut record = harness.load("Launch");
    harness.lifecycle.destroy(&mut record).await.unwrap();

    assert!(!harness.on_disk("articles/cover.png"));
    assert!(harness.repo.find("Launch").is_none());
    assert_eq!(record.stage(), LifecycleStage::Destroyed);
    assert!(!record.is_persisted());
}

#[rstest]
#[tokio::test]
async fn test_destroy_without_attachment(harness: Harness) {
    let mut record = harness.new_article("Launch");
    harness.lifecycle.save(&mut record).await.unwrap();

    harness.lifecycle.destroy(&mut record).await.unwrap();

    assert!(harness.repo.find("Launch").is_none());
    assert_eq!(record.stage(), LifecycleStage::Destroyed);
}

#[rstest]
#[tokio::test]
async fn test_repository_failure_rolls_back(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("old.png", "old")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    record.set("image", png("new.png", "new")).await.unwrap();
    harness.repo.fail.store(true, Ordering::SeqCst);
    let err = harness.lifecycle.save(&mut record).await.unwrap_err();

    assert!(matches!(err, AttachmentError::Repository(_)));
    assert_eq!(record.stage(), LifecycleStage::RolledBack);
    assert_eq!(record.model().image.as_deref(), Some("old.png"));
    assert!(harness.on_disk("articles/old.png"));
    assert!(!harness.on_disk("articles/new.png"));
    assert!(record.get("image").unwrap().is_cached());
    assert!(record.is_changed("image"));
}

#[rstest]
#[tokio::test]
async fn test_assign_cached_after_failed_validation(harness: Harness) {
    let mut first = harness.new_article("");
    first.set("image", png("cover.png", "png")).await.unwrap();
    harness.lifecycle.save(&mut first).await.unwrap();
    let cache_name = first.get("image").unwrap().cache_name().unwrap();

    let mut second = harness.new_article("Launch");
    second.assign_cached("image", &cache_name).await.unwrap();
    harness.lifecycle.save(&mut second).await.unwrap();

    assert_eq!(second.identifier("image").as_deref(), Some("cover.png"));
    assert_eq!(
        harness.storage.read("articles/cover.png").await.unwrap(),
        "png"
    );
}

#[rstest]
#[tokio::test]
async fn test_reload_rebuilds_from_column(harness: Harness) {
    let mut record = harness.new_article("Launch");
    record.set("image", png("cover.png", "png")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    record.set("image", png("draft.png", "draft")).await.unwrap();
    record.reload(harness.repo.find("Launch").unwrap());

    assert!(!record.is_changed("image"));
    assert_eq!(
        record.get("image").unwrap().current_path().as_deref(),
        Some("articles/cover.png")
    );
}

#[rstest]
#[tokio::test]
async fn test_localized_messages(harness: Harness) {
    let messages = LocaleMessages::new().with(
        "de",
        MessageKey::IntegrityError,
        "ist kein erlaubter Dateityp",
    );
    let lifecycle = AttachmentLifecycle::new(Arc::clone(&harness.repo))
        .with_messages(Arc::new(messages), "de");
    let mut record = harness.new_article("Launch");
    record.set("image", png("payload.exe", "exe")).await.unwrap();

    lifecycle.save(&mut record).await.unwrap();

    let errors = record.errors().field_errors();
    assert_eq!(
        errors.get("image").unwrap()[0].message.as_deref(),
        Some("ist kein erlaubter Dateityp")
    );
}

#[rstest]
#[tokio::test]
async fn test_versions_follow_main_file(harness: Harness) {
    let mounts = Arc::new(Mounts::new(Arc::clone(&harness.storage)).mount(
        "image",
        MountOptions::new().store_dir("articles").version(
            Version::new("thumb").process(processor("truncate", |content: Bytes| {
                Ok(content.slice(..1))
            })),
        ),
    ));
    let mut record = Record::new(
        Article {
            title: "Launch".to_string(),
            ..Article::default()
        },
        mounts,
    );
    record.set("image", png("cover.png", "full")).await.unwrap();
    harness.lifecycle.save(&mut record).await.unwrap();

    assert_eq!(
        harness.storage.read("articles/thumb_cover.png").await.unwrap(),
        "f"
    );
    assert_eq!(
        record.get("image").unwrap().as_json()["thumb"]["url"],
        "/articles/thumb_cover.png"
    );

    harness.lifecycle.destroy(&mut record).await.unwrap();
    assert!(!harness.on_disk("articles/cover.png"));
    assert!(!harness.on_disk("articles/thumb_cover.png"));
}

#[rstest]
#[tokio::test]
async fn test_concurrent_saves_of_distinct_records(harness: Harness) {
    let mut records = Vec::new();
    for i in 0..16 {
        let mut record = harness.new_article(&format!("Article {i}"));
        record
            .set(
                "image",
                Some(UploadedFile::new(format!("cover-{i}.png"), format!("png-{i}"))),
            )
            .await
            .unwrap();
        records.push(record);
    }

    let lifecycle = &harness.lifecycle;
    let outcomes = join_all(records.iter_mut().map(|record| lifecycle.save(record))).await;

    assert!(outcomes.into_iter().all(|o| o.unwrap() == SaveOutcome::Persisted));
    for i in 0..16 {
        assert_eq!(
            harness.storage.read(&format!("articles/cover-{i}.png")).await.unwrap(),
            format!("png-{i}").as_str()
        );
    }
}
