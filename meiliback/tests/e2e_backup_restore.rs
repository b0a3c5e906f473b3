//! Backup from one in-memory instance, restore into another.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use meili::{
    mock::{MockCall, MockSearchService},
    prelude::*,
};
use meiliback::{
    archive::{ArchiveLayout, ArchiveOutput, BackupArchive, DirectoryStore, MemoryStore},
    backup::{BackupConfig, BackupRunner},
    events::{MigrationEvent, Recorder, TextLog},
    restore::{IndexStatus, RestoreConfig, RestoreRunner, RestoreSummary},
};
use serde_json::{Value, json};

fn docs(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!({"id": i, "title": format!("doc {i}")}))
        .collect()
}

fn restore_config() -> RestoreConfig {
    RestoreConfig {
        batch_pause: Duration::ZERO,
        ..RestoreConfig::default()
    }
}

async fn backup_to_zip(source: &MockSearchService, dir: &Path) -> PathBuf {
    let config = BackupConfig::default();
    let zip_path = dir.join("backup.zip");
    let mut store = DirectoryStore::new(dir.join("work"), &zip_path);
    let summary = BackupRunner::new(source, &config)
        .run(&mut store, &mut Recorder::new())
        .await
        .unwrap();
    assert_eq!(summary.output, ArchiveOutput::File(zip_path.clone()));
    zip_path
}

async fn restore_into(
    target: &MockSearchService,
    archive: &BackupArchive,
    config: &RestoreConfig,
) -> (RestoreSummary, String) {
    let waiter = TaskWaiter::new(Duration::ZERO);
    let mut log = TextLog::new();
    let summary = RestoreRunner::new(target, &waiter, config)
        .run(archive, &mut log)
        .await;
    (summary, log.into_string())
}

fn count_pages(mock: &MockSearchService, uid: &str) -> usize {
    mock.count_calls(|c| matches!(c, MockCall::DocumentsPage { uid: u, .. } if u == uid))
}

fn batches(mock: &MockSearchService, uid: &str) -> Vec<usize> {
    mock.calls()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::AddDocuments { uid: u, count } if u == uid => Some(count),
            _ => None,
        })
        .collect()
}

#[tokio::test]
#[test_log::test]
async fn backup_then_restore_into_empty_instance() {
    let temp = tempfile::tempdir().unwrap();
    let source = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({"rankingRules": ["words", "typo"]}), docs(1500))
        .with_index("page", None, json!({}), Vec::new());

    let zip_path = backup_to_zip(&source, temp.path()).await;
    assert_eq!(count_pages(&source, "alpha"), 2);
    assert_eq!(count_pages(&source, "page"), 1);

    let archive = BackupArchive::open(&zip_path).unwrap();
    assert_eq!(archive.index_uids().unwrap(), vec!["alpha", "page"]);
    let manifest = archive.manifest().unwrap().unwrap();
    assert_eq!(manifest.indexes.len(), 2);
    assert_eq!(manifest.indexes[0].document_count, 1500);

    let target = MockSearchService::new();
    let (summary, log) = restore_into(&target, &archive, &restore_config()).await;

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(target.count_calls(|c| matches!(c, MockCall::CreateIndex { .. })), 2);
    assert_eq!(batches(&target, "alpha"), vec![1000, 500]);
    assert!(batches(&target, "page").is_empty());
    assert_eq!(target.documents("alpha").len(), 1500);
    assert_eq!(target.primary_key("page").as_deref(), Some("id"));
    assert_eq!(
        target.settings("alpha").unwrap().get("rankingRules"),
        Some(&json!(["words", "typo"]))
    );

    assert!(log.contains("Adding batch of 1000 documents to index alpha (1-1000 of 1500)"));
    assert!(log.contains("Adding batch of 500 documents to index alpha (1001-1500 of 1500)"));
    assert!(log.contains("No documents found for index page"));
    assert!(log.contains("Regular indexes restore completed"));
    assert!(log.ends_with("Restore process completed!\n"), "{log}");
}

#[tokio::test]
#[test_log::test]
async fn restoring_twice_merges_and_replaces_page() {
    let temp = tempfile::tempdir().unwrap();
    let source = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({}), docs(3))
        .with_index("page", Some("id"), json!({}), docs(2));
    let archive = BackupArchive::open(&backup_to_zip(&source, temp.path()).await).unwrap();

    let target = MockSearchService::new();
    let config = restore_config();
    restore_into(&target, &archive, &config).await;
    target.clear_calls();
    let (summary, log) = restore_into(&target, &archive, &config).await;

    assert!(summary.is_success(), "{summary:?}");
    assert!(log.contains("Index alpha already exists"));
    assert_eq!(target.calls().iter().filter(|c| matches!(c, MockCall::DeleteIndex(uid) if uid == "page")).count(), 1);
    assert_eq!(target.documents("alpha").len(), 3);
    assert_eq!(target.documents("page").len(), 2);
}

#[tokio::test]
#[test_log::test]
async fn extracted_directory_restores_like_zip() {
    let temp = tempfile::tempdir().unwrap();
    let source = MockSearchService::new().with_index("movies", Some("id"), json!({}), docs(5));
    let config = BackupConfig::default();
    let work = temp.path().join("work");
    let mut store = DirectoryStore::new(&work, temp.path().join("unused.zip"));
    BackupRunner::new(&source, &config)
        .run(&mut store, &mut Recorder::new())
        .await
        .unwrap();

    let archive = BackupArchive::open(&work).unwrap();
    assert!(matches!(archive.layout(), ArchiveLayout::Tree { .. }));
    let target = MockSearchService::new();
    let (summary, _) = restore_into(&target, &archive, &restore_config()).await;
    assert!(summary.is_success());
    assert_eq!(target.documents("movies").len(), 5);
}

#[tokio::test]
#[test_log::test]
async fn flat_archive_round_trip() {
    let source = MockSearchService::new()
        .with_index("books", Some("isbn"), json!({"stopWords": ["the"]}), vec![
            json!({"isbn": "1", "title": "a"}),
            json!({"isbn": "2", "title": "b"}),
        ])
        .with_index("authors", Some("id"), json!({}), docs(4));
    let config = BackupConfig::default();
    let mut store = MemoryStore::new();
    let summary = BackupRunner::new(&source, &config)
        .run(&mut store, &mut Recorder::new())
        .await
        .unwrap();
    let ArchiveOutput::Bytes(bytes) = summary.output else {
        panic!("memory store returns bytes");
    };

    let archive = BackupArchive::from_zip_bytes(bytes).unwrap();
    assert!(matches!(archive.layout(), ArchiveLayout::Flat { .. }));
    let target = MockSearchService::new();
    let (summary, _) = restore_into(&target, &archive, &restore_config()).await;

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(target.primary_key("books").as_deref(), Some("isbn"));
    assert_eq!(target.documents("books").len(), 2);
    assert_eq!(target.documents("authors").len(), 4);
    assert_eq!(
        target.settings("books").unwrap().get("stopWords"),
        Some(&json!(["the"]))
    );
}

#[tokio::test]
#[test_log::test]
async fn flat_archive_keeps_indexes_named_like_metadata() {
    let source = MockSearchService::new()
        .with_index("manifest", Some("id"), json!({}), docs(2))
        .with_index("all_indexes", Some("id"), json!({}), docs(3))
        .with_index("movies", Some("id"), json!({}), docs(4));
    let config = BackupConfig::default();
    let mut store = MemoryStore::new();
    let summary = BackupRunner::new(&source, &config)
        .run(&mut store, &mut Recorder::new())
        .await
        .unwrap();
    let ArchiveOutput::Bytes(bytes) = summary.output else {
        panic!("memory store returns bytes");
    };

    let archive = BackupArchive::from_zip_bytes(bytes).unwrap();
    assert_eq!(archive.manifest().unwrap().unwrap().indexes.len(), 3);
    let target = MockSearchService::new();
    let (summary, _) = restore_into(&target, &archive, &restore_config()).await;

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(target.documents("manifest").len(), 2);
    assert_eq!(target.documents("all_indexes").len(), 3);
    assert_eq!(target.documents("movies").len(), 4);
}

#[tokio::test]
#[test_log::test]
async fn rejected_bulk_settings_fall_back_per_category() {
    let temp = tempfile::tempdir().unwrap();
    let source = MockSearchService::new().with_index(
        "alpha",
        Some("id"),
        json!({"rankingRules": ["words"], "stopWords": [], "synonyms": {}}),
        docs(1),
    );
    let archive = BackupArchive::open(&backup_to_zip(&source, temp.path()).await).unwrap();
    let target = MockSearchService::new().reject_bulk_settings(true);

    let (summary, log) = restore_into(&target, &archive, &restore_config()).await;

    assert!(summary.is_success(), "{summary:?}");
    assert!(log.contains("Trying to apply settings individually..."));
    assert!(log.contains("Applied setting rankingRules to index alpha"));
    let settings = target.settings("alpha").unwrap();
    assert_eq!(settings.get("rankingRules"), Some(&json!(["words"])));
    assert!(!settings.contains("stopWords"));
}

#[tokio::test]
#[test_log::test]
async fn documents_index_rebuilt_without_embedders() {
    let temp = tempfile::tempdir().unwrap();
    let embedders = json!({"default": {"source": "userProvided", "dimensions": 2}});
    let source = MockSearchService::new().with_index(
        "documents",
        Some("id"),
        json!({"embedders": embedders, "searchableAttributes": ["body"]}),
        vec![json!({"id": 1, "body": "x"}), json!({"id": 2, "body": "y"})],
    );
    let archive = BackupArchive::open(&backup_to_zip(&source, temp.path()).await).unwrap();
    let target = MockSearchService::new().with_index(
        "documents",
        Some("id"),
        json!({"embedders": embedders}),
        vec![json!({"id": 7, "_vectors": {"default": [1.0, 0.0]}})],
    );

    let (summary, log) = restore_into(&target, &archive, &restore_config()).await;

    assert!(summary.is_success(), "{summary:?}");
    assert!(log.contains("Deleted index documents"));
    assert!(log.contains("Rebuilt indexes restore completed"));
    assert!(!target.settings("documents").unwrap().contains("embedders"));
    let stored = target.documents("documents");
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|doc| doc["_vectors"] == json!({"default": null})));
}

#[tokio::test]
#[test_log::test]
async fn documents_delete_failure_aborts_restore() {
    let temp = tempfile::tempdir().unwrap();
    let source = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({}), docs(2))
        .with_index("documents", Some("id"), json!({}), docs(2));
    let archive = BackupArchive::open(&backup_to_zip(&source, temp.path()).await).unwrap();
    let target = MockSearchService::new()
        .with_index("documents", Some("id"), json!({}), Vec::new())
        .fail_delete_for("documents");

    let waiter = TaskWaiter::new(Duration::ZERO);
    let mut events = Recorder::new();
    let summary = RestoreRunner::new(&target, &waiter, &restore_config())
        .run(&archive, &mut events)
        .await;

    let message = summary.aborted.as_deref().unwrap();
    assert!(message.starts_with("Failed to delete index documents"), "{message}");
    assert_eq!(summary.indexes[0].status, IndexStatus::Restored);
    assert_eq!(target.documents("alpha").len(), 2);
    assert!(target.documents("documents").is_empty());
    assert_eq!(
        events.count(|e| matches!(e, MigrationEvent::RestoreFinished { .. })),
        0
    );
    assert!(events.events.last().is_some_and(MigrationEvent::is_fatal));
}
