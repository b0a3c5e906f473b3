//! Two-call front end: backup to a fresh zip, or restore from one.
//!
//! Both entry points take plain strings from a form and return the
//! accumulated log text. They never fail; every error ends up in the log.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use meili::prelude::*;

use crate::{
    archive::{BACKUP_ROOT, BackupArchive, DirectoryStore},
    backup::{BackupConfig, BackupRunner},
    events::{EventSink, MigrationEvent, TextLog, emit},
    restore::{RestoreConfig, RestoreRunner},
};

pub const BACKUP_INPUT_MISSING: &str = "Please provide both Meilisearch URL and API Key";
pub const RESTORE_INPUT_MISSING: &str =
    "Please provide Meilisearch URL, API Key, and a backup zip file";

/// Backs up every index of the instance at `url` into a new zip in a temporary
/// directory. Returns the zip path on success, and the log.
pub async fn run_backup(url: &str, api_key: &str) -> (Option<PathBuf>, String) {
    if url.trim().is_empty() || api_key.trim().is_empty() {
        return (None, BACKUP_INPUT_MISSING.to_string());
    }
    let mut log = TextLog::new();
    match backup_to_temp_dir(url, api_key, &mut log).await {
        Ok(path) => (path, log.into_string()),
        Err(err) => {
            emit(&mut log, MigrationEvent::Note {
                message: format!("Error during backup: {err:#}"),
            });
            (None, log.into_string())
        }
    }
}

// Ok(None): the runner failed and has already logged why.
async fn backup_to_temp_dir(url: &str, api_key: &str, log: &mut TextLog) -> Result<Option<PathBuf>> {
    let client = MeiliClient::new(url, api_key)?;
    let work_dir = tempfile::Builder::new()
        .prefix("meiliback_")
        .tempdir()
        .context("failed to create temporary directory")?
        .keep();
    let archive_path = work_dir.join(format!("{BACKUP_ROOT}.zip"));
    let mut store = DirectoryStore::new(&work_dir, &archive_path);
    let config = BackupConfig {
        source_url: Some(url.to_string()),
        ..BackupConfig::default()
    };
    let summary = BackupRunner::new(&client, &config)
        .run(&mut store, log)
        .await;
    Ok(summary.ok().and_then(|summary| summary.output.path().map(Path::to_path_buf)))
}

/// Restores `archive` into the instance at `url` with the built-in repair table.
pub async fn run_restore(url: &str, api_key: &str, archive: Option<&Path>) -> String {
    let Some(archive) = archive.filter(|_| !url.trim().is_empty() && !api_key.trim().is_empty())
    else {
        return RESTORE_INPUT_MISSING.to_string();
    };
    let mut log = TextLog::new();
    if let Err(err) = restore_from(url, api_key, archive, &mut log).await {
        emit(&mut log, MigrationEvent::Note {
            message: format!("Error during restore: {err:#}"),
        });
    }
    log.into_string()
}

async fn restore_from<E>(url: &str, api_key: &str, path: &Path, log: &mut E) -> Result<()>
where
    E: EventSink + ?Sized,
{
    let archive = match BackupArchive::open(path) {
        Ok(archive) => archive,
        Err(err) => {
            emit(log, MigrationEvent::Fatal {
                message: format!("{err:#}"),
            });
            return Ok(());
        }
    };
    let client = MeiliClient::new(url, api_key)?;
    let waiter = TaskWaiter::default();
    let config = RestoreConfig::default();
    RestoreRunner::new(&client, &waiter, &config)
        .run(&archive, log)
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write};

    use zip::{ZipWriter, write::SimpleFileOptions};

    use super::*;
    use crate::archive::MISSING_BACKUP_ROOT;

    #[tokio::test]
    #[test_log::test]
    async fn backup_requires_url_and_key() {
        let (path, log) = run_backup("", "key").await;
        assert!(path.is_none());
        assert_eq!(log, BACKUP_INPUT_MISSING);

        let (path, log) = run_backup("http://127.0.0.1:7700", "  ").await;
        assert!(path.is_none());
        assert_eq!(log, BACKUP_INPUT_MISSING);
    }

    #[tokio::test]
    #[test_log::test]
    async fn restore_requires_all_inputs() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(
            run_restore("http://127.0.0.1:7700", "key", None).await,
            RESTORE_INPUT_MISSING
        );
        assert_eq!(
            run_restore("", "key", Some(temp.path())).await,
            RESTORE_INPUT_MISSING
        );
    }

    #[tokio::test]
    #[test_log::test]
    async fn restore_reports_missing_backup_root() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("other.zip");
        let mut writer = ZipWriter::new(fs::File::create(&path).unwrap());
        writer
            .start_file("notes/readme.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let log = run_restore("http://127.0.0.1:7700", "key", Some(&path)).await;
        assert_eq!(log, format!("Error: {MISSING_BACKUP_ROOT}\n"));
    }

    #[tokio::test]
    #[test_log::test]
    async fn restore_reports_bad_url() {
        let temp = tempfile::tempdir().unwrap();
        let index_dir = temp.path().join(BACKUP_ROOT).join("movies");
        fs::create_dir_all(&index_dir).unwrap();
        fs::write(index_dir.join("documents.json"), "[]").unwrap();

        let log = run_restore("not a url", "key", Some(temp.path())).await;
        assert!(log.starts_with("Error during restore: "), "{log}");
    }
}
