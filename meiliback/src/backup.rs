//! Backup orchestrator.
//!
//! Lists every index once, then for each index reads settings and stats,
//! paginates all documents and hands the snapshot to a [`BackupStore`].
//! Only the initial listing is fatal; settings, stats and pagination failures
//! are reported and the index is stored with whatever was read.

use anyhow::{Result, anyhow};
use meili::prelude::*;
use serde::Serialize;

use crate::{
    archive::{ArchiveOutput, BackupStore, IndexSnapshot, Manifest},
    events::{EventSink, MigrationEvent, emit},
};

/// Default `limit` of the index listing request
pub const DEFAULT_INDEX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Documents per page request
    pub page_size: usize,
    /// `limit` of the single index listing request
    pub index_list_limit: usize,
    /// Recorded in the manifest
    pub source_url: Option<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            index_list_limit: DEFAULT_INDEX_LIST_LIMIT,
            source_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackedUpIndex {
    pub uid: String,
    pub documents: usize,
    pub pages: usize,
    /// False when pagination stopped early
    pub complete: bool,
    pub settings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub output: ArchiveOutput,
    pub indexes: Vec<BackedUpIndex>,
}

pub struct BackupRunner<'a, S> {
    service: &'a S,
    config: &'a BackupConfig,
}

impl<'a, S: SearchService> BackupRunner<'a, S> {
    pub fn new(service: &'a S, config: &'a BackupConfig) -> Self {
        Self { service, config }
    }

    /// Runs a full backup into `store`.
    ///
    /// Fails if the index listing fails or the store cannot write; either way a
    /// [`MigrationEvent::Fatal`] is emitted first.
    pub async fn run<B, E>(&self, store: &mut B, sink: &mut E) -> Result<BackupSummary>
    where
        B: BackupStore + ?Sized,
        E: EventSink + ?Sized,
    {
        let listing = match self.service.list_indexes(self.config.index_list_limit).await {
            Ok(listing) => listing,
            Err(err) => {
                let message = format!("Failed to get indexes: {}", err.body_text());
                emit(sink, MigrationEvent::Fatal {
                    message: message.clone(),
                });
                return Err(anyhow!(message));
            }
        };
        if listing.is_truncated() {
            emit(sink, MigrationEvent::Note {
                message: format!(
                    "Only {} of {} indexes were listed; raise the listing limit to back up the rest",
                    listing.results.len(),
                    listing.total
                ),
            });
        }
        emit(sink, MigrationEvent::IndexesListed {
            count: listing.results.len(),
        });

        let mut manifest = Manifest::new(self.config.source_url.as_deref());
        let mut indexes = Vec::with_capacity(listing.results.len());
        for info in listing.results {
            let (snapshot, report) = self.snapshot_index(info, sink).await;
            manifest.record(&snapshot, report.complete);
            if let Err(err) = store.write_index(&snapshot) {
                emit(sink, MigrationEvent::Fatal {
                    message: format!("{err:#}"),
                });
                return Err(err);
            }
            indexes.push(report);
        }

        let output = match store.finish(&manifest) {
            Ok(output) => output,
            Err(err) => {
                emit(sink, MigrationEvent::Fatal {
                    message: format!("{err:#}"),
                });
                return Err(err);
            }
        };
        emit(sink, MigrationEvent::BackupFinished {
            indexes: indexes.len(),
            location: output.to_string(),
        });
        Ok(BackupSummary { output, indexes })
    }

    async fn snapshot_index<E>(
        &self,
        info: IndexInfo,
        sink: &mut E,
    ) -> (IndexSnapshot, BackedUpIndex)
    where
        E: EventSink + ?Sized,
    {
        let uid = info.uid.clone();
        emit(sink, MigrationEvent::IndexStarted { uid: uid.clone() });

        let settings = match self.service.get_settings(&uid).await {
            Ok(settings) => Some(settings),
            Err(err) => {
                emit(sink, MigrationEvent::SettingsUnavailable {
                    uid: uid.clone(),
                    error: err.body_text(),
                });
                None
            }
        };

        match self.service.get_stats(&uid).await {
            Ok(stats) => emit(sink, MigrationEvent::DocumentCount {
                uid: uid.clone(),
                total: stats.number_of_documents,
            }),
            Err(err) => emit(sink, MigrationEvent::StatsUnavailable {
                uid: uid.clone(),
                error: err.body_text(),
            }),
        }

        let outcome = DocumentPaginator::new(self.service, &uid)
            .page_size(self.config.page_size)
            .fetch_all(|page| {
                emit(&mut *sink, MigrationEvent::PageFetched {
                    uid: uid.clone(),
                    offset: page.offset,
                    limit: page.limit,
                    received: page.received,
                    total_so_far: page.total_so_far,
                });
            })
            .await;
        if let Some(err) = &outcome.error {
            emit(sink, MigrationEvent::PaginationFailed {
                uid: uid.clone(),
                error: err.to_string(),
            });
        }
        emit(sink, MigrationEvent::DocumentsSaved {
            uid: uid.clone(),
            count: outcome.documents.len(),
        });

        let report = BackedUpIndex {
            uid,
            documents: outcome.documents.len(),
            pages: outcome.pages,
            complete: outcome.is_complete(),
            settings: settings.is_some(),
        };
        let snapshot = IndexSnapshot {
            info,
            settings,
            documents: outcome.documents,
        };
        (snapshot, report)
    }
}
