//! Restore orchestrator.
//!
//! Indexes are restored one at a time in two passes. Merge-phase indexes come
//! first, in archive order: each is looked up, optionally deleted, created if
//! absent, given its settings, and loaded in fixed-size batches. Rebuild-phase
//! indexes follow and are always deleted and recreated; a failed delete or
//! create there aborts the whole restore. Everywhere else a failure skips the
//! index or batch and the run continues.
//!
//! Batches of one index are uploaded strictly in order, each waited on before
//! the next, with a pause between batches.

use std::time::Duration;

use meili::prelude::*;
use serde::Serialize;

use crate::{
    archive::BackupArchive,
    events::{EventSink, MigrationEvent, Step, emit},
    repair::{RepairPolicy, RepairTable, RestorePhase},
};

/// Default number of documents per upload
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default pause between batches
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub empty_settings: EmptySettingPolicy,
    pub policies: RepairTable,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            empty_settings: EmptySettingPolicy::default(),
            policies: RepairTable::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Settings and every batch were applied
    Restored,
    /// The index exists, but settings or some batches failed
    Partial,
    /// Nothing was written
    Skipped,
}

impl IndexStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoredIndex {
    pub uid: String,
    pub phase: RestorePhase,
    pub status: IndexStatus,
    /// Documents in the archive
    pub documents: usize,
    pub uploaded: usize,
    pub failed_batches: usize,
    /// None when the archive had no settings for this index
    pub settings_applied: Option<bool>,
}

impl RestoredIndex {
    fn new(uid: &str, phase: RestorePhase) -> Self {
        Self {
            uid: uid.to_string(),
            phase,
            status: IndexStatus::Skipped,
            documents: 0,
            uploaded: 0,
            failed_batches: 0,
            settings_applied: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub indexes: Vec<RestoredIndex>,
    /// Set when a fatal error stopped the restore early
    pub aborted: Option<String>,
}

impl RestoreSummary {
    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
            && self
                .indexes
                .iter()
                .all(|index| index.status == IndexStatus::Restored)
    }
}

enum Flow {
    Continue(RestoredIndex),
    Abort(RestoredIndex, String),
}

pub struct RestoreRunner<'a, S, W> {
    service: &'a S,
    waiter: &'a TaskWaiter<W>,
    config: &'a RestoreConfig,
}

impl<'a, S: SearchService, W: WaitStrategy> RestoreRunner<'a, S, W> {
    pub fn new(service: &'a S, waiter: &'a TaskWaiter<W>, config: &'a RestoreConfig) -> Self {
        Self {
            service,
            waiter,
            config,
        }
    }

    pub async fn run<E>(&self, archive: &BackupArchive, sink: &mut E) -> RestoreSummary
    where
        E: EventSink + ?Sized,
    {
        let mut summary = RestoreSummary::default();
        let uids = match archive.index_uids() {
            Ok(uids) => uids,
            Err(err) => {
                let message = format!("{err:#}");
                emit(sink, MigrationEvent::Fatal {
                    message: message.clone(),
                });
                summary.aborted = Some(message);
                return summary;
            }
        };
        emit(sink, MigrationEvent::IndexesListed { count: uids.len() });

        let policies = &self.config.policies;
        let (merge, rebuild): (Vec<&String>, Vec<&String>) = uids
            .iter()
            .partition(|uid| policies.phase_for(uid) == RestorePhase::Merge);

        for (phase, group) in [(RestorePhase::Merge, merge), (RestorePhase::Rebuild, rebuild)] {
            if group.is_empty() {
                continue;
            }
            emit(sink, MigrationEvent::PhaseStarted {
                phase,
                count: group.len(),
            });
            for uid in group {
                match self.restore_index(archive, uid, phase, sink).await {
                    Flow::Continue(report) => summary.indexes.push(report),
                    Flow::Abort(report, message) => {
                        summary.indexes.push(report);
                        emit(sink, MigrationEvent::Fatal {
                            message: message.clone(),
                        });
                        summary.aborted = Some(message);
                        return summary;
                    }
                }
            }
            emit(sink, MigrationEvent::PhaseFinished { phase });
        }

        emit(sink, MigrationEvent::RestoreFinished {
            indexes: summary.indexes.len(),
        });
        summary
    }

    async fn restore_index<E>(
        &self,
        archive: &BackupArchive,
        uid: &str,
        phase: RestorePhase,
        sink: &mut E,
    ) -> Flow
    where
        E: EventSink + ?Sized,
    {
        emit(sink, MigrationEvent::IndexStarted {
            uid: uid.to_string(),
        });
        let mut report = RestoredIndex::new(uid, phase);
        let policy = self.config.policies.policy_for(uid);

        let snapshot = match archive.read_index(uid) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return skip(report, Step::ReadArchive, format!("{err:#}"), sink);
            }
        };
        report.documents = snapshot.documents.len();

        let mut exists = match self.service.get_index(uid).await {
            Ok(info) => info.is_some(),
            Err(err) => return setup_failed(report, Step::Lookup, err.body_text(), sink),
        };

        let replace = phase == RestorePhase::Rebuild
            || policy.is_some_and(RepairPolicy::deletes_existing);
        if exists && replace {
            emit(sink, MigrationEvent::RepairApplied {
                uid: uid.to_string(),
                description: "deleting existing index".into(),
            });
            let outcome = self
                .waiter
                .run(self.service, self.service.delete_index(uid))
                .await;
            task_event(uid, &outcome, sink);
            if !outcome.is_success() {
                return setup_failed(report, Step::Delete, outcome.to_string(), sink);
            }
            emit(sink, MigrationEvent::IndexDeleted {
                uid: uid.to_string(),
            });
            exists = false;
        }

        if exists {
            emit(sink, MigrationEvent::IndexExists {
                uid: uid.to_string(),
            });
        } else {
            let primary_key = snapshot.info.primary_key.clone().or_else(|| {
                policy
                    .and_then(RepairPolicy::default_primary_key)
                    .map(str::to_string)
            });
            let outcome = self
                .waiter
                .run(
                    self.service,
                    self.service.create_index(uid, primary_key.as_deref()),
                )
                .await;
            task_event(uid, &outcome, sink);
            if !outcome.is_success() {
                return setup_failed(report, Step::Create, outcome.to_string(), sink);
            }
            emit(sink, MigrationEvent::IndexCreated {
                uid: uid.to_string(),
                primary_key,
            });
        }

        if let Some(mut settings) = snapshot.settings {
            if let Some(policy) = policy {
                for key in policy.repair_settings(&mut settings) {
                    emit(sink, MigrationEvent::RepairApplied {
                        uid: uid.to_string(),
                        description: format!("removing {key} configuration"),
                    });
                }
            }
            let applied = SettingsTransfer::new(self.service, self.waiter)
                .empty_policy(self.config.empty_settings)
                .apply(uid, &settings)
                .await;
            settings_events(uid, &applied, sink);
            report.settings_applied = Some(applied.is_success());
        }

        let mut documents = snapshot.documents;
        if documents.is_empty() {
            emit(sink, MigrationEvent::NoDocuments {
                uid: uid.to_string(),
            });
        } else {
            if let Some(policy) = policy {
                let repairs = policy.repair_documents(&mut documents);
                if repairs.fields_copied > 0 {
                    emit(sink, MigrationEvent::RepairApplied {
                        uid: uid.to_string(),
                        description: format!(
                            "filled missing fields on {} documents",
                            repairs.fields_copied
                        ),
                    });
                }
                if repairs.vectors_added > 0 {
                    emit(sink, MigrationEvent::RepairApplied {
                        uid: uid.to_string(),
                        description: format!(
                            "added null vector embeddings to {} documents",
                            repairs.vectors_added
                        ),
                    });
                }
            }
            let retry_key = policy.and_then(RepairPolicy::retry_primary_key);
            self.upload(uid, &documents, retry_key, &mut report, sink)
                .await;
        }

        report.status = if report.failed_batches == 0 && report.settings_applied != Some(false) {
            IndexStatus::Restored
        } else {
            IndexStatus::Partial
        };
        emit(sink, MigrationEvent::IndexFinished {
            uid: uid.to_string(),
            uploaded: report.uploaded,
            failed_batches: report.failed_batches,
        });
        Flow::Continue(report)
    }

    async fn upload<E>(
        &self,
        uid: &str,
        documents: &[Document],
        retry_key: Option<&str>,
        report: &mut RestoredIndex,
        sink: &mut E,
    ) where
        E: EventSink + ?Sized,
    {
        let batch_size = self.config.batch_size.max(1);
        for (i, batch) in documents.chunks(batch_size).enumerate() {
            if i > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            let first = i * batch_size + 1;
            emit(sink, MigrationEvent::BatchStarted {
                uid: uid.to_string(),
                first,
                last: first + batch.len() - 1,
                total: documents.len(),
            });

            let outcome = self
                .waiter
                .run(self.service, self.service.add_documents(uid, batch))
                .await;
            task_event(uid, &outcome, sink);
            if outcome.is_success() {
                report.uploaded += batch.len();
                emit(sink, MigrationEvent::BatchUploaded {
                    uid: uid.to_string(),
                    size: batch.len(),
                    retried: false,
                });
                continue;
            }
            emit(sink, MigrationEvent::BatchFailed {
                uid: uid.to_string(),
                size: batch.len(),
                retried: false,
                error: outcome.to_string(),
            });

            let primary_key_error = outcome.task().is_some_and(Task::is_primary_key_error);
            let Some(primary_key) = retry_key.filter(|_| primary_key_error) else {
                report.failed_batches += 1;
                continue;
            };
            if self
                .retry_batch(uid, batch, primary_key, sink)
                .await
            {
                report.uploaded += batch.len();
            } else {
                report.failed_batches += 1;
            }
        }
    }

    /// Forces `primary_key` on the index, then uploads `batch` once more.
    async fn retry_batch<E>(
        &self,
        uid: &str,
        batch: &[Document],
        primary_key: &str,
        sink: &mut E,
    ) -> bool
    where
        E: EventSink + ?Sized,
    {
        emit(sink, MigrationEvent::BatchRetry {
            uid: uid.to_string(),
            primary_key: primary_key.to_string(),
        });
        let update = self
            .waiter
            .run(
                self.service,
                self.service.update_primary_key(uid, primary_key),
            )
            .await;
        task_event(uid, &update, sink);
        if !update.is_success() {
            emit(sink, MigrationEvent::StepFailed {
                uid: uid.to_string(),
                step: Step::PrimaryKey,
                error: update.to_string(),
            });
            return false;
        }
        emit(sink, MigrationEvent::PrimaryKeyUpdated {
            uid: uid.to_string(),
            primary_key: primary_key.to_string(),
        });

        let retry = self
            .waiter
            .run(self.service, self.service.add_documents(uid, batch))
            .await;
        task_event(uid, &retry, sink);
        if retry.is_success() {
            emit(sink, MigrationEvent::BatchUploaded {
                uid: uid.to_string(),
                size: batch.len(),
                retried: true,
            });
            true
        } else {
            emit(sink, MigrationEvent::BatchFailed {
                uid: uid.to_string(),
                size: batch.len(),
                retried: true,
                error: retry.to_string(),
            });
            false
        }
    }
}

/// A lookup, delete or create failed: skip the index, or abort in the rebuild phase.
fn setup_failed<E>(report: RestoredIndex, step: Step, error: String, sink: &mut E) -> Flow
where
    E: EventSink + ?Sized,
{
    if report.phase == RestorePhase::Rebuild {
        let message = format!("Failed to {step} index {}: {error}", report.uid);
        return Flow::Abort(report, message);
    }
    skip(report, step, error, sink)
}

fn skip<E>(mut report: RestoredIndex, step: Step, error: String, sink: &mut E) -> Flow
where
    E: EventSink + ?Sized,
{
    emit(sink, MigrationEvent::StepFailed {
        uid: report.uid.clone(),
        step,
        error,
    });
    emit(sink, MigrationEvent::IndexSkipped {
        uid: report.uid.clone(),
        reason: format!("could not {step} index"),
    });
    report.status = IndexStatus::Skipped;
    Flow::Continue(report)
}

fn task_event<E>(uid: &str, outcome: &WriteOutcome, sink: &mut E)
where
    E: EventSink + ?Sized,
{
    let event = match outcome {
        WriteOutcome::Succeeded(task) | WriteOutcome::Failed(TaskOutcome::Resolved(task)) => {
            MigrationEvent::TaskResolved {
                uid: uid.to_string(),
                task_uid: task.uid,
                kind: task.kind.clone(),
                status: task.status.to_string(),
            }
        }
        WriteOutcome::Failed(TaskOutcome::Unknown { task_uid, .. }) => {
            MigrationEvent::TaskResolved {
                uid: uid.to_string(),
                task_uid: *task_uid,
                kind: None,
                status: "unknown".into(),
            }
        }
        WriteOutcome::Rejected(_) => return,
    };
    emit(sink, event);
}

fn settings_events<E>(uid: &str, report: &SettingsReport, sink: &mut E)
where
    E: EventSink + ?Sized,
{
    if !report.used_fallback() {
        emit(sink, MigrationEvent::SettingsApplied {
            uid: uid.to_string(),
        });
        return;
    }
    emit(sink, MigrationEvent::SettingsFallback {
        uid: uid.to_string(),
        reason: report.bulk.to_string(),
    });
    for (category, outcome) in &report.categories {
        match outcome {
            CategoryOutcome::Skipped => {}
            CategoryOutcome::Applied(write) if write.is_success() => {
                emit(sink, MigrationEvent::SettingCategoryApplied {
                    uid: uid.to_string(),
                    category: *category,
                });
            }
            CategoryOutcome::Applied(write) => {
                emit(sink, MigrationEvent::SettingCategoryFailed {
                    uid: uid.to_string(),
                    category: *category,
                    error: write.to_string(),
                });
            }
        }
    }
}
