//! Structured progress events.
//!
//! Orchestrators report everything they do as [`MigrationEvent`]s sent to an
//! [`EventSink`]. [`TextLog`] renders them as the accumulated human-readable log
//! returned by the front end, [`Recorder`] keeps them for inspection, and a
//! tuple `(A, B)` forwards to both sinks.

use std::fmt;

use meili::prelude::SettingCategory;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::repair::RestorePhase;

/// Mutating step of a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Lookup,
    Delete,
    Create,
    PrimaryKey,
    ReadArchive,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lookup => "look up",
            Self::Delete => "delete",
            Self::Create => "create",
            Self::PrimaryKey => "update primary key of",
            Self::ReadArchive => "read archive entry for",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    IndexesListed {
        count: usize,
    },
    IndexStarted {
        uid: String,
    },
    DocumentCount {
        uid: String,
        total: u64,
    },
    StatsUnavailable {
        uid: String,
        error: String,
    },
    SettingsUnavailable {
        uid: String,
        error: String,
    },
    PageFetched {
        uid: String,
        offset: usize,
        limit: usize,
        received: usize,
        total_so_far: usize,
    },
    PaginationFailed {
        uid: String,
        error: String,
    },
    DocumentsSaved {
        uid: String,
        count: usize,
    },
    PhaseStarted {
        phase: RestorePhase,
        count: usize,
    },
    IndexDeleted {
        uid: String,
    },
    IndexCreated {
        uid: String,
        primary_key: Option<String>,
    },
    IndexExists {
        uid: String,
    },
    PrimaryKeyUpdated {
        uid: String,
        primary_key: String,
    },
    StepFailed {
        uid: String,
        step: Step,
        error: String,
    },
    TaskResolved {
        uid: String,
        task_uid: u64,
        kind: Option<String>,
        status: String,
    },
    RepairApplied {
        uid: String,
        description: String,
    },
    SettingsApplied {
        uid: String,
    },
    SettingsFallback {
        uid: String,
        reason: String,
    },
    SettingCategoryApplied {
        uid: String,
        category: SettingCategory,
    },
    SettingCategoryFailed {
        uid: String,
        category: SettingCategory,
        error: String,
    },
    NoDocuments {
        uid: String,
    },
    BatchStarted {
        uid: String,
        first: usize,
        last: usize,
        total: usize,
    },
    BatchUploaded {
        uid: String,
        size: usize,
        retried: bool,
    },
    BatchFailed {
        uid: String,
        size: usize,
        retried: bool,
        error: String,
    },
    BatchRetry {
        uid: String,
        primary_key: String,
    },
    IndexSkipped {
        uid: String,
        reason: String,
    },
    IndexFinished {
        uid: String,
        uploaded: usize,
        failed_batches: usize,
    },
    PhaseFinished {
        phase: RestorePhase,
    },
    BackupFinished {
        indexes: usize,
        location: String,
    },
    RestoreFinished {
        indexes: usize,
    },
    Fatal {
        message: String,
    },
    Note {
        message: String,
    },
}

impl MigrationEvent {
    /// Writes the event to the tracing log.
    pub fn trace(&self) {
        match self {
            Self::Fatal { .. } => error!("{self}"),
            Self::StatsUnavailable { .. }
            | Self::SettingsUnavailable { .. }
            | Self::PaginationFailed { .. }
            | Self::StepFailed { .. }
            | Self::SettingsFallback { .. }
            | Self::SettingCategoryFailed { .. }
            | Self::BatchFailed { .. }
            | Self::IndexSkipped { .. } => warn!("{self}"),
            Self::PageFetched { .. }
            | Self::TaskResolved { .. }
            | Self::BatchStarted { .. }
            | Self::DocumentCount { .. } => debug!("{self}"),
            _ => info!("{self}"),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexesListed { count } => write!(f, "Found {count} indexes"),
            Self::IndexStarted { uid } => write!(f, "Processing index: {uid}"),
            Self::DocumentCount { uid, total } => {
                write!(f, "Index {uid} has {total} documents total")
            }
            Self::StatsUnavailable { uid, error } => {
                write!(f, "Failed to get stats for index {uid}: {error}")
            }
            Self::SettingsUnavailable { uid, error } => {
                write!(f, "Failed to get settings for index {uid}: {error}")
            }
            Self::PageFetched {
                uid,
                offset,
                limit,
                received,
                total_so_far,
            } => write!(
                f,
                "Retrieved {received} documents from index {uid} (offset={offset}, limit={limit}), total so far: {total_so_far}"
            ),
            Self::PaginationFailed { uid, error } => {
                write!(f, "Failed to get documents from index {uid}: {error}")
            }
            Self::DocumentsSaved { uid, count } => {
                write!(f, "Saving {count} documents for index {uid}")
            }
            Self::PhaseStarted { phase, count } => match phase {
                RestorePhase::Merge => write!(f, "Restoring {count} regular indexes"),
                RestorePhase::Rebuild => write!(f, "Rebuilding {count} indexes from scratch"),
            },
            Self::IndexDeleted { uid } => write!(f, "Deleted index {uid}"),
            Self::IndexCreated { uid, primary_key } => match primary_key {
                Some(key) => write!(f, "Created index {uid} with primary key {key}"),
                None => write!(f, "Created index {uid}"),
            },
            Self::IndexExists { uid } => write!(f, "Index {uid} already exists"),
            Self::PrimaryKeyUpdated { uid, primary_key } => {
                write!(f, "Updated index {uid} with primary key '{primary_key}'")
            }
            Self::StepFailed { uid, step, error } => {
                write!(f, "Failed to {step} index {uid}: {error}")
            }
            Self::TaskResolved {
                uid,
                task_uid,
                kind,
                status,
            } => write!(
                f,
                "Task {task_uid} ({}) for index {uid}: {status}",
                kind.as_deref().unwrap_or("unknown")
            ),
            Self::RepairApplied { uid, description } => {
                write!(f, "Special handling for index {uid}: {description}")
            }
            Self::SettingsApplied { uid } => write!(f, "Applied all settings to index {uid}"),
            Self::SettingsFallback { uid, reason } => write!(
                f,
                "Failed to apply all settings to index {uid} at once: {reason}\nTrying to apply settings individually..."
            ),
            Self::SettingCategoryApplied { uid, category } => {
                write!(f, "Applied setting {} to index {uid}", category.key())
            }
            Self::SettingCategoryFailed {
                uid,
                category,
                error,
            } => write!(
                f,
                "Failed to apply setting {} to index {uid}: {error}",
                category.key()
            ),
            Self::NoDocuments { uid } => write!(f, "No documents found for index {uid}"),
            Self::BatchStarted {
                uid,
                first,
                last,
                total,
            } => write!(
                f,
                "Adding batch of {} documents to index {uid} ({first}-{last} of {total})",
                last + 1 - first
            ),
            Self::BatchUploaded { uid, retried, .. } => {
                if *retried {
                    write!(f, "Successfully added batch to index {uid} on retry")
                } else {
                    write!(f, "Successfully added batch to index {uid}")
                }
            }
            Self::BatchFailed {
                uid,
                retried,
                error,
                ..
            } => {
                let on_retry = if *retried { " on retry" } else { "" };
                write!(f, "Failed to add documents to index {uid}{on_retry}: {error}")
            }
            Self::BatchRetry { uid, primary_key } => write!(
                f,
                "Attempting to update index {uid} with forced primary key '{primary_key}' and retry the batch"
            ),
            Self::IndexSkipped { uid, reason } => write!(f, "Skipping index {uid}: {reason}"),
            Self::IndexFinished {
                uid,
                uploaded,
                failed_batches,
            } => write!(
                f,
                "Finished index {uid}: {uploaded} documents uploaded, {failed_batches} failed batches"
            ),
            Self::PhaseFinished { phase } => match phase {
                RestorePhase::Merge => f.write_str("Regular indexes restore completed"),
                RestorePhase::Rebuild => f.write_str("Rebuilt indexes restore completed"),
            },
            Self::BackupFinished { indexes, location } => write!(
                f,
                "Backup completed successfully ({indexes} indexes). Zip file created at {location}"
            ),
            Self::RestoreFinished { .. } => f.write_str("Restore process completed!"),
            Self::Fatal { message } => write!(f, "Error: {message}"),
            Self::Note { message } => f.write_str(message),
        }
    }
}

/// Receives events from the orchestrators.
pub trait EventSink {
    fn emit(&mut self, event: MigrationEvent);
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, event: MigrationEvent) {
        (**self).emit(event);
    }
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: MigrationEvent) {
        self.0.emit(event.clone());
        self.1.emit(event);
    }
}

/// Renders events as lines of text.
#[derive(Debug, Default, Clone)]
pub struct TextLog {
    text: String,
}

impl TextLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl EventSink for TextLog {
    fn emit(&mut self, event: MigrationEvent) {
        self.text.push_str(&event.to_string());
        self.text.push('\n');
    }
}

/// Keeps every event.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub events: Vec<MigrationEvent>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&MigrationEvent) -> bool) -> usize {
        self.events.iter().filter(|event| pred(event)).count()
    }
}

impl EventSink for Recorder {
    fn emit(&mut self, event: MigrationEvent) {
        self.events.push(event);
    }
}

/// Traces an event, then forwards it to `sink`.
pub(crate) fn emit<E: EventSink + ?Sized>(sink: &mut E, event: MigrationEvent) {
    event.trace();
    sink.emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_log_renders_one_line_per_event() {
        let mut log = TextLog::new();
        log.emit(MigrationEvent::IndexesListed { count: 2 });
        log.emit(MigrationEvent::BatchStarted {
            uid: "alpha".into(),
            first: 1001,
            last: 1500,
            total: 1500,
        });
        log.emit(MigrationEvent::RestoreFinished { indexes: 2 });
        assert_eq!(
            log.as_str(),
            "Found 2 indexes\n\
             Adding batch of 500 documents to index alpha (1001-1500 of 1500)\n\
             Restore process completed!\n"
        );
    }

    #[test]
    fn pair_forwards_to_both() {
        let mut pair = (Recorder::new(), TextLog::new());
        pair.emit(MigrationEvent::Fatal {
            message: "boom".into(),
        });
        assert_eq!(pair.0.events.len(), 1);
        assert!(pair.0.events[0].is_fatal());
        assert_eq!(pair.1.as_str(), "Error: boom\n");
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(MigrationEvent::StepFailed {
            uid: "page".into(),
            step: Step::Delete,
            error: "nope".into(),
        })
        .unwrap();
        assert_eq!(value["event"], "step_failed");
        assert_eq!(value["step"], "delete");
        assert_eq!(
            MigrationEvent::StepFailed {
                uid: "page".into(),
                step: Step::Delete,
                error: "nope".into(),
            }
            .to_string(),
            "Failed to delete index page: nope"
        );
    }
}
