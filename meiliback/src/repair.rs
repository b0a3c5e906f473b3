//! Per-index repair policies applied during restore.
//!
//! A [`RepairTable`] maps index uids to corrective [`RepairAction`]s and a
//! [`RestorePhase`]. Indexes without a matching policy are merged into the
//! target unchanged. The built-in table handles two known cases:
//!
//! - `page`: replaced if it exists, created with primary key `id` when none was
//!   recorded, `_meilisearch_id` copied into `id`, and a batch that fails with a
//!   primary-key error is retried once after forcing primary key `id`.
//! - `documents`: always rebuilt after every other index, without its
//!   `embedders` setting, with a null `default` vector on every document.
//!
//! Tables serialize to json so a replacement can be loaded from a file:
//!
//! ```json
//! [{"matcher": {"exact": "page"}, "phase": "merge",
//!   "actions": ["delete_existing", {"default_primary_key": "id"}]}]
//! ```

use std::{fs, path::Path};

use anyhow::{Context, Result};
use meili::prelude::{Document, Settings};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding user-provided vectors on a document.
pub const VECTORS_FIELD: &str = "_vectors";

/// Selects indexes by uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMatcher {
    Exact(String),
    Prefix(String),
}

impl IndexMatcher {
    pub fn matches(&self, uid: &str) -> bool {
        match self {
            Self::Exact(name) => uid == name,
            Self::Prefix(prefix) => uid.starts_with(prefix.as_str()),
        }
    }
}

/// When an index is restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    /// Restored in archive order. Existing indexes are updated in place;
    /// failures skip the index.
    #[default]
    Merge,
    /// Restored after all merge-phase indexes. Always deleted and recreated;
    /// a failed delete or create aborts the restore.
    Rebuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Delete the index before restoring if it already exists.
    DeleteExisting,
    /// Primary key used at creation when the archive records none.
    DefaultPrimaryKey(String),
    /// Copy `from` into `to` on documents that have `from` but not `to`.
    CopyFieldIfMissing { from: String, to: String },
    /// Remove a top-level settings key before applying settings.
    StripSetting(String),
    /// Set `_vectors` to `{embedder: null}` on documents without `_vectors`.
    NullVectorPlaceholder { embedder: String },
    /// When a batch fails with a primary-key error, set this primary key and
    /// retry the batch once.
    RetryBatchWithPrimaryKey(String),
}

/// Corrective actions for the indexes selected by `matcher`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    pub matcher: IndexMatcher,
    #[serde(default)]
    pub phase: RestorePhase,
    #[serde(default)]
    pub actions: Vec<RepairAction>,
}

/// Counts of document changes made by a policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentRepairs {
    pub fields_copied: usize,
    pub vectors_added: usize,
}

impl RepairPolicy {
    pub fn deletes_existing(&self) -> bool {
        self.phase == RestorePhase::Rebuild || self.actions.contains(&RepairAction::DeleteExisting)
    }

    pub fn default_primary_key(&self) -> Option<&str> {
        self.actions.iter().find_map(|action| match action {
            RepairAction::DefaultPrimaryKey(key) => Some(key.as_str()),
            _ => None,
        })
    }

    pub fn retry_primary_key(&self) -> Option<&str> {
        self.actions.iter().find_map(|action| match action {
            RepairAction::RetryBatchWithPrimaryKey(key) => Some(key.as_str()),
            _ => None,
        })
    }

    /// Removes stripped keys from `settings`, returning the keys that were present.
    pub fn repair_settings(&self, settings: &mut Settings) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                RepairAction::StripSetting(key) => settings.remove(key).map(|_| key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn repair_documents(&self, documents: &mut [Document]) -> DocumentRepairs {
        let mut repairs = DocumentRepairs::default();
        for action in &self.actions {
            match action {
                RepairAction::CopyFieldIfMissing { from, to } => {
                    for doc in documents.iter_mut() {
                        if doc.contains_key(to) {
                            continue;
                        }
                        if let Some(value) = doc.get(from).cloned() {
                            doc.insert(to.clone(), value);
                            repairs.fields_copied += 1;
                        }
                    }
                }
                RepairAction::NullVectorPlaceholder { embedder } => {
                    for doc in documents.iter_mut() {
                        if !doc.contains_key(VECTORS_FIELD) {
                            let mut vectors = Map::new();
                            vectors.insert(embedder.clone(), Value::Null);
                            doc.insert(VECTORS_FIELD.to_string(), Value::Object(vectors));
                            repairs.vectors_added += 1;
                        }
                    }
                }
                _ => {}
            }
        }
        repairs
    }
}

/// Ordered list of policies; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepairTable(pub Vec<RepairPolicy>);

impl Default for RepairTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RepairTable {
    /// Table reproducing the known `page` and `documents` fixes.
    pub fn builtin() -> Self {
        Self(vec![
            RepairPolicy {
                matcher: IndexMatcher::Exact("page".into()),
                phase: RestorePhase::Merge,
                actions: vec![
                    RepairAction::DeleteExisting,
                    RepairAction::DefaultPrimaryKey("id".into()),
                    RepairAction::CopyFieldIfMissing {
                        from: "_meilisearch_id".into(),
                        to: "id".into(),
                    },
                    RepairAction::RetryBatchWithPrimaryKey("id".into()),
                ],
            },
            RepairPolicy {
                matcher: IndexMatcher::Exact("documents".into()),
                phase: RestorePhase::Rebuild,
                actions: vec![
                    RepairAction::StripSetting(meili::settings::EMBEDDERS_KEY.into()),
                    RepairAction::NullVectorPlaceholder {
                        embedder: "default".into(),
                    },
                ],
            },
        ])
    }

    /// No policies: every index is merged unchanged.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read repair policies {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid repair policies in {}", path.display()))
    }

    pub fn policy_for(&self, uid: &str) -> Option<&RepairPolicy> {
        self.0.iter().find(|policy| policy.matcher.matches(uid))
    }

    pub fn phase_for(&self, uid: &str) -> RestorePhase {
        self.policy_for(uid)
            .map_or(RestorePhase::Merge, |policy| policy.phase)
    }
}
