//! In-memory search service for tests.
//!
//! Implements [`SearchService`] with Meilisearch-like semantics: indexes keyed
//! by uid, documents upserted by primary key (inferred from an `*id` field when
//! not set), settings merged on PATCH, and tasks that resolve after a
//! configurable number of `processing` polls. Every call is recorded so tests
//! can count requests.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use crate::{
    Result,
    documents::Document,
    error::MeiliError,
    indexes::{IndexInfo, IndexList, IndexStats},
    service::SearchService,
    settings::{EMBEDDERS_KEY, SettingCategory, Settings},
    tasks::{Task, TaskError, TaskHandle, TaskStatus},
};

/// Shape of document page bodies returned by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageShape {
    /// `{"results": [...], "offset", "limit", "total"}`
    #[default]
    Envelope,
    /// `[...]`
    Bare,
    /// `{"unexpected": true}`
    Invalid,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    ListIndexes,
    GetIndex(String),
    CreateIndex {
        uid: String,
        primary_key: Option<String>,
    },
    DeleteIndex(String),
    UpdatePrimaryKey {
        uid: String,
        primary_key: String,
    },
    GetSettings(String),
    UpdateSettings {
        uid: String,
        settings: Settings,
    },
    UpdateSetting {
        uid: String,
        category: SettingCategory,
    },
    GetStats(String),
    DocumentsPage {
        uid: String,
        offset: usize,
        limit: usize,
    },
    AddDocuments {
        uid: String,
        count: usize,
    },
    GetTask(u64),
}

#[derive(Debug, Clone, Default)]
struct MockIndex {
    primary_key: Option<String>,
    settings: Map<String, Value>,
    documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct MockState {
    indexes: BTreeMap<String, MockIndex>,
    tasks: HashMap<u64, (Task, u32)>,
    next_task: u64,
    calls: Vec<MockCall>,
    page_shape: PageShape,
    pending_polls: u32,
    reject_bulk_settings: bool,
    rejected_categories: HashSet<SettingCategory>,
    fail_task_queries: bool,
    fail_list_indexes: bool,
    fail_documents_page_at: Option<(String, usize)>,
    fail_settings_for: HashSet<String>,
    fail_delete_for: HashSet<String>,
    fail_create_for: HashSet<String>,
}

/// In-memory [`SearchService`].
#[derive(Debug, Default)]
pub struct MockSearchService {
    state: Mutex<MockState>,
}

impl MockSearchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an index with settings and documents, without recording a call.
    #[must_use]
    pub fn with_index(
        self,
        uid: &str,
        primary_key: Option<&str>,
        settings: Value,
        documents: Vec<Value>,
    ) -> Self {
        self.seed_index(uid, primary_key, settings, documents);
        self
    }

    /// Adds an index with settings and documents, without recording a call.
    pub fn seed_index(
        &self,
        uid: &str,
        primary_key: Option<&str>,
        settings: Value,
        documents: Vec<Value>,
    ) {
        let settings = match settings {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let documents = documents
            .into_iter()
            .filter_map(|doc| match doc {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect();
        self.state.lock().indexes.insert(
            uid.to_string(),
            MockIndex {
                primary_key: primary_key.map(str::to_string),
                settings,
                documents,
            },
        );
    }

    #[must_use]
    pub fn page_shape(self, shape: PageShape) -> Self {
        self.state.lock().page_shape = shape;
        self
    }

    /// Number of `processing` answers before a task reports its final status.
    #[must_use]
    pub fn pending_polls(self, polls: u32) -> Self {
        self.state.lock().pending_polls = polls;
        self
    }

    /// Rejects `PATCH /indexes/{uid}/settings` with http 400.
    #[must_use]
    pub fn reject_bulk_settings(self, reject: bool) -> Self {
        self.state.lock().reject_bulk_settings = reject;
        self
    }

    /// Rejects `PUT /indexes/{uid}/settings/{category}` for one category.
    #[must_use]
    pub fn reject_category(self, category: SettingCategory) -> Self {
        self.state.lock().rejected_categories.insert(category);
        self
    }

    /// Makes every `GET /tasks/{uid}` fail.
    #[must_use]
    pub fn fail_task_queries(self, fail: bool) -> Self {
        self.state.lock().fail_task_queries = fail;
        self
    }

    /// Makes `GET /indexes` fail with http 401.
    #[must_use]
    pub fn fail_list_indexes(self, fail: bool) -> Self {
        self.state.lock().fail_list_indexes = fail;
        self
    }

    /// Makes the document page request at `offset` for `uid` fail with http 500.
    #[must_use]
    pub fn fail_documents_page_at(self, uid: &str, offset: usize) -> Self {
        self.state.lock().fail_documents_page_at = Some((uid.to_string(), offset));
        self
    }

    /// Makes `GET /indexes/{uid}/settings` fail with http 500.
    #[must_use]
    pub fn fail_settings_for(self, uid: &str) -> Self {
        self.state.lock().fail_settings_for.insert(uid.to_string());
        self
    }

    /// Makes index deletion tasks for `uid` fail.
    #[must_use]
    pub fn fail_delete_for(self, uid: &str) -> Self {
        self.state.lock().fail_delete_for.insert(uid.to_string());
        self
    }

    /// Makes index creation tasks for `uid` fail.
    #[must_use]
    pub fn fail_create_for(self, uid: &str) -> Self {
        self.state.lock().fail_create_for.insert(uid.to_string());
        self
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| pred(call)).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn index_uids(&self) -> Vec<String> {
        self.state.lock().indexes.keys().cloned().collect()
    }

    pub fn primary_key(&self, uid: &str) -> Option<String> {
        self.state
            .lock()
            .indexes
            .get(uid)
            .and_then(|index| index.primary_key.clone())
    }

    pub fn documents(&self, uid: &str) -> Vec<Document> {
        self.state
            .lock()
            .indexes
            .get(uid)
            .map(|index| index.documents.clone())
            .unwrap_or_default()
    }

    pub fn settings(&self, uid: &str) -> Option<Settings> {
        self.state
            .lock()
            .indexes
            .get(uid)
            .map(|index| Settings(index.settings.clone()))
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

fn not_found(uid: &str) -> MeiliError {
    MeiliError::NotFound {
        kind: "index".into(),
        key: uid.to_string(),
        message: format!("Index `{uid}` not found."),
    }
}

fn task_error(code: &str, message: String) -> TaskError {
    TaskError {
        message,
        code: code.to_string(),
        kind: "invalid_request".to_string(),
        link: None,
    }
}

impl MockState {
    /// Records a finished task and returns its handle.
    fn finish(&mut self, uid: &str, kind: &str, error: Option<TaskError>) -> TaskHandle {
        let task_uid = self.next_task;
        self.next_task += 1;
        let status = if error.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Succeeded
        };
        let task = Task {
            uid: task_uid,
            index_uid: Some(uid.to_string()),
            status,
            kind: Some(kind.to_string()),
            error,
            extra: Map::new(),
        };
        self.tasks.insert(task_uid, (task, self.pending_polls));
        TaskHandle {
            task_uid,
            index_uid: Some(uid.to_string()),
            status: TaskStatus::Enqueued,
            kind: Some(kind.to_string()),
            enqueued_at: None,
        }
    }

    fn add_documents(&mut self, uid: &str, batch: &[Document]) -> Option<TaskError> {
        let index = self.indexes.entry(uid.to_string()).or_default();
        let primary_key = match index.primary_key.clone() {
            Some(key) => key,
            None => match infer_primary_key(batch) {
                Ok(key) => key,
                Err(err) => return Some(err),
            },
        };
        if let Some(err) = missing_vectors(&index.settings, batch) {
            return Some(err);
        }
        if let Some(doc) = batch.iter().find(|doc| !doc.contains_key(&primary_key)) {
            return Some(task_error(
                "missing_document_id",
                format!(
                    "Document doesn't have a `{primary_key}` attribute: `{}`.",
                    Value::Object(doc.clone())
                ),
            ));
        }
        index.primary_key = Some(primary_key.clone());
        for doc in batch {
            let id = doc.get(&primary_key);
            if let Some(existing) = index
                .documents
                .iter_mut()
                .find(|existing| existing.get(&primary_key) == id)
            {
                *existing = doc.clone();
            } else {
                index.documents.push(doc.clone());
            }
        }
        None
    }
}

// Meilisearch infers the primary key from the single field whose name ends with "id".
fn infer_primary_key(batch: &[Document]) -> std::result::Result<String, TaskError> {
    let Some(first) = batch.first() else {
        return Err(task_error(
            "index_primary_key_no_candidate_found",
            "The primary key inference failed as the engine did not find any field ending with `id` in its name.".into(),
        ));
    };
    let candidates: Vec<&String> = first
        .keys()
        .filter(|key| key.to_ascii_lowercase().ends_with("id"))
        .collect();
    match candidates.as_slice() {
        [key] => Ok((*key).clone()),
        [] => Err(task_error(
            "index_primary_key_no_candidate_found",
            "The primary key inference failed as the engine did not find any field ending with `id` in its name.".into(),
        )),
        _ => Err(task_error(
            "index_primary_key_multiple_candidates_found",
            format!("The primary key inference failed as the engine found multiple candidates: {candidates:?}."),
        )),
    }
}

// user-provided embedders require every document to carry `_vectors.<name>`
fn missing_vectors(settings: &Map<String, Value>, batch: &[Document]) -> Option<TaskError> {
    let embedders = settings.get(EMBEDDERS_KEY)?.as_object()?;
    for (name, config) in embedders {
        if config.get("source").and_then(Value::as_str) != Some("userProvided") {
            continue;
        }
        let missing = batch.iter().any(|doc| {
            doc.get("_vectors")
                .and_then(Value::as_object)
                .is_none_or(|vectors| !vectors.contains_key(name))
        });
        if missing {
            return Some(task_error(
                "vector_embedding_error",
                format!("Missing field `_vectors.{name}` for a user-provided embedder."),
            ));
        }
    }
    None
}

impl SearchService for MockSearchService {
    async fn list_indexes(&self, limit: usize) -> Result<IndexList> {
        self.record(MockCall::ListIndexes);
        let state = self.state.lock();
        if state.fail_list_indexes {
            return Err(MeiliError::Unauthorized);
        }
        let results: Vec<IndexInfo> = state
            .indexes
            .iter()
            .take(limit)
            .map(|(uid, index)| IndexInfo::new(uid.clone(), index.primary_key.clone()))
            .collect();
        Ok(IndexList {
            results,
            offset: 0,
            limit,
            total: state.indexes.len(),
        })
    }

    async fn get_index(&self, uid: &str) -> Result<Option<IndexInfo>> {
        self.record(MockCall::GetIndex(uid.to_string()));
        Ok(self
            .state
            .lock()
            .indexes
            .get(uid)
            .map(|index| IndexInfo::new(uid, index.primary_key.clone())))
    }

    async fn create_index(&self, uid: &str, primary_key: Option<&str>) -> Result<TaskHandle> {
        self.record(MockCall::CreateIndex {
            uid: uid.to_string(),
            primary_key: primary_key.map(str::to_string),
        });
        let mut state = self.state.lock();
        let error = if state.fail_create_for.contains(uid) {
            Some(task_error("internal", format!("could not create `{uid}`")))
        } else if state.indexes.contains_key(uid) {
            Some(task_error(
                "index_already_exists",
                format!("Index `{uid}` already exists."),
            ))
        } else {
            state.indexes.insert(
                uid.to_string(),
                MockIndex {
                    primary_key: primary_key.map(str::to_string),
                    ..MockIndex::default()
                },
            );
            None
        };
        Ok(state.finish(uid, "indexCreation", error))
    }

    async fn delete_index(&self, uid: &str) -> Result<TaskHandle> {
        self.record(MockCall::DeleteIndex(uid.to_string()));
        let mut state = self.state.lock();
        let error = if state.fail_delete_for.contains(uid) {
            Some(task_error("internal", format!("could not delete `{uid}`")))
        } else if state.indexes.remove(uid).is_none() {
            Some(task_error("index_not_found", format!("Index `{uid}` not found.")))
        } else {
            None
        };
        Ok(state.finish(uid, "indexDeletion", error))
    }

    async fn update_primary_key(&self, uid: &str, primary_key: &str) -> Result<TaskHandle> {
        self.record(MockCall::UpdatePrimaryKey {
            uid: uid.to_string(),
            primary_key: primary_key.to_string(),
        });
        let mut state = self.state.lock();
        let error = match state.indexes.get_mut(uid) {
            None => Some(task_error("index_not_found", format!("Index `{uid}` not found."))),
            Some(index) if !index.documents.is_empty() => Some(task_error(
                "index_primary_key_already_exists",
                format!("Index `{uid}` already has a primary key."),
            )),
            Some(index) => {
                index.primary_key = Some(primary_key.to_string());
                None
            }
        };
        Ok(state.finish(uid, "indexUpdate", error))
    }

    async fn get_settings(&self, uid: &str) -> Result<Settings> {
        self.record(MockCall::GetSettings(uid.to_string()));
        let state = self.state.lock();
        if state.fail_settings_for.contains(uid) {
            return Err(MeiliError::ApiError {
                code: 500,
                method: "GET".into(),
                url: format!("/indexes/{uid}/settings"),
                message: r#"{"message":"internal error"}"#.into(),
            });
        }
        state
            .indexes
            .get(uid)
            .map(|index| Settings(index.settings.clone()))
            .ok_or_else(|| not_found(uid))
    }

    async fn update_settings(&self, uid: &str, settings: &Settings) -> Result<TaskHandle> {
        self.record(MockCall::UpdateSettings {
            uid: uid.to_string(),
            settings: settings.clone(),
        });
        let mut state = self.state.lock();
        if state.reject_bulk_settings {
            return Err(MeiliError::Validation {
                message: r#"{"message":"Unknown field in settings","code":"bad_request"}"#.into(),
            });
        }
        let Some(index) = state.indexes.get_mut(uid) else {
            return Err(not_found(uid));
        };
        for (key, value) in &settings.0 {
            if value.is_null() {
                index.settings.remove(key);
            } else {
                index.settings.insert(key.clone(), value.clone());
            }
        }
        Ok(state.finish(uid, "settingsUpdate", None))
    }

    async fn update_setting(
        &self,
        uid: &str,
        category: SettingCategory,
        value: &Value,
    ) -> Result<TaskHandle> {
        self.record(MockCall::UpdateSetting {
            uid: uid.to_string(),
            category,
        });
        let mut state = self.state.lock();
        if state.rejected_categories.contains(&category) {
            return Err(MeiliError::Validation {
                message: format!(r#"{{"message":"invalid value for {category}"}}"#),
            });
        }
        let Some(index) = state.indexes.get_mut(uid) else {
            return Err(not_found(uid));
        };
        index
            .settings
            .insert(category.key().to_string(), value.clone());
        Ok(state.finish(uid, "settingsUpdate", None))
    }

    async fn get_stats(&self, uid: &str) -> Result<IndexStats> {
        self.record(MockCall::GetStats(uid.to_string()));
        let state = self.state.lock();
        let index = state.indexes.get(uid).ok_or_else(|| not_found(uid))?;
        Ok(IndexStats {
            number_of_documents: index.documents.len() as u64,
            is_indexing: false,
            extra: Map::new(),
        })
    }

    async fn documents_page(&self, uid: &str, offset: usize, limit: usize) -> Result<Value> {
        self.record(MockCall::DocumentsPage {
            uid: uid.to_string(),
            offset,
            limit,
        });
        let state = self.state.lock();
        if state
            .fail_documents_page_at
            .as_ref()
            .is_some_and(|(fail_uid, fail_offset)| fail_uid == uid && *fail_offset == offset)
        {
            return Err(MeiliError::ApiError {
                code: 500,
                method: "GET".into(),
                url: format!("/indexes/{uid}/documents"),
                message: r#"{"message":"internal error"}"#.into(),
            });
        }
        let index = state.indexes.get(uid).ok_or_else(|| not_found(uid))?;
        let page: Vec<Value> = index
            .documents
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .map(Value::Object)
            .collect();
        Ok(match state.page_shape {
            PageShape::Bare => Value::Array(page),
            PageShape::Envelope => json!({
                "results": page,
                "offset": offset,
                "limit": limit,
                "total": index.documents.len(),
            }),
            PageShape::Invalid => json!({ "unexpected": true }),
        })
    }

    async fn add_documents(&self, uid: &str, documents: &[Document]) -> Result<TaskHandle> {
        self.record(MockCall::AddDocuments {
            uid: uid.to_string(),
            count: documents.len(),
        });
        let mut state = self.state.lock();
        let error = state.add_documents(uid, documents);
        Ok(state.finish(uid, "documentAdditionOrUpdate", error))
    }

    async fn get_task(&self, task_uid: u64) -> Result<Task> {
        self.record(MockCall::GetTask(task_uid));
        let mut state = self.state.lock();
        if state.fail_task_queries {
            return Err(MeiliError::ApiError {
                code: 503,
                method: "GET".into(),
                url: format!("/tasks/{task_uid}"),
                message: "service unavailable".into(),
            });
        }
        let (task, remaining) = state.tasks.get_mut(&task_uid).ok_or_else(|| MeiliError::NotFound {
            kind: "task".into(),
            key: task_uid.to_string(),
            message: format!("Task `{task_uid}` not found."),
        })?;
        if *remaining > 0 {
            *remaining -= 1;
            let mut pending = task.clone();
            pending.status = TaskStatus::Processing;
            pending.error = None;
            return Ok(pending);
        }
        Ok(task.clone())
    }
}
