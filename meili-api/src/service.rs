//! The search-service operations needed for backup and restore.
//!
//! Implemented by [`MeiliClient`] over HTTP and by
//! [`MockSearchService`](crate::mock::MockSearchService) in memory.

use serde_json::Value;

use crate::{
    Result,
    client::MeiliClient,
    documents::Document,
    indexes::{IndexInfo, IndexList, IndexStats},
    settings::{SettingCategory, Settings},
    tasks::{Task, TaskHandle},
};

/// Operations on a Meilisearch-compatible service.
///
/// Mutating operations return a [`TaskHandle`]; callers wait for the task with
/// [`TaskWaiter`](crate::tasks::TaskWaiter).
pub trait SearchService {
    /// `GET /indexes?limit`
    async fn list_indexes(&self, limit: usize) -> Result<IndexList>;

    /// `GET /indexes/{uid}`. Returns `None` if the index does not exist.
    async fn get_index(&self, uid: &str) -> Result<Option<IndexInfo>>;

    /// `POST /indexes`
    async fn create_index(&self, uid: &str, primary_key: Option<&str>) -> Result<TaskHandle>;

    /// `DELETE /indexes/{uid}`
    async fn delete_index(&self, uid: &str) -> Result<TaskHandle>;

    /// `PATCH /indexes/{uid}` with `{primaryKey}`
    async fn update_primary_key(&self, uid: &str, primary_key: &str) -> Result<TaskHandle>;

    /// `GET /indexes/{uid}/settings`
    async fn get_settings(&self, uid: &str) -> Result<Settings>;

    /// `PATCH /indexes/{uid}/settings`
    async fn update_settings(&self, uid: &str, settings: &Settings) -> Result<TaskHandle>;

    /// `PUT /indexes/{uid}/settings/{category}`
    async fn update_setting(
        &self,
        uid: &str,
        category: SettingCategory,
        value: &Value,
    ) -> Result<TaskHandle>;

    /// `GET /indexes/{uid}/stats`
    async fn get_stats(&self, uid: &str) -> Result<IndexStats>;

    /// `GET /indexes/{uid}/documents?offset&limit`. Returns the raw body; see
    /// [`normalize_page`](crate::documents::normalize_page).
    async fn documents_page(&self, uid: &str, offset: usize, limit: usize) -> Result<Value>;

    /// `POST /indexes/{uid}/documents`
    async fn add_documents(&self, uid: &str, documents: &[Document]) -> Result<TaskHandle>;

    /// `GET /tasks/{uid}`
    async fn get_task(&self, task_uid: u64) -> Result<Task>;
}

impl SearchService for MeiliClient {
    async fn list_indexes(&self, limit: usize) -> Result<IndexList> {
        Self::list_indexes(self, limit).await
    }

    async fn get_index(&self, uid: &str) -> Result<Option<IndexInfo>> {
        Self::get_index(self, uid).await
    }

    async fn create_index(&self, uid: &str, primary_key: Option<&str>) -> Result<TaskHandle> {
        Self::create_index(self, uid, primary_key).await
    }

    async fn delete_index(&self, uid: &str) -> Result<TaskHandle> {
        Self::delete_index(self, uid).await
    }

    async fn update_primary_key(&self, uid: &str, primary_key: &str) -> Result<TaskHandle> {
        Self::update_primary_key(self, uid, primary_key).await
    }

    async fn get_settings(&self, uid: &str) -> Result<Settings> {
        Self::get_settings(self, uid).await
    }

    async fn update_settings(&self, uid: &str, settings: &Settings) -> Result<TaskHandle> {
        Self::update_settings(self, uid, settings).await
    }

    async fn update_setting(
        &self,
        uid: &str,
        category: SettingCategory,
        value: &Value,
    ) -> Result<TaskHandle> {
        Self::update_setting(self, uid, category, value).await
    }

    async fn get_stats(&self, uid: &str) -> Result<IndexStats> {
        Self::get_stats(self, uid).await
    }

    async fn documents_page(&self, uid: &str, offset: usize, limit: usize) -> Result<Value> {
        Self::documents_page(self, uid, offset, limit).await
    }

    async fn add_documents(&self, uid: &str, documents: &[Document]) -> Result<TaskHandle> {
        Self::add_documents(self, uid, documents).await
    }

    async fn get_task(&self, task_uid: u64) -> Result<Task> {
        Self::get_task(self, task_uid).await
    }
}
