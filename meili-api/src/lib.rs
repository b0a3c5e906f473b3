/*
 * meili - async Meilisearch client for index export and import
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
//! # Meilisearch client for backup and restore
//!
//! A small, typed client for the parts of the Meilisearch HTTP API needed to
//! copy every index of one instance into another.
//!
//! ## Features
//!
//! - index listing, creation, deletion and primary-key updates
//! - offset/limit document pagination that accepts both bare-array and
//!   `{results: [...]}` page bodies
//! - bulk settings updates with per-category fallback
//! - task polling with a pluggable wait strategy
//! - http middleware with retry logic for idempotent requests
//! - an in-memory service ([`mock::MockSearchService`]) for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meili::prelude::*;
//! # async fn example() -> Result<(), MeiliError> {
//! let config = ClientConfig::default()
//!     .base_url("http://127.0.0.1:7700")
//!     .api_key("masterKey");
//! let client = MeiliClient::with_config(config)?;
//!
//! let indexes = client.list_indexes(1000).await?;
//! for index in &indexes.results {
//!     let paginator = DocumentPaginator::new(&client, &index.uid);
//!     let pages = paginator.fetch_all(|_| {}).await;
//!     println!("{}: {} documents", index.uid, pages.documents.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Orchestration code should be written against the [`service::SearchService`]
//! trait rather than [`client::MeiliClient`] so it can be exercised without a
//! running server.
#![allow(clippy::missing_errors_doc)] // pedantic
#![allow(clippy::missing_const_for_fn)] //  nursery function
#![allow(clippy::must_use_candidate)] // pedantic
#![allow(async_fn_in_trait)]
#![warn(clippy::default_trait_access)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::implicit_clone)]
#![warn(clippy::literal_string_with_formatting_args)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::needless_raw_strings)]
#![warn(clippy::option_if_let_else)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::ref_option)]
#![warn(clippy::redundant_closure)]
#![warn(clippy::uninlined_format_args)]
#![warn(clippy::unnecessary_wraps)]
#![warn(clippy::unused_async)]

pub mod auth;
pub mod client;
pub mod documents;
pub mod error;
mod http_client;
pub mod indexes;
#[doc(hidden)]
pub mod mock;
pub mod service;
pub mod settings;
pub mod tasks;

/// Result type alias using `MeiliError` as the default error.
pub type Result<T, E = crate::error::MeiliError> = std::result::Result<T, E>;

/// Prelude module - import the common types with `use meili::prelude::*;`
pub mod prelude {
    pub use super::MEILI_DEFAULT_URL;
    pub use crate::error::*;
    pub use crate::{
        auth::ApiKey,
        client::{ClientConfig, MeiliClient},
        documents::{
            Document, DocumentPaginator, PageProgress, PaginationOutcome, normalize_page,
        },
        http_client::HttpMetricsSnapshot,
        indexes::{IndexInfo, IndexList, IndexStats},
        service::SearchService,
        settings::{
            CategoryOutcome, EmptySettingPolicy, SettingCategory, Settings, SettingsReport,
            SettingsTransfer,
        },
        tasks::{
            FixedDelay, Task, TaskError, TaskHandle, TaskOutcome, TaskStatus, TaskWaiter,
            WaitStrategy, WriteOutcome,
        },
    };
}

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default endpoint of a local Meilisearch instance
pub const MEILI_DEFAULT_URL: &str = "http://127.0.0.1:7700";

pub(crate) mod config {
    /// Environment variable for default endpoint URL
    pub const MEILI_URL_ENV: &str = "MEILI_URL";

    /// Environment variable for the api key
    pub const MEILI_API_KEY_ENV: &str = "MEILI_API_KEY";

    /// Max retries for HTTP client
    pub const MAX_RETRIES: u32 = 3;

    /// Documents requested per page while paginating an index
    pub const DEFAULT_PAGE_SIZE: usize = 1000;

    /// Interval between task status queries
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
}
