//! Document pagination.
//!
//! `GET /indexes/{uid}/documents?offset&limit` returns either a bare json
//! array or an envelope `{"results": [...], "offset", "limit", "total"}`
//! depending on the server version. [`normalize_page`] accepts both.
//!
//! [`DocumentPaginator`] walks an index page by page until a page comes back
//! empty or shorter than the page size.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{Result, config::DEFAULT_PAGE_SIZE, error::MeiliError, service::SearchService};

/// A document: field name to json value.
pub type Document = Map<String, Value>;

/// Converts a page response body into its documents.
///
/// Any body that is neither an array nor an object with a `results` array is
/// reported as [`MeiliError::UnexpectedShape`].
pub fn normalize_page(body: Value) -> Result<Vec<Document>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("results") {
            Some(Value::Array(items)) => items,
            _ => return Err(unexpected("object", &Value::Object(envelope))),
        },
        other => return Err(unexpected(json_kind(&other), &other)),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(doc) => Ok(doc),
            other => Err(unexpected(json_kind(&other), &other)),
        })
        .collect()
}

fn unexpected(found: &str, body: &Value) -> MeiliError {
    let mut sample = body.to_string();
    if sample.len() > 200 {
        let mut cut = 200;
        while !sample.is_char_boundary(cut) {
            cut -= 1;
        }
        sample.truncate(cut);
        sample.push_str("...");
    }
    MeiliError::UnexpectedShape {
        found: found.to_string(),
        sample,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Progress report for one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub offset: usize,
    pub limit: usize,
    /// Documents on this page
    pub received: usize,
    /// Documents fetched so far, including this page
    pub total_so_far: usize,
}

/// All documents of one index, plus the error that stopped pagination early, if any.
/// Documents fetched before an error are kept.
#[derive(Debug, Default)]
pub struct PaginationOutcome {
    pub documents: Vec<Document>,
    pub pages: usize,
    pub error: Option<MeiliError>,
}

impl PaginationOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetches every document of one index through offset/limit pages.
#[derive(Debug)]
pub struct DocumentPaginator<'a, S> {
    service: &'a S,
    index_uid: &'a str,
    page_size: usize,
}

impl<'a, S: SearchService> DocumentPaginator<'a, S> {
    pub fn new(service: &'a S, index_uid: &'a str) -> Self {
        Self {
            service,
            index_uid,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the page size. Zero is treated as 1.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetches pages until an empty or short page. `on_page` is called after each
    /// non-empty page. A failed request or malformed page stops pagination for this
    /// index only; the documents collected so far are returned with the error.
    pub async fn fetch_all<F>(&self, mut on_page: F) -> PaginationOutcome
    where
        F: FnMut(&PageProgress),
    {
        let mut outcome = PaginationOutcome::default();
        let mut offset = 0usize;
        loop {
            debug!(index = self.index_uid, offset, limit = self.page_size, "fetch page");
            let page = match self
                .service
                .documents_page(self.index_uid, offset, self.page_size)
                .await
                .and_then(normalize_page)
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(index = self.index_uid, offset, "pagination stopped: {err}");
                    outcome.error = Some(err);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            let received = page.len();
            outcome.documents.extend(page);
            outcome.pages += 1;
            on_page(&PageProgress {
                offset,
                limit: self.page_size,
                received,
                total_so_far: outcome.documents.len(),
            });
            if received < self.page_size {
                break;
            }
            offset += self.page_size;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_array_and_envelope_normalize_identically() {
        let docs = json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]);
        let bare = normalize_page(docs.clone()).unwrap();
        let envelope =
            normalize_page(json!({"results": docs, "offset": 0, "limit": 2, "total": 2})).unwrap();
        assert_eq!(bare, envelope);
        assert_eq!(bare.len(), 2);
    }

    #[test]
    fn object_without_results_is_rejected() {
        let err = normalize_page(json!({"message": "nope"})).unwrap_err();
        assert!(matches!(err, MeiliError::UnexpectedShape { ref found, .. } if found == "object"));
    }

    #[test]
    fn scalar_body_is_rejected() {
        let err = normalize_page(json!("hello")).unwrap_err();
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn non_object_items_are_rejected() {
        assert!(normalize_page(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn sample_is_truncated() {
        let long = "x".repeat(500);
        let err = normalize_page(json!(long)).unwrap_err();
        let MeiliError::UnexpectedShape { sample, .. } = err else {
            panic!("expected UnexpectedShape");
        };
        assert!(sample.len() <= 203);
        assert!(sample.ends_with("..."));
    }
}
