//! Document pagination against the in-memory service.

use meili::{
    mock::{MockCall, MockSearchService, PageShape},
    prelude::*,
};
use serde_json::{Value, json};

fn docs(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!({ "id": i, "title": format!("doc {i}") }))
        .collect()
}

fn page_requests(mock: &MockSearchService) -> Vec<(usize, usize)> {
    mock.calls()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::DocumentsPage { offset, limit, .. } => Some((offset, limit)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
#[test_log::test]
async fn test_fetch_all_walks_every_page() -> anyhow::Result<()> {
    let mock = MockSearchService::new().with_index("alpha", Some("id"), json!({}), docs(2500));

    let mut progress = Vec::new();
    let outcome = DocumentPaginator::new(&mock, "alpha")
        .fetch_all(|page| progress.push(*page))
        .await;

    assert!(outcome.is_complete());
    assert_eq!(outcome.documents.len(), 2500);
    assert_eq!(outcome.pages, 3);
    assert_eq!(page_requests(&mock), vec![(0, 1000), (1000, 1000), (2000, 1000)]);
    assert_eq!(progress.last().map(|p| p.total_so_far), Some(2500));
    assert_eq!(progress.last().map(|p| p.received), Some(500));
    Ok(())
}

#[tokio::test]
#[test_log::test]
async fn test_exact_multiple_needs_one_empty_page() -> anyhow::Result<()> {
    let mock = MockSearchService::new().with_index("alpha", Some("id"), json!({}), docs(20));

    let outcome = DocumentPaginator::new(&mock, "alpha")
        .page_size(10)
        .fetch_all(|_| {})
        .await;

    assert_eq!(outcome.documents.len(), 20);
    assert_eq!(outcome.pages, 2);
    assert_eq!(page_requests(&mock), vec![(0, 10), (10, 10), (20, 10)]);
    Ok(())
}

#[tokio::test]
#[test_log::test]
async fn test_empty_index_makes_one_request() -> anyhow::Result<()> {
    let mock = MockSearchService::new().with_index("empty", None, json!({}), Vec::new());

    let outcome = DocumentPaginator::new(&mock, "empty").fetch_all(|_| {}).await;

    assert!(outcome.is_complete());
    assert!(outcome.documents.is_empty());
    assert_eq!(outcome.pages, 0);
    assert_eq!(page_requests(&mock).len(), 1);
    Ok(())
}

#[tokio::test]
#[test_log::test]
async fn test_bare_and_envelope_pages_match() -> anyhow::Result<()> {
    let bare = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({}), docs(15))
        .page_shape(PageShape::Bare);
    let envelope = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({}), docs(15))
        .page_shape(PageShape::Envelope);

    let from_bare = DocumentPaginator::new(&bare, "alpha")
        .page_size(4)
        .fetch_all(|_| {})
        .await;
    let from_envelope = DocumentPaginator::new(&envelope, "alpha")
        .page_size(4)
        .fetch_all(|_| {})
        .await;

    assert_eq!(from_bare.documents, from_envelope.documents);
    assert_eq!(from_bare.documents.len(), 15);
    Ok(())
}

#[tokio::test]
#[test_log::test]
async fn test_unexpected_shape_stops_pagination() -> anyhow::Result<()> {
    let mock = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({}), docs(5))
        .page_shape(PageShape::Invalid);

    let outcome = DocumentPaginator::new(&mock, "alpha").fetch_all(|_| {}).await;

    assert!(!outcome.is_complete());
    assert!(outcome.documents.is_empty());
    assert!(matches!(outcome.error, Some(MeiliError::UnexpectedShape { .. })));
    Ok(())
}

#[tokio::test]
#[test_log::test]
async fn test_failed_page_keeps_earlier_documents() -> anyhow::Result<()> {
    let mock = MockSearchService::new()
        .with_index("alpha", Some("id"), json!({}), docs(30))
        .fail_documents_page_at("alpha", 20);

    let outcome = DocumentPaginator::new(&mock, "alpha")
        .page_size(10)
        .fetch_all(|_| {})
        .await;

    assert_eq!(outcome.documents.len(), 20);
    assert_eq!(outcome.pages, 2);
    assert!(matches!(
        outcome.error,
        Some(MeiliError::ApiError { code: 500, .. })
    ));
    Ok(())
}
