//! End-to-end scenarios exercising [`mnemo::MemoryService`] through its
//! public surface only, one file per component is covered by its own
//! in-module unit tests.

use mnemo::config::Config;
use mnemo::types::StorageType;
use mnemo::MemoryService;

async fn service() -> (MemoryService, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database.db_path = dir.path().join("mnemo.db").to_string_lossy().into_owned();
    config.database.vector_index_path = dir.path().join("mnemo.idx").to_string_lossy().into_owned();
    config.database.vector_dimension = 16;
    config.redis.enabled = false;
    let service = MemoryService::new(config).await.unwrap();
    (service, dir)
}

#[tokio::test]
async fn store_and_retrieve_returns_the_document_first() {
    let (service, _dir) = service().await;

    let stored = service
        .store(
            "ml_intro.md",
            "Machine learning is a subset of artificial intelligence.",
            StorageType::Document,
            None,
        )
        .await
        .unwrap();
    assert!(stored.chunks_created >= 1);
    assert!(stored.affected_backends.contains(&"RS".to_string()));
    assert!(stored.affected_backends.contains(&"VI".to_string()));

    let response = service.retrieve("artificial intelligence", None, 3, None).await.unwrap();
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].universal_id, format!("document:rs:{}", stored.resource_id));
}

#[tokio::test]
async fn link_resources_writes_matching_rs_row_and_gs_edge() {
    let (service, _dir) = service().await;
    let a = service.store("a.md", "Document A content about routing.", StorageType::Document, None).await.unwrap();
    let b = service.store("b.md", "Document B content about routing.", StorageType::Document, None).await.unwrap();

    let link = service
        .link_resources(a.resource_id, b.resource_id, "semantic_similarity_test", 0.85, Some(r#"{"k":"v"}"#))
        .await
        .unwrap();
    assert!(link.affected_backends.contains(&"GS".to_string()));
    assert!(link.fallback_reasons.is_empty());

    let rels = service.query_graph(a.resource_id, Some("semantic_similarity_test")).await.unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].target_resource_id, b.resource_id);
    assert_eq!(rels[0].weight, 0.85);
    assert_eq!(rels[0].metadata, r#"{"k":"v"}"#);

    let incoming = service.list_links(b.resource_id, mnemo::backends::relational::LinkDirection::Incoming).await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].link_type, "semantic_similarity_test");
}

#[tokio::test]
async fn universal_search_respects_storage_type_filter() {
    let (service, _dir) = service().await;
    service.store("note.md", "A quick note about onboarding.", StorageType::Note, None).await.unwrap();
    service.store("task.md", "Follow up with onboarding checklist.", StorageType::Task, None).await.unwrap();

    let response = service
        .search_universal("onboarding", 10, Some(&[StorageType::Note]), false)
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.storage_type == StorageType::Note));
    assert_eq!(response.facets.storage_type.len(), 1);
    assert!(response.facets.storage_type.contains_key("note"));
}

/// A Task never routes to VI in `write_targets`, but §4.8's UIL column is
/// checked for every storage_type — universal search must still surface it.
#[tokio::test]
async fn universal_search_reaches_storage_types_with_no_vi_routing() {
    let (service, _dir) = service().await;
    let stored = service
        .store("todo.md", "Renew the quarterly compliance certificate.", StorageType::Task, None)
        .await
        .unwrap();
    assert!(stored.affected_backends.contains(&"UIL".to_string()));
    assert!(!stored.affected_backends.contains(&"VI".to_string()));

    let response = service
        .search_universal("quarterly compliance certificate", 10, None, false)
        .await
        .unwrap();
    assert!(response.results.iter().any(|r| r.universal_id == format!("task:rs:{}", stored.resource_id)));
}

#[tokio::test]
async fn delete_resource_cascades_chunks_and_links() {
    let (service, _dir) = service().await;
    let a = service.store("a.md", "Document A content.", StorageType::Document, None).await.unwrap();
    let b = service.store("b.md", "Document B content.", StorageType::Document, None).await.unwrap();
    service.link_resources(a.resource_id, b.resource_id, "RELATED", 1.0, None).await.unwrap();

    service.delete_resource(a.resource_id, StorageType::Document).await.unwrap();

    let remaining = service.list_links(b.resource_id, mnemo::backends::relational::LinkDirection::Incoming).await.unwrap();
    assert!(remaining.is_empty());

    let after_delete = service.retrieve("Document A content", None, 5, None).await.unwrap();
    assert!(after_delete.results.iter().all(|r| !r.universal_id.ends_with(&format!(":{}", a.resource_id))));
}

#[tokio::test]
async fn ask_with_context_links_the_contributing_chunks() {
    let (service, _dir) = service().await;
    service
        .store("guide.md", "Rotate credentials every ninety days per the security policy.", StorageType::Document, None)
        .await
        .unwrap();

    let response = service.ask_with_context("credential rotation policy", "conv-1", 3).await.unwrap();
    assert!(!response.results.is_empty());
}
