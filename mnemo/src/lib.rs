//! Unified multi-backend long-term memory coordinator for conversational agents.
//!
//! Four storage backends — a relational catalog, a flat vector index, a
//! property graph, and a TTL cache — are kept consistent by an atomic
//! coordinator that applies writes in a fixed order and rolls back via
//! compensation on required-backend failure. A universal index layer gives
//! every stored item, regardless of origin, a single composite id and a
//! common search surface.

pub mod backends;
pub mod chunker;
pub mod config;
pub mod coordinator;
pub mod embedder;
pub mod error;
pub mod router;
pub mod search;
pub mod types;
pub mod uil;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backends::cache::{CacheNamespace, CacheStore};
use backends::graph::{GraphStore, RelationshipDirection};
use backends::relational::{LinkDirection, RelationalStore};
use backends::vector::VectorIndex;
use chunker::Chunker;
use config::Config;
use coordinator::{AsyncOp, AtomicCoordinator, Step, TransactionReport};
use embedder::{Embedder, TestEmbedder};
use error::{Backend, MnemoError, MnemoResult};
use search::{SearchResponse, SearchService};
use types::{ChatMessage, ChatRole, StorageType};
use uil::UniversalIndexLayer;

fn boxed(fut: impl std::future::Future<Output = MnemoResult<()>> + Send + 'static) -> AsyncOp {
    Box::pin(fut)
}

/// Result of [`MemoryService::store`] (§6 `memory:store`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreResult {
    pub resource_id: i64,
    pub chunks_created: usize,
    pub affected_backends: Vec<String>,
    pub fallback_reasons: HashMap<String, String>,
}

/// Result of [`MemoryService::link_resources`] (§6 `context:link_resources`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct LinkResult {
    pub link_id: i64,
    pub affected_backends: Vec<String>,
    pub fallback_reasons: HashMap<String, String>,
}

pub struct MemoryService {
    config: Config,
    rs: Arc<RelationalStore>,
    vi: Arc<VectorIndex>,
    gs: Arc<GraphStore>,
    cs: Arc<CacheStore>,
    uil: Arc<UniversalIndexLayer>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    coordinator: AtomicCoordinator,
    search: SearchService,
    _vector_flusher: tokio::task::JoinHandle<()>,
}

impl MemoryService {
    /// Opens every backend per `config` and wires the ambient services
    /// (chunker, coordinator, search) around them.
    pub async fn new(config: Config) -> MnemoResult<Self> {
        let rs = Arc::new(RelationalStore::open(&config.database.db_path).await?);
        let vi = Arc::new(VectorIndex::open(&config.database.vector_index_path, config.database.vector_dimension).await?);
        let gs = Arc::new(GraphStore::open(&config.database.db_path).await?);
        let cs = Arc::new(CacheStore::connect(&config.redis).await);

        let uil_sidecar = format!("{}.universal.json", config.database.vector_index_path);
        let uil = Arc::new(UniversalIndexLayer::open(vi.clone(), uil_sidecar).await?);

        let embedder: Arc<dyn Embedder> = Arc::new(TestEmbedder::new(config.database.vector_dimension));
        let chunker = Chunker::new(config.database.max_chunk_size, config.database.chunk_overlap);
        let coordinator = AtomicCoordinator::new();
        let search = SearchService::new(uil.clone(), gs.clone(), embedder.clone());

        let vector_flusher = vi.clone().spawn_flusher(Duration::from_secs(30));

        Ok(Self {
            config,
            rs,
            vi,
            gs,
            cs,
            uil,
            embedder,
            chunker,
            coordinator,
            search,
            _vector_flusher: vector_flusher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn finish(report: TransactionReport) -> (Vec<String>, HashMap<String, String>) {
        let affected = report.affected_backends.iter().map(|b| b.to_string()).collect();
        let fallback_reasons = report.fallback_reasons.iter().map(|(b, r)| (b.to_string(), r.clone())).collect();
        (affected, fallback_reasons)
    }

    /// `memory:store` — chunks, embeds, and writes `content` across every
    /// backend [`router::write_targets`] prescribes for `resource_type`.
    #[tracing::instrument(skip(self, content, metadata))]
    pub async fn store(
        &self,
        file_name: &str,
        content: &str,
        resource_type: StorageType,
        metadata: Option<serde_json::Value>,
    ) -> MnemoResult<StoreResult> {
        if content.is_empty() {
            return Err(MnemoError::invalid_input("content must not be empty"));
        }

        let resource = self.rs.create_resource(file_name, resource_type).await?;
        let resource_id = resource.resource_id;
        let metadata = metadata.unwrap_or(serde_json::Value::Null);

        let pieces = self.chunker.split(content);
        let mut prepared = Vec::with_capacity(pieces.len());
        for text in pieces {
            let vector_id = self.rs.allocate_vector_id().await?;
            let embedding = self.embedder.embed(&text).await?;
            prepared.push((vector_id, text, embedding));
        }

        let chunk_rows: Vec<(String, i64)> = prepared.iter().map(|(vid, text, _)| (text.clone(), *vid)).collect();
        self.rs.append_chunks(resource_id, chunk_rows).await?;

        let targets = router::write_targets(resource_type);
        let mut steps = Vec::new();

        // UIL indexes every storage_type (§4.8), independent of whether this
        // storage_type is also a direct VI-retrieval target.
        if router::uil_indexed(resource_type) {
            let uil = self.uil.clone();
            let prepared_clone = prepared.clone();
            let metadata_clone = metadata.clone();
            steps.push(
                Step::new(Backend::Uil, "store_universal_vector", false, move || {
                    boxed(async move {
                        for (vector_id, text, embedding) in prepared_clone {
                            uil.store_universal_vector(
                                vector_id,
                                resource_type,
                                "rs",
                                &resource_id.to_string(),
                                text,
                                embedding,
                                metadata_clone.clone(),
                            )
                            .await?;
                        }
                        Ok(())
                    })
                })
                .with_compensation({
                    let uil = self.uil.clone();
                    let vector_ids: Vec<i64> = prepared.iter().map(|(vid, _, _)| *vid).collect();
                    move || {
                        boxed(async move {
                            for vector_id in vector_ids {
                                uil.delete_by_vector_id(vector_id).await.ok();
                            }
                            Ok(())
                        })
                    }
                }),
            );
        }

        if targets.contains(&Backend::Gs) {
            let gs = self.gs.clone();
            let properties = serde_json::json!({ "file_name": file_name, "resource_type": resource_type.to_string() });
            steps.push(
                Step::new(Backend::Gs, "upsert_document_node", false, move || {
                    boxed(async move { gs.upsert_document_node(resource_id, properties).await })
                })
                .with_compensation({
                    let gs = self.gs.clone();
                    move || boxed(async move { gs.delete_document_node(resource_id).await })
                }),
            );
        }

        if targets.contains(&Backend::Cs) {
            let cs = self.cs.clone();
            let preview = content.chars().take(280).collect::<String>();
            let ttl = self.config.performance.cache_ttl_seconds;
            steps.push(
                Step::new(Backend::Cs, "cache_document", false, move || {
                    boxed(async move {
                        cs.cache(CacheNamespace::Doc, &resource_id.to_string(), &preview, serde_json::Value::Null, Some(ttl))
                            .await
                    })
                })
                .with_compensation({
                    let cs = self.cs.clone();
                    move || boxed(async move { cs.delete(CacheNamespace::Doc, &resource_id.to_string()).await })
                }),
            );
        }

        let report = self.coordinator.run(steps).await;
        let (mut affected, mut fallback_reasons) = Self::finish(report);
        affected.insert(0, Backend::Rs.to_string());

        // VI and UIL share one physical vector write; SR's VI column
        // additionally marks this storage_type as directly VI-routed for
        // retrieval (§4.8), so report "VI" alongside "UIL" whenever that
        // write committed, and a fallback reason when it didn't.
        if targets.contains(&Backend::Vi) {
            if affected.iter().any(|b| b == "UIL") {
                affected.push(Backend::Vi.to_string());
            } else if let Some(reason) = fallback_reasons.get("UIL").cloned() {
                fallback_reasons.insert(Backend::Vi.to_string(), reason);
            }
        }

        Ok(StoreResult {
            resource_id,
            chunks_created: prepared.len(),
            affected_backends: affected,
            fallback_reasons,
        })
    }

    /// `memory:retrieve` — semantic search, optionally scoped to a
    /// conversation's context-linked chunks (§4.2 conversation filter).
    pub async fn retrieve(
        &self,
        query: &str,
        conversation_id: Option<&str>,
        top_k: usize,
        storage_types: Option<&[StorageType]>,
    ) -> MnemoResult<SearchResponse> {
        if top_k == 0 {
            return Ok(SearchResponse {
                results: Vec::new(),
                facets: search::Facets::default(),
                duration_ms: 0,
            });
        }

        if let Some(conversation_id) = conversation_id {
            let allowed = self.rs.vector_ids_for_conversation(conversation_id).await?;
            let allowed: std::collections::HashSet<i64> = allowed.into_iter().collect();
            if !allowed.is_empty() {
                let embedding = self.embedder.embed(query).await?;
                let mut hits = self.uil.search_scoped_to_vector_ids(&embedding, top_k, &allowed).await;
                if let Some(types) = storage_types {
                    hits.retain(|h| types.contains(&h.document.storage_type));
                }
                let started = std::time::Instant::now();
                let results: Vec<search::SearchResultItem> = hits
                    .into_iter()
                    .map(|hit| search::SearchResultItem {
                        universal_id: hit.document.universal_id,
                        storage_type: hit.document.storage_type,
                        source_database: hit.document.source_database,
                        score: hit.score,
                        content_preview: hit.document.content_preview,
                        indexed_at: hit.document.indexed_at,
                        relationships: None,
                        deep_relationships: None,
                    })
                    .collect();
                return Ok(SearchResponse {
                    facets: search::compute_facets(&results),
                    results,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        match storage_types {
            Some(types) => self.search.semantic_search_filtered(query, Some(types), None, top_k).await,
            None => self.search.semantic_search_all(query, top_k, false).await,
        }
    }

    /// `memory:list` — same machinery as `retrieve`, conventionally called
    /// with a wildcard query and a resource-type filter.
    pub async fn list(&self, query: &str, resource_type: Option<StorageType>, top_k: usize) -> MnemoResult<SearchResponse> {
        let filter = resource_type.map(|t| [t]);
        self.search
            .semantic_search_filtered(query, filter.as_ref().map(|f| f.as_slice()), None, top_k)
            .await
    }

    /// `memory:ask_with_context` — retrieves context, then records which
    /// chunks backed the answer as context links off a synthesized message.
    pub async fn ask_with_context(&self, query: &str, conversation_id: &str, top_k: usize) -> MnemoResult<SearchResponse> {
        let response = self.retrieve(query, Some(conversation_id), top_k, None).await?;
        let message = self
            .rs
            .log_chat_message(conversation_id, ChatRole::User, query, None, None, None)
            .await?;

        let mut chunk_ids = Vec::new();
        for item in &response.results {
            if let Some((_, _, original_id)) = types::UniversalDocument::parse_universal_id(&item.universal_id) {
                if let Ok(resource_id) = original_id.parse::<i64>() {
                    let chunks = self.rs.get_chunks_by_resource(resource_id).await?;
                    chunk_ids.extend(chunks.into_iter().map(|c| c.chunk_id));
                }
            }
        }
        if !chunk_ids.is_empty() {
            self.rs.store_context_links(message.message_id, chunk_ids).await?;
        }

        Ok(response)
    }

    pub async fn chat_log(
        &self,
        content: &str,
        conversation_id: &str,
        role: ChatRole,
        agent_name: Option<&str>,
        source_tool: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> MnemoResult<ChatMessage> {
        let message = self
            .rs
            .log_chat_message(conversation_id, role, content, agent_name, source_tool, metadata)
            .await?;

        if self.config.redis.enabled {
            let preview = content.chars().take(280).collect::<String>();
            let _ = self
                .cs
                .cache(CacheNamespace::Doc, &message.message_id.to_string(), &preview, serde_json::Value::Null, None)
                .await;
        }

        Ok(message)
    }

    pub async fn chat_get_by_tool(&self, tool: &str, limit: usize) -> MnemoResult<Vec<ChatMessage>> {
        self.rs.get_chat_by_tool(tool, limit).await
    }

    /// `context:link_resources` — runs RS then GS through the coordinator,
    /// reporting GS as a fallback reason rather than failing the call when
    /// the graph store is unavailable (§8 scenario 3).
    #[tracing::instrument(skip(self, metadata))]
    pub async fn link_resources(
        &self,
        source_id: i64,
        target_id: i64,
        relation: &str,
        weight: f64,
        metadata: Option<&str>,
    ) -> MnemoResult<LinkResult> {
        let metadata = metadata.unwrap_or("{}").to_string();
        let link = self.rs.create_link(source_id, target_id, relation, weight, &metadata).await?;

        let gs = self.gs.clone();
        let relation_owned = relation.to_string();
        let metadata_for_gs = metadata.clone();
        let created_at = link.created_at;
        let step = Step::new(Backend::Gs, "create_relationship", false, move || {
            boxed(async move {
                gs.upsert_document_node(source_id, serde_json::json!({ "resource_id": source_id })).await?;
                gs.upsert_document_node(target_id, serde_json::json!({ "resource_id": target_id })).await?;
                gs.create_relationship(source_id, target_id, &relation_owned, weight, &metadata_for_gs, created_at)
                    .await
            })
        });

        let report = self.coordinator.run(vec![step]).await;
        let (mut affected, fallback_reasons) = Self::finish(report);
        affected.insert(0, Backend::Rs.to_string());

        Ok(LinkResult {
            link_id: link.link_id,
            affected_backends: affected,
            fallback_reasons,
        })
    }

    /// `context:auto_link_documents` — pairwise cosine similarity over the
    /// supplied (or all-known) document embeddings, linking above
    /// `similarity_threshold` up to `max_links_per_document` per document.
    pub async fn auto_link_documents(
        &self,
        documents: &[i64],
        similarity_threshold: f32,
        max_links_per_document: usize,
    ) -> MnemoResult<Vec<LinkResult>> {
        let mut results = Vec::new();
        for &source in documents {
            let chunks = self.rs.get_chunks_by_resource(source).await?;
            let Some(first_chunk) = chunks.first() else { continue };
            let anchor_text = first_chunk.chunk_text.clone();
            let embedding = self.embedder.embed(&anchor_text).await?;

            let hits = self.vi.search(&embedding, max_links_per_document + documents.len());
            let mut linked = 0;
            for hit in hits.0 {
                if linked >= max_links_per_document {
                    break;
                }
                if hit.score < similarity_threshold {
                    continue;
                }
                let Some(chunk) = self.rs.get_chunks_by_vector_ids(vec![hit.vector_id]).await?.into_iter().next() else {
                    continue;
                };
                if chunk.resource_id == source || !documents.contains(&chunk.resource_id) {
                    continue;
                }
                let result = self
                    .link_resources(source, chunk.resource_id, "semantic_similarity", hit.score as f64, None)
                    .await?;
                results.push(result);
                linked += 1;
            }
        }
        Ok(results)
    }

    /// `context:query_graph` — relationships touching `resource_id`,
    /// optionally narrowed to one relationship type.
    pub async fn query_graph(&self, resource_id: i64, relation_type: Option<&str>) -> MnemoResult<Vec<backends::graph::Relationship>> {
        let rels = self.gs.get_relationships(resource_id, RelationshipDirection::Both).await?;
        Ok(match relation_type {
            Some(t) => rels.into_iter().filter(|r| r.link_type == t).collect(),
            None => rels,
        })
    }

    /// `search:universal`.
    pub async fn search_universal(
        &self,
        query: &str,
        top_k: usize,
        storage_types: Option<&[StorageType]>,
        include_relationships: bool,
    ) -> MnemoResult<SearchResponse> {
        match storage_types {
            Some(types) => self.search.semantic_search_filtered(query, Some(types), None, top_k).await,
            None => self.search.semantic_search_all(query, top_k, include_relationships).await,
        }
    }

    /// Deletes a resource and everything it touches, CS -> GS -> VI/UIL -> RS
    /// (§4.9 delete ordering), tolerating failures of any non-RS backend.
    #[tracing::instrument(skip(self))]
    pub async fn delete_resource(&self, resource_id: i64, resource_type: StorageType) -> MnemoResult<()> {
        let chunks = self.rs.get_chunks_by_resource(resource_id).await?;
        let vector_ids: Vec<i64> = chunks.iter().map(|c| c.vector_id).collect();

        for backend in router::delete_order(resource_type) {
            match backend {
                Backend::Cs => {
                    let _ = self.cs.delete(CacheNamespace::Doc, &resource_id.to_string()).await;
                }
                Backend::Gs => {
                    let _ = self.gs.delete_document_node(resource_id).await;
                }
                // UIL is indexed for every storage_type (handled
                // unconditionally below) and RS is always last; `write_targets`
                // never yields `Uil` directly.
                Backend::Vi | Backend::Rs | Backend::Uil => {}
            }
        }

        if router::uil_indexed(resource_type) {
            for vector_id in &vector_ids {
                let _ = self.uil.delete_by_vector_id(*vector_id).await;
            }
        }

        self.rs.delete_resource(resource_id).await
    }

    pub async fn list_links(&self, resource_id: i64, direction: LinkDirection) -> MnemoResult<Vec<types::Link>> {
        self.rs.list_links(resource_id, direction).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    async fn store_then_retrieve_finds_the_document_first() {
        let (service, _dir) = service().await;
        let result = service
            .store(
                "ml_intro.md",
                "Machine learning is a subset of artificial intelligence.",
                StorageType::Document,
                None,
            )
            .await
            .unwrap();
        assert!(result.chunks_created >= 1);
        assert!(result.affected_backends.contains(&"RS".to_string()));
        assert!(result.affected_backends.contains(&"VI".to_string()));

        let response = service.retrieve("artificial intelligence", None, 3, None).await.unwrap();
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].universal_id, format!("document:rs:{}", result.resource_id));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let (service, _dir) = service().await;
        let err = service.store("empty.md", "", StorageType::Document, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn link_resources_creates_matching_rs_and_gs_state() {
        let (service, _dir) = service().await;
        let a = service.store("a.md", "Document A content.", StorageType::Document, None).await.unwrap();
        let b = service.store("b.md", "Document B content.", StorageType::Document, None).await.unwrap();

        let result = service
            .link_resources(a.resource_id, b.resource_id, "semantic_similarity_test", 0.85, Some(r#"{"k":"v"}"#))
            .await
            .unwrap();
        assert!(result.affected_backends.contains(&"GS".to_string()));

        let rels = service.query_graph(a.resource_id, Some("semantic_similarity_test")).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].weight, 0.85);
        assert_eq!(rels[0].metadata, r#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn delete_resource_removes_chunks_and_links() {
        let (service, _dir) = service().await;
        let a = service.store("a.md", "Document A content.", StorageType::Document, None).await.unwrap();
        let b = service.store("b.md", "Document B content.", StorageType::Document, None).await.unwrap();
        service.link_resources(a.resource_id, b.resource_id, "RELATED", 1.0, None).await.unwrap();

        service.delete_resource(a.resource_id, StorageType::Document).await.unwrap();

        let links = service.list_links(b.resource_id, LinkDirection::Incoming).await.unwrap();
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty_not_error() {
        let (service, _dir) = service().await;
        let response = service.retrieve("anything", None, 0, None).await.unwrap();
        assert!(response.results.is_empty());
    }
}
