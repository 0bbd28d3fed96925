//! Universal Semantic Search (C11, §4.10).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::backends::graph::{GraphStore, RelationshipDirection};
use crate::embedder::Embedder;
use crate::error::MnemoResult;
use crate::types::StorageType;
use crate::uil::UniversalIndexLayer;

const MAX_RELATIONSHIP_DEPTH: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipSummary {
    pub target_resource_id: i64,
    pub link_type: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphPathStep {
    pub resource_id: i64,
    pub link_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub universal_id: String,
    pub storage_type: StorageType,
    pub source_database: String,
    pub score: f32,
    pub content_preview: String,
    pub indexed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<RelationshipSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_relationships: Option<Vec<Vec<GraphPathStep>>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Facets {
    pub storage_type: HashMap<String, usize>,
    pub source_database: HashMap<String, usize>,
    pub time_bucket: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub facets: Facets,
    pub duration_ms: u64,
}

fn storage_type_priority(storage_type: StorageType) -> u8 {
    match storage_type {
        StorageType::Document => 0,
        StorageType::Code => 1,
        StorageType::Note => 2,
        StorageType::ChainOfThought => 3,
        StorageType::Blueprint => 4,
        StorageType::Pattern => 5,
        StorageType::Task => 6,
        StorageType::Chat => 7,
        StorageType::CacheEntry => 8,
    }
}

fn time_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

pub fn compute_facets(results: &[SearchResultItem]) -> Facets {
    let mut facets = Facets::default();
    for item in results {
        *facets.storage_type.entry(item.storage_type.to_string()).or_insert(0) += 1;
        *facets.source_database.entry(item.source_database.clone()).or_insert(0) += 1;
        *facets.time_bucket.entry(time_bucket(item.indexed_at)).or_insert(0) += 1;
    }
    facets
}

fn sort_results(results: &mut [SearchResultItem]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| storage_type_priority(a.storage_type).cmp(&storage_type_priority(b.storage_type)))
            .then_with(|| b.indexed_at.cmp(&a.indexed_at))
    });
}

pub struct SearchService {
    uil: Arc<UniversalIndexLayer>,
    graph: Arc<GraphStore>,
    embedder: Arc<dyn Embedder>,
}

impl SearchService {
    pub fn new(uil: Arc<UniversalIndexLayer>, graph: Arc<GraphStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { uil, graph, embedder }
    }

    async fn relationship_summaries(&self, resource_id: &str) -> Option<Vec<RelationshipSummary>> {
        let resource_id: i64 = resource_id.parse().ok()?;
        let rels = self
            .graph
            .get_relationships(resource_id, RelationshipDirection::Outgoing)
            .await
            .ok()?;
        Some(
            rels.into_iter()
                .map(|r| RelationshipSummary {
                    target_resource_id: r.target_resource_id,
                    link_type: r.link_type,
                    weight: r.weight,
                })
                .collect(),
        )
    }

    /// BFS over GS up to `depth` (capped at [`MAX_RELATIONSHIP_DEPTH`]),
    /// returning every simple path found from `resource_id`.
    async fn deep_relationships(&self, resource_id: &str, depth: usize) -> Option<Vec<Vec<GraphPathStep>>> {
        let start: i64 = resource_id.parse().ok()?;
        let depth = depth.min(MAX_RELATIONSHIP_DEPTH);
        let mut paths = Vec::new();
        let mut frontier: Vec<(i64, Vec<GraphPathStep>, HashSet<i64>)> = vec![(start, Vec::new(), HashSet::from([start]))];

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for (node, path, visited) in frontier {
                let Ok(rels) = self.graph.get_relationships(node, RelationshipDirection::Outgoing).await else {
                    continue;
                };
                for rel in rels {
                    if visited.contains(&rel.target_resource_id) {
                        continue;
                    }
                    let mut new_path = path.clone();
                    new_path.push(GraphPathStep {
                        resource_id: rel.target_resource_id,
                        link_type: rel.link_type.clone(),
                    });
                    paths.push(new_path.clone());

                    let mut new_visited = visited.clone();
                    new_visited.insert(rel.target_resource_id);
                    next_frontier.push((rel.target_resource_id, new_path, new_visited));
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Some(paths)
    }

    async fn to_result_item(&self, hit: crate::uil::UniversalHit, include_relationships: bool) -> SearchResultItem {
        let (_, _, original_id) = crate::types::UniversalDocument::parse_universal_id(&hit.document.universal_id)
            .unwrap_or((hit.document.storage_type, hit.document.source_database.clone(), String::new()));

        let relationships = if include_relationships {
            self.relationship_summaries(&original_id).await
        } else {
            None
        };

        SearchResultItem {
            universal_id: hit.document.universal_id,
            storage_type: hit.document.storage_type,
            source_database: hit.document.source_database,
            score: hit.score,
            content_preview: hit.document.content_preview,
            indexed_at: hit.document.indexed_at,
            relationships,
            deep_relationships: None,
        }
    }

    pub async fn semantic_search_all(&self, query: &str, top_k: usize, include_relationships: bool) -> MnemoResult<SearchResponse> {
        let started = Instant::now();
        let embedding = self.embedder.embed(query).await?;
        let hits = self.uil.search_universal(&embedding, top_k, None, None).await;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            results.push(self.to_result_item(hit, include_relationships).await);
        }
        sort_results(&mut results);
        let facets = compute_facets(&results);

        Ok(SearchResponse {
            results,
            facets,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn semantic_search_filtered(
        &self,
        query: &str,
        storage_types: Option<&[StorageType]>,
        source_databases: Option<&str>,
        top_k: usize,
    ) -> MnemoResult<SearchResponse> {
        let started = Instant::now();
        let embedding = self.embedder.embed(query).await?;
        let hits = self.uil.search_universal(&embedding, top_k, storage_types, source_databases).await;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            results.push(self.to_result_item(hit, false).await);
        }
        sort_results(&mut results);
        let facets = compute_facets(&results);

        Ok(SearchResponse {
            results,
            facets,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn semantic_search_with_context(&self, query: &str, top_k: usize, relationship_depth: usize) -> MnemoResult<SearchResponse> {
        let started = Instant::now();
        let embedding = self.embedder.embed(query).await?;
        let hits = self.uil.search_universal(&embedding, top_k, None, None).await;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let (_, _, original_id) = crate::types::UniversalDocument::parse_universal_id(&hit.document.universal_id)
                .unwrap_or((hit.document.storage_type, hit.document.source_database.clone(), String::new()));
            let mut item = self.to_result_item(hit, true).await;
            item.deep_relationships = self.deep_relationships(&original_id, relationship_depth).await;
            results.push(item);
        }
        sort_results(&mut results);
        let facets = compute_facets(&results);

        Ok(SearchResponse {
            results,
            facets,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::vector::VectorIndex;
    use crate::embedder::TestEmbedder;

    async fn service(dir: &std::path::Path) -> SearchService {
        let vi = Arc::new(VectorIndex::open(dir.join("v.idx"), 8).await.unwrap());
        let uil = Arc::new(UniversalIndexLayer::open(vi, dir.join("uil.json")).await.unwrap());
        let graph = Arc::new(GraphStore::open_in_memory().await.unwrap());
        let embedder = Arc::new(TestEmbedder::new(8));
        SearchService::new(uil, graph, embedder)
    }

    #[tokio::test]
    async fn search_all_returns_facets_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        let embedding = svc.embedder.embed("machine learning basics").await.unwrap();
        svc.uil
            .store_universal_vector(1, StorageType::Document, "rs", "1", "ml basics".to_string(), embedding, serde_json::json!({}))
            .await
            .unwrap();

        let response = svc.semantic_search_all("machine learning basics", 5, false).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.facets.storage_type.get("document"), Some(&1));
    }

    #[tokio::test]
    async fn deep_relationships_are_bounded_by_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        for id in 1..=6 {
            svc.graph.upsert_document_node(id, serde_json::json!({})).await.unwrap();
        }
        for id in 1..6 {
            svc.graph.create_relationship(id, id + 1, "NEXT", 1.0, "{}", Utc::now()).await.unwrap();
        }

        let paths = svc.deep_relationships("1", 10).await.unwrap();
        let max_len = paths.iter().map(|p| p.len()).max().unwrap_or(0);
        assert!(max_len <= MAX_RELATIONSHIP_DEPTH);
    }
}
