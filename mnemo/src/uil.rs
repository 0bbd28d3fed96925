//! Universal Index Layer (C7, §4.7) — wraps VI with a type-erased view over
//! every storage type.
//!
//! `universal_id` ties together three things that otherwise have no common
//! key: the storage type, the owning backend, and the row id inside that
//! backend. The envelope metadata (indexed_at, content_hash, ...) is kept in
//! a sidecar JSON file next to the vector index, persisted the same way VI
//! persists its own metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backends::vector::VectorIndex;
use crate::error::{MnemoError, MnemoResult};
use crate::types::{StorageType, UniversalDocument};

#[derive(Debug, Default, Serialize, Deserialize)]
struct UilState {
    documents: HashMap<i64, UniversalDocument>,
}

pub struct UniversalIndexLayer {
    vector_index: Arc<VectorIndex>,
    state: RwLock<UilState>,
    path: PathBuf,
}

/// One hit from [`UniversalIndexLayer::search_universal`].
#[derive(Debug, Clone)]
pub struct UniversalHit {
    pub document: UniversalDocument,
    pub score: f32,
}

impl UniversalIndexLayer {
    pub async fn open(vector_index: Arc<VectorIndex>, sidecar_path: impl AsRef<Path>) -> MnemoResult<Self> {
        let path = sidecar_path.as_ref().to_path_buf();
        let state = if path.is_file() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| MnemoError::internal(e.to_string()))?;
            serde_json::from_str(&raw)?
        } else {
            UilState::default()
        };

        Ok(Self {
            vector_index,
            state: RwLock::new(state),
            path,
        })
    }

    async fn persist(&self, state: &UilState) -> MnemoResult<()> {
        let json = serde_json::to_string(state)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| MnemoError::internal(e.to_string()))
    }

    /// Stores `embedding` in VI under `vector_id` (already allocated by RS)
    /// and records the universal metadata envelope, returning the new
    /// `universal_id`.
    #[tracing::instrument(skip(self, embedding, metadata))]
    pub async fn store_universal_vector(
        &self,
        vector_id: i64,
        storage_type: StorageType,
        source_database: &str,
        original_id: &str,
        content_preview: String,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> MnemoResult<String> {
        self.vector_index.add(vector_id, embedding, content_preview.clone()).await?;

        let universal_id = UniversalDocument::make_universal_id(storage_type, source_database, original_id);
        let content_hash = format!("{:x}", md5_like_hash(content_preview.as_bytes()));
        let document = UniversalDocument {
            universal_id: universal_id.clone(),
            content_preview,
            content_hash,
            storage_type,
            source_database: source_database.to_string(),
            indexed_at: chrono::Utc::now(),
            metadata,
        };

        let mut state = self.state.write().await;
        state.documents.insert(vector_id, document);
        self.persist(&state).await?;

        Ok(universal_id)
    }

    /// Conjunctive filter over {storage_type, source_database}, applied
    /// after vector search on a widened candidate pool (§4.7).
    pub async fn search_universal(
        &self,
        query: &[f32],
        top_k: usize,
        storage_type_filter: Option<&[StorageType]>,
        source_database_filter: Option<&str>,
    ) -> Vec<UniversalHit> {
        let selectivity_factor = match (storage_type_filter, source_database_filter) {
            (Some(_), Some(_)) => 10,
            (Some(_), None) | (None, Some(_)) => 4,
            (None, None) => 1,
        };
        let widened = top_k.max(1) * selectivity_factor;
        let wide = self.vector_index.search(query, widened);

        let state = self.state.read().await;
        let mut hits = Vec::new();
        for hit in wide.0 {
            let Some(document) = state.documents.get(&hit.vector_id) else {
                continue;
            };
            if let Some(types) = storage_type_filter {
                if !types.contains(&document.storage_type) {
                    continue;
                }
            }
            if let Some(db) = source_database_filter {
                if document.source_database != db {
                    continue;
                }
            }
            hits.push(UniversalHit {
                document: document.clone(),
                score: hit.score,
            });
            if hits.len() >= top_k {
                break;
            }
        }
        hits
    }

    /// Same as [`Self::search_universal`] but scoped to an explicit set of
    /// allowed vector ids (used to confine retrieval to one conversation's
    /// context-linked chunks), delegating the widened-k filtering to VI.
    pub async fn search_scoped_to_vector_ids(&self, query: &[f32], top_k: usize, allowed: &std::collections::HashSet<i64>) -> Vec<UniversalHit> {
        let wide = self.vector_index.search_with_conversation_filter(query, top_k, allowed);
        let state = self.state.read().await;
        wide.0
            .into_iter()
            .filter_map(|hit| {
                state.documents.get(&hit.vector_id).map(|document| UniversalHit {
                    document: document.clone(),
                    score: hit.score,
                })
            })
            .collect()
    }

    /// Deletes every universal document whose `original_id` suffix matches,
    /// used by AC rollback. Returns the removed universal ids.
    pub async fn delete_by_original_id(&self, original_id: &str) -> MnemoResult<Vec<String>> {
        let mut state = self.state.write().await;
        let matching: Vec<(i64, String)> = state
            .documents
            .iter()
            .filter_map(|(vid, doc)| {
                UniversalDocument::parse_universal_id(&doc.universal_id)
                    .filter(|(_, _, original)| original == original_id)
                    .map(|_| (*vid, doc.universal_id.clone()))
            })
            .collect();

        let mut removed = Vec::new();
        for (vector_id, universal_id) in matching {
            self.vector_index.delete(vector_id).await?;
            state.documents.remove(&vector_id);
            removed.push(universal_id);
        }
        self.persist(&state).await?;
        Ok(removed)
    }

    pub async fn delete_by_vector_id(&self, vector_id: i64) -> MnemoResult<()> {
        self.vector_index.delete(vector_id).await?;
        let mut state = self.state.write().await;
        state.documents.remove(&vector_id);
        self.persist(&state).await
    }

    pub async fn storage_type_counts(&self) -> HashMap<StorageType, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for document in state.documents.values() {
            *counts.entry(document.storage_type).or_insert(0) += 1;
        }
        counts
    }
}

/// A small non-cryptographic content fingerprint; good enough to flag
/// accidental re-indexing of identical content, not a security primitive.
fn md5_like_hash(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn layer(dir: &Path) -> UniversalIndexLayer {
        let vi = Arc::new(VectorIndex::open(dir.join("v.idx"), 4).await.unwrap());
        UniversalIndexLayer::open(vi, dir.join("uil.json")).await.unwrap()
    }

    #[tokio::test]
    async fn store_then_search_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let uil = layer(dir.path()).await;

        let id = uil
            .store_universal_vector(
                1,
                StorageType::Document,
                "rs",
                "1",
                "hello".to_string(),
                vec![1.0, 0.0, 0.0, 0.0],
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert_eq!(id, "document:rs:1");

        let hits = uil.search_universal(&[1.0, 0.0, 0.0, 0.0], 5, None, None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.universal_id, "document:rs:1");
    }

    #[tokio::test]
    async fn filters_are_conjunctive() {
        let dir = tempfile::tempdir().unwrap();
        let uil = layer(dir.path()).await;
        uil.store_universal_vector(1, StorageType::Document, "rs", "1", "a".to_string(), vec![1.0, 0.0, 0.0, 0.0], serde_json::json!({}))
            .await
            .unwrap();
        uil.store_universal_vector(2, StorageType::Task, "rs", "2", "b".to_string(), vec![0.9, 0.1, 0.0, 0.0], serde_json::json!({}))
            .await
            .unwrap();

        let hits = uil
            .search_universal(&[1.0, 0.0, 0.0, 0.0], 5, Some(&[StorageType::Task]), Some("rs"))
            .await;
        assert!(hits.iter().all(|h| h.document.storage_type == StorageType::Task));
    }

    #[tokio::test]
    async fn delete_by_original_id_removes_matches() {
        let dir = tempfile::tempdir().unwrap();
        let uil = layer(dir.path()).await;
        uil.store_universal_vector(1, StorageType::Document, "rs", "42", "a".to_string(), vec![1.0, 0.0, 0.0, 0.0], serde_json::json!({}))
            .await
            .unwrap();

        let removed = uil.delete_by_original_id("42").await.unwrap();
        assert_eq!(removed.len(), 1);
        let hits = uil.search_universal(&[1.0, 0.0, 0.0, 0.0], 5, None, None).await;
        assert!(hits.is_empty());
    }
}
