//! Vector Index (C2, §4.2) — a flat exact index with a write-through cache.
//!
//! The on-disk representation is a binary blob of raw `f32` vectors (one
//! physical slot per internal index, including tombstoned slots so offsets
//! never shift) plus a JSON metadata sidecar mapping `vector_id <-> internal
//! index`. Both are written together on every flush; a binary format keeps
//! large vector counts cheap to persist compared to re-serializing floats as
//! JSON on every save.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Health, StorageBackend};
use crate::error::{Backend as BackendKind, MnemoError, MnemoResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexMetadata {
    next_index: usize,
    vector_to_internal: HashMap<i64, usize>,
    internal_to_vector: HashMap<usize, i64>,
    tombstones: HashSet<usize>,
    previews: HashMap<i64, String>,
}

/// Point-in-time counters surfaced by [`VectorIndex::stats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VectorIndexStats {
    pub dimension: usize,
    pub live_count: usize,
    pub tombstone_count: usize,
    pub physical_slots: usize,
}

struct IndexState {
    vectors: Vec<Vec<f32>>,
    meta: IndexMetadata,
}

/// A single search hit: `(vector_id, score)`, higher score is closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub vector_id: i64,
    pub score: f32,
}

pub struct VectorIndex {
    dimension: usize,
    state: RwLock<IndexState>,
    index_path: PathBuf,
    meta_path: PathBuf,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex {
    /// Opens (or creates, if absent) an index backed by `index_path` and a
    /// sibling `<index_path>.meta.json` sidecar.
    pub async fn open(index_path: impl AsRef<Path>, dimension: usize) -> MnemoResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let meta_path = meta_sidecar(&index_path);

        let state = if index_path.is_file() && meta_path.is_file() {
            load_state(&index_path, &meta_path, dimension).await?
        } else {
            IndexState {
                vectors: Vec::new(),
                meta: IndexMetadata::default(),
            }
        };

        Ok(Self {
            dimension,
            state: RwLock::new(state),
            index_path,
            meta_path,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Adds one vector under `vector_id` (already allocated by RS, I2),
    /// validating immediate searchability before returning.
    #[tracing::instrument(skip(self, embedding))]
    pub async fn add(&self, vector_id: i64, embedding: Vec<f32>, preview: String) -> MnemoResult<()> {
        if embedding.len() != self.dimension {
            return Err(MnemoError::integrity(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            ))
            .with_backend(BackendKind::Vi));
        }

        let internal_index = {
            let mut state = self.state.write();
            if state.meta.vector_to_internal.contains_key(&vector_id) {
                return Err(MnemoError::conflict(format!(
                    "vector_id {vector_id} already present in index"
                ))
                .with_backend(BackendKind::Vi));
            }

            let n = state.vectors.len();
            state.vectors.push(embedding.clone());
            state.meta.vector_to_internal.insert(vector_id, n);
            state.meta.internal_to_vector.insert(n, vector_id);
            state.meta.next_index = n + 1;
            state.meta.previews.insert(vector_id, preview);
            n
        };

        if let Err(err) = self.persist().await {
            let mut state = self.state.write();
            state.vectors.truncate(internal_index);
            state.meta.vector_to_internal.remove(&vector_id);
            state.meta.internal_to_vector.remove(&internal_index);
            state.meta.next_index = internal_index;
            state.meta.previews.remove(&vector_id);
            return Err(err);
        }

        let found = self.search(&embedding, 1).top_hit_is(vector_id);
        if !found {
            return Err(MnemoError::integrity(format!(
                "vector {vector_id} failed immediate-searchability validation after add"
            ))
            .with_backend(BackendKind::Vi));
        }

        Ok(())
    }

    /// Exact cosine search over live (non-tombstoned) vectors.
    pub fn search(&self, query: &[f32], k: usize) -> SearchResults {
        let state = self.state.read();
        let mut scored: Vec<SearchHit> = state
            .vectors
            .iter()
            .enumerate()
            .filter(|(idx, _)| !state.meta.tombstones.contains(idx))
            .filter_map(|(idx, vec)| {
                state
                    .meta
                    .internal_to_vector
                    .get(&idx)
                    .map(|vid| SearchHit {
                        vector_id: *vid,
                        score: cosine(query, vec),
                    })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        SearchResults(scored)
    }

    /// Widens `k` roughly tenfold and post-filters by the set of
    /// `vector_ids` belonging to the requested conversation, per §4.2.
    pub fn search_with_conversation_filter(
        &self,
        query: &[f32],
        k: usize,
        allowed_vector_ids: &HashSet<i64>,
    ) -> SearchResults {
        let widened = (k.max(1)) * 10;
        let wide = self.search(query, widened);
        let mut filtered: Vec<SearchHit> = wide
            .0
            .into_iter()
            .filter(|hit| allowed_vector_ids.contains(&hit.vector_id))
            .collect();
        filtered.truncate(k);
        SearchResults(filtered)
    }

    /// Tombstones `vector_id`; the physical slot stays but is excluded from
    /// search and from the forward/reverse id mapping.
    pub async fn delete(&self, vector_id: i64) -> MnemoResult<()> {
        {
            let mut state = self.state.write();
            if let Some(internal) = state.meta.vector_to_internal.remove(&vector_id) {
                state.meta.internal_to_vector.remove(&internal);
                state.meta.tombstones.insert(internal);
                state.meta.previews.remove(&vector_id);
            }
        }
        self.persist().await
    }

    pub fn stats(&self) -> VectorIndexStats {
        let state = self.state.read();
        VectorIndexStats {
            dimension: self.dimension,
            live_count: state.meta.vector_to_internal.len(),
            tombstone_count: state.meta.tombstones.len(),
            physical_slots: state.vectors.len(),
        }
    }

    /// Persists the index and metadata sidecar. Called after every mutation
    /// and on a periodic background tick via [`Self::spawn_flusher`].
    pub async fn persist(&self) -> MnemoResult<()> {
        let (vectors, meta) = {
            let state = self.state.read();
            (state.vectors.clone(), state.meta.clone())
        };

        let index_path = self.index_path.clone();
        let meta_path = self.meta_path.clone();
        let dimension = self.dimension;

        tokio::task::spawn_blocking(move || -> MnemoResult<()> {
            let mut bytes = Vec::with_capacity(vectors.len() * dimension * 4 + 8);
            bytes.extend_from_slice(&(dimension as u64).to_le_bytes());
            for vector in &vectors {
                for value in vector {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }
            let tmp_index = with_tmp_suffix(&index_path);
            std::fs::write(&tmp_index, &bytes)
                .map_err(|e| MnemoError::backend_failed(BackendKind::Vi, e.to_string()))?;
            std::fs::rename(&tmp_index, &index_path)
                .map_err(|e| MnemoError::backend_failed(BackendKind::Vi, e.to_string()))?;

            let meta_json = serde_json::to_vec(&meta)?;
            let tmp_meta = with_tmp_suffix(&meta_path);
            std::fs::write(&tmp_meta, &meta_json)
                .map_err(|e| MnemoError::backend_failed(BackendKind::Vi, e.to_string()))?;
            std::fs::rename(&tmp_meta, &meta_path)
                .map_err(|e| MnemoError::backend_failed(BackendKind::Vi, e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| MnemoError::internal(format!("persist task panicked: {e}")))?
    }

    /// Spawns a background task that flushes to disk every `interval` and
    /// logs (rather than panics) on persistence failure.
    pub fn spawn_flusher(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.persist().await {
                    tracing::error!(error = %err, "background vector index flush failed");
                }
            }
        })
    }
}

pub struct SearchResults(pub Vec<SearchHit>);

impl SearchResults {
    fn top_hit_is(&self, vector_id: i64) -> bool {
        self.0.first().map(|hit| hit.vector_id) == Some(vector_id)
    }
}

fn meta_sidecar(index_path: &Path) -> PathBuf {
    let mut os = index_path.as_os_str().to_os_string();
    os.push(".meta.json");
    PathBuf::from(os)
}

fn with_tmp_suffix(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

async fn load_state(index_path: &Path, meta_path: &Path, expected_dimension: usize) -> MnemoResult<IndexState> {
    let index_path = index_path.to_path_buf();
    let meta_path = meta_path.to_path_buf();

    tokio::task::spawn_blocking(move || -> MnemoResult<IndexState> {
        let raw = std::fs::read(&index_path)
            .map_err(|e| MnemoError::backend_failed(BackendKind::Vi, e.to_string()))?;
        if raw.len() < 8 {
            return Err(MnemoError::integrity("vector index file truncated"));
        }
        let dimension = u64::from_le_bytes(raw[0..8].try_into().unwrap()) as usize;
        if dimension != expected_dimension {
            return Err(MnemoError::integrity(format!(
                "vector index dimension {dimension} does not match configured dimension {expected_dimension}"
            )));
        }
        let payload = &raw[8..];
        let stride = dimension * 4;
        if stride == 0 || payload.len() % stride != 0 {
            return Err(MnemoError::integrity("vector index file size is not a multiple of the vector stride"));
        }
        let mut vectors = Vec::with_capacity(payload.len() / stride);
        for chunk in payload.chunks_exact(stride) {
            let vector: Vec<f32> = chunk
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
                .collect();
            vectors.push(vector);
        }

        let meta_raw = std::fs::read_to_string(&meta_path)
            .map_err(|e| MnemoError::backend_failed(BackendKind::Vi, e.to_string()))?;
        let meta: IndexMetadata = serde_json::from_str(&meta_raw)?;

        Ok(IndexState { vectors, meta })
    })
    .await
    .map_err(|e| MnemoError::internal(format!("load task panicked: {e}")))?
}

#[async_trait]
impl StorageBackend for VectorIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Vi
    }

    async fn exists(&self, key: &str) -> MnemoResult<bool> {
        let vector_id: i64 = key
            .parse()
            .map_err(|_| MnemoError::invalid_input("VI key must be a vector id"))?;
        Ok(self.state.read().meta.vector_to_internal.contains_key(&vector_id))
    }

    async fn delete(&self, key: &str) -> MnemoResult<()> {
        let vector_id: i64 = key
            .parse()
            .map_err(|_| MnemoError::invalid_input("VI key must be a vector id"))?;
        VectorIndex::delete(self, vector_id).await
    }

    async fn health(&self) -> Health {
        Health::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, seed: u32) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[(seed as usize) % dim] = 1.0;
        v
    }

    #[tokio::test]
    async fn add_then_search_finds_own_vector_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("v.idx"), 8).await.unwrap();
        let vec = unit(8, 3);
        index.add(1, vec.clone(), "preview".to_string()).await.unwrap();

        let hits = index.search(&vec, 1);
        assert_eq!(hits.0[0].vector_id, 1);
    }

    #[tokio::test]
    async fn delete_tombstones_and_excludes_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("v.idx"), 8).await.unwrap();
        let vec = unit(8, 1);
        index.add(42, vec.clone(), "p".to_string()).await.unwrap();
        index.delete(42).await.unwrap();

        let hits = index.search(&vec, 5);
        assert!(hits.0.iter().all(|h| h.vector_id != 42));
        assert_eq!(index.stats().tombstone_count, 1);
    }

    #[tokio::test]
    async fn persists_and_reloads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.idx");
        {
            let index = VectorIndex::open(&path, 8).await.unwrap();
            index.add(7, unit(8, 2), "p".to_string()).await.unwrap();
        }

        let reloaded = VectorIndex::open(&path, 8).await.unwrap();
        let hits = reloaded.search(&unit(8, 2), 1);
        assert_eq!(hits.0[0].vector_id, 7);
    }

    #[tokio::test]
    async fn duplicate_vector_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("v.idx"), 4).await.unwrap();
        index.add(1, vec![1.0, 0.0, 0.0, 0.0], "a".to_string()).await.unwrap();
        let err = index.add(1, vec![0.0, 1.0, 0.0, 0.0], "b".to_string()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn conversation_filter_only_returns_allowed_ids() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::open(dir.path().join("v.idx"), 4).await.unwrap();
        index.add(1, vec![1.0, 0.0, 0.0, 0.0], "a".to_string()).await.unwrap();
        index.add(2, vec![0.9, 0.1, 0.0, 0.0], "b".to_string()).await.unwrap();

        let allowed: HashSet<i64> = [2].into_iter().collect();
        let hits = index.search_with_conversation_filter(&[1.0, 0.0, 0.0, 0.0], 5, &allowed);
        assert!(hits.0.iter().all(|h| h.vector_id == 2));
    }
}
