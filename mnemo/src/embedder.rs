//! Text → fixed-dimension unit vector, with in-process memoization (§4.6).

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Backend, MnemoError, MnemoResult};

/// Text → dense unit-norm vector of dimension `D`. Implementations must be
/// pure from the caller's perspective: failures never mutate state.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimension this embedder produces.
    fn dimension(&self) -> usize;

    /// Embeds `text`, returning an L2-normalized vector of `dimension()` length.
    async fn embed(&self, text: &str) -> MnemoResult<Vec<f32>>;
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn seed_from_text(text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic pseudo-random embedder, seeded by a hash of the input text.
/// Used in tests and any environment without a real model available.
pub struct TestEmbedder {
    dimension: usize,
}

impl TestEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for TestEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> MnemoResult<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed_from_text(text));
        let raw: Vec<f32> = (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Ok(l2_normalize(raw))
    }
}

/// A model function pluggable into [`RealEmbedder`]. In production this
/// delegates to a single process-wide model instance loaded once at startup;
/// the trait boundary keeps the model choice out of scope for this crate.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn dimension(&self) -> usize;
    async fn encode(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Production embedder: delegates to a shared [`EmbeddingModel`], memoizing
/// identical strings and degrading to normalized noise (never a zero vector,
/// never a panic) on model failure.
pub struct RealEmbedder<M: EmbeddingModel> {
    model: Arc<M>,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl<M: EmbeddingModel> RealEmbedder<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(model),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn fallback_noise(&self, text: &str) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed_from_text(text));
        let raw: Vec<f32> = (0..self.model.dimension())
            .map(|_| rng.gen_range(-0.01..0.01))
            .collect();
        l2_normalize(raw)
    }
}

#[async_trait]
impl<M: EmbeddingModel> Embedder for RealEmbedder<M> {
    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    async fn embed(&self, text: &str) -> MnemoResult<Vec<f32>> {
        if let Some(cached) = self.cache.lock().get(text) {
            return Ok(cached.clone());
        }

        let embedding = match self.model.encode(text).await {
            Ok(raw) => {
                if raw.len() != self.model.dimension() {
                    return Err(MnemoError::integrity(format!(
                        "embedding dimension mismatch: got {}, expected {}",
                        raw.len(),
                        self.model.dimension()
                    )));
                }
                l2_normalize(raw)
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedding model failed, falling back to noise vector");
                self.fallback_noise(text)
            }
        };

        self.cache.lock().insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }
}

/// Convenience error conversion for callers that only see backend failures.
pub fn dimension_mismatch_err(expected: usize, got: usize) -> MnemoError {
    MnemoError::integrity(format!("embedding dimension mismatch: expected {expected}, got {got}"))
        .with_backend(Backend::Vi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedder_is_deterministic() {
        let embedder = TestEmbedder::new(8);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_embedder_is_unit_norm() {
        let embedder = TestEmbedder::new(16);
        let v = embedder.embed("some text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn different_text_yields_different_vectors() {
        let embedder = TestEmbedder::new(16);
        let a = embedder.embed("alpha").await.unwrap();
        let b = embedder.embed("beta").await.unwrap();
        assert_ne!(a, b);
    }

    struct FlakyModel {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingModel for FlakyModel {
        fn dimension(&self) -> usize {
            self.dim
        }

        async fn encode(&self, _text: &str) -> Result<Vec<f32>, String> {
            Err("model offline".to_string())
        }
    }

    #[tokio::test]
    async fn real_embedder_falls_back_to_noise_not_zero_on_failure() {
        let embedder = RealEmbedder::new(FlakyModel { dim: 8 });
        let v = embedder.embed("anything").await.unwrap();
        assert!(v.iter().any(|x| *x != 0.0));
    }

    struct MismatchedModel;

    #[async_trait]
    impl EmbeddingModel for MismatchedModel {
        fn dimension(&self) -> usize {
            8
        }

        async fn encode(&self, _text: &str) -> Result<Vec<f32>, String> {
            Ok(vec![0.0; 4])
        }
    }

    #[tokio::test]
    async fn dimension_mismatch_is_fatal() {
        let embedder = RealEmbedder::new(MismatchedModel);
        let result = embedder.embed("x").await;
        assert!(result.is_err());
    }
}
