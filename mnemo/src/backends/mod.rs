//! The four storage backends (§2) behind one narrow capability set (§9).
//!
//! Dynamic dispatch over heterogeneous backends is modeled as a closed
//! variant set plus a per-operation dispatch table, rather than an open
//! trait-object hierarchy: every adapter implements the same narrow
//! capability set (store, delete, exists, health), and anything backend-
//! specific lives on the concrete adapter type instead of the trait.

pub mod cache;
pub mod graph;
pub mod relational;
pub mod vector;

use async_trait::async_trait;

use crate::error::{Backend as BackendKind, MnemoResult};

/// Health status reported by a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Up,
    Degraded(String),
    Down(String),
}

impl Health {
    pub fn is_available(&self) -> bool {
        !matches!(self, Health::Down(_))
    }
}

/// The narrow capability set shared by every backend adapter.
///
/// `key` is backend-specific (a resource id for RS, a vector id for VI, a
/// doc id for GS, a cache key for CS); each adapter documents its own key
/// space on the inherent methods it additionally exposes.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether a record for `key` exists in this backend.
    async fn exists(&self, key: &str) -> MnemoResult<bool>;

    /// Removes the record for `key`, if present. Idempotent: deleting a
    /// missing key is not an error.
    async fn delete(&self, key: &str) -> MnemoResult<()>;

    /// Reports current backend health without mutating any state.
    async fn health(&self) -> Health;
}
