//! Storage Router (C9) and Retrieval Router (C10), §4.8.
//!
//! Both are static tables keyed by [`StorageType`]; no runtime configuration
//! changes which backends a storage type touches. Keeping the tables as
//! plain `match` expressions (rather than a `HashMap` built at startup)
//! means the routing decision is `const`-evaluable and shows up directly in
//! a debugger or a log line as a function name, not an opaque lookup.

use crate::error::Backend;
use crate::types::StorageType;

/// Which backends receive a write for `storage_type`, in the order AC must
/// apply them on create (RS, then VI, then GS, then CS — §4.9).
pub fn write_targets(storage_type: StorageType) -> &'static [Backend] {
    use Backend::*;
    use StorageType::*;
    match storage_type {
        Chat => &[Rs, Cs],
        Document | Note | Code => &[Rs, Vi, Gs, Cs],
        ChainOfThought => &[Rs, Vi],
        Blueprint => &[Rs, Gs],
        Task => &[Rs, Cs],
        Pattern => &[Rs, Vi],
        CacheEntry => &[Cs],
    }
}

/// The delete-time ordering for the backends in `write_targets` (CS first,
/// then GS, then VI, then RS — the reverse of create order, §4.9).
pub fn delete_order(storage_type: StorageType) -> Vec<Backend> {
    let mut targets = write_targets(storage_type).to_vec();
    targets.reverse();
    targets
}

/// Whether `storage_type` is indexed in UIL (§4.8 table's UIL column).
/// Every storage_type is UIL-indexed, which is what makes a single
/// universal search span content of every type; this is a separate
/// concern from `write_targets`'s VI entry, which instead marks a
/// storage_type as directly VI-routed for retrieval (§4.8 retrieval
/// table). Encoded as an explicit per-variant match, not a blanket
/// `true`, so a future storage_type that should be excluded shows up as a
/// compile error here rather than a silent gap.
pub fn uil_indexed(storage_type: StorageType) -> bool {
    use StorageType::*;
    matches!(
        storage_type,
        Chat | Document | Note | Code | ChainOfThought | Blueprint | Task | Pattern | CacheEntry
    )
}

/// The retrieval strategy RR selects for a storage type (§4.8 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    CacheFirst,
    VectorSemantic,
    VectorSemanticGraphEnriched,
    GraphTraversal,
    RelationalIndexed,
    CacheRealtime,
}

/// `(primary, ordered fallbacks)` for a storage type.
pub fn retrieval_strategy(storage_type: StorageType) -> (RetrievalStrategy, &'static [Backend]) {
    use Backend::*;
    use RetrievalStrategy::*;
    use StorageType::*;
    match storage_type {
        Chat => (CacheFirst, &[Rs]),
        ChainOfThought | Pattern => (VectorSemantic, &[Rs]),
        Document | Note | Code => (VectorSemanticGraphEnriched, &[Vi, Rs]),
        Blueprint => (GraphTraversal, &[Rs]),
        Task => (RelationalIndexed, &[]),
        CacheEntry => (CacheRealtime, &[Rs]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_routes_to_all_four_backends_in_order() {
        assert_eq!(write_targets(StorageType::Document), &[Backend::Rs, Backend::Vi, Backend::Gs, Backend::Cs]);
    }

    #[test]
    fn delete_order_is_reverse_of_write_order() {
        let mut expected = write_targets(StorageType::Document).to_vec();
        expected.reverse();
        assert_eq!(delete_order(StorageType::Document), expected);
    }

    #[test]
    fn cache_entry_only_touches_cs() {
        assert_eq!(write_targets(StorageType::CacheEntry), &[Backend::Cs]);
    }

    #[test]
    fn every_storage_type_is_uil_indexed() {
        for storage_type in [
            StorageType::Chat,
            StorageType::Document,
            StorageType::Code,
            StorageType::Note,
            StorageType::ChainOfThought,
            StorageType::Blueprint,
            StorageType::Task,
            StorageType::Pattern,
            StorageType::CacheEntry,
        ] {
            assert!(uil_indexed(storage_type), "{storage_type:?} should be UIL-indexed");
        }
    }
}
