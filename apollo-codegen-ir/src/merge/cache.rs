use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::trace;

use super::ComputedSelectionSet;
use super::MergingStrategy;
use crate::entity::TypeInfo;
use crate::error::IrError;
use crate::ir::SelectionSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    type_info: Arc<TypeInfo>,
    strategy: MergingStrategy,
    /// A merged-only selection set can share its type info with a direct one.
    is_direct: bool,
}

/// Memoizes computed selection sets by type info and merging strategy.
///
/// Entries are never invalidated: the IR is immutable once built, so the cache can be shared
/// across threads for the lifetime of a build and dropped or cleared whenever convenient.
#[derive(Debug, Default)]
pub struct ComputedSelectionSetCache {
    entries: DashMap<CacheKey, Arc<OnceCell<Arc<ComputedSelectionSet>>>>,
    computations: AtomicUsize,
}

impl ComputedSelectionSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `selection_set`, running `compute` if there is none.
    ///
    /// Concurrent callers asking for the same key wait for a single computation. A failed
    /// computation is not cached.
    pub fn get_or_compute(
        &self,
        selection_set: &SelectionSet,
        strategy: MergingStrategy,
        compute: impl FnOnce() -> Result<ComputedSelectionSet, IrError>,
    ) -> Result<Arc<ComputedSelectionSet>, IrError> {
        let key = CacheKey {
            type_info: selection_set.type_info.clone(),
            strategy,
            is_direct: selection_set.direct.is_some(),
        };
        // Clone the slot out so the shard lock is released before computing.
        let slot = self.entries.entry(key).or_default().clone();
        if let Some(computed) = slot.get() {
            trace!("computed selection set cache hit");
            return Ok(computed.clone());
        }
        slot.get_or_try_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            compute().map(Arc::new)
        })
        .cloned()
    }

    /// How many times a computation ran.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
