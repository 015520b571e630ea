use serde::Deserialize;
use serde::Serialize;

use crate::merge::MergingStrategy;

pub(crate) const DEFAULT_RECURSION_LIMIT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IrConfig {
    /// Which sources are merged into a computed selection set by
    /// [`IrBuilder::computed_selection_set`](crate::IrBuilder::computed_selection_set).
    ///
    /// Defaults to all of them.
    pub merging_strategy: MergingStrategy,

    /// The maximum nesting of selection sets within one definition, counting selection sets of
    /// spread fragments separately.
    ///
    /// Defaults to 512.
    pub recursion_limit: usize,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            merging_strategy: MergingStrategy::all(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}
