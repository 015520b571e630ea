//! Computes the selections visible on a generated response type.
//!
//! A [`ComputedSelectionSet`] starts from the selections written directly on a selection set and
//! adds what other selection sets on the same entity contribute: ancestors on the path from the
//! entity's field, siblings whose scope is matched by the target's, and the selection sets of
//! spread named fragments.

pub mod cache;

use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use bitflags::bitflags;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use tracing::trace;

use crate::entity::EntityArena;
use crate::entity::Occurrence;
use crate::entity::TypeInfo;
use crate::error::IrError;
use crate::inclusion::AnyOf;
use crate::inclusion::InclusionConditions;
use crate::internal_error;
use crate::ir::DirectSelections;
use crate::ir::EntityField;
use crate::ir::Field;
use crate::ir::FieldInfo;
use crate::ir::InlineFragmentSpread;
use crate::ir::NamedFragmentSpread;
use crate::ir::ScalarField;
use crate::ir::SelectionSet;
use crate::schema::IrSchema;
use crate::scope::ScopeCondition;
use crate::utils::logging::snapshot;

bitflags! {
    /// The sources merged into a computed selection set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MergingStrategy: u8 {
        /// Selection sets on the path from the entity's field down to the target scope.
        const ANCESTORS = 1;
        /// Selection sets in other scopes of the same entity that the target scope matches.
        const SIBLINGS = 1 << 1;
        /// Selection sets of spread named fragments.
        const NAMED_FRAGMENTS = 1 << 2;
    }
}

impl Default for MergingStrategy {
    fn default() -> Self {
        Self::all()
    }
}

/// How a merged source relates to the selection set it was merged into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum MergeOrigin {
    Ancestor,
    Sibling,
    /// Selections written in the named fragment, reached through a spread.
    NamedFragment(Name),
}

impl MergeOrigin {
    fn is_enabled(&self, strategy: MergingStrategy) -> bool {
        match self {
            Self::Ancestor => strategy.contains(MergingStrategy::ANCESTORS),
            Self::Sibling => strategy.contains(MergingStrategy::SIBLINGS),
            Self::NamedFragment(_) => strategy.contains(MergingStrategy::NAMED_FRAGMENTS),
        }
    }

    /// Merge order: ancestors, then siblings, then named fragments.
    fn rank(&self) -> u8 {
        match self {
            Self::Ancestor => 0,
            Self::Sibling => 1,
            Self::NamedFragment(_) => 2,
        }
    }
}

/// A selection set that contributed at least one selection to a computed selection set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergedSource {
    pub type_info: Arc<TypeInfo>,
    pub origin: MergeOrigin,
}

impl MergedSource {
    pub fn fragment(&self) -> Option<&Name> {
        match &self.origin {
            MergeOrigin::NamedFragment(name) => Some(name),
            _ => None,
        }
    }
}

/// The result of merging one selection set under one strategy.
#[derive(Debug)]
pub struct ComputedSelectionSet {
    type_info: Arc<TypeInfo>,
    strategy: MergingStrategy,
    direct: Option<Arc<DirectSelections>>,
    /// Direct fields that a merged source selects under weaker conditions, with the widened
    /// conditions.
    widened: IndexMap<Name, Field>,
    merged: DirectSelections,
    merged_sources: Vec<MergedSource>,
}

impl ComputedSelectionSet {
    pub fn type_info(&self) -> &Arc<TypeInfo> {
        &self.type_info
    }

    pub fn parent_type(&self) -> &Name {
        self.type_info.parent_type()
    }

    pub fn strategy(&self) -> MergingStrategy {
        self.strategy
    }

    /// The selections written on the selection set itself. Prefer [`Self::field`] and
    /// [`Self::fields`] for field conditions, which account for merged sources.
    pub fn direct(&self) -> Option<&DirectSelections> {
        self.direct.as_deref()
    }

    /// Only the selections contributed by merging, without the direct ones.
    pub fn merged(&self) -> &DirectSelections {
        &self.merged
    }

    pub fn merged_sources(&self) -> &[MergedSource] {
        &self.merged_sources
    }

    pub fn field(&self, response_key: &str) -> Option<&Field> {
        self.widened
            .get(response_key)
            .or_else(|| {
                self.direct
                    .as_ref()
                    .and_then(|direct| direct.fields.get(response_key))
            })
            .or_else(|| self.merged.fields.get(response_key))
    }

    /// Direct fields in source order, followed by merged fields in merge order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.direct
            .iter()
            .flat_map(|direct| direct.fields.iter())
            .map(|(response_key, field)| self.widened.get(response_key).unwrap_or(field))
            .chain(self.merged.fields.values())
    }

    pub fn inline_fragment(&self, condition: &ScopeCondition) -> Option<&InlineFragmentSpread> {
        self.direct
            .as_ref()
            .and_then(|direct| direct.inline_fragments.get(condition))
            .or_else(|| self.merged.inline_fragments.get(condition))
    }

    pub fn inline_fragments(&self) -> impl Iterator<Item = &InlineFragmentSpread> {
        self.direct
            .iter()
            .flat_map(|direct| direct.inline_fragments.values())
            .chain(self.merged.inline_fragments.values())
    }

    /// The inline fragment with only a type condition on `type_name`.
    pub fn inline_fragment_on(&self, type_name: &str) -> Option<&InlineFragmentSpread> {
        self.inline_fragments().find(|spread| {
            let condition = spread.condition();
            condition.conditions.is_none()
                && condition.defer.is_none()
                && condition
                    .type_condition
                    .as_ref()
                    .is_some_and(|type_condition| type_condition.as_str() == type_name)
        })
    }

    pub fn named_fragment(&self, name: &str) -> Option<&NamedFragmentSpread> {
        self.direct
            .as_ref()
            .and_then(|direct| direct.named_fragments.get(name))
            .or_else(|| self.merged.named_fragments.get(name))
    }

    pub fn named_fragments(&self) -> impl Iterator<Item = &NamedFragmentSpread> {
        self.direct
            .iter()
            .flat_map(|direct| direct.named_fragments.values())
            .chain(self.merged.named_fragments.values())
    }

    /// The single source this selection set passes through, if it has no direct selections of
    /// its own and exactly one source contributed to it. Such a selection set can be rendered as
    /// an alias of the source's type.
    ///
    /// When several sources qualify individually, only the first contributor is recorded, so a
    /// second source that adds nothing new does not prevent the alias.
    pub fn referenced_source(&self) -> Option<&MergedSource> {
        if self.direct.as_ref().is_some_and(|direct| !direct.is_empty()) {
            return None;
        }
        match self.merged_sources.as_slice() {
            [source] => Some(source),
            _ => None,
        }
    }
}

impl Display for ComputedSelectionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{")?;
        for field in self.fields() {
            writeln!(f, "  {field}")?;
        }
        let direct = self.direct.as_deref();
        for condition in direct
            .into_iter()
            .flat_map(|direct| direct.inline_fragments.keys())
            .chain(self.merged.inline_fragments.keys())
        {
            writeln!(f, "  ... {condition}")?;
        }
        for spread in self.named_fragments() {
            writeln!(f, "  ...{}", spread.name())?;
        }
        write!(f, "}}")
    }
}

/// Why an occurrence is visible from the target selection set.
enum Visibility {
    /// Everything selected in the occurrence's scope is selected in the target's.
    Merged(MergeOrigin),
    /// The occurrence is in a narrower scope that the target can branch into.
    InlineFragment(ScopeCondition, MergeOrigin),
}

impl Visibility {
    fn origin(&self) -> &MergeOrigin {
        match self {
            Self::Merged(origin) | Self::InlineFragment(_, origin) => origin,
        }
    }
}

#[cfg_attr(
    feature = "snapshot_tracing",
    tracing::instrument(skip_all, level = "trace", name = "compute_selection_set")
)]
pub(crate) fn compute_selection_set(
    selection_set: &SelectionSet,
    strategy: MergingStrategy,
    schema: &IrSchema,
    arena: &EntityArena,
) -> Result<ComputedSelectionSet, IrError> {
    let target = &selection_set.type_info;
    trace!(type_info = %target, ?strategy, "computing selection set");

    let mut visible = Vec::new();
    for occurrence in arena.occurrences(target.entity().location()) {
        let is_target = selection_set.direct.as_ref().is_some_and(|direct| {
            Arc::ptr_eq(direct, &occurrence.selections) && *occurrence.type_info == **target
        });
        if is_target {
            continue;
        }
        if let Some(visibility) = visibility(schema, target, &occurrence)? {
            if visibility.origin().is_enabled(strategy) {
                visible.push((occurrence, visibility));
            }
        }
    }
    // Stable: occurrences keep registration order within each origin.
    visible.sort_by_key(|(_, visibility)| visibility.origin().rank());

    let mut merger = Merger {
        schema,
        arena,
        target,
        direct: selection_set.direct.as_deref(),
        widened: IndexMap::new(),
        merged: DirectSelections::default(),
        merged_sources: Vec::new(),
    };
    for (occurrence, visibility) in visible {
        let contributed = match &visibility {
            Visibility::Merged(_) => merger.merge_occurrence(&occurrence)?,
            Visibility::InlineFragment(condition, _) => merger.add_inline_fragment(condition)?,
        };
        if contributed {
            let source = MergedSource {
                type_info: occurrence.type_info.clone(),
                origin: visibility.origin().clone(),
            };
            if !merger.merged_sources.contains(&source) {
                merger.merged_sources.push(source);
            }
        }
    }

    let computed = ComputedSelectionSet {
        type_info: target.clone(),
        strategy,
        direct: selection_set.direct.clone(),
        widened: merger.widened,
        merged: merger.merged,
        merged_sources: merger.merged_sources,
    };
    snapshot!(
        "ComputedSelectionSet",
        computed.to_string(),
        "computed selection set"
    );
    Ok(computed)
}

fn visibility(
    schema: &IrSchema,
    target: &TypeInfo,
    occurrence: &Occurrence,
) -> Result<Option<Visibility>, IrError> {
    let candidate = &occurrence.type_info;
    if candidate.parent_scopes().len() != target.parent_scopes().len() {
        return Ok(None);
    }
    let parents_match = target
        .parent_scopes()
        .iter()
        .zip(candidate.parent_scopes())
        .all(|(target, candidate)| target.matches(candidate));
    if !parents_match {
        return Ok(None);
    }

    let origin = match &occurrence.fragment {
        Some(fragment) => MergeOrigin::NamedFragment(fragment.clone()),
        None if is_on_ancestor_line(target, candidate) => MergeOrigin::Ancestor,
        None => MergeOrigin::Sibling,
    };

    let target_scope = target.scope();
    let candidate_scope = candidate.scope();
    if target_scope.matches(candidate_scope) {
        return Ok(Some(Visibility::Merged(origin)));
    }

    // The first condition of the candidate's scope that does not hold in the target's is the
    // inline fragment the target would branch into to reach it.
    let Some(condition) = candidate_scope
        .scope_path()
        .iter()
        .find(|condition| !target_scope.matches_condition(condition))
    else {
        return Ok(Some(Visibility::Merged(origin)));
    };
    if !target_scope.admits(condition) {
        return Ok(None);
    }
    if let Some(type_condition) = &condition.type_condition {
        if !schema.types_overlap(target_scope.scope_type(), type_condition)? {
            return Ok(None);
        }
    }
    Ok(target_scope
        .effective_condition(condition)
        .map(|condition| Visibility::InlineFragment(condition, origin)))
}

/// Whether the candidate lies on the path from the entity root to the target, or below the
/// target within the same entity.
fn is_on_ancestor_line(target: &TypeInfo, candidate: &TypeInfo) -> bool {
    let parents = target
        .parent_scopes()
        .iter()
        .zip(candidate.parent_scopes())
        .all(|(target, candidate)| candidate.is_ancestor_of(target));
    parents
        && (candidate.scope().is_ancestor_of(target.scope())
            || target.scope().is_ancestor_of(candidate.scope()))
}

struct Merger<'a> {
    schema: &'a IrSchema,
    arena: &'a EntityArena,
    target: &'a Arc<TypeInfo>,
    direct: Option<&'a DirectSelections>,
    widened: IndexMap<Name, Field>,
    merged: DirectSelections,
    merged_sources: Vec<MergedSource>,
}

impl Merger<'_> {
    /// Adds the fields and named fragments of an occurrence whose scope is matched by the
    /// target. Returns whether anything new was added.
    fn merge_occurrence(&mut self, occurrence: &Occurrence) -> Result<bool, IrError> {
        let scope = self.target.scope();
        let parent_type = scope.scope_type();
        let mut contributed = false;

        for (response_key, field) in &occurrence.selections.fields {
            let conditions = match field.inclusion_conditions() {
                Some(conditions) => {
                    if !conditions.is_satisfiable_in(scope.matching_conditions()) {
                        continue;
                    }
                    conditions.removing_matched(scope.matching_conditions())
                }
                None => None,
            };

            if let Some(existing) = self.direct.and_then(|direct| direct.fields.get(response_key)) {
                ensure_same_selection(parent_type, existing, field)?;
                contributed |= self.widen(response_key, existing, conditions);
                continue;
            }
            if let Some(existing) = self.merged.fields.get_mut(response_key) {
                ensure_same_selection(parent_type, existing, field)?;
                let info = existing.info_mut();
                info.inclusion_conditions = AnyOf::union(info.inclusion_conditions.take(), conditions);
                continue;
            }
            let merged = self.merged_field(response_key, field, conditions)?;
            self.merged.fields.insert(response_key.clone(), merged);
            contributed = true;
        }

        for (name, spread) in &occurrence.selections.named_fragments {
            let is_direct = self
                .direct
                .is_some_and(|direct| direct.named_fragments.contains_key(name));
            if is_direct || self.merged.named_fragments.contains_key(name) {
                continue;
            }
            let inclusion_conditions = spread
                .inclusion_conditions
                .as_ref()
                .and_then(|conditions| conditions.removing_matched(scope.matching_conditions()));
            self.merged.named_fragments.insert(
                name.clone(),
                NamedFragmentSpread {
                    inclusion_conditions,
                    ..spread.clone()
                },
            );
            contributed = true;
        }

        Ok(contributed)
    }

    /// ORs `incoming` into the conditions of a direct field. Returns whether they got weaker.
    fn widen(
        &mut self,
        response_key: &Name,
        direct: &Field,
        incoming: Option<AnyOf<InclusionConditions>>,
    ) -> bool {
        let current = self.widened.get(response_key).unwrap_or(direct);
        let Some(conditions) = current.inclusion_conditions() else {
            return false;
        };
        let widened = AnyOf::union(Some(conditions.clone()), incoming);
        if widened.as_ref() == Some(conditions) {
            return false;
        }
        let mut field = current.clone();
        field.info_mut().inclusion_conditions = widened;
        self.widened.insert(response_key.clone(), field);
        true
    }

    /// A copy of `field` as seen from the target. Entity fields get a merged-only selection set
    /// nested in the target's scope, so their own merging starts from the target.
    fn merged_field(
        &self,
        response_key: &Name,
        field: &Field,
        inclusion_conditions: Option<AnyOf<InclusionConditions>>,
    ) -> Result<Field, IrError> {
        let info = FieldInfo {
            inclusion_conditions,
            ..field.info().clone()
        };
        match field {
            Field::Scalar(_) => Ok(ScalarField { info }.into()),
            Field::Entity(_) => {
                let ty = info.ty.inner_named_type().clone();
                let location = self
                    .target
                    .entity()
                    .location()
                    .child(response_key.clone(), ty.clone());
                let entity = self
                    .arena
                    .get(&location)
                    .ok_or_else(|| internal_error!("No entity was allocated at {}", location))?;
                let type_info = self.target.descending(entity, &ty, self.schema)?;
                Ok(EntityField {
                    info,
                    selection_set: SelectionSet {
                        type_info: Arc::new(type_info),
                        direct: None,
                    },
                }
                .into())
            }
        }
    }

    fn add_inline_fragment(&mut self, condition: &ScopeCondition) -> Result<bool, IrError> {
        let is_direct = self
            .direct
            .is_some_and(|direct| direct.inline_fragments.contains_key(condition));
        if is_direct || self.merged.inline_fragments.contains_key(condition) {
            return Ok(false);
        }
        let type_info = self.target.narrowed(condition, self.schema)?;
        self.merged.inline_fragments.insert(
            condition.clone(),
            InlineFragmentSpread {
                selection_set: SelectionSet {
                    type_info: Arc::new(type_info),
                    direct: None,
                },
            },
        );
        Ok(true)
    }
}

fn ensure_same_selection(
    parent_type: &Name,
    existing: &Field,
    incoming: &Field,
) -> Result<(), IrError> {
    if existing.info().is_same_selection(incoming.info()) {
        return Ok(());
    }
    Err(IrError::FieldConflict {
        response_key: existing.response_key().clone(),
        parent_type: parent_type.clone(),
        existing: existing.info().describe(),
        incoming: incoming.info().describe(),
    })
}
