//! Scope conditions and the descriptors that decide whether selections written in one scope are
//! visible in another.

use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;

use apollo_compiler::Name;
use apollo_compiler::collections::IndexSet;
use itertools::Itertools;
use serde::Serialize;

use crate::bail;
use crate::error::IrError;
use crate::inclusion::Conditions;
use crate::inclusion::InclusionConditions;
use crate::schema::IrSchema;

/// An incremental delivery boundary introduced by `@defer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeferCondition {
    pub label: String,
    /// The variable of the `if` argument. `None` if the fragment is always deferred.
    pub variable: Option<Name>,
}

impl Display for DeferCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.variable {
            Some(variable) => write!(f, "@defer(label: \"{}\", if: ${variable})", self.label),
            None => write!(f, "@defer(label: \"{}\")", self.label),
        }
    }
}

/// One level of narrowing applied to a selection set: a type condition, inclusion conditions, a
/// defer boundary, or any combination of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeCondition {
    pub type_condition: Option<Name>,
    pub conditions: Option<InclusionConditions>,
    pub defer: Option<DeferCondition>,
}

impl ScopeCondition {
    pub fn new(
        type_condition: Option<Name>,
        conditions: Option<InclusionConditions>,
        defer: Option<DeferCondition>,
    ) -> Self {
        Self {
            type_condition,
            conditions,
            defer,
        }
    }

    pub fn on_type(type_condition: Name) -> Self {
        Self {
            type_condition: Some(type_condition),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.type_condition.is_none() && self.conditions.is_none() && self.defer.is_none()
    }

    pub fn is_deferred(&self) -> bool {
        self.defer.is_some()
    }
}

impl Display for ScopeCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let type_condition = self
            .type_condition
            .as_ref()
            .map(|type_condition| format!("on {type_condition}"));
        let conditions = self
            .conditions
            .as_ref()
            .map(|conditions| format!("@if({conditions})"));
        let defer = self.defer.as_ref().map(ToString::to_string);
        write!(
            f,
            "{}",
            [type_condition, conditions, defer]
                .into_iter()
                .flatten()
                .join(" ")
        )
    }
}

/// Describes the scope of one selection set at one entity level: the conditions applied since
/// the entity's field (the first one is always the field's own type), the narrowest type in
/// scope, and everything that is known to hold inside the scope.
///
/// Two descriptors are equal if their scope paths are equal; everything else is derived.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeDescriptor {
    scope_type: Name,
    scope_path: Vec<ScopeCondition>,
    /// The scope type, every type condition on the path, and all of their supertypes.
    matching_types: IndexSet<Name>,
    matching_conditions: Option<InclusionConditions>,
    matching_defers: Vec<DeferCondition>,
}

impl PartialEq for ScopeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.scope_path == other.scope_path
    }
}

impl Eq for ScopeDescriptor {}

impl Hash for ScopeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope_path.hash(state);
    }
}

impl ScopeDescriptor {
    /// The root scope of an entity whose field has type `type_name`.
    pub fn for_type(type_name: &Name, schema: &IrSchema) -> Result<Self, IrError> {
        Ok(Self {
            scope_type: type_name.clone(),
            scope_path: vec![ScopeCondition::on_type(type_name.clone())],
            matching_types: schema.supertypes(type_name)?,
            matching_conditions: None,
            matching_defers: Vec::new(),
        })
    }

    pub fn scope_type(&self) -> &Name {
        &self.scope_type
    }

    pub fn scope_path(&self) -> &[ScopeCondition] {
        &self.scope_path
    }

    /// The conditions applied after the entity's root type.
    pub fn applied_conditions(&self) -> &[ScopeCondition] {
        &self.scope_path[1..]
    }

    pub fn last_condition(&self) -> &ScopeCondition {
        // Never empty: the root type condition is always present.
        &self.scope_path[self.scope_path.len() - 1]
    }

    pub fn matching_types(&self) -> &IndexSet<Name> {
        &self.matching_types
    }

    pub fn matching_conditions(&self) -> Option<&InclusionConditions> {
        self.matching_conditions.as_ref()
    }

    pub fn is_deferred(&self) -> bool {
        !self.matching_defers.is_empty()
    }

    pub fn matches_type(&self, type_name: &str) -> bool {
        self.matching_types.contains(type_name)
    }

    /// Whether `conditions` are always satisfied inside this scope, so a selection guarded by
    /// them needs no runtime check here.
    pub fn matches_conditions(&self, conditions: &InclusionConditions) -> bool {
        self.matching_conditions
            .as_ref()
            .is_some_and(|matching| conditions.is_subset(matching))
    }

    pub fn matches_condition(&self, condition: &ScopeCondition) -> bool {
        condition
            .type_condition
            .as_ref()
            .is_none_or(|type_condition| self.matches_type(type_condition))
            && condition
                .conditions
                .as_ref()
                .is_none_or(|conditions| self.matches_conditions(conditions))
            && condition
                .defer
                .as_ref()
                .is_none_or(|defer| self.matching_defers.contains(defer))
    }

    /// Whether every selection written in the `other` scope is visible in this scope.
    pub fn matches(&self, other: &ScopeDescriptor) -> bool {
        other
            .scope_path
            .iter()
            .all(|condition| self.matches_condition(condition))
    }

    /// Whether `self` lies on the path from the entity root to `other`.
    pub fn is_ancestor_of(&self, other: &ScopeDescriptor) -> bool {
        other.scope_path.starts_with(&self.scope_path)
    }

    /// Whether the inclusion conditions of `condition` can hold together with this scope's.
    pub fn admits(&self, condition: &ScopeCondition) -> bool {
        match (&self.matching_conditions, &condition.conditions) {
            (Some(matching), Some(conditions)) => !matching.merge(conditions).is_skipped(),
            _ => true,
        }
    }

    /// The part of `condition` that is not already implied by this scope, or `None` if the
    /// condition does not narrow the scope at all.
    pub fn effective_condition(&self, condition: &ScopeCondition) -> Option<ScopeCondition> {
        let effective = ScopeCondition {
            type_condition: condition
                .type_condition
                .clone()
                .filter(|type_condition| !self.matches_type(type_condition)),
            conditions: condition
                .conditions
                .as_ref()
                .and_then(|conditions| conditions.removing_matched(self.matching_conditions())),
            defer: condition
                .defer
                .clone()
                .filter(|defer| !self.matching_defers.contains(defer)),
        };
        (!effective.is_empty()).then_some(effective)
    }

    /// Narrows this scope by `condition`. Parts of the condition already implied by the scope
    /// are dropped; if nothing is left the scope is returned unchanged.
    pub fn appending(
        &self,
        condition: &ScopeCondition,
        schema: &IrSchema,
    ) -> Result<Self, IrError> {
        let Some(effective) = self.effective_condition(condition) else {
            return Ok(self.clone());
        };
        let mut scope = self.clone();
        if let Some(type_condition) = &effective.type_condition {
            scope.scope_type = type_condition.clone();
            scope.matching_types.extend(schema.supertypes(type_condition)?);
        }
        if let Some(conditions) = &effective.conditions {
            scope.matching_conditions = match scope.matching_conditions.take() {
                Some(matching) => match matching.merge(conditions) {
                    Conditions::Variables(merged) => Some(merged),
                    Conditions::Boolean(_) => {
                        bail!(
                            "Cannot narrow scope {} with contradicting conditions {}",
                            self,
                            conditions
                        )
                    }
                },
                None => Some(conditions.clone()),
            };
        }
        if let Some(defer) = &effective.defer {
            scope.matching_defers.push(defer.clone());
        }
        scope.scope_path.push(effective);
        Ok(scope)
    }
}

impl Display for ScopeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scope_path.iter().join(" > "))
    }
}
