//! The direct IR tree: selections exactly as written, annotated with entity and scope metadata.

use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast::Argument;
use apollo_compiler::ast::Type;
use apollo_compiler::executable::OperationType;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::entity::Occurrence;
use crate::entity::TypeInfo;
use crate::inclusion::AnyOf;
use crate::inclusion::InclusionConditions;
use crate::scope::ScopeCondition;

pub(crate) const DEFAULT_DEPRECATION_REASON: &str = "No longer supported";

/// What every field carries, regardless of its type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: Name,
    pub alias: Option<Name>,
    pub ty: Type,
    pub arguments: Vec<Node<Argument>>,
    /// `None` if the field is included whenever its enclosing scope is.
    pub inclusion_conditions: Option<AnyOf<InclusionConditions>>,
    pub deprecation_reason: Option<String>,
}

impl FieldInfo {
    pub fn response_key(&self) -> &Name {
        self.alias.as_ref().unwrap_or(&self.name)
    }

    /// Whether `other` selects the same data under the same response key.
    pub(crate) fn is_same_selection(&self, other: &FieldInfo) -> bool {
        self.name == other.name
            && self.alias == other.alias
            && self.ty == other.ty
            && self.arguments == other.arguments
    }

    pub(crate) fn describe(&self) -> String {
        if self.arguments.is_empty() {
            format!("{}: {}", self.name, self.ty)
        } else {
            format!("{}({}): {}", self.name, self.format_arguments(), self.ty)
        }
    }

    fn format_arguments(&self) -> String {
        self.arguments
            .iter()
            .map(|argument| format!("{}: {}", argument.name, *argument.value))
            .join(", ")
    }
}

impl Display for FieldInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        write!(f, "{}", self.name)?;
        if !self.arguments.is_empty() {
            write!(f, "({})", self.format_arguments())?;
        }
        if let Some(conditions) = &self.inclusion_conditions {
            write!(f, " @if({conditions})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    pub info: FieldInfo,
}

/// A field of object, interface or union type, owning the selection set made on it.
#[derive(Debug, Clone)]
pub struct EntityField {
    pub info: FieldInfo,
    pub selection_set: SelectionSet,
}

#[derive(Debug, Clone, derive_more::From, derive_more::IsVariant)]
pub enum Field {
    Scalar(ScalarField),
    Entity(EntityField),
}

impl Field {
    pub fn info(&self) -> &FieldInfo {
        match self {
            Self::Scalar(field) => &field.info,
            Self::Entity(field) => &field.info,
        }
    }

    pub fn name(&self) -> &Name {
        &self.info().name
    }

    pub fn alias(&self) -> Option<&Name> {
        self.info().alias.as_ref()
    }

    pub fn response_key(&self) -> &Name {
        self.info().response_key()
    }

    pub fn ty(&self) -> &Type {
        &self.info().ty
    }

    pub fn inclusion_conditions(&self) -> Option<&AnyOf<InclusionConditions>> {
        self.info().inclusion_conditions.as_ref()
    }

    pub fn selection_set(&self) -> Option<&SelectionSet> {
        match self {
            Self::Scalar(_) => None,
            Self::Entity(field) => Some(&field.selection_set),
        }
    }

    pub(crate) fn info_mut(&mut self) -> &mut FieldInfo {
        match self {
            Self::Scalar(field) => &mut field.info,
            Self::Entity(field) => &mut field.info,
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.info().fmt(f)
    }
}

/// Selections written at one place in the source, before any merging.
///
/// Each collection keeps source order and is keyed so that it holds no duplicates: fields by
/// response key, inline fragments by their scope condition and named fragments by name.
#[derive(Debug, Clone, Default)]
pub struct DirectSelections {
    pub fields: IndexMap<Name, Field>,
    pub inline_fragments: IndexMap<ScopeCondition, InlineFragmentSpread>,
    pub named_fragments: IndexMap<Name, NamedFragmentSpread>,
}

impl DirectSelections {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.inline_fragments.is_empty() && self.named_fragments.is_empty()
    }
}

impl Display for DirectSelections {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for field in self.fields.values() {
            writeln!(f, "  {field}")?;
        }
        for condition in self.inline_fragments.keys() {
            writeln!(f, "  ... {condition}")?;
        }
        for name in self.named_fragments.keys() {
            writeln!(f, "  ...{name}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SelectionSet {
    pub type_info: Arc<TypeInfo>,
    /// `None` if the selection set only exists as the result of merging.
    pub direct: Option<Arc<DirectSelections>>,
}

impl SelectionSet {
    pub fn parent_type(&self) -> &Name {
        self.type_info.parent_type()
    }

    pub fn is_merged_only(&self) -> bool {
        self.direct.is_none()
    }

    pub fn field(&self, response_key: &str) -> Option<&Field> {
        self.direct.as_ref()?.fields.get(response_key)
    }

    pub fn inline_fragment_on(&self, type_name: &str) -> Option<&InlineFragmentSpread> {
        self.direct
            .as_ref()?
            .inline_fragments
            .iter()
            .find(|(condition, _)| {
                condition
                    .type_condition
                    .as_ref()
                    .is_some_and(|type_condition| type_condition.as_str() == type_name)
            })
            .map(|(_, spread)| spread)
    }
}

/// An inline fragment (a type condition, `@include`/`@skip` or `@defer`), or a conditional named
/// fragment spread wrapped in one.
#[derive(Debug, Clone)]
pub struct InlineFragmentSpread {
    pub selection_set: SelectionSet,
}

impl InlineFragmentSpread {
    pub fn condition(&self) -> &ScopeCondition {
        self.selection_set.type_info.scope().last_condition()
    }

    pub fn is_deferred(&self) -> bool {
        self.condition().is_deferred()
    }
}

/// A spread of a named fragment. The fragment itself is built once and shared by every spread.
#[derive(Debug, Clone)]
pub struct NamedFragmentSpread {
    pub fragment: Arc<NamedFragment>,
    /// The selection set the fragment is spread into.
    pub type_info: Arc<TypeInfo>,
    /// The conditions applied since the entity's field that the spread is nested in, which
    /// is where a conditional spread is wrapped.
    pub inclusion_conditions: Option<AnyOf<InclusionConditions>>,
}

impl NamedFragmentSpread {
    pub fn name(&self) -> &Name {
        &self.fragment.name
    }
}

/// A `@defer` boundary reachable from a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeferredFragment {
    pub label: String,
    pub variable: Option<Name>,
    /// Response keys from the definition root down to the deferred scope.
    pub path: Vec<Name>,
    pub type_condition: Name,
}

impl DeferredFragment {
    pub(crate) fn rebased(&self, prefix: &[Name]) -> Self {
        Self {
            path: prefix.iter().chain(&self.path).cloned().collect(),
            ..self.clone()
        }
    }
}

#[derive(Debug)]
pub struct Operation {
    pub name: Option<Name>,
    pub operation_type: OperationType,
    /// The `data` field of the response.
    pub root_field: EntityField,
    pub referenced_fragments: IndexMap<Name, Arc<NamedFragment>>,
    pub deferred_fragments: Vec<DeferredFragment>,
    /// Path of the document the operation is defined in.
    pub source: String,
}

impl Operation {
    pub fn selection_set(&self) -> &SelectionSet {
        &self.root_field.selection_set
    }

    pub fn contains_deferred_fragment(&self) -> bool {
        !self.deferred_fragments.is_empty()
    }

    pub fn referenced_fragments(&self) -> impl Iterator<Item = &Arc<NamedFragment>> {
        self.referenced_fragments.values()
    }
}

#[derive(Debug)]
pub struct NamedFragment {
    pub name: Name,
    pub type_condition: Name,
    pub root_field: EntityField,
    pub referenced_fragments: IndexMap<Name, Arc<NamedFragment>>,
    pub deferred_fragments: Vec<DeferredFragment>,
    pub source: String,
    /// Every selection set of the fragment, including those of fragments it spreads, relative
    /// to the fragment's root. Used to place the fragment at its spread sites.
    pub(crate) occurrences: Vec<Occurrence>,
}

impl NamedFragment {
    pub fn selection_set(&self) -> &SelectionSet {
        &self.root_field.selection_set
    }

    pub fn contains_deferred_fragment(&self) -> bool {
        !self.deferred_fragments.is_empty()
    }

    pub fn referenced_fragments(&self) -> impl Iterator<Item = &Arc<NamedFragment>> {
        self.referenced_fragments.values()
    }
}

/// Every definition of a build.
#[derive(Debug, Default)]
pub struct Ir {
    pub operations: Vec<Arc<Operation>>,
    pub fragments: Vec<Arc<NamedFragment>>,
}

impl Ir {
    pub fn operation(&self, name: &str) -> Option<&Arc<Operation>> {
        self.operations
            .iter()
            .find(|operation| operation.name.as_ref().is_some_and(|n| n.as_str() == name))
    }

    pub fn fragment(&self, name: &str) -> Option<&Arc<NamedFragment>> {
        self.fragments.iter().find(|fragment| fragment.name.as_str() == name)
    }
}
