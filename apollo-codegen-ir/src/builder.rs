//! Builds the direct IR tree of operations and named fragments.
//!
//! Building a definition happens in two phases. The first walks the AST once and produces the
//! tree of fields, inline fragments and spreads, with duplicate selections combined and
//! statically skipped ones dropped. The second records every selection set of the tree in the
//! entity arena, placing the selection sets of spread fragments at their spread sites, so that
//! merging can later find everything selected on an entity without walking the tree again.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast::DirectiveList;
use apollo_compiler::ast::Type;
use apollo_compiler::ast::Value;
use apollo_compiler::executable;
use apollo_compiler::executable::Selection;
use apollo_compiler::name;
use indexmap::IndexMap;
use indexmap::IndexSet;
use indexmap::map::Entry;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use crate::compilation::CompilationResult;
use crate::compilation::SourceDocument;
use crate::config::IrConfig;
use crate::entity::DefinitionSource;
use crate::entity::Entity;
use crate::entity::EntityArena;
use crate::entity::EntityLocation;
use crate::entity::Occurrence;
use crate::entity::TypeInfo;
use crate::error::IrError;
use crate::inclusion::AnyOf;
use crate::inclusion::Conditions;
use crate::inclusion::InclusionConditions;
use crate::ir::DEFAULT_DEPRECATION_REASON;
use crate::ir::DeferredFragment;
use crate::ir::DirectSelections;
use crate::ir::EntityField;
use crate::ir::Field;
use crate::ir::FieldInfo;
use crate::ir::InlineFragmentSpread;
use crate::ir::Ir;
use crate::ir::NamedFragment;
use crate::ir::NamedFragmentSpread;
use crate::ir::Operation;
use crate::ir::ScalarField;
use crate::ir::SelectionSet;
use crate::merge::ComputedSelectionSet;
use crate::merge::MergingStrategy;
use crate::merge::cache::ComputedSelectionSetCache;
use crate::merge::compute_selection_set;
use crate::schema::IrSchema;
use crate::scope::DeferCondition;
use crate::scope::ScopeCondition;
use crate::scope::ScopeDescriptor;
use crate::utils::logging::snapshot;

const DEFER_DIRECTIVE_NAME: &str = "defer";
const DEPRECATED_DIRECTIVE_NAME: &str = "deprecated";

type Slot<T> = Arc<OnceCell<Arc<T>>>;

/// Builds the IR of the definitions of one [`CompilationResult`] and computes merged selection
/// sets on demand.
///
/// Every definition is built at most once, however many times it is requested or spread, and
/// the builder can be shared between threads building different operations.
#[derive(Debug)]
pub struct IrBuilder {
    compilation: CompilationResult,
    schema: IrSchema,
    config: IrConfig,
    arena: EntityArena,
    /// Keyed by document index and name: operation names are only unique within a document.
    operations: Mutex<IndexMap<(usize, Option<Name>), Slot<Operation>>>,
    fragments: Mutex<IndexMap<Name, Slot<NamedFragment>>>,
    cache: ComputedSelectionSetCache,
}

impl IrBuilder {
    pub fn new(compilation: CompilationResult) -> Self {
        Self::with_config(compilation, IrConfig::default())
    }

    pub fn with_config(compilation: CompilationResult, config: IrConfig) -> Self {
        snapshot!(config, "using configuration");
        let schema = IrSchema::new(compilation.schema().clone());
        Self {
            compilation,
            schema,
            config,
            arena: EntityArena::default(),
            operations: Default::default(),
            fragments: Default::default(),
            cache: ComputedSelectionSetCache::new(),
        }
    }

    pub fn compilation(&self) -> &CompilationResult {
        &self.compilation
    }

    pub fn schema(&self) -> &IrSchema {
        &self.schema
    }

    pub fn config(&self) -> &IrConfig {
        &self.config
    }

    pub fn cache(&self) -> &ComputedSelectionSetCache {
        &self.cache
    }

    /// The entity allocated at `location`, if any definition reaches it.
    pub fn entity(&self, location: &EntityLocation) -> Option<Arc<Entity>> {
        self.arena.get(location)
    }

    pub fn entity_count(&self) -> usize {
        self.arena.len()
    }

    /// Builds the operation with the given name, or the anonymous operation if `name` is `None`.
    ///
    /// If several documents define an operation with that name, the first one is built.
    pub fn build_operation(&self, name: Option<&str>) -> Result<Arc<Operation>, IrError> {
        let (index, document, operation) = self
            .compilation
            .documents()
            .iter()
            .enumerate()
            .find_map(|(index, document)| {
                document
                    .document
                    .operations
                    .iter()
                    .find(|operation| operation.name.as_ref().map(Name::as_str) == name)
                    .map(|operation| (index, document, operation))
            })
            .ok_or_else(|| IrError::UnknownOperation {
                name: name.map(str::to_owned),
            })?;
        self.build_operation_in(index, document, operation)
    }

    fn build_operation_in(
        &self,
        index: usize,
        document: &SourceDocument,
        operation: &Node<executable::Operation>,
    ) -> Result<Arc<Operation>, IrError> {
        let slot = self
            .operations
            .lock()
            .entry((index, operation.name.clone()))
            .or_default()
            .clone();
        slot.get_or_try_init(|| self.build_operation_definition(index, document, operation))
            .cloned()
    }

    /// Builds the named fragment, or returns it if it was already built.
    pub fn build_fragment(&self, name: &str) -> Result<Arc<NamedFragment>, IrError> {
        let (document, fragment) =
            self.compilation
                .fragment(name)
                .ok_or_else(|| IrError::UnknownFragment {
                    name: name.to_owned(),
                })?;
        let slot = self
            .fragments
            .lock()
            .entry(fragment.name.clone())
            .or_default()
            .clone();
        if let Some(built) = slot.get() {
            trace!(fragment = %fragment.name, "fragment cache hit");
            return Ok(built.clone());
        }
        slot.get_or_try_init(|| self.build_fragment_definition(document, fragment))
            .cloned()
    }

    /// Builds every operation of every document and every fragment, in document order.
    pub fn build_all(&self) -> Result<Ir, IrError> {
        let operations = self
            .compilation
            .documents()
            .iter()
            .enumerate()
            .flat_map(|(index, document)| {
                document
                    .document
                    .operations
                    .iter()
                    .map(move |operation| self.build_operation_in(index, document, operation))
            })
            .collect::<Result<_, _>>()?;
        let fragments = self
            .compilation
            .fragments()
            .map(|(_, fragment)| self.build_fragment(&fragment.name))
            .collect::<Result<_, _>>()?;
        Ok(Ir {
            operations,
            fragments,
        })
    }

    /// The merged form of `selection_set` under the configured merging strategy.
    pub fn computed_selection_set(
        &self,
        selection_set: &SelectionSet,
    ) -> Result<Arc<ComputedSelectionSet>, IrError> {
        self.computed_selection_set_with(selection_set, self.config.merging_strategy)
    }

    pub fn computed_selection_set_with(
        &self,
        selection_set: &SelectionSet,
        strategy: MergingStrategy,
    ) -> Result<Arc<ComputedSelectionSet>, IrError> {
        self.cache.get_or_compute(selection_set, strategy, || {
            compute_selection_set(selection_set, strategy, &self.schema, &self.arena)
        })
    }

    #[cfg_attr(
        feature = "snapshot_tracing",
        tracing::instrument(skip_all, level = "trace", name = "build_operation")
    )]
    fn build_operation_definition(
        &self,
        index: usize,
        document: &SourceDocument,
        operation: &Node<executable::Operation>,
    ) -> Result<Arc<Operation>, IrError> {
        debug!(operation = ?operation.name, source = %document.path, "building operation");
        let source = DefinitionSource::Operation {
            document: index,
            operation_type: operation.operation_type,
            name: operation.name.clone(),
        };
        let mut definition = DefinitionBuilder::new(self, source);
        let root_field = definition.build_root(name!("data"), &operation.selection_set)?;
        self.register(&root_field.selection_set)?;

        let built = Operation {
            name: operation.name.clone(),
            operation_type: operation.operation_type,
            root_field,
            referenced_fragments: definition.referenced_fragments,
            deferred_fragments: definition.deferred_fragments,
            source: document.path.clone(),
        };
        debug!(
            operation = ?built.name,
            referenced_fragments = built.referenced_fragments.len(),
            deferred_fragments = built.deferred_fragments.len(),
            "built operation"
        );
        Ok(Arc::new(built))
    }

    #[cfg_attr(
        feature = "snapshot_tracing",
        tracing::instrument(skip_all, level = "trace", name = "build_fragment")
    )]
    fn build_fragment_definition(
        &self,
        document: &SourceDocument,
        fragment: &Node<executable::Fragment>,
    ) -> Result<Arc<NamedFragment>, IrError> {
        debug!(fragment = %fragment.name, source = %document.path, "building fragment");
        let mut definition =
            DefinitionBuilder::new(self, DefinitionSource::NamedFragment(fragment.name.clone()));
        let root_field = definition.build_root(fragment.name.clone(), &fragment.selection_set)?;
        let occurrences = self.register(&root_field.selection_set)?;

        let built = NamedFragment {
            name: fragment.name.clone(),
            type_condition: fragment.type_condition().clone(),
            root_field,
            referenced_fragments: definition.referenced_fragments,
            deferred_fragments: definition.deferred_fragments,
            source: document.path.clone(),
            occurrences,
        };
        debug!(
            fragment = %built.name,
            referenced_fragments = built.referenced_fragments.len(),
            occurrences = built.occurrences.len(),
            "built fragment"
        );
        Ok(Arc::new(built))
    }

    /// Records every selection set of a definition in the arena, returning what was recorded.
    fn register(&self, root: &SelectionSet) -> Result<Vec<Occurrence>, IrError> {
        let mut occurrences = Vec::new();
        self.collect_occurrences(root, &mut occurrences)?;
        self.arena.register(occurrences.iter().cloned());
        Ok(occurrences)
    }

    fn collect_occurrences(
        &self,
        selection_set: &SelectionSet,
        occurrences: &mut Vec<Occurrence>,
    ) -> Result<(), IrError> {
        let Some(direct) = &selection_set.direct else {
            return Ok(());
        };
        occurrences.push(Occurrence {
            type_info: selection_set.type_info.clone(),
            selections: direct.clone(),
            fragment: None,
        });
        for field in direct.fields.values() {
            if let Some(child) = field.selection_set() {
                self.collect_occurrences(child, occurrences)?;
            }
        }
        for spread in direct.inline_fragments.values() {
            self.collect_occurrences(&spread.selection_set, occurrences)?;
        }
        for spread in direct.named_fragments.values() {
            self.place_fragment(spread, occurrences)?;
        }
        Ok(())
    }

    /// Records the selection sets of a spread fragment as if they were written at the spread
    /// site. Entity locations are rebased onto the site's entity and the fragment root's scope
    /// is applied on top of the site's scope.
    fn place_fragment(
        &self,
        spread: &NamedFragmentSpread,
        occurrences: &mut Vec<Occurrence>,
    ) -> Result<(), IrError> {
        let site = &spread.type_info;
        let fragment = &spread.fragment;
        let spread_scope = site.scope().appending(
            &ScopeCondition::on_type(fragment.type_condition.clone()),
            &self.schema,
        )?;

        'occurrences: for occurrence in &fragment.occurrences {
            let placed = &occurrence.type_info;
            let root_scope = placed.parent_scopes().first().unwrap_or(placed.scope());
            let mut scope = spread_scope.clone();
            for condition in root_scope.applied_conditions() {
                if !scope.admits(condition) {
                    continue 'occurrences;
                }
                scope = scope.appending(condition, &self.schema)?;
            }

            let location = site
                .entity()
                .location()
                .joined(&placed.entity().location().field_path);
            let entity = self.arena.entity(location, || {
                site.entity()
                    .root_type_path()
                    .iter()
                    .chain(placed.entity().root_type_path().iter().skip(1))
                    .cloned()
                    .collect()
            });
            let type_info = match placed.parent_scopes().split_first() {
                None => TypeInfo::new(entity, site.parent_scopes().to_vec(), scope),
                Some((_, nested)) => TypeInfo::new(
                    entity,
                    site.parent_scopes()
                        .iter()
                        .cloned()
                        .chain(std::iter::once(scope))
                        .chain(nested.iter().cloned())
                        .collect(),
                    placed.scope().clone(),
                ),
            };
            occurrences.push(Occurrence {
                type_info: Arc::new(type_info),
                selections: occurrence.selections.clone(),
                fragment: occurrence
                    .fragment
                    .clone()
                    .or_else(|| Some(fragment.name.clone())),
            });
        }
        Ok(())
    }
}

/// Fields with the same response key, gathered from every place they are selected at one level.
struct CollectedField<'a> {
    field: &'a Node<executable::Field>,
    conditions: Option<AnyOf<InclusionConditions>>,
    selections: Vec<&'a Selection>,
}

#[derive(Default)]
struct CollectedSelections<'a> {
    fields: IndexMap<Name, CollectedField<'a>>,
    inline_fragments: IndexMap<ScopeCondition, Vec<&'a Selection>>,
    named_fragments: IndexSet<Name>,
}

/// Builds the direct tree of one definition.
struct DefinitionBuilder<'a> {
    ir: &'a IrBuilder,
    source: DefinitionSource,
    referenced_fragments: IndexMap<Name, Arc<NamedFragment>>,
    deferred_fragments: Vec<DeferredFragment>,
    /// Response keys from the definition root to the selection set being built.
    field_path: Vec<Name>,
    depth: usize,
}

impl<'a> DefinitionBuilder<'a> {
    fn new(ir: &'a IrBuilder, source: DefinitionSource) -> Self {
        Self {
            ir,
            source,
            referenced_fragments: IndexMap::new(),
            deferred_fragments: Vec::new(),
            field_path: Vec::new(),
            depth: 0,
        }
    }

    fn build_root(
        &mut self,
        name: Name,
        selection_set: &'a executable::SelectionSet,
    ) -> Result<EntityField, IrError> {
        let ty = &selection_set.ty;
        let entity = self
            .ir
            .arena
            .entity(EntityLocation::root(self.source.clone()), || vec![ty.clone()]);
        let type_info = TypeInfo::new(
            entity,
            Vec::new(),
            ScopeDescriptor::for_type(ty, &self.ir.schema)?,
        );
        let selection_set =
            self.build_selection_set(Arc::new(type_info), selection_set.selections.iter().collect())?;
        Ok(EntityField {
            info: FieldInfo {
                name,
                alias: None,
                ty: Type::NonNullNamed(ty.clone()),
                arguments: Vec::new(),
                inclusion_conditions: None,
                deprecation_reason: None,
            },
            selection_set,
        })
    }

    fn enter(&mut self) -> Result<(), IrError> {
        self.depth += 1;
        if self.depth > self.ir.config.recursion_limit {
            return Err(IrError::RecursionLimitExceeded {
                limit: self.ir.config.recursion_limit,
            });
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }

    fn build_selection_set(
        &mut self,
        type_info: Arc<TypeInfo>,
        selections: Vec<&'a Selection>,
    ) -> Result<SelectionSet, IrError> {
        self.enter()?;
        let mut collected = CollectedSelections::default();
        self.collect(type_info.scope(), &selections, &mut collected)?;

        let mut direct = DirectSelections::default();
        for (response_key, field) in collected.fields {
            let field = self.build_field(&type_info, &response_key, field)?;
            direct.fields.insert(response_key, field);
        }
        for (condition, selections) in collected.inline_fragments {
            if let Some(spread) = self.build_inline_fragment(&type_info, &condition, selections)? {
                direct.inline_fragments.insert(condition, spread);
            }
        }
        for name in collected.named_fragments {
            let fragment = self.ir.build_fragment(&name)?;
            self.reference(&fragment);
            direct.named_fragments.insert(
                name,
                NamedFragmentSpread {
                    fragment,
                    type_info: type_info.clone(),
                    inclusion_conditions: type_info
                        .scope()
                        .matching_conditions()
                        .cloned()
                        .map(AnyOf::new),
                },
            );
        }
        self.exit();

        Ok(SelectionSet {
            type_info,
            direct: Some(Arc::new(direct)),
        })
    }

    /// Gathers selections by key. Inline fragments that do not narrow the scope are flattened
    /// into it, and named fragment spreads that carry conditions are wrapped in an inline
    /// fragment so that a fragment name is a unique key.
    fn collect(
        &mut self,
        scope: &ScopeDescriptor,
        selections: &[&'a Selection],
        collected: &mut CollectedSelections<'a>,
    ) -> Result<(), IrError> {
        for &selection in selections {
            match selection {
                Selection::Field(field) => self.collect_field(scope, field, collected)?,
                Selection::InlineFragment(inline) => {
                    let Some(condition) =
                        scope_condition(inline.type_condition.clone(), &inline.directives)?
                    else {
                        continue;
                    };
                    if !scope.admits(&condition) {
                        continue;
                    }
                    match scope.effective_condition(&condition) {
                        Some(effective) => collected
                            .inline_fragments
                            .entry(effective)
                            .or_default()
                            .extend(inline.selection_set.selections.iter()),
                        None => {
                            let nested: Vec<_> = inline.selection_set.selections.iter().collect();
                            self.enter()?;
                            self.collect(scope, &nested, collected)?;
                            self.exit();
                        }
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let (_, fragment) = self
                        .ir
                        .compilation
                        .fragment(&spread.fragment_name)
                        .ok_or_else(|| IrError::UnknownFragment {
                            name: spread.fragment_name.to_string(),
                        })?;
                    let Some(condition) = scope_condition(
                        Some(fragment.type_condition().clone()),
                        &spread.directives,
                    )?
                    else {
                        continue;
                    };
                    if !scope.admits(&condition) {
                        continue;
                    }
                    match scope.effective_condition(&condition) {
                        Some(effective)
                            if effective.conditions.is_some() || effective.defer.is_some() =>
                        {
                            collected
                                .inline_fragments
                                .entry(effective)
                                .or_default()
                                .push(selection);
                        }
                        _ => {
                            collected
                                .named_fragments
                                .insert(spread.fragment_name.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn collect_field(
        &mut self,
        scope: &ScopeDescriptor,
        field: &'a Node<executable::Field>,
        collected: &mut CollectedSelections<'a>,
    ) -> Result<(), IrError> {
        let conditions = match Conditions::from_directives(&field.directives)? {
            Conditions::Boolean(false) => return Ok(()),
            Conditions::Boolean(true) => None,
            Conditions::Variables(conditions) => {
                let condition = ScopeCondition::new(None, Some(conditions), None);
                if !scope.admits(&condition) {
                    return Ok(());
                }
                condition
                    .conditions
                    .and_then(|conditions| conditions.removing_matched(scope.matching_conditions()))
                    .map(AnyOf::new)
            }
        };

        match collected.fields.entry(field.response_key().clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                let (current, incoming) = (field_info(existing.field, None), field_info(field, None));
                if !current.is_same_selection(&incoming) {
                    return Err(IrError::FieldConflict {
                        response_key: field.response_key().clone(),
                        parent_type: scope.scope_type().clone(),
                        existing: current.describe(),
                        incoming: incoming.describe(),
                    });
                }
                existing.conditions = AnyOf::union(existing.conditions.take(), conditions);
                existing
                    .selections
                    .extend(field.selection_set.selections.iter());
            }
            Entry::Vacant(entry) => {
                entry.insert(CollectedField {
                    field,
                    conditions,
                    selections: field.selection_set.selections.iter().collect(),
                });
            }
        }
        Ok(())
    }

    fn build_field(
        &mut self,
        type_info: &TypeInfo,
        response_key: &Name,
        collected: CollectedField<'a>,
    ) -> Result<Field, IrError> {
        let info = field_info(collected.field, collected.conditions);
        let ty = info.ty.inner_named_type().clone();
        if !self.ir.schema.is_composite(&ty)? {
            return Ok(ScalarField { info }.into());
        }

        let parent = type_info.entity();
        let entity = self
            .ir
            .arena
            .entity(parent.location().child(response_key.clone(), ty.clone()), || {
                parent
                    .root_type_path()
                    .iter()
                    .chain(std::iter::once(&ty))
                    .cloned()
                    .collect()
            });
        let child = type_info.descending(entity, &ty, &self.ir.schema)?;
        self.field_path.push(response_key.clone());
        let selection_set = self.build_selection_set(Arc::new(child), collected.selections);
        self.field_path.pop();
        Ok(EntityField {
            info,
            selection_set: selection_set?,
        }
        .into())
    }

    /// Builds an inline fragment, or returns `None` if nothing in it survived.
    fn build_inline_fragment(
        &mut self,
        type_info: &TypeInfo,
        condition: &ScopeCondition,
        selections: Vec<&'a Selection>,
    ) -> Result<Option<InlineFragmentSpread>, IrError> {
        let child = Arc::new(type_info.narrowed(condition, &self.ir.schema)?);
        if let Some(defer) = &condition.defer {
            self.deferred_fragments.push(DeferredFragment {
                label: defer.label.clone(),
                variable: defer.variable.clone(),
                path: self.field_path.clone(),
                type_condition: child.parent_type().clone(),
            });
        }
        let selection_set = self.build_selection_set(child, selections)?;
        if selection_set
            .direct
            .as_ref()
            .is_some_and(|direct| direct.is_empty())
        {
            if condition.defer.is_some() {
                self.deferred_fragments.pop();
            }
            return Ok(None);
        }
        Ok(Some(InlineFragmentSpread { selection_set }))
    }

    /// Records a fragment spread at the current field path, along with everything the fragment
    /// references and defers.
    fn reference(&mut self, fragment: &Arc<NamedFragment>) {
        self.referenced_fragments
            .entry(fragment.name.clone())
            .or_insert_with(|| fragment.clone());
        for (name, referenced) in &fragment.referenced_fragments {
            self.referenced_fragments
                .entry(name.clone())
                .or_insert_with(|| referenced.clone());
        }
        self.deferred_fragments.extend(
            fragment
                .deferred_fragments
                .iter()
                .map(|deferred| deferred.rebased(&self.field_path)),
        );
    }
}

fn field_info(
    field: &executable::Field,
    inclusion_conditions: Option<AnyOf<InclusionConditions>>,
) -> FieldInfo {
    FieldInfo {
        name: field.name.clone(),
        alias: field.alias.clone(),
        ty: field.ty().clone(),
        arguments: field.arguments.clone(),
        inclusion_conditions,
        deprecation_reason: deprecation_reason(field),
    }
}

fn deprecation_reason(field: &executable::Field) -> Option<String> {
    let directive = field.definition.directives.get(DEPRECATED_DIRECTIVE_NAME)?;
    let reason = match directive
        .specified_argument_by_name("reason")
        .map(|value| &**value)
    {
        Some(Value::String(reason)) => reason.to_string(),
        _ => DEFAULT_DEPRECATION_REASON.to_owned(),
    };
    Some(reason)
}

/// The scope condition of an inline fragment or spread, or `None` if it is statically skipped.
fn scope_condition(
    type_condition: Option<Name>,
    directives: &DirectiveList,
) -> Result<Option<ScopeCondition>, IrError> {
    let conditions = match Conditions::from_directives(directives)? {
        Conditions::Boolean(false) => return Ok(None),
        conditions => conditions.into_variables(),
    };
    Ok(Some(ScopeCondition::new(
        type_condition,
        conditions,
        defer_condition(directives)?,
    )))
}

fn defer_condition(directives: &DirectiveList) -> Result<Option<DeferCondition>, IrError> {
    let Some(directive) = directives.get(DEFER_DIRECTIVE_NAME) else {
        return Ok(None);
    };
    let label = match directive
        .specified_argument_by_name("label")
        .map(|value| &**value)
    {
        Some(Value::String(label)) => label.to_string(),
        Some(other) => {
            return Err(IrError::InvalidDeferArgument {
                argument: name!("label"),
                value: other.to_string(),
            });
        }
        None => return Err(IrError::MissingDeferLabel),
    };
    let variable = match directive
        .specified_argument_by_name("if")
        .map(|value| &**value)
    {
        None | Some(Value::Boolean(true)) => None,
        Some(Value::Boolean(false)) => return Ok(None),
        Some(Value::Variable(variable)) => Some(variable.clone()),
        Some(other) => {
            return Err(IrError::InvalidDeferArgument {
                argument: name!("if"),
                value: other.to_string(),
            });
        }
    };
    Ok(Some(DeferCondition { label, variable }))
}
