//! Response-object identity.
//!
//! An [`Entity`] is created once per location a response object can be reached at, and is
//! interned in an [`EntityArena`] keyed by that location. Every selection set that selects on an
//! entity is recorded in the arena as an [`Occurrence`], which is what the merge engine walks to
//! find ancestors, siblings and spread fragments.

use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::executable::OperationType;
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::trace;

use crate::error::IrError;
use crate::ir::DirectSelections;
use crate::schema::IrSchema;
use crate::scope::ScopeCondition;
use crate::scope::ScopeDescriptor;

/// The definition an entity location starts from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, derive_more::IsVariant)]
pub enum DefinitionSource {
    Operation {
        /// Index of the defining document, since anonymous operations of different documents
        /// share a name.
        document: usize,
        #[serde(skip)]
        operation_type: OperationType,
        name: Option<Name>,
    },
    NamedFragment(Name),
}

impl Display for DefinitionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation {
                operation_type,
                name,
                ..
            } => {
                let operation_type = match operation_type {
                    OperationType::Query => "query",
                    OperationType::Mutation => "mutation",
                    OperationType::Subscription => "subscription",
                };
                match name {
                    Some(name) => write!(f, "{operation_type} {name}"),
                    None => write!(f, "anonymous {operation_type}"),
                }
            }
            Self::NamedFragment(name) => write!(f, "fragment {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldPathComponent {
    /// The response key of the field.
    pub name: Name,
    /// The named type of the field.
    pub ty: Name,
}

/// Where an entity is reached from: a definition root, followed by the entity fields selected
/// from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntityLocation {
    pub source: DefinitionSource,
    pub field_path: Vec<FieldPathComponent>,
}

impl EntityLocation {
    pub fn root(source: DefinitionSource) -> Self {
        Self {
            source,
            field_path: Vec::new(),
        }
    }

    pub fn child(&self, response_key: Name, ty: Name) -> Self {
        let mut field_path = self.field_path.clone();
        field_path.push(FieldPathComponent {
            name: response_key,
            ty,
        });
        Self {
            source: self.source.clone(),
            field_path,
        }
    }

    /// This location extended by a path relative to another definition's root.
    pub fn joined(&self, relative: &[FieldPathComponent]) -> Self {
        Self {
            source: self.source.clone(),
            field_path: self
                .field_path
                .iter()
                .chain(relative)
                .cloned()
                .collect(),
        }
    }

    /// The response keys from the definition root.
    pub fn response_path(&self) -> Vec<Name> {
        self.field_path
            .iter()
            .map(|component| component.name.clone())
            .collect()
    }
}

impl Display for EntityLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)?;
        for component in &self.field_path {
            write!(f, ".{}", component.name)?;
        }
        Ok(())
    }
}

/// One conceptual response object.
///
/// Entities compare equal by location, so the same object reached through different fragment
/// spreads is recognized as one.
#[derive(Debug, Serialize)]
pub struct Entity {
    location: EntityLocation,
    /// The named types of the fields from the definition root down to this entity.
    root_type_path: Vec<Name>,
}

impl Entity {
    pub fn location(&self) -> &EntityLocation {
        &self.location
    }

    pub fn root_type_path(&self) -> &[Name] {
        &self.root_type_path
    }

    pub fn ty(&self) -> Option<&Name> {
        self.root_type_path.last()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

/// The entity a selection set selects on, together with the scope of every entity level from the
/// definition root down to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeInfo {
    entity: Arc<Entity>,
    /// One scope per enclosing entity, outermost first.
    parent_scopes: Vec<ScopeDescriptor>,
    scope: ScopeDescriptor,
}

impl TypeInfo {
    pub(crate) fn new(
        entity: Arc<Entity>,
        parent_scopes: Vec<ScopeDescriptor>,
        scope: ScopeDescriptor,
    ) -> Self {
        Self {
            entity,
            parent_scopes,
            scope,
        }
    }

    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn scope(&self) -> &ScopeDescriptor {
        &self.scope
    }

    pub fn parent_scopes(&self) -> &[ScopeDescriptor] {
        &self.parent_scopes
    }

    /// Every scope from the definition root down to this selection set.
    pub fn scope_path(&self) -> impl Iterator<Item = &ScopeDescriptor> {
        self.parent_scopes.iter().chain(std::iter::once(&self.scope))
    }

    pub fn parent_type(&self) -> &Name {
        self.scope.scope_type()
    }

    pub fn is_deferred(&self) -> bool {
        self.scope_path().any(ScopeDescriptor::is_deferred)
    }

    /// The type info of an inline fragment with the given condition.
    pub(crate) fn narrowed(
        &self,
        condition: &ScopeCondition,
        schema: &IrSchema,
    ) -> Result<Self, IrError> {
        Ok(Self {
            entity: self.entity.clone(),
            parent_scopes: self.parent_scopes.clone(),
            scope: self.scope.appending(condition, schema)?,
        })
    }

    /// The type info of a field's selection set, selecting on `entity`.
    pub(crate) fn descending(
        &self,
        entity: Arc<Entity>,
        field_type: &Name,
        schema: &IrSchema,
    ) -> Result<Self, IrError> {
        let mut parent_scopes = self.parent_scopes.clone();
        parent_scopes.push(self.scope.clone());
        Ok(Self {
            entity,
            parent_scopes,
            scope: ScopeDescriptor::for_type(field_type, schema)?,
        })
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.entity.location,
            self.scope_path().join(" | ")
        )
    }
}

/// A selection set written at one place in a definition, as seen from the entity it selects on.
#[derive(Debug, Clone)]
pub(crate) struct Occurrence {
    pub(crate) type_info: Arc<TypeInfo>,
    pub(crate) selections: Arc<DirectSelections>,
    /// The fragment the selections were written in, when they were reached through a spread.
    pub(crate) fragment: Option<Name>,
}

#[derive(Debug)]
struct EntityData {
    entity: Arc<Entity>,
    occurrences: Vec<Occurrence>,
}

/// Interns entities by location and records where each of them is selected.
///
/// Entries are only ever added, so anything read from the arena stays valid for the lifetime of
/// the build.
#[derive(Debug, Default)]
pub(crate) struct EntityArena {
    entities: RwLock<IndexMap<EntityLocation, EntityData>>,
}

impl EntityArena {
    /// Returns the entity at `location`, allocating it on first use.
    pub(crate) fn entity(
        &self,
        location: EntityLocation,
        root_type_path: impl FnOnce() -> Vec<Name>,
    ) -> Arc<Entity> {
        if let Some(data) = self.entities.read().get(&location) {
            return data.entity.clone();
        }
        self.entities
            .write()
            .entry(location)
            .or_insert_with_key(|location| {
                trace!(%location, "allocating entity");
                EntityData {
                    entity: Arc::new(Entity {
                        location: location.clone(),
                        root_type_path: root_type_path(),
                    }),
                    occurrences: Vec::new(),
                }
            })
            .entity
            .clone()
    }

    pub(crate) fn get(&self, location: &EntityLocation) -> Option<Arc<Entity>> {
        self.entities
            .read()
            .get(location)
            .map(|data| data.entity.clone())
    }

    pub(crate) fn register(&self, occurrences: impl IntoIterator<Item = Occurrence>) {
        let mut entities = self.entities.write();
        for occurrence in occurrences {
            let entity = occurrence.type_info.entity();
            entities
                .entry(entity.location.clone())
                .or_insert_with(|| EntityData {
                    entity: entity.clone(),
                    occurrences: Vec::new(),
                })
                .occurrences
                .push(occurrence);
        }
    }

    /// Every occurrence of the entity at `location`, in registration order.
    pub(crate) fn occurrences(&self, location: &EntityLocation) -> Vec<Occurrence> {
        self.entities
            .read()
            .get(location)
            .map(|data| data.occurrences.clone())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.read().len()
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;

    use super::*;

    fn location() -> EntityLocation {
        EntityLocation::root(DefinitionSource::Operation {
            document: 0,
            operation_type: OperationType::Query,
            name: Some(name!("Hero")),
        })
        .child(name!("hero"), name!("Character"))
    }

    #[test]
    fn entities_are_interned_by_location() {
        let arena = EntityArena::default();
        let first = arena.entity(location(), || vec![name!("Query"), name!("Character")]);
        let second = arena.entity(location(), Vec::new);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.root_type_path().len(), 2);
        assert_eq!(arena.len(), 1);
        assert!(arena.get(&location()).is_some());
        assert!(arena.occurrences(&location()).is_empty());
    }

    #[test]
    fn locations_join_relative_paths() {
        let fragment = EntityLocation::root(DefinitionSource::NamedFragment(name!("HeroDetails")))
            .child(name!("friends"), name!("Character"));
        let joined = location().joined(&fragment.field_path);
        assert_eq!(joined.to_string(), "query Hero.hero.friends");

        let mutation = EntityLocation::root(DefinitionSource::Operation {
            document: 1,
            operation_type: OperationType::Mutation,
            name: None,
        });
        assert_eq!(mutation.to_string(), "anonymous mutation");
        assert_eq!(
            joined.response_path(),
            vec![name!("hero"), name!("friends")]
        );
    }
}
