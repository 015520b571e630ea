//! Read-only view of the schema types the IR needs for subtype reasoning.

use std::collections::HashMap;
use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Implementers;
use apollo_compiler::validation::Valid;

use crate::error::IrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum NamedTypeKind {
    Object,
    Interface,
    Union,
    Scalar,
    Enum,
    InputObject,
}

impl NamedTypeKind {
    pub fn is_composite(self) -> bool {
        matches!(self, Self::Object | Self::Interface | Self::Union)
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, Self::Interface | Self::Union)
    }
}

impl From<&ExtendedType> for NamedTypeKind {
    fn from(value: &ExtendedType) -> Self {
        match value {
            ExtendedType::Scalar(_) => Self::Scalar,
            ExtendedType::Object(_) => Self::Object,
            ExtendedType::Interface(_) => Self::Interface,
            ExtendedType::Union(_) => Self::Union,
            ExtendedType::Enum(_) => Self::Enum,
            ExtendedType::InputObject(_) => Self::InputObject,
        }
    }
}

impl Display for NamedTypeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Object => "object",
            Self::Interface => "interface",
            Self::Union => "union",
            Self::Scalar => "scalar",
            Self::Enum => "enum",
            Self::InputObject => "input object",
        };
        f.write_str(kind)
    }
}

/// Wraps a validated schema with the indexes needed to answer subtype queries.
///
/// The schema is never mutated after load. Lookups of unknown type names are errors, since the
/// documents the IR is built from were validated against this schema.
#[derive(Debug)]
pub struct IrSchema {
    schema: Valid<Schema>,
    implementers: HashMap<Name, Implementers>,
    /// For each object type, the unions it is a member of.
    unions_by_member: HashMap<Name, IndexSet<Name>>,
}

impl IrSchema {
    pub fn new(schema: Valid<Schema>) -> Self {
        let implementers = schema.implementers_map().into_iter().collect();
        let mut unions_by_member: HashMap<Name, IndexSet<Name>> = HashMap::new();
        for (name, ty) in &schema.types {
            if let ExtendedType::Union(union) = ty {
                for member in &union.members {
                    unions_by_member
                        .entry(member.name.clone())
                        .or_default()
                        .insert(name.clone());
                }
            }
        }
        Self {
            schema,
            implementers,
            unions_by_member,
        }
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub fn get_type(&self, name: &str) -> Result<&ExtendedType, IrError> {
        self.schema
            .types
            .get(name)
            .ok_or_else(|| IrError::unknown_type(name))
    }

    pub fn kind(&self, name: &str) -> Result<NamedTypeKind, IrError> {
        self.get_type(name).map(NamedTypeKind::from)
    }

    pub fn is_composite(&self, name: &str) -> Result<bool, IrError> {
        Ok(self.kind(name)?.is_composite())
    }

    /// The object types that can appear at runtime for the given type, in declaration order.
    pub fn possible_types(&self, name: &str) -> Result<IndexSet<Name>, IrError> {
        match self.get_type(name)? {
            ExtendedType::Object(object) => Ok(std::iter::once(object.name.clone()).collect()),
            ExtendedType::Interface(_) => Ok(self
                .implementers
                .get(name)
                .map(|implementers| implementers.objects.iter().cloned().collect())
                .unwrap_or_default()),
            ExtendedType::Union(union) => Ok(union
                .members
                .iter()
                .map(|member| member.name.clone())
                .collect()),
            _ => Ok(IndexSet::default()),
        }
    }

    /// The given type followed by every type it is known to be a subtype of: interfaces it
    /// implements (transitively) and, for objects, the unions it is a member of.
    pub fn supertypes(&self, name: &str) -> Result<IndexSet<Name>, IrError> {
        let mut supertypes = IndexSet::default();
        let mut queue = vec![self.type_name(name)?];
        while let Some(current) = queue.pop() {
            if !supertypes.insert(current.clone()) {
                continue;
            }
            match self.get_type(&current)? {
                ExtendedType::Object(object) => {
                    queue.extend(object.implements_interfaces.iter().map(|i| i.name.clone()));
                    if let Some(unions) = self.unions_by_member.get(&current) {
                        queue.extend(unions.iter().cloned());
                    }
                }
                ExtendedType::Interface(interface) => {
                    queue.extend(
                        interface
                            .implements_interfaces
                            .iter()
                            .map(|i| i.name.clone()),
                    );
                }
                _ => {}
            }
        }
        Ok(supertypes)
    }

    /// Whether every value of `subtype` is also a value of `supertype`.
    pub fn is_subtype(&self, supertype: &str, subtype: &str) -> Result<bool, IrError> {
        if supertype == subtype {
            return Ok(true);
        }
        Ok(self.supertypes(subtype)?.contains(supertype))
    }

    /// Whether two types share at least one possible runtime object type.
    pub fn types_overlap(&self, a: &str, b: &str) -> Result<bool, IrError> {
        let possible_a = self.possible_types(a)?;
        Ok(self
            .possible_types(b)?
            .iter()
            .any(|object| possible_a.contains(object)))
    }

    fn type_name(&self, name: &str) -> Result<Name, IrError> {
        self.schema
            .types
            .get_key_value(name)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| IrError::unknown_type(name))
    }
}
