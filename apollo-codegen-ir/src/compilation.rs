//! The validated input the IR is built from.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::executable::Fragment;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::validation::Valid;

use crate::error::IrError;

/// One executable document and the source it was parsed from.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub source: String,
    pub document: Valid<ExecutableDocument>,
}

/// A schema and the documents validated against it, as produced by the frontend.
///
/// Every document is validated on its own, so fragments must be defined in the document that
/// spreads them. Operations and fragments are looked up across all documents, with the first
/// definition of a name winning.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    schema: Valid<Schema>,
    documents: Vec<SourceDocument>,
}

impl CompilationResult {
    pub fn new(schema: Valid<Schema>) -> Self {
        Self {
            schema,
            documents: Vec::new(),
        }
    }

    /// Parses and validates a schema and a list of `(path, source)` documents.
    pub fn parse<'a>(
        schema_sdl: &str,
        documents: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, IrError> {
        let schema = Schema::parse_and_validate(schema_sdl, "schema.graphql").map_err(|e| {
            IrError::InvalidGraphQL {
                message: e.errors.to_string(),
            }
        })?;
        let mut result = Self::new(schema);
        for (path, source) in documents {
            let document = ExecutableDocument::parse_and_validate(&result.schema, source, path)
                .map_err(|e| IrError::InvalidGraphQL {
                    message: e.errors.to_string(),
                })?;
            result.add_document(path, source, document);
        }
        Ok(result)
    }

    pub fn add_document(
        &mut self,
        path: impl Into<String>,
        source: impl Into<String>,
        document: Valid<ExecutableDocument>,
    ) {
        self.documents.push(SourceDocument {
            path: path.into(),
            source: source.into(),
            document,
        });
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub fn documents(&self) -> &[SourceDocument] {
        &self.documents
    }

    /// Every operation with the document defining it, in document order.
    pub fn operations(&self) -> impl Iterator<Item = (&SourceDocument, &Node<Operation>)> {
        self.documents.iter().flat_map(|document| {
            document
                .document
                .operations
                .iter()
                .map(move |operation| (document, operation))
        })
    }

    /// Every fragment with the document defining it. Later redefinitions of a name are skipped.
    pub fn fragments(&self) -> impl Iterator<Item = (&SourceDocument, &Node<Fragment>)> {
        let mut seen = IndexSet::default();
        self.documents
            .iter()
            .flat_map(|document| {
                document
                    .document
                    .fragments
                    .values()
                    .map(move |fragment| (document, fragment))
            })
            .filter(move |(_, fragment)| seen.insert(fragment.name.clone()))
    }

    pub fn fragment(&self, name: &str) -> Option<(&SourceDocument, &Node<Fragment>)> {
        self.documents.iter().find_map(|document| {
            document
                .document
                .fragments
                .get(name)
                .map(|fragment| (document, fragment))
        })
    }

    /// Looks up an operation by name, or the first anonymous operation if `name` is `None`.
    pub fn operation(&self, name: Option<&str>) -> Option<(&SourceDocument, &Node<Operation>)> {
        self.operations().find(|(_, operation)| {
            operation.name.as_ref().map(Name::as_str) == name
        })
    }

    /// The query, mutation and subscription root type names that are defined.
    pub fn root_types(&self) -> Vec<Name> {
        let root = &self.schema.schema_definition;
        [&root.query, &root.mutation, &root.subscription]
            .into_iter()
            .flatten()
            .map(|component| component.name.clone())
            .collect()
    }

    /// Every named type selected on or returned by a field in any document, in order of first
    /// reference.
    pub fn referenced_types(&self) -> IndexSet<Name> {
        let mut types = IndexSet::default();
        for (_, operation) in self.operations() {
            collect_referenced_types(&operation.selection_set, &mut types);
        }
        for (_, fragment) in self.fragments() {
            collect_referenced_types(&fragment.selection_set, &mut types);
        }
        types
    }
}

fn collect_referenced_types(selection_set: &SelectionSet, types: &mut IndexSet<Name>) {
    types.insert(selection_set.ty.clone());
    for selection in &selection_set.selections {
        match selection {
            Selection::Field(field) => {
                types.insert(field.ty().inner_named_type().clone());
                collect_referenced_types(&field.selection_set, types);
            }
            Selection::InlineFragment(inline) => {
                collect_referenced_types(&inline.selection_set, types);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}
