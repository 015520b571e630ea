//! Intermediate representation for GraphQL client code generation.
//!
//! Given a validated schema and executable documents, [`IrBuilder`] produces a tree of
//! [`Operation`]s and [`NamedFragment`]s describing the selections exactly as written, and
//! computes on demand the [`ComputedSelectionSet`] of any selection set in it: every field,
//! type-condition branch and fragment visible on the generated response type once selections
//! from ancestors, matching siblings and spread fragments are merged in.
//!
//! ```rust
//! use apollo_codegen_ir::CompilationResult;
//! use apollo_codegen_ir::IrBuilder;
//!
//! let compilation = CompilationResult::parse(
//!     "type Query { hero: Hero } type Hero { name: String, age: Int }",
//!     [("hero.graphql", "query Hero { hero { name ...Age } } fragment Age on Hero { age }")],
//! )?;
//! let builder = IrBuilder::new(compilation);
//! let operation = builder.build_operation(Some("Hero"))?;
//! let hero = operation.selection_set().field("hero").and_then(|field| field.selection_set());
//! let computed = builder.computed_selection_set(hero.unwrap())?;
//! let fields: Vec<_> = computed.fields().map(|field| field.response_key().as_str()).collect();
//! assert_eq!(fields, ["name", "age"]);
//! # Ok::<(), apollo_codegen_ir::error::IrError>(())
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

mod builder;
pub mod compilation;
mod config;
pub mod entity;
pub mod error;
pub mod inclusion;
pub mod ir;
pub mod merge;
pub mod schema;
pub mod scope;
pub(crate) mod utils;

pub use crate::builder::IrBuilder;
pub use crate::compilation::CompilationResult;
pub use crate::compilation::SourceDocument;
pub use crate::config::IrConfig;
pub use crate::error::IrError;
pub use crate::ir::Ir;
pub use crate::ir::NamedFragment;
pub use crate::ir::Operation;
pub use crate::merge::ComputedSelectionSet;
pub use crate::merge::MergingStrategy;
