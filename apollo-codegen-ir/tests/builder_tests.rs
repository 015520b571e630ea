use std::sync::Arc;

use apollo_codegen_ir::CompilationResult;
use apollo_codegen_ir::IrBuilder;
use apollo_codegen_ir::IrConfig;
use apollo_codegen_ir::IrError;
use apollo_codegen_ir::ir::SelectionSet;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::ir_support::SCHEMA;
use crate::ir_support::builder;
use crate::ir_support::builder_assuming_valid;
use crate::ir_support::builder_with_config;
use crate::ir_support::field_keys;
use crate::ir_support::selection_set;

fn direct(selection_set: &SelectionSet) -> String {
    selection_set
        .direct
        .as_ref()
        .map(|direct| direct.to_string())
        .unwrap_or_default()
}

#[test]
fn definition_roots() {
    let builder = builder(
        r#"
        query Q { pet { ...PetName } }
        fragment PetName on Pet { name }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    assert_eq!(operation.root_field.info.name.as_str(), "data");
    assert_eq!(operation.selection_set().parent_type().as_str(), "Query");
    assert_eq!(operation.source, "operations.graphql");

    let fragment = builder.build_fragment("PetName").unwrap();
    assert_eq!(fragment.root_field.info.name.as_str(), "PetName");
    assert_eq!(fragment.type_condition.as_str(), "Pet");
    assert_eq!(direct(fragment.selection_set()), "  name\n");
}

#[test]
fn statically_skipped_selections_are_dropped() {
    let builder = builder(
        r#"
        query Q {
          pet {
            __typename
            name @skip(if: true)
            owner @include(if: false) { name }
            ... on Dog @include(if: false) { bark }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    assert_eq!(direct(pet), "  __typename\n");
}

#[test]
fn contradicting_conditions_eliminate_selections() {
    let builder = builder(
        r#"
        query Q($a: Boolean!) {
          pet {
            name @include(if: $a) @skip(if: $a)
            ... @include(if: $a) {
              owner @skip(if: $a) { name }
            }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    assert!(pet.direct.as_ref().unwrap().is_empty());
    let computed = builder.computed_selection_set(pet).unwrap();
    assert_eq!(computed.fields().count(), 0);
    assert_eq!(computed.inline_fragments().count(), 0);
}

#[test]
fn duplicate_selections_are_combined() {
    let builder = builder(
        r#"
        query Q($a: Boolean!, $b: Boolean!) {
          pet {
            name @include(if: $a)
            name @skip(if: $b)
            ... on Dog { bark }
            ... on Dog { name }
            ... on Pet { owner { name } }
            owner { age }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    assert_eq!(
        direct(pet),
        "  name @if($a || !$b)\n  owner\n  ... on Dog\n"
    );
    assert_eq!(direct(selection_set(pet, &["owner"])), "  name\n  age\n");
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    assert_eq!(direct(dog), "  bark\n  name\n");
}

#[test]
fn conditional_fragment_spreads_are_wrapped() {
    let builder = builder(
        r#"
        query Q($a: Boolean!) { pet { ...PetName @include(if: $a) } }
        fragment PetName on Pet { name }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    assert_eq!(direct(pet), "  ... @if($a)\n");

    let wrapper = pet.direct.as_ref().unwrap().inline_fragments.values().next().unwrap();
    assert_eq!(direct(&wrapper.selection_set), "  ...PetName\n");
    let spread = &wrapper.selection_set.direct.as_ref().unwrap().named_fragments["PetName"];
    assert_eq!(
        spread.inclusion_conditions.as_ref().map(ToString::to_string).as_deref(),
        Some("$a")
    );

    let computed = builder
        .computed_selection_set(&wrapper.selection_set)
        .unwrap();
    assert_eq!(computed.field("name").unwrap().inclusion_conditions(), None);
}

#[test]
fn fragments_are_built_once() {
    let builder = builder(
        r#"
        query One { pet { ...PetName } }
        query Two { owner { pet { ...PetName } } }
        fragment PetName on Pet { name }
        "#,
    );
    let one = builder.build_operation(Some("One")).unwrap();
    let two = builder.build_operation(Some("Two")).unwrap();
    let fragment = builder.build_fragment("PetName").unwrap();

    assert!(Arc::ptr_eq(&one.referenced_fragments["PetName"], &fragment));
    assert!(Arc::ptr_eq(&two.referenced_fragments["PetName"], &fragment));
    assert!(Arc::ptr_eq(&builder.build_operation(Some("One")).unwrap(), &one));

    let pet = selection_set(two.selection_set(), &["owner", "pet"]);
    let spread = &pet.direct.as_ref().unwrap().named_fragments["PetName"];
    assert!(Arc::ptr_eq(&spread.fragment, &fragment));
    assert_eq!(spread.type_info.parent_type().as_str(), "Pet");
    assert_eq!(spread.inclusion_conditions, None);
}

#[test]
fn build_all_keeps_document_order() {
    let builder = builder(
        r#"
        query Two { owner { ...OwnerName } }
        query One { pet { ...PetName } }
        fragment PetName on Pet { name }
        fragment OwnerName on Owner { name }
        "#,
    );
    let ir = builder.build_all().unwrap();
    let operations: Vec<_> = ir
        .operations
        .iter()
        .map(|operation| operation.name.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(operations, ["Two", "One"]);
    let fragments: Vec<_> = ir
        .fragments
        .iter()
        .map(|fragment| fragment.name.as_str())
        .collect();
    assert_eq!(fragments, ["PetName", "OwnerName"]);
    assert!(ir.operation("One").is_some());
    assert!(Arc::ptr_eq(
        ir.fragment("PetName").unwrap(),
        &builder.build_fragment("PetName").unwrap()
    ));
}

#[test]
fn anonymous_operations_of_different_documents_are_kept_apart() {
    let compilation = CompilationResult::parse(
        SCHEMA,
        [("a.graphql", "{ pet { name } }"), ("b.graphql", "{ owner { age } }")],
    )
    .unwrap();
    let builder = IrBuilder::new(compilation);
    let ir = builder.build_all().unwrap();

    let sources: Vec<_> = ir
        .operations
        .iter()
        .map(|operation| operation.source.as_str())
        .collect();
    assert_eq!(sources, ["a.graphql", "b.graphql"]);
    assert!(Arc::ptr_eq(&builder.build_operation(None).unwrap(), &ir.operations[0]));

    let (first, second) = (ir.operations[0].selection_set(), ir.operations[1].selection_set());
    assert!(!Arc::ptr_eq(first.type_info.entity(), second.type_info.entity()));
    assert_eq!(
        second.type_info.entity().location().to_string(),
        "anonymous query"
    );
    let computed = builder.computed_selection_set(second).unwrap();
    assert_eq!(field_keys(&computed), ["owner"]);
}

/// Renders every computed selection set reachable from `selection_set`.
fn render(builder: &IrBuilder, selection_set: &SelectionSet, out: &mut String) {
    let computed = builder.computed_selection_set(selection_set).unwrap();
    out.push_str(&format!("{}\n{computed}\n", selection_set.type_info));
    for field in computed.fields() {
        if let Some(child) = field.selection_set() {
            render(builder, child, out);
        }
    }
    for spread in computed.inline_fragments() {
        render(builder, &spread.selection_set, out);
    }
}

#[test]
fn building_is_deterministic() {
    let document = r#"
        query Q($a: Boolean!) {
          pet {
            name @include(if: $a)
            ... on Dog { bark owner { ...OwnerDetails } }
            ... on Animal { species }
            ...PetOwner
          }
        }
        fragment PetOwner on Pet { owner { name pet { name } } }
        fragment OwnerDetails on Owner { age }
    "#;
    let outputs: Vec<String> = (0..2)
        .map(|_| {
            let builder = builder(document);
            let operation = builder.build_operation(Some("Q")).unwrap();
            let mut out = String::new();
            render(&builder, operation.selection_set(), &mut out);
            out
        })
        .collect();
    assert_eq!(outputs[0], outputs[1]);
    assert!(outputs[0].contains("bark"));
}

#[test]
fn recursion_limit_is_enforced() {
    let config = IrConfig {
        recursion_limit: 2,
        ..Default::default()
    };
    let builder = builder_with_config("query Q { owner { pet { name } } }", config);
    assert_eq!(
        builder.build_operation(Some("Q")).unwrap_err(),
        IrError::RecursionLimitExceeded { limit: 2 }
    );
}

#[rstest]
#[case::operation(Some("Missing"))]
#[case::anonymous(None)]
fn unknown_operations(#[case] name: Option<&str>) {
    let builder = builder("query Q { pet { name } }");
    let error = builder.build_operation(name).unwrap_err();
    assert_eq!(
        error,
        IrError::UnknownOperation {
            name: name.map(str::to_owned)
        }
    );
    assert!(error.is_input_error());
}

#[test]
fn unknown_fragment() {
    let builder = builder("query Q { pet { name } }");
    assert_eq!(
        builder.build_fragment("Missing").unwrap_err(),
        IrError::UnknownFragment {
            name: "Missing".to_owned()
        }
    );
}

#[test]
fn conflicting_fields_are_rejected() {
    let builder = builder_assuming_valid("query Q { pet { n: name n: owner { name } } }");
    let error = builder.build_operation(Some("Q")).unwrap_err();
    let IrError::FieldConflict {
        response_key,
        parent_type,
        ..
    } = error
    else {
        panic!("unexpected error {error}");
    };
    assert_eq!(response_key.as_str(), "n");
    assert_eq!(parent_type.as_str(), "Pet");
}

#[test]
fn builder_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<IrBuilder>();

    let builder = builder(
        r#"
        query One { pet { ...PetName } }
        query Two { owner { pet { ...PetName } } }
        fragment PetName on Pet { name }
        "#,
    );
    let operations = std::thread::scope(|scope| {
        let handles: Vec<_> = ["One", "Two"]
            .into_iter()
            .map(|name| {
                let builder = &builder;
                scope.spawn(move || builder.build_operation(Some(name)).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert!(Arc::ptr_eq(
        &operations[0].referenced_fragments["PetName"],
        &operations[1].referenced_fragments["PetName"]
    ));
}
