use apollo_codegen_ir::IrError;
use apollo_codegen_ir::MergingStrategy;
use apollo_codegen_ir::merge::MergeOrigin;
use pretty_assertions::assert_eq;

use crate::ir_support::builder;
use crate::ir_support::builder_assuming_valid;
use crate::ir_support::field_keys;
use crate::ir_support::selection_set;

#[test]
fn merges_fields_from_fragment_spread_on_ancestor() {
    let builder = builder(
        r#"
        query Q { owner { name } ...OwnerAge }
        fragment OwnerAge on Query { owner { age } }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let owner = selection_set(operation.selection_set(), &["owner"]);
    let computed = builder.computed_selection_set(owner).unwrap();

    assert_eq!(field_keys(&computed), ["name", "age"]);
    assert_eq!(computed.merged_sources().len(), 1);
    assert_eq!(
        computed.merged_sources()[0].fragment().map(|name| name.as_str()),
        Some("OwnerAge")
    );
    assert!(computed.referenced_source().is_none());
}

#[test]
fn merges_sibling_type_cases_matched_by_the_target() {
    let builder = builder(
        r#"
        query Q {
          pet {
            ... on Dog { bark }
            ... on Animal { species }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    let computed = builder.computed_selection_set(dog).unwrap();

    insta::assert_snapshot!(computed.to_string(), @r###"
    {
      bark
      species
    }
    "###);
    assert_eq!(computed.merged_sources().len(), 1);
    assert!(computed.merged_sources()[0].origin.is_sibling());

    // `Dog` narrows `Animal`, so the `Animal` case can branch into it.
    let animal = &pet.inline_fragment_on("Animal").unwrap().selection_set;
    let computed = builder.computed_selection_set(animal).unwrap();
    assert_eq!(field_keys(&computed), ["species"]);
    let branch = computed.inline_fragment_on("Dog").unwrap();
    assert!(branch.selection_set.is_merged_only());
}

#[test]
fn merging_strategy_selects_sources() {
    let builder = builder(
        r#"
        query Q {
          pet {
            name
            ... on Dog { bark }
            ... on Animal { species }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;

    let none = builder
        .computed_selection_set_with(dog, MergingStrategy::empty())
        .unwrap();
    assert_eq!(field_keys(&none), ["bark"]);
    assert!(none.merged_sources().is_empty());

    let ancestors = builder
        .computed_selection_set_with(dog, MergingStrategy::ANCESTORS)
        .unwrap();
    assert_eq!(field_keys(&ancestors), ["bark", "name"]);

    let siblings = builder
        .computed_selection_set_with(dog, MergingStrategy::SIBLINGS)
        .unwrap();
    assert_eq!(field_keys(&siblings), ["bark", "species"]);

    let all = builder.computed_selection_set(dog).unwrap();
    assert_eq!(field_keys(&all), ["bark", "name", "species"]);
    assert_eq!(all.strategy(), MergingStrategy::all());
}

#[test]
fn merges_entity_fields_of_ancestors_into_nested_selection_sets() {
    let builder = builder(
        r#"
        query Q {
          pet {
            owner { name }
            ... on Dog { owner { age } }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    let owner = selection_set(dog, &["owner"]);
    let computed = builder.computed_selection_set(owner).unwrap();

    assert_eq!(field_keys(&computed), ["age", "name"]);
    assert!(computed.merged_sources()[0].origin.is_ancestor());
}

#[test]
fn merged_only_selection_set_references_its_single_source() {
    let builder = builder(
        r#"
        query Q {
          pet {
            owner { name }
            ... on Dog { bark }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    let computed = builder.computed_selection_set(dog).unwrap();
    assert_eq!(field_keys(&computed), ["bark", "owner"]);

    let owner = computed.field("owner").and_then(|field| field.selection_set()).unwrap();
    assert!(owner.is_merged_only());
    assert_eq!(owner.parent_type().as_str(), "Owner");

    let computed = builder.computed_selection_set(owner).unwrap();
    assert_eq!(field_keys(&computed), ["name"]);
    let source = computed.referenced_source().unwrap();
    assert_eq!(source.origin, MergeOrigin::Ancestor);
    assert_eq!(source.type_info.parent_type().as_str(), "Owner");
}

#[test]
fn fragment_on_narrower_type_becomes_a_merged_type_case() {
    let builder = builder(
        r#"
        query Q { pet { name ...DogBark } }
        fragment DogBark on Dog { bark }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let computed = builder.computed_selection_set(pet).unwrap();

    assert_eq!(field_keys(&computed), ["name"]);
    assert!(computed.named_fragment("DogBark").is_some());
    let dog = computed.inline_fragment_on("Dog").unwrap();
    assert!(dog.selection_set.is_merged_only());

    let computed = builder.computed_selection_set(&dog.selection_set).unwrap();
    assert_eq!(field_keys(&computed), ["name", "bark"]);
    assert!(computed.named_fragment("DogBark").is_some());
    let origins: Vec<_> = computed
        .merged_sources()
        .iter()
        .map(|source| source.origin.clone())
        .collect();
    assert_eq!(
        origins,
        [
            MergeOrigin::Ancestor,
            MergeOrigin::NamedFragment(apollo_compiler::name!("DogBark"))
        ]
    );
    assert!(computed.referenced_source().is_none());
}

#[test]
fn merges_fragments_referenced_by_fragments() {
    let builder = builder(
        r#"
        query Q { pet { ...PetDetails } }
        fragment PetDetails on Pet { name ...PetOwner }
        fragment PetOwner on Pet { owner { name } }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let referenced: Vec<_> = operation
        .referenced_fragments()
        .map(|fragment| fragment.name.as_str())
        .collect();
    assert_eq!(referenced, ["PetDetails", "PetOwner"]);

    let pet = selection_set(operation.selection_set(), &["pet"]);
    let computed = builder.computed_selection_set(pet).unwrap();
    assert_eq!(field_keys(&computed), ["name", "owner"]);
    let fragments: Vec<_> = computed
        .named_fragments()
        .map(|spread| spread.name().as_str())
        .collect();
    assert_eq!(fragments, ["PetDetails", "PetOwner"]);

    let owner = computed.field("owner").and_then(|field| field.selection_set()).unwrap();
    let computed = builder.computed_selection_set(owner).unwrap();
    assert_eq!(field_keys(&computed), ["name"]);
    assert_eq!(
        computed.referenced_source().and_then(|source| source.fragment()).map(|name| name.as_str()),
        Some("PetOwner")
    );
}

#[test]
fn selections_from_two_spreads_share_one_entity() {
    let builder = builder(
        r#"
        query Q { ...A ...B }
        fragment A on Query { owner { name } }
        fragment B on Query { owner { age } }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let computed = builder
        .computed_selection_set(operation.selection_set())
        .unwrap();
    assert_eq!(field_keys(&computed), ["owner"]);

    let owner = computed.field("owner").and_then(|field| field.selection_set()).unwrap();
    let location = owner.type_info.entity().location();
    assert_eq!(location.to_string(), "query Q.owner");
    let entity = builder.entity(location).unwrap();
    assert!(std::sync::Arc::ptr_eq(&entity, owner.type_info.entity()));

    let computed = builder.computed_selection_set(owner).unwrap();
    assert_eq!(field_keys(&computed), ["name", "age"]);
    assert_eq!(computed.merged_sources().len(), 2);
    assert!(
        computed
            .merged_sources()
            .iter()
            .all(|source| std::sync::Arc::ptr_eq(source.type_info.entity(), &entity))
    );
}

#[test]
fn conditions_implied_by_the_scope_are_dropped_from_merged_fields() {
    let builder = builder(
        r#"
        query Q($a: Boolean!) {
          pet {
            name @include(if: $a)
            ... @include(if: $a) { owner { name } }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    assert_eq!(
        pet.field("name").unwrap().inclusion_conditions().unwrap().to_string(),
        "$a"
    );

    let computed = builder.computed_selection_set(pet).unwrap();
    let branch = computed.inline_fragments().next().unwrap();
    assert_eq!(branch.condition().to_string(), "@if($a)");

    let computed = builder
        .computed_selection_set(&branch.selection_set)
        .unwrap();
    insta::assert_snapshot!(computed.to_string(), @r###"
    {
      owner
      name
    }
    "###);
    assert!(computed.field("name").unwrap().inclusion_conditions().is_none());
}

#[test]
fn deprecation_reason_is_carried_on_fields() {
    let builder = builder(
        r#"
        query Q { pet { ... on Cat { meow } ... on Dog { bark } } }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let cat = &pet.inline_fragment_on("Cat").unwrap().selection_set;
    let meow = cat.field("meow").unwrap();
    assert_eq!(
        meow.info().deprecation_reason.as_deref(),
        Some("Cats no longer meow")
    );
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    assert_eq!(dog.field("bark").unwrap().info().deprecation_reason, None);

    // Disjoint type cases never merge into each other.
    let computed = builder.computed_selection_set(cat).unwrap();
    assert_eq!(field_keys(&computed), ["meow"]);
    assert_eq!(computed.inline_fragments().count(), 0);
}

#[test]
fn unconditional_sources_widen_direct_field_conditions() {
    let builder = builder(
        r#"
        query Q($a: Boolean!) {
          pet {
            name
            ... on Dog { name @include(if: $a) bark }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    assert!(dog.field("name").unwrap().inclusion_conditions().is_some());

    let computed = builder.computed_selection_set(dog).unwrap();
    insta::assert_snapshot!(computed.to_string(), @r###"
    {
      name
      bark
    }
    "###);
    assert_eq!(computed.field("name").unwrap().inclusion_conditions(), None);
    assert!(computed.merged_sources()[0].origin.is_ancestor());
}

#[test]
fn conditional_sources_add_alternatives_to_direct_field_conditions() {
    let builder = builder(
        r#"
        query Q($a: Boolean!, $b: Boolean!) {
          pet {
            name @include(if: $b)
            ... on Dog { name @include(if: $a) }
          }
        }
        "#,
    );
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;
    let computed = builder.computed_selection_set(dog).unwrap();
    let names: Vec<_> = computed.fields().map(ToString::to_string).collect();
    assert_eq!(names, ["name @if($a || $b)"]);
}

#[test]
fn type_case_conflicting_with_an_ancestor_is_rejected() {
    let builder = builder_assuming_valid("query Q { pet { n: name ... on Dog { n: bark } } }");
    let operation = builder.build_operation(Some("Q")).unwrap();
    let pet = selection_set(operation.selection_set(), &["pet"]);
    let dog = &pet.inline_fragment_on("Dog").unwrap().selection_set;

    assert_eq!(
        builder.computed_selection_set(dog).unwrap_err(),
        IrError::FieldConflict {
            response_key: apollo_compiler::name!("n"),
            parent_type: apollo_compiler::name!("Dog"),
            existing: "bark: String".to_owned(),
            incoming: "name: String".to_owned(),
        }
    );
    assert!(builder.computed_selection_set(dog).is_err());
}
