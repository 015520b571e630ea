//! `@include`/`@skip` condition algebra.

use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::ast::DirectiveList;
use apollo_compiler::ast::Value;
use indexmap::IndexMap;
use indexmap::map::Entry;
use itertools::Itertools;
use serde::Serialize;

use crate::error::IrError;

pub(crate) const INCLUDE_DIRECTIVE_NAME: &str = "include";
pub(crate) const SKIP_DIRECTIVE_NAME: &str = "skip";

/// The statically known result of evaluating a set of `@include`/`@skip` directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Conditions {
    Variables(InclusionConditions),
    /// `true` if always included, `false` if always skipped.
    Boolean(bool),
}

/// A single variable condition. `@include(if: $a)` is `$a`, `@skip(if: $a)` is `!$a`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InclusionCondition {
    pub variable: Name,
    pub is_inverted: bool,
}

/// A non-empty conjunction of variable conditions, represented as a map from variable names to
/// whether that variable is inverted. There is at most one condition per variable name: a
/// variable together with its own inversion collapses to [`Conditions::Boolean(false)`] when
/// the set is constructed.
///
/// Equality and hashing do not depend on the order the conditions were written in.
#[derive(Debug, Clone, Serialize)]
pub struct InclusionConditions(Arc<IndexMap<Name, bool>>);

impl InclusionCondition {
    pub fn new(variable: Name, is_inverted: bool) -> Self {
        Self {
            variable,
            is_inverted,
        }
    }

    pub fn inverted(&self) -> Self {
        Self::new(self.variable.clone(), !self.is_inverted)
    }
}

impl Display for InclusionCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_inverted {
            write!(f, "!${}", self.variable)
        } else {
            write!(f, "${}", self.variable)
        }
    }
}

impl InclusionConditions {
    /// Combines the conditions with AND.
    pub fn all_of(conditions: impl IntoIterator<Item = InclusionCondition>) -> Conditions {
        let mut variables: Option<IndexMap<Name, bool>> = None;
        for condition in conditions {
            match variables
                .get_or_insert_with(IndexMap::new)
                .entry(condition.variable)
            {
                Entry::Occupied(entry) => {
                    if *entry.get() != condition.is_inverted {
                        return Conditions::Boolean(false);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(condition.is_inverted);
                }
            }
        }
        match variables {
            Some(map) => Conditions::Variables(Self(Arc::new(map))),
            None => Conditions::Boolean(true),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: conditions are never empty once constructed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = InclusionCondition> + '_ {
        self.0
            .iter()
            .map(|(variable, is_inverted)| InclusionCondition::new(variable.clone(), *is_inverted))
    }

    pub fn contains(&self, condition: &InclusionCondition) -> bool {
        self.0.get(&condition.variable) == Some(&condition.is_inverted)
    }

    /// Whether every condition of `self` is also in `other`, i.e. `other` implies `self`.
    pub fn is_subset(&self, other: &InclusionConditions) -> bool {
        self.0
            .iter()
            .all(|(variable, inverted)| other.0.get(variable) == Some(inverted))
    }

    /// Conjunction with another set of conditions.
    pub fn merge(&self, other: &InclusionConditions) -> Conditions {
        Self::all_of(self.iter().chain(other.iter()))
    }

    /// Removes the conditions already implied by `scope`. Returns `None` if nothing is left,
    /// meaning no runtime check is needed within that scope.
    pub fn removing_matched(&self, scope: Option<&InclusionConditions>) -> Option<Self> {
        let Some(scope) = scope else {
            return Some(self.clone());
        };
        let remaining: IndexMap<Name, bool> = self
            .0
            .iter()
            .filter(|(variable, inverted)| scope.0.get(*variable) != Some(*inverted))
            .map(|(variable, inverted)| (variable.clone(), *inverted))
            .collect();
        if remaining.is_empty() {
            None
        } else if remaining.len() == self.len() {
            Some(self.clone())
        } else {
            Some(Self(Arc::new(remaining)))
        }
    }

    fn sorted_entries(&self) -> Vec<(&Name, &bool)> {
        self.0
            .iter()
            .sorted_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()))
            .collect()
    }
}

impl PartialEq for InclusionConditions {
    fn eq(&self, other: &Self) -> bool {
        // `IndexMap` equality ignores insertion order.
        self.0 == other.0
    }
}

impl Eq for InclusionConditions {}

impl Hash for InclusionConditions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sorted_entries().hash(state);
    }
}

impl Display for InclusionConditions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.iter().join(" && "))
    }
}

impl Conditions {
    pub fn from_directives(directives: &DirectiveList) -> Result<Self, IrError> {
        let mut conditions = Vec::new();
        for directive in directives.iter() {
            let is_inverted = match directive.name.as_str() {
                INCLUDE_DIRECTIVE_NAME => false,
                SKIP_DIRECTIVE_NAME => true,
                _ => continue,
            };
            let Some(value) = directive.specified_argument_by_name("if") else {
                return Err(IrError::InvalidConditionArgument {
                    directive: directive.name.clone(),
                    value: "nothing".to_owned(),
                });
            };
            match &**value {
                Value::Boolean(false) if !is_inverted => return Ok(Self::Boolean(false)),
                Value::Boolean(true) if is_inverted => return Ok(Self::Boolean(false)),
                Value::Boolean(_) => {}
                Value::Variable(name) => {
                    conditions.push(InclusionCondition::new(name.clone(), is_inverted));
                }
                _ => {
                    return Err(IrError::InvalidConditionArgument {
                        directive: directive.name.clone(),
                        value: (**value).to_string(),
                    });
                }
            }
        }
        Ok(InclusionConditions::all_of(conditions))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Boolean(false))
    }

    pub fn is_always_included(&self) -> bool {
        matches!(self, Self::Boolean(true))
    }

    /// The variable conditions, if these conditions depend on any variable.
    pub fn variables(&self) -> Option<&InclusionConditions> {
        match self {
            Self::Variables(variables) => Some(variables),
            Self::Boolean(_) => None,
        }
    }

    pub fn into_variables(self) -> Option<InclusionConditions> {
        match self {
            Self::Variables(variables) => Some(variables),
            Self::Boolean(_) => None,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            // Absorbing element
            (Conditions::Boolean(false), _) | (_, Conditions::Boolean(false)) => {
                Conditions::Boolean(false)
            }

            // Neutral element
            (Conditions::Boolean(true), x) | (x, Conditions::Boolean(true)) => x,

            (Conditions::Variables(self_vars), Conditions::Variables(other_vars)) => {
                self_vars.merge(&other_vars)
            }
        }
    }
}

impl From<InclusionConditions> for Conditions {
    fn from(value: InclusionConditions) -> Self {
        Self::Variables(value)
    }
}

impl Display for Conditions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variables(variables) => variables.fmt(f),
            Self::Boolean(value) => value.fmt(f),
        }
    }
}

/// A disjunction of condition groups.
///
/// This is never flattened into a single conjunction: code emission renders it as an `||` of
/// `&&` groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AnyOf<T>(Vec<T>);

impl<T> AnyOf<T> {
    pub fn new(first: T) -> Self {
        Self(vec![first])
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AnyOf<InclusionConditions> {
    /// Adds an alternative. A group implied by an existing group is redundant and dropped, and
    /// existing groups implied by the new one are replaced.
    pub fn or(mut self, conditions: InclusionConditions) -> Self {
        if self.0.iter().any(|existing| existing.is_subset(&conditions)) {
            return self;
        }
        self.0.retain(|existing| !conditions.is_subset(existing));
        self.0.push(conditions);
        self
    }

    /// Combines two optional disjunctions where `None` means "unconditional".
    pub fn union(lhs: Option<Self>, rhs: Option<Self>) -> Option<Self> {
        let (lhs, rhs) = (lhs?, rhs?);
        Some(rhs.0.into_iter().fold(lhs, Self::or))
    }

    /// Whether at least one group can hold together with `scope`.
    pub fn is_satisfiable_in(&self, scope: Option<&InclusionConditions>) -> bool {
        self.0
            .iter()
            .any(|group| !contradicts(group, scope))
    }

    /// Removes conditions implied by `scope` from every group and drops the groups that
    /// contradict it. If any group is fully implied, the whole disjunction is satisfied and
    /// `None` is returned.
    ///
    /// Callers check [`AnyOf::is_satisfiable_in`] first: a disjunction with no satisfiable group
    /// also yields `None`.
    pub fn removing_matched(&self, scope: Option<&InclusionConditions>) -> Option<Self> {
        let mut result: Option<Self> = None;
        for group in self.0.iter().filter(|group| !contradicts(group, scope)) {
            let remaining = group.removing_matched(scope)?;
            result = Some(match result {
                Some(result) => result.or(remaining),
                None => Self::new(remaining),
            });
        }
        result
    }
}

fn contradicts(conditions: &InclusionConditions, scope: Option<&InclusionConditions>) -> bool {
    scope.is_some_and(|scope| scope.merge(conditions).is_skipped())
}

impl From<InclusionConditions> for AnyOf<InclusionConditions> {
    fn from(value: InclusionConditions) -> Self {
        Self::new(value)
    }
}

impl Display for AnyOf<InclusionConditions> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let [single] = self.0.as_slice() {
            return single.fmt(f);
        }
        let groups = self.0.iter().map(|group| {
            if group.len() > 1 {
                format!("({group})")
            } else {
                group.to_string()
            }
        });
        write!(f, "{}", groups.format(" || "))
    }
}
