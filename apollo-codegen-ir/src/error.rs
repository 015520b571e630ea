//! Errors raised while building or merging the IR.
//!
//! Every error here is fatal for the definition being built: the input is expected to have been
//! validated by the frontend, so an error means either a validation gap or a broken invariant.

use apollo_compiler::Name;
use thiserror::Error;

/// Create an internal error.
///
/// # Example
/// ```rust,ignore
/// use crate::internal_error;
/// use crate::error::IrError;
/// # fn may_be_none() -> Option<()> { None }
///
/// const NAME: &str = "the thing";
/// let result: Result<(), IrError> = may_be_none()
///     .ok_or_else(|| internal_error!("Expected {NAME} to be Some"));
/// ```
#[macro_export]
macro_rules! internal_error {
    ( $( $arg:tt )+ ) => {
        $crate::error::IrError::internal(format!( $( $arg )+ ))
    }
}

/// Break out of the current function, returning an internal error.
///
/// # Example
/// ```rust,ignore
/// use crate::bail;
/// use crate::error::IrError;
/// # fn may_be_none() -> Option<()> { None }
///
/// fn example() -> Result<(), IrError> {
///     bail!("Something went horribly wrong");
///     unreachable!()
/// }
/// #
/// # _ = example();
/// ```
#[macro_export]
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::internal_error!( $( $arg )+ ).into())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum IrError {
    /// A type name that the schema does not define.
    #[error("Unknown type \"{name}\"")]
    UnknownType { name: String },
    #[error("Unknown operation {}", display_operation_name(.name.as_deref()))]
    UnknownOperation { name: Option<String> },
    #[error("Unknown fragment \"{name}\"")]
    UnknownFragment { name: String },
    /// An `if` argument of `@include`/`@skip` that is neither a boolean nor a variable.
    #[error("Expected boolean or variable `if` argument on @{directive}, got {value}")]
    InvalidConditionArgument { directive: Name, value: String },
    #[error("Missing required `label` argument on @defer")]
    MissingDeferLabel,
    #[error("Invalid @defer argument `{argument}`: {value}")]
    InvalidDeferArgument { argument: Name, value: String },
    /// Two selections with the same response key that cannot be merged into one field.
    #[error(
        "Cannot merge field \"{response_key}\" on type \"{parent_type}\": {existing} conflicts with {incoming}"
    )]
    FieldConflict {
        response_key: Name,
        parent_type: Name,
        existing: String,
        incoming: String,
    },
    #[error("Selection processing recursion limit ({limit}) exceeded")]
    RecursionLimitExceeded { limit: usize },
    #[error("Invalid GraphQL input: {message}")]
    InvalidGraphQL { message: String },
    #[error("An internal error has occurred, please report this bug to Apollo.\n\nDetails: {message}")]
    Internal { message: String },
}

fn display_operation_name(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("\"{name}\""),
        None => "(anonymous)".to_owned(),
    }
}

impl IrError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Whether this error was caused by the input rather than by a broken invariant of the
    /// IR itself.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::Internal { .. } | Self::FieldConflict { .. })
    }
}
