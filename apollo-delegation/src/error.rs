//! Delegation errors.
use std::sync::Arc;

use apollo_compiler::response::GraphQLError as CompilerGraphQLError;
use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::WithErrors;
use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tower::BoxError;

pub use crate::configuration::ConfigurationError;
use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::graphql::IntoGraphQLErrors;
use crate::graphql::Location as ErrorLocation;

/// Errors raised while delegating a field to a subschema.
///
/// Errors found *inside* a backend's response are data and are carried by the result; these
/// are the control-flow failures of a delegated call.
#[derive(Error, Display, Debug, Clone)]
#[non_exhaustive]
pub enum DelegationError {
    /// invalid delegation configuration: {0}
    Configuration(#[from] ConfigurationError),

    /// {0}
    Validation(Error),

    /// request failed validation against the target schema: {0}
    AggregateValidation(ValidationErrors),

    /// executor failed: {0}
    Backend(Arc<BoxError>),

    /// unsupported delegation: {0}
    Unsupported(String),

    /// {0}
    Field(Error),

    /// batching failed: {0}
    Batching(#[from] BatchingError),
}

impl DelegationError {
    /// Wraps an error raised by an executor or subscriber.
    pub fn backend(error: impl Into<BoxError>) -> Self {
        DelegationError::Backend(Arc::new(error.into()))
    }

    /// Builds the validation failure for `errors`: the single cause as-is, or all of them
    /// combined.
    pub fn from_validation(mut errors: ValidationErrors) -> Self {
        if errors.errors.len() == 1 {
            let error = errors.errors.remove(0);
            let mut error = Error::from(error);
            error
                .extensions
                .entry("code")
                .or_insert_with(|| "GRAPHQL_VALIDATION_FAILED".into());
            DelegationError::Validation(error)
        } else {
            DelegationError::AggregateValidation(errors)
        }
    }
}

impl ErrorExtension for DelegationError {
    fn extension_code(&self) -> String {
        match self {
            DelegationError::Configuration(_) => "DELEGATION_CONFIGURATION",
            DelegationError::Validation(_) | DelegationError::AggregateValidation(_) => {
                "GRAPHQL_VALIDATION_FAILED"
            }
            DelegationError::Backend(_) => "DELEGATION_EXECUTION_FAILED",
            DelegationError::Unsupported(_) => "BATCHING_UNSUPPORTED",
            DelegationError::Field(_) => "DELEGATION_FIELD_ERROR",
            DelegationError::Batching(_) => "BATCHING_ERROR",
        }
        .to_string()
    }
}

impl IntoGraphQLErrors for DelegationError {
    fn into_graphql_errors(self) -> Result<Vec<Error>, Self> {
        let code = self.extension_code();
        match self {
            DelegationError::Validation(error) | DelegationError::Field(error) => Ok(vec![error]),
            DelegationError::AggregateValidation(errors) => errors
                .into_graphql_errors()
                .map_err(DelegationError::AggregateValidation),
            other => Ok(vec![
                Error::builder()
                    .message(other.to_string())
                    .extension_code(code)
                    .build(),
            ]),
        }
    }
}

/// Collection of operation validation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<CompilerGraphQLError>,
}

impl IntoGraphQLErrors for ValidationErrors {
    fn into_graphql_errors(self) -> Result<Vec<Error>, Self> {
        Ok(self
            .errors
            .iter()
            .map(|diagnostic| {
                Error::builder()
                    .message(diagnostic.message.to_string())
                    .locations(
                        diagnostic
                            .locations
                            .iter()
                            .map(|loc| ErrorLocation {
                                line: loc.line as u32,
                                column: loc.column as u32,
                            })
                            .collect(),
                    )
                    .extension_code("GRAPHQL_VALIDATION_FAILED")
                    .build()
            })
            .collect())
    }
}

impl From<DiagnosticList> for ValidationErrors {
    fn from(errors: DiagnosticList) -> Self {
        Self {
            errors: errors.iter().map(|e| e.to_json()).collect(),
        }
    }
}

impl<T> From<WithErrors<T>> for ValidationErrors {
    fn from(WithErrors { errors, .. }: WithErrors<T>) -> Self {
        errors.into()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            if let Some(location) = error.locations.first() {
                write!(
                    f,
                    "[{}:{}] {}",
                    location.line, location.column, error.message
                )?;
            } else {
                write!(f, "{}", error.message)?;
            }
        }
        Ok(())
    }
}

/// Error during batched execution
#[derive(Debug, Error, Display, Clone)]
#[non_exhaustive]
pub enum BatchingError {
    /// Sender unavailable
    SenderUnavailable,
    /// Could not merge batched requests: {0}
    Merge(String),
    /// Could not split batched result: {0}
    Split(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler_error(message: &str) -> CompilerGraphQLError {
        CompilerGraphQLError::new(message, None, &Default::default())
    }

    #[test]
    fn single_validation_error_is_surfaced_as_is() {
        let errors = ValidationErrors {
            errors: vec![compiler_error("Cannot query field \"nope\" on type \"Query\".")],
        };
        let DelegationError::Validation(error) = DelegationError::from_validation(errors) else {
            panic!("expected a single validation error");
        };
        assert_eq!(error.message, "Cannot query field \"nope\" on type \"Query\".");
        assert_eq!(
            error.extension_code().as_deref(),
            Some("GRAPHQL_VALIDATION_FAILED")
        );
    }

    #[test]
    fn multiple_validation_errors_are_combined() {
        let errors = ValidationErrors {
            errors: vec![compiler_error("first"), compiler_error("second")],
        };
        let error = DelegationError::from_validation(errors);
        assert_eq!(
            error.to_string(),
            "request failed validation against the target schema: first\nsecond"
        );
        let graphql_errors = error.into_graphql_errors().unwrap();
        assert_eq!(graphql_errors.len(), 2);
        assert!(
            graphql_errors
                .iter()
                .all(|e| e.extension_code().as_deref() == Some("GRAPHQL_VALIDATION_FAILED"))
        );
    }

    #[test]
    fn backend_errors_keep_their_message() {
        let error = DelegationError::backend("connection refused");
        let graphql_errors = error.into_graphql_errors().unwrap();
        assert_eq!(
            graphql_errors[0].message,
            "executor failed: connection refused"
        );
        assert_eq!(
            graphql_errors[0].extension_code().as_deref(),
            Some("DELEGATION_EXECUTION_FAILED")
        );
    }
}
