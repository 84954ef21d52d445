//! Logic for loading configuration in to an object model
use std::str::FromStr;
use std::time::Duration;

use derivative::Derivative;
use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::graphql::OperationKind;

/// Configuration error.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// schema has no root type for {0} operations
    MissingRootType(OperationKind),
    /// root type '{type_name}' has no field '{field_name}'
    MissingRootField {
        type_name: String,
        field_name: String,
    },
    /// could not determine which operation to delegate
    MissingOperation,
    /// could not determine the field to delegate
    MissingFieldName,
    /// no subscriber available for subscription field '{0}'
    MissingSubscriber(String),
    /// invalid GraphQL name '{0}'
    InvalidName(String),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of a [`crate::Delegator`].
///
/// Can be created through `serde::Deserialize` from various formats,
/// or parsed from YAML with [`FromStr`].
#[derive(Clone, Derivative, Deserialize, Serialize, JsonSchema, Default)]
#[derivative(Debug)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Request batching towards endpoints.
    pub batching: Batching,

    /// Validation of delegated requests against their target schema.
    pub validation: Validation,
}

/// Batching defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Batching {
    /// Batch calls to endpoints that do not set their own flag; defaults to false.
    pub enabled: bool,

    /// How long a batch queue collects calls before it is flushed. When unset the queue is
    /// flushed once the calls issued in the current scheduling turn are enqueued.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>", default)]
    pub window: Option<Duration>,

    /// Maximum number of calls merged into one physical execution.
    pub max_batch_size: Option<usize>,
}

/// Validation settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Validation {
    /// Skip validating delegated requests against the target schema.
    pub skip: bool,
}

impl Configuration {
    /// Generate a JSON schema for the configuration.
    pub fn generate_schema() -> RootSchema {
        let settings = SchemaSettings::draft2019_09().with(|s| {
            s.option_nullable = true;
            s.option_add_null_type = false;
            s.inline_subschemas = true;
        });
        settings.into_generator().into_root_schema_for::<Configuration>()
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Configuration::default());
        }
        serde_yaml::from_str(s).map_err(|e| ConfigurationError::InvalidConfiguration {
            message: "failed to parse yaml",
            error: e.to_string(),
        })
    }
}
