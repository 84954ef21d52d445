//! Delegates the resolution of fields of a composed GraphQL schema to the subschemas it is
//! built from, batches the resulting calls per endpoint and stitches their results back.

#![warn(unreachable_pub)]

pub mod json_ext;

pub mod batching;
mod configuration;
mod context;
pub mod delegate;
pub mod error;
pub mod executor;
pub mod external;
pub mod graphql;
pub mod resolve_info;
pub mod subschema;
pub mod transform;

pub use configuration::Batching;
pub use configuration::Configuration;
pub use configuration::Validation;
pub use context::Context;
pub use context::Extensions;
pub use context::ExtensionsGuard;
pub use delegate::DelegateOptions;
pub use delegate::DelegateRequestOptions;
pub use delegate::DelegationContext;
pub use delegate::DelegationOutput;
pub use delegate::Delegator;
pub use error::ConfigurationError;
pub use error::DelegationError;
pub use external::ExternalObject;
pub use external::ExternalValue;
pub use external::default_merged_resolver;
pub use resolve_info::ResolveInfo;
pub use subschema::Subschema;
pub use subschema::SubschemaRef;
