//! Request and result transforms applied around a delegated call.
//!
//! A [`Transform`] wraps the backend call like a layer: request stages run in declaration
//! order and result stages in reverse, so the last transform to touch the outgoing request is
//! the first to see the incoming result.
use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;

use crate::configuration::ConfigurationError;
use crate::delegate::DelegationContext;
use crate::error::DelegationError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::subschema::Subschema;

mod extract_field;
mod filter_object_fields;

pub use extract_field::ExtractField;
pub use filter_object_fields::FilterObjectFields;

/// Scratch space shared by every stage of one delegated call.
pub type TransformationContext = http::Extensions;

/// Overrides which subschema owns response keys of the delegated result.
///
/// A result stage may insert one in the [`TransformationContext`]; the delegated result object
/// is tagged with it.
#[derive(Clone, Debug, Default)]
pub struct FieldSubschemaMap(pub HashMap<String, Arc<Subschema>>);

/// One layer around a delegated call. Every stage is optional.
pub trait Transform: Send + Sync {
    /// Applied once, when the subschema is built, to produce its transformed schema.
    fn transform_schema(
        &self,
        schema: Arc<Valid<Schema>>,
    ) -> Result<Arc<Valid<Schema>>, ConfigurationError> {
        Ok(schema)
    }

    fn transform_request(
        &self,
        request: Request,
        _delegation: &DelegationContext,
        _context: &mut TransformationContext,
    ) -> Result<Request, DelegationError> {
        Ok(request)
    }

    fn transform_result(
        &self,
        result: Response,
        _delegation: &DelegationContext,
        _context: &mut TransformationContext,
    ) -> Result<Response, DelegationError> {
        Ok(result)
    }
}

/// Runs the transform chain of one delegated call.
pub(crate) struct Transformer {
    delegation: Arc<DelegationContext>,
    context: TransformationContext,
}

impl Transformer {
    pub(crate) fn new(delegation: Arc<DelegationContext>) -> Self {
        Self {
            delegation,
            context: TransformationContext::new(),
        }
    }

    pub(crate) fn transform_request(&mut self, request: Request) -> Result<Request, DelegationError> {
        self.delegation
            .transforms
            .iter()
            .enumerate()
            .try_fold(request, |request, (index, transform)| {
                tracing::trace!(index, "transforming request");
                transform.transform_request(request, &self.delegation, &mut self.context)
            })
    }

    pub(crate) fn transform_result(&mut self, result: Response) -> Result<Response, DelegationError> {
        self.delegation
            .transforms
            .iter()
            .enumerate()
            .rev()
            .try_fold(result, |result, (index, transform)| {
                tracing::trace!(index, "transforming result");
                transform.transform_result(result, &self.delegation, &mut self.context)
            })
    }

    pub(crate) fn field_subschemas(&self) -> Option<&FieldSubschemaMap> {
        self.context.get::<FieldSubschemaMap>()
    }

    pub(crate) fn delegation(&self) -> &Arc<DelegationContext> {
        &self.delegation
    }
}
