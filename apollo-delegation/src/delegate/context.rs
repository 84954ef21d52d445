use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use derivative::Derivative;

use super::DelegateRequestOptions;
use crate::configuration::ConfigurationError;
use crate::context::Context;
use crate::graphql::OperationKind;
use crate::json_ext::Object;
use crate::resolve_info::ResolveInfo;
use crate::resolve_info::collect_fields;
use crate::resolve_info::field_type;
use crate::resolve_info::response_key;
use crate::subschema::SubschemaRef;
use crate::transform::Transform;

/// Everything known about one delegated call, computed once before the request is sent.
#[derive(Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct DelegationContext {
    /// The subschema (or backend) the caller delegated to.
    pub subschema: SubschemaRef,
    /// What the call actually targets: the processed version of `subschema` when the
    /// stitching registry has one.
    pub target: SubschemaRef,
    pub operation: OperationKind,
    /// Root field of the delegated operation.
    pub field_name: String,
    /// Key the delegated root field is found under in the backend's response.
    pub response_key: String,
    pub args: Option<Object>,
    pub context: Context,
    pub info: Option<Arc<ResolveInfo>>,
    pub return_type: ast::Type,
    /// Target transforms followed by the caller's.
    #[derivative(Debug = "ignore")]
    pub transforms: Vec<Arc<dyn Transform>>,
    #[derivative(Debug = "ignore")]
    pub transformed_schema: Arc<Valid<Schema>>,
    pub skip_type_merging: bool,
}

impl DelegationContext {
    pub(crate) fn new(options: &DelegateRequestOptions) -> Result<Self, ConfigurationError> {
        let request_operation = options.request.operation();
        let operation = match options.operation {
            Some(operation) => operation,
            None => request_operation
                .map(|op| OperationKind::from(op.operation_type))
                .ok_or(ConfigurationError::MissingOperation)?,
        };

        let fragments = options.request.fragments();
        let root_fields = request_operation
            .map(|op| collect_fields(&op.selection_set, &fragments))
            .unwrap_or_default();
        let field_name = options
            .field_name
            .clone()
            .or_else(|| root_fields.first().map(|field| field.name.to_string()))
            .or_else(|| options.info.as_ref().map(|info| info.field_name().to_string()))
            .ok_or(ConfigurationError::MissingFieldName)?;
        let response_key = root_fields
            .iter()
            .find(|field| field.name == field_name.as_str())
            .map(|field| response_key(field).to_string())
            .or_else(|| {
                options
                    .info
                    .as_ref()
                    .map(|info| info.response_key().to_string())
            })
            .unwrap_or_else(|| field_name.clone());

        let stitching_info = options
            .info
            .as_ref()
            .and_then(|info| info.stitching_info.as_ref());
        let target = match &options.subschema {
            SubschemaRef::Subschema(subschema) => SubschemaRef::Subschema(
                stitching_info
                    .map(|stitching| stitching.processed(subschema))
                    .unwrap_or_else(|| subschema.clone()),
            ),
            SubschemaRef::Backend(backend) => SubschemaRef::Backend(backend.clone()),
        };

        let transforms = target
            .as_subschema()
            .map(|subschema| subschema.transforms())
            .unwrap_or_default()
            .iter()
            .chain(options.transforms.iter())
            .cloned()
            .collect();
        let transformed_schema = options
            .transformed_schema
            .clone()
            .or_else(|| {
                target
                    .as_subschema()
                    .map(|subschema| subschema.transformed_schema().clone())
            })
            .unwrap_or_else(|| target.schema().clone());

        let return_type = match options
            .return_type
            .clone()
            .or_else(|| options.info.as_ref().map(|info| info.return_type.clone()))
        {
            Some(return_type) => return_type,
            None => {
                let schema = target.schema();
                let root_type = schema
                    .root_operation(operation.into())
                    .ok_or(ConfigurationError::MissingRootType(operation))?;
                field_type(schema, root_type, &field_name)?
            }
        };

        Ok(Self {
            subschema: options.subschema.clone(),
            target,
            operation,
            field_name,
            response_key,
            args: options.args.clone(),
            context: options.context.clone(),
            info: options.info.clone(),
            return_type,
            transforms,
            transformed_schema,
            skip_type_merging: options.skip_type_merging,
        })
    }

    /// Absolute path of the delegating field in the outer response, if known.
    pub fn path(&self) -> Option<&crate::json_ext::Path> {
        self.info.as_ref().map(|info| &info.path)
    }
}
