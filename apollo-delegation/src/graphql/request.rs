use std::fmt::Display;
use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::context::Context;
use crate::error::ValidationErrors;
use crate::json_ext::Object;
use crate::resolve_info::Fragments;
use crate::resolve_info::ResolveInfo;

/// The kind of a GraphQL operation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl From<OperationKind> for ast::OperationType {
    fn from(value: OperationKind) -> Self {
        match value {
            OperationKind::Query => ast::OperationType::Query,
            OperationKind::Mutation => ast::OperationType::Mutation,
            OperationKind::Subscription => ast::OperationType::Subscription,
        }
    }
}

impl From<ast::OperationType> for OperationKind {
    fn from(value: ast::OperationType) -> Self {
        match value {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// A GraphQL `Request` as it travels through the delegation pipeline.
///
/// Transforms never mutate a request they were handed: each stage returns a new value,
/// sharing the parts it did not touch.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Request {
    /// The operation document.
    pub document: Arc<ast::Document>,

    /// The (optional) name of the operation to run, when the document holds several.
    pub operation_name: Option<String>,

    /// The GraphQL variables in the form of a JSON object.
    pub variables: Object,

    /// Free-form side-channel data sent along with the operation.
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Request {
    /// This is the constructor (or builder) to use when constructing a GraphQL `Request`.
    #[builder(visibility = "pub")]
    fn new(
        document: Arc<ast::Document>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            document,
            operation_name,
            variables,
            extensions,
        }
    }

    /// Parses `source` into a request without variables.
    pub fn parse(source: &str) -> Result<Self, ValidationErrors> {
        let document = ast::Document::parse(source, "request.graphql")?;
        Ok(Self::builder().document(Arc::new(document)).build())
    }

    /// The operation this request runs: the named one, or the only one in the document.
    pub fn operation(&self) -> Option<&Node<ast::OperationDefinition>> {
        let mut operations = self
            .document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            });
        match self.operation_name.as_deref() {
            Some(name) => operations.find(|op| op.name.as_deref() == Some(name)),
            None => {
                let first = operations.next();
                match operations.next() {
                    Some(_) => None,
                    None => first,
                }
            }
        }
    }

    /// The kind of the operation returned by [`Request::operation`].
    pub fn operation_kind(&self) -> Option<OperationKind> {
        self.operation().map(|op| op.operation_type.into())
    }

    /// Fragment definitions of the document, by name.
    pub fn fragments(&self) -> Fragments {
        self.document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => {
                    Some((fragment.name.clone(), fragment.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Returns a copy of this request running `document` instead.
    pub fn with_document(&self, document: ast::Document) -> Self {
        Self {
            document: Arc::new(document),
            ..self.clone()
        }
    }
}

/// A request handed to an executor or subscriber, along with the caller's context and
/// resolution info.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ExecutionRequest {
    pub request: Request,
    pub context: Context,
    pub info: Option<Arc<ResolveInfo>>,
}

#[buildstructor::buildstructor]
impl ExecutionRequest {
    #[builder(visibility = "pub")]
    fn new(request: Request, context: Option<Context>, info: Option<Arc<ResolveInfo>>) -> Self {
        Self {
            request,
            context: context.unwrap_or_default(),
            info,
        }
    }
}
