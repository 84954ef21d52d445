//! A backend answering requests from fixed JSON data.
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::resolvers::Execution;
use apollo_compiler::resolvers::FieldError;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::resolvers::ResolveInfo;
use apollo_compiler::resolvers::ResolvedValue;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::response::JsonMap;
use apollo_compiler::response::JsonValue;
use apollo_compiler::validation::Valid;

use super::Backend;
use super::ExecutorResponse;
use super::Executor;
use crate::graphql;
use crate::graphql::ExecutionRequest;
use crate::json_ext::Value;

/// A [`Backend`] that executes operations against a schema and fixed root data.
///
/// Objects in the data are resolved field by field; their type is read from a `__typename`
/// key, or from the field definition when absent. Arguments are ignored.
///
/// ```yaml
/// query:
///   user:
///     name: "Ada"
///     friends:
///       - name: "Grace"
/// ```
#[derive(Clone, Debug)]
pub struct StaticBackend {
    schema: Arc<Valid<Schema>>,
    query: Arc<JsonMap>,
    mutation: Option<Arc<JsonMap>>,
}

#[buildstructor::buildstructor]
impl StaticBackend {
    #[builder(visibility = "pub")]
    fn new(schema: Arc<Valid<Schema>>, query: Option<JsonMap>, mutation: Option<JsonMap>) -> Self {
        Self {
            schema,
            query: Arc::new(query.unwrap_or_default()),
            mutation: mutation.map(Arc::new),
        }
    }
}

impl Backend for StaticBackend {
    fn schema(&self) -> &Arc<Valid<Schema>> {
        &self.schema
    }

    fn executor(&self, root_value: Option<&Value>) -> Arc<dyn Executor> {
        let query = match root_value {
            Some(Value::Object(root)) => Arc::new(root.clone()),
            _ => self.query.clone(),
        };
        Arc::new(StaticExecutor {
            schema: self.schema.clone(),
            query,
            mutation: self.mutation.clone(),
        })
    }
}

struct StaticExecutor {
    schema: Arc<Valid<Schema>>,
    query: Arc<JsonMap>,
    mutation: Option<Arc<JsonMap>>,
}

impl Executor for StaticExecutor {
    fn execute(&self, request: ExecutionRequest) -> ExecutorResponse {
        let response = self.run(&request.request).unwrap_or_else(|errors| {
            graphql::Response::builder()
                .errors(errors.into_iter().map(Into::into).collect())
                .build()
        });
        ExecutorResponse::ready(response)
    }
}

impl StaticExecutor {
    fn run(&self, request: &graphql::Request) -> Result<graphql::Response, Vec<GraphQLError>> {
        let doc = request
            .document
            .to_executable_validate(&self.schema)
            .map_err(|e| e.errors.iter().map(|e| e.to_json()).collect::<Vec<_>>())?;
        let operation = doc
            .operations
            .get(request.operation_name.as_deref())
            .map_err(|e| vec![e.to_graphql_error(&doc.sources)])?;

        let plain_error = |message: &str| vec![GraphQLError::new(message, None, &doc.sources)];
        let root_data = match operation.operation_type {
            OperationType::Query => &self.query,
            OperationType::Mutation => self
                .mutation
                .as_ref()
                .ok_or_else(|| plain_error("mutation is not supported"))?,
            OperationType::Subscription => return Err(plain_error("subscription not supported")),
        };
        let root_type = self
            .schema
            .root_operation(operation.operation_type)
            .ok_or_else(|| plain_error("schema has no root type for this operation"))?;
        let initial_value = DataResolver {
            type_name: root_type.as_str(),
            data: root_data,
        };
        let result = Execution::new(&self.schema, &doc)
            .operation(operation)
            .raw_variable_values(&request.variables)
            .execute_sync(&initial_value);
        match result {
            Ok(response) => Ok(graphql::Response::builder()
                .data(JsonValue::from(response.data))
                .errors(response.errors.into_iter().map(Into::into).collect())
                .build()),
            Err(request_error) => Err(vec![request_error.to_graphql_error(&doc.sources)]),
        }
    }
}

struct DataResolver<'a> {
    type_name: &'a str,
    data: &'a JsonMap,
}

impl ObjectValue for DataResolver<'_> {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        let field_name = info.field_name();
        let value = self.data.get(field_name).ok_or_else(|| FieldError {
            message: format!("field '{field_name}' not found in data"),
        })?;
        resolve_value(value, info)
    }
}

fn resolve_value<'a>(
    value: &'a JsonValue,
    info: &'a ResolveInfo<'a>,
) -> Result<ResolvedValue<'a>, FieldError> {
    match value {
        JsonValue::Object(map) => Ok(ResolvedValue::object(DataResolver {
            type_name: map
                .get("__typename")
                .and_then(|name| name.as_str())
                .unwrap_or_else(|| info.field_definition().ty.inner_named_type().as_str()),
            data: map,
        })),
        JsonValue::Array(values) => Ok(ResolvedValue::List(Box::new(
            values.iter().map(move |x| resolve_value(x, info)),
        ))),
        json => Ok(ResolvedValue::leaf(json.clone())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::executor::ExecutionOutcome;
    use crate::graphql::Request;

    fn backend() -> StaticBackend {
        let schema = Schema::parse_and_validate(
            "type Query { user: User } type User { name: String friends: [User] } \
             type Mutation { rename(name: String): User }",
            "schema.graphql",
        )
        .unwrap();
        StaticBackend::builder()
            .schema(Arc::new(schema))
            .query(
                json!({ "user": { "name": "Ada", "friends": [{ "name": "Grace" }] } })
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .build()
    }

    async fn run(backend: &StaticBackend, query: &str) -> graphql::Response {
        let request = ExecutionRequest::builder()
            .request(Request::parse(query).unwrap())
            .build();
        match backend.executor(None).execute(request).resolve().await.unwrap() {
            ExecutionOutcome::Single(response) => response,
            ExecutionOutcome::Stream(_) => panic!("expected a single response"),
        }
    }

    #[tokio::test]
    async fn resolves_nested_data_with_aliases() {
        let response = run(&backend(), "{ me: user { name friends { name } } }").await;
        assert_eq!(
            response.data,
            Some(json!({ "me": { "name": "Ada", "friends": [{ "name": "Grace" }] } }))
        );
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn invalid_documents_become_response_errors() {
        let response = run(&backend(), "{ user { age } }").await;
        assert!(response.data.is_none());
        assert_eq!(response.errors.len(), 1);
    }

    #[tokio::test]
    async fn missing_mutation_data_is_reported() {
        let response = run(&backend(), "mutation { rename(name: \"x\") { name } }").await;
        assert_eq!(response.errors[0].message, "mutation is not supported");
    }

    #[tokio::test]
    async fn root_value_replaces_query_data() {
        let backend = backend();
        let root = json!({ "user": { "name": "Root", "friends": [] } });
        let request = ExecutionRequest::builder()
            .request(Request::parse("{ user { name } }").unwrap())
            .build();
        let ExecutionOutcome::Single(response) = backend
            .executor(Some(&root))
            .execute(request)
            .resolve()
            .await
            .unwrap()
        else {
            panic!("expected a single response");
        };
        assert_eq!(response.data, Some(json!({ "user": { "name": "Root" } })));
    }
}
