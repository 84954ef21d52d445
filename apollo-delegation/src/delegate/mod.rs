//! Delegating the resolution of a field to a subschema.
//!
//! [`Delegator::delegate_to_schema`] builds a request from the field being resolved;
//! [`Delegator::delegate_request`] sends an already built one. Both run the same pipeline:
//! build a [`DelegationContext`], transform the request, validate it, dispatch it through the
//! target's endpoint (batching calls when enabled), transform the result and turn it into an
//! [`ExternalValue`].
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::Instrument;

use crate::batching::BatchRegistry;
use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::context::Context;
use crate::error::DelegationError;
use crate::executor::ExecutionOutcome;
use crate::executor::Executor;
use crate::executor::Subscriber;
use crate::external::ExternalValue;
use crate::external::IncrementalSource;
use crate::external::from_delegation_result;
use crate::graphql::ExecutionRequest;
use crate::graphql::OperationKind;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::resolve_info::ResolveInfo;
use crate::subschema::SubschemaRef;
use crate::transform::Transform;
use crate::transform::Transformer;

mod context;
pub(crate) mod request;
mod validation;

pub use context::DelegationContext;
pub use validation::CompilerValidator;
pub use validation::Validator;

/// Options of [`Delegator::delegate_to_schema`].
#[derive(Clone)]
#[non_exhaustive]
pub struct DelegateOptions {
    pub subschema: SubschemaRef,
    pub context: Context,
    pub info: Arc<ResolveInfo>,
    pub operation: Option<OperationKind>,
    pub operation_name: Option<String>,
    pub field_name: Option<String>,
    pub return_type: Option<ast::Type>,
    pub args: Option<Object>,
    pub transforms: Vec<Arc<dyn Transform>>,
    pub transformed_schema: Option<Arc<Valid<Schema>>>,
    pub root_value: Option<Value>,
    pub skip_validation: Option<bool>,
    pub skip_type_merging: bool,
    pub executor: Option<Arc<dyn Executor>>,
    pub subscriber: Option<Arc<dyn Subscriber>>,
}

#[buildstructor::buildstructor]
impl DelegateOptions {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        subschema: SubschemaRef,
        context: Context,
        info: Arc<ResolveInfo>,
        operation: Option<OperationKind>,
        operation_name: Option<String>,
        field_name: Option<String>,
        return_type: Option<ast::Type>,
        args: Option<Object>,
        transforms: Vec<Arc<dyn Transform>>,
        transformed_schema: Option<Arc<Valid<Schema>>>,
        root_value: Option<Value>,
        skip_validation: Option<bool>,
        skip_type_merging: Option<bool>,
        executor: Option<Arc<dyn Executor>>,
        subscriber: Option<Arc<dyn Subscriber>>,
    ) -> Self {
        Self {
            subschema,
            context,
            info,
            operation,
            operation_name,
            field_name,
            return_type,
            args,
            transforms,
            transformed_schema,
            root_value,
            skip_validation,
            skip_type_merging: skip_type_merging.unwrap_or_default(),
            executor,
            subscriber,
        }
    }
}

/// Options of [`Delegator::delegate_request`].
#[derive(Clone)]
#[non_exhaustive]
pub struct DelegateRequestOptions {
    pub subschema: SubschemaRef,
    pub request: Request,
    pub context: Context,
    pub info: Option<Arc<ResolveInfo>>,
    /// Defaults to the kind of the request's operation.
    pub operation: Option<OperationKind>,
    /// Defaults to the request's first root field, then to the outer field.
    pub field_name: Option<String>,
    pub return_type: Option<ast::Type>,
    pub args: Option<Object>,
    /// Applied after the target subschema's own transforms.
    pub transforms: Vec<Arc<dyn Transform>>,
    pub transformed_schema: Option<Arc<Valid<Schema>>>,
    pub root_value: Option<Value>,
    /// Defaults to the delegator's configuration.
    pub skip_validation: Option<bool>,
    pub skip_type_merging: bool,
    pub executor: Option<Arc<dyn Executor>>,
    pub subscriber: Option<Arc<dyn Subscriber>>,
}

#[buildstructor::buildstructor]
impl DelegateRequestOptions {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        subschema: SubschemaRef,
        request: Request,
        context: Option<Context>,
        info: Option<Arc<ResolveInfo>>,
        operation: Option<OperationKind>,
        field_name: Option<String>,
        return_type: Option<ast::Type>,
        args: Option<Object>,
        transforms: Vec<Arc<dyn Transform>>,
        transformed_schema: Option<Arc<Valid<Schema>>>,
        root_value: Option<Value>,
        skip_validation: Option<bool>,
        skip_type_merging: Option<bool>,
        executor: Option<Arc<dyn Executor>>,
        subscriber: Option<Arc<dyn Subscriber>>,
    ) -> Self {
        Self {
            subschema,
            request,
            context: context.unwrap_or_default(),
            info,
            operation,
            field_name,
            return_type,
            args,
            transforms,
            transformed_schema,
            root_value,
            skip_validation,
            skip_type_merging: skip_type_merging.unwrap_or_default(),
            executor,
            subscriber,
        }
    }
}

/// What a delegation produced.
pub enum DelegationOutput {
    /// The result of a query or mutation, or of a subscription answering with one response.
    Value(ExternalValue),
    /// The events of a subscription.
    Stream(SubscriptionStream),
}

impl DelegationOutput {
    pub fn into_value(self) -> Option<ExternalValue> {
        match self {
            DelegationOutput::Value(value) => Some(value),
            DelegationOutput::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<SubscriptionStream> {
        match self {
            DelegationOutput::Value(_) => None,
            DelegationOutput::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Debug for DelegationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegationOutput::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DelegationOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub type SubscriptionStream = BoxStream<'static, SubscriptionEvent>;

/// One subscription event, keyed by the subscribed root field.
#[derive(Debug)]
pub struct SubscriptionEvent {
    pub field_name: String,
    pub value: Result<ExternalValue, DelegationError>,
}

/// Runs delegations. Cheap to clone; clones share batch queues.
#[derive(Clone)]
pub struct Delegator {
    configuration: Arc<Configuration>,
    batches: Arc<BatchRegistry>,
    validator: Arc<dyn Validator>,
}

impl Default for Delegator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Delegator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegator")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

#[buildstructor::buildstructor]
impl Delegator {
    /// Validation defaults to [`CompilerValidator`].
    #[builder(visibility = "pub")]
    fn new(
        configuration: Option<Configuration>,
        validator: Option<Arc<dyn Validator>>,
    ) -> Self {
        Self {
            configuration: Arc::new(configuration.unwrap_or_default()),
            batches: Arc::new(BatchRegistry::default()),
            validator: validator.unwrap_or_else(|| Arc::new(CompilerValidator)),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Drops the batch queues of `context`. Call once the outer request is done.
    pub fn finish_request(&self, context: &Context) {
        self.batches.finish_request(context);
    }

    /// Delegates the field described by `options.info` to `options.subschema`.
    ///
    /// The request selects the outer field (renamed to `field_name`, with `args` applied) and
    /// carries only the variables and fragments it uses. Selections the target cannot answer
    /// are pruned.
    pub async fn delegate_to_schema(
        &self,
        options: DelegateOptions,
    ) -> Result<DelegationOutput, DelegationError> {
        let info = options.info;
        let operation = options
            .operation
            .unwrap_or_else(|| delegating_operation(&info));
        let field_name = options
            .field_name
            .unwrap_or_else(|| info.field_name().to_string());

        let root = request::root_field(&info, &field_name, options.args.as_ref())?;
        let request =
            request::operation_request(operation, options.operation_name.as_deref(), root, &info)?;
        let target_schema = match (&options.transformed_schema, &options.subschema) {
            (Some(schema), _) => schema.clone(),
            (None, SubschemaRef::Subschema(subschema)) => info
                .stitching_info
                .as_ref()
                .map(|stitching| stitching.processed(subschema))
                .unwrap_or_else(|| subschema.clone())
                .transformed_schema()
                .clone(),
            (None, SubschemaRef::Backend(backend)) => backend.schema().clone(),
        };
        let request = request::drop_unused_fragments(&request::prune_request(
            &request,
            &target_schema,
            operation,
        ));

        self.delegate_request(DelegateRequestOptions {
            subschema: options.subschema,
            request,
            context: options.context,
            info: Some(info),
            operation: Some(operation),
            field_name: Some(field_name),
            return_type: options.return_type,
            args: options.args,
            transforms: options.transforms,
            transformed_schema: options.transformed_schema,
            root_value: options.root_value,
            skip_validation: options.skip_validation,
            skip_type_merging: options.skip_type_merging,
            executor: options.executor,
            subscriber: options.subscriber,
        })
        .await
    }

    /// Sends `options.request` to `options.subschema` and returns its result as an
    /// [`ExternalValue`], or as a stream of them for subscriptions.
    pub async fn delegate_request(
        &self,
        options: DelegateRequestOptions,
    ) -> Result<DelegationOutput, DelegationError> {
        let delegation = Arc::new(DelegationContext::new(&options)?);
        let span = tracing::info_span!(
            "delegate",
            subschema = %delegation.target.name(),
            operation = %delegation.operation,
            field = %delegation.field_name,
        );
        self.run(delegation, options).instrument(span).await
    }

    async fn run(
        &self,
        delegation: Arc<DelegationContext>,
        options: DelegateRequestOptions,
    ) -> Result<DelegationOutput, DelegationError> {
        let mut transformer = Transformer::new(delegation.clone());
        let request = transformer.transform_request(options.request)?;

        let skip_validation = options
            .skip_validation
            .unwrap_or(self.configuration.validation.skip);
        if !skip_validation {
            self.validator
                .validate(delegation.target.schema(), &request.document)
                .map_err(DelegationError::from_validation)?;
        }

        let root_value = options
            .root_value
            .or_else(|| {
                delegation
                    .target
                    .as_subschema()
                    .and_then(|subschema| subschema.root_value().cloned())
            });
        let execution_request = ExecutionRequest::builder()
            .request(request)
            .context(delegation.context.clone())
            .and_info(delegation.info.clone())
            .build();

        match delegation.operation {
            OperationKind::Query | OperationKind::Mutation => {
                let outcome = self
                    .execute(&delegation, options.executor, root_value, execution_request)
                    .await?;
                match outcome {
                    ExecutionOutcome::Single(response) => {
                        let value = finish(&mut transformer, response, None)?;
                        Ok(DelegationOutput::Value(value))
                    }
                    ExecutionOutcome::Stream(mut stream) => {
                        let initial = stream.next().await.unwrap_or_default();
                        let source = IncrementalSource::new(stream);
                        let value = finish(&mut transformer, initial, Some(source))?;
                        Ok(DelegationOutput::Value(value))
                    }
                }
            }
            OperationKind::Subscription => {
                let subscriber = options
                    .subscriber
                    .or_else(|| {
                        delegation
                            .target
                            .as_subschema()
                            .and_then(|subschema| subschema.endpoint().subscriber().cloned())
                    })
                    .or_else(|| {
                        backend_of(&delegation.target).subscriber(root_value.as_ref())
                    })
                    .ok_or_else(|| {
                        ConfigurationError::MissingSubscriber(delegation.target.name().to_string())
                    })?;
                let outcome = subscriber
                    .subscribe(execution_request)
                    .resolve()
                    .await
                    .map_err(DelegationError::backend)?;
                match outcome {
                    ExecutionOutcome::Single(response) => {
                        let value = finish(&mut transformer, response, None)?;
                        Ok(DelegationOutput::Value(value))
                    }
                    ExecutionOutcome::Stream(stream) => {
                        let field_name = delegation.field_name.clone();
                        let events = stream
                            .map(move |response| SubscriptionEvent {
                                field_name: field_name.clone(),
                                value: finish(&mut transformer, response, None),
                            })
                            .boxed();
                        Ok(DelegationOutput::Stream(events))
                    }
                }
            }
        }
    }

    async fn execute(
        &self,
        delegation: &DelegationContext,
        executor: Option<Arc<dyn Executor>>,
        root_value: Option<Value>,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, DelegationError> {
        let endpoint = delegation
            .target
            .as_subschema()
            .map(|subschema| subschema.endpoint());
        let executor = executor
            .or_else(|| endpoint.and_then(|endpoint| endpoint.executor().cloned()))
            .unwrap_or_else(|| backend_of(&delegation.target).executor(root_value.as_ref()));

        match endpoint {
            Some(endpoint)
                if endpoint
                    .batch()
                    .unwrap_or(self.configuration.batching.enabled) =>
            {
                self.batches
                    .executor(
                        &delegation.context,
                        endpoint,
                        executor,
                        &self.configuration.batching,
                    )
                    .load(request)
                    .await
            }
            _ => executor
                .execute(request)
                .resolve()
                .await
                .map_err(DelegationError::backend),
        }
    }
}

fn backend_of(target: &SubschemaRef) -> &Arc<dyn crate::executor::Backend> {
    match target {
        SubschemaRef::Subschema(subschema) => subschema.backend(),
        SubschemaRef::Backend(backend) => backend,
    }
}

fn finish(
    transformer: &mut Transformer,
    response: Response,
    incremental: Option<IncrementalSource>,
) -> Result<ExternalValue, DelegationError> {
    let response = transformer.transform_result(response)?;
    from_delegation_result(
        response,
        transformer.delegation(),
        transformer.field_subschemas(),
        incremental,
    )
}

/// The operation a field of the outer operation delegates as: mutation and subscription root
/// fields keep their kind, everything else is a query.
fn delegating_operation(info: &ResolveInfo) -> OperationKind {
    [OperationKind::Mutation, OperationKind::Subscription]
        .into_iter()
        .find(|kind| info.root_type(*kind) == Some(&info.parent_type))
        .unwrap_or(OperationKind::Query)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::executor::Backend;
    use crate::executor::ExecutorResponse;
    use crate::executor::StaticBackend;
    use crate::executor::SubscriberFn;
    use crate::graphql;
    use crate::json_ext::Path;
    use crate::resolve_info::tests::root_infos;
    use crate::resolve_info::tests::schema;
    use crate::subschema::Subschema;
    use crate::transform::FilterObjectFields;

    const SDL: &str = r#"
        type Query { user(id: ID!): User users: [User] version: String }
        type Mutation { rename(id: ID!, name: String!): User }
        type Subscription { ticks: Int }
        type User { id: ID name: String email: String }
    "#;

    fn backend() -> Arc<dyn Backend> {
        let query = json!({
            "user": { "id": "1", "name": "Ada", "email": "ada@example.com" },
            "users": [{ "id": "1", "name": "Ada" }, { "id": "2", "name": "Grace" }],
            "version": "1.0",
        });
        let mutation = json!({ "rename": { "id": "1", "name": "Countess" } });
        Arc::new(
            StaticBackend::builder()
                .schema(schema(SDL))
                .query(query.as_object().unwrap().clone())
                .mutation(mutation.as_object().unwrap().clone())
                .build(),
        )
    }

    /// A context for the `version` root field of a backend that serves [`SDL`].
    pub(crate) fn delegation_context(transforms: Vec<Arc<dyn Transform>>) -> DelegationContext {
        let options = DelegateRequestOptions::builder()
            .subschema(SubschemaRef::Backend(backend()))
            .request(Request::parse("{ version }").unwrap())
            .transforms(transforms)
            .build();
        DelegationContext::new(&options).unwrap()
    }

    fn counting(
        backend: Arc<dyn Backend>,
        calls: Arc<AtomicUsize>,
    ) -> Arc<dyn Executor> {
        let inner = backend.executor(None);
        Arc::new(move |request: ExecutionRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            inner.execute(request)
        })
    }

    #[test]
    fn context_defaults_come_from_the_request() {
        let delegation = delegation_context(Vec::new());
        assert_eq!(delegation.operation, OperationKind::Query);
        assert_eq!(delegation.field_name, "version");
        assert_eq!(delegation.response_key, "version");
        assert_eq!(delegation.return_type.to_string(), "String");
    }

    #[test]
    fn unknown_root_fields_are_configuration_errors() {
        let options = DelegateRequestOptions::builder()
            .subschema(SubschemaRef::Backend(backend()))
            .request(Request::parse("{ version }").unwrap())
            .field_name("missing")
            .build();
        let error = DelegationContext::new(&options).unwrap_err();
        assert!(matches!(error, ConfigurationError::MissingRootField { .. }));
    }

    #[test]
    fn processed_subschemas_replace_the_original() {
        let original = Arc::new(Subschema::builder().backend(backend()).build().unwrap());
        let hide_email: Arc<dyn Transform> = Arc::new(FilterObjectFields::new(
            |type_name: &str, field_name: &str| type_name != "User" || field_name != "email",
        ));
        let processed = Arc::new(
            Subschema::builder()
                .backend(backend())
                .transform(hide_email)
                .build()
                .unwrap(),
        );
        let mut stitching = crate::subschema::StitchingInfo::default();
        stitching.register_processed(original.clone(), processed.clone());
        let document = ast::Document::parse("{ user(id: 1) { id } }", "query.graphql").unwrap();
        let infos = ResolveInfo::for_operation(
            schema(SDL),
            &document,
            None,
            Object::new(),
            Some(Arc::new(stitching)),
        )
        .unwrap();

        let options = DelegateRequestOptions::builder()
            .subschema(SubschemaRef::Subschema(original))
            .request(Request::parse("{ user(id: 1) { id } }").unwrap())
            .info(Arc::new(infos[0].clone()))
            .build();
        let delegation = DelegationContext::new(&options).unwrap();

        assert!(
            delegation
                .target
                .as_subschema()
                .is_some_and(|target| Arc::ptr_eq(target, &processed))
        );
        assert_eq!(delegation.transforms.len(), 1);
    }

    #[tokio::test]
    async fn delegates_a_field_with_its_selection() {
        let delegator = Delegator::default();
        let infos = root_infos(&schema(SDL), r#"{ user(id: "1") { name } }"#);
        let output = delegator
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .context(Context::new())
                    .info(Arc::new(infos[0].clone()))
                    .build(),
            )
            .await
            .unwrap();

        let ExternalValue::Object(user) = output.into_value().unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(user.data().get("name"), Some(&json!("Ada")));
        assert_eq!(user.data().get("email"), None);
    }

    #[tokio::test]
    async fn mutation_root_fields_delegate_as_mutations() {
        let delegator = Delegator::default();
        let infos = root_infos(
            &schema(SDL),
            r#"mutation { rename(id: "1", name: "Countess") { name } }"#,
        );
        let output = delegator
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .context(Context::new())
                    .info(Arc::new(infos[0].clone()))
                    .build(),
            )
            .await
            .unwrap();

        let ExternalValue::Object(user) = output.into_value().unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(user.data().get("name"), Some(&json!("Countess")));
    }

    #[tokio::test]
    async fn validation_failures_stop_the_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = backend();
        let delegator = Delegator::default();
        let error = delegator
            .delegate_request(
                DelegateRequestOptions::builder()
                    .subschema(SubschemaRef::Backend(backend.clone()))
                    .request(Request::parse("{ user(id: 1) { missing } }").unwrap())
                    .executor(counting(backend, calls.clone()))
                    .build(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, DelegationError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skipped_validation_lets_invalid_requests_through() {
        let answering = |calls: Arc<AtomicUsize>| -> Arc<dyn Executor> {
            Arc::new(move |_request: ExecutionRequest| {
                calls.fetch_add(1, Ordering::SeqCst);
                ExecutorResponse::ready(
                    Response::builder()
                        .data(json!({ "user": { "missing": "answered" } }))
                        .build(),
                )
            })
        };
        let invalid = || Request::parse("{ user(id: 1) { missing } }").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let configured = Delegator::builder()
            .configuration("validation:\n  skip: true\n".parse::<Configuration>().unwrap())
            .build();
        let output = configured
            .delegate_request(
                DelegateRequestOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .request(invalid())
                    .executor(answering(calls.clone()))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(
            output.into_value().unwrap().to_json(),
            json!({ "missing": "answered" })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = Delegator::default()
            .delegate_request(
                DelegateRequestOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .request(invalid())
                    .executor(answering(calls.clone()))
                    .skip_validation(true)
                    .build(),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn operations_without_a_root_type_are_configuration_errors() {
        let query_only: Arc<dyn Backend> = Arc::new(
            StaticBackend::builder()
                .schema(schema("type Query { version: String }"))
                .query(Object::new())
                .build(),
        );
        let error = Delegator::default()
            .delegate_request(
                DelegateRequestOptions::builder()
                    .subschema(SubschemaRef::Backend(query_only))
                    .request(Request::parse("mutation { rename }").unwrap())
                    .build(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            DelegationError::Configuration(ConfigurationError::MissingRootType(
                OperationKind::Mutation
            ))
        ));
    }

    #[tokio::test]
    async fn root_values_come_from_the_call_then_the_subschema() {
        let subschema = Arc::new(
            Subschema::builder()
                .backend(backend())
                .root_value(json!({ "version": "from the subschema" }))
                .build()
                .unwrap(),
        );
        let version = |root_value: Option<Value>| {
            let subschema = subschema.clone();
            async move {
                Delegator::default()
                    .delegate_request(
                        DelegateRequestOptions::builder()
                            .subschema(SubschemaRef::Subschema(subschema))
                            .request(Request::parse("{ version }").unwrap())
                            .and_root_value(root_value)
                            .build(),
                    )
                    .await
                    .unwrap()
                    .into_value()
                    .unwrap()
                    .to_json()
            }
        };

        assert_eq!(version(None).await, json!("from the subschema"));
        assert_eq!(
            version(Some(json!({ "version": "from the call" }))).await,
            json!("from the call")
        );
    }

    #[tokio::test]
    async fn executor_failures_are_backend_errors() {
        let failing: Arc<dyn Executor> =
            Arc::new(|_request: ExecutionRequest| ExecutorResponse::error("connection refused"));
        let error = Delegator::default()
            .delegate_request(
                DelegateRequestOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .request(Request::parse("{ version }").unwrap())
                    .executor(failing)
                    .build(),
            )
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "executor failed: connection refused");
    }

    #[tokio::test]
    async fn null_results_with_one_error_fail_at_the_callers_path() {
        let executor: Arc<dyn Executor> = Arc::new(|_request: ExecutionRequest| {
            ExecutorResponse::ready(
                Response::builder()
                    .data(json!({ "user": null }))
                    .error(
                        graphql::Error::builder()
                            .message("not found")
                            .path(Path::from_slice(&["user"]))
                            .build(),
                    )
                    .build(),
            )
        });
        let infos = root_infos(&schema(SDL), r#"{ user(id: "9") { id } }"#);
        let error = Delegator::default()
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .context(Context::new())
                    .info(Arc::new(infos[0].clone()))
                    .executor(executor)
                    .build(),
            )
            .await
            .unwrap_err();

        let DelegationError::Field(error) = error else {
            panic!("expected a field error");
        };
        assert_eq!(error.message, "not found");
        assert_eq!(error.path, Some(Path::from_slice(&["user"])));
    }

    #[tokio::test]
    async fn subscriptions_stream_events_keyed_by_field() {
        let subscriber: Arc<dyn Subscriber> =
            Arc::new(SubscriberFn(|_request: ExecutionRequest| {
                let events = (1..=3)
                    .map(|tick| Response::builder().data(json!({ "ticks": tick })).build());
                ExecutorResponse::stream(futures::stream::iter(events).boxed())
            }));
        let infos = root_infos(&schema(SDL), "subscription { ticks }");
        let output = Delegator::default()
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .context(Context::new())
                    .info(Arc::new(infos[0].clone()))
                    .subscriber(subscriber)
                    .build(),
            )
            .await
            .unwrap();

        let events: Vec<_> = output.into_stream().unwrap().collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].field_name, "ticks");
        let values: Vec<_> = events
            .into_iter()
            .map(|event| match event.value.unwrap() {
                ExternalValue::Leaf(value) => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn subscriptions_without_a_subscriber_fail() {
        let infos = root_infos(&schema(SDL), "subscription { ticks }");
        let error = Delegator::default()
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(SubschemaRef::Backend(backend()))
                    .context(Context::new())
                    .info(Arc::new(infos[0].clone()))
                    .build(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            DelegationError::Configuration(ConfigurationError::MissingSubscriber(_))
        ));
    }
}
