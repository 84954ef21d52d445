use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::ast;
use futures::future::BoxFuture;

use super::ExternalObject;
use super::ExternalValue;
use super::report_unpathed_errors_via_null;
use crate::configuration::ConfigurationError;
use crate::context::Context;
use crate::delegate::DelegateRequestOptions;
use crate::delegate::DelegationOutput;
use crate::delegate::Delegator;
use crate::delegate::request::json_to_ast_value;
use crate::delegate::request::operation_request;
use crate::delegate::request::parse_name;
use crate::error::DelegationError;
use crate::graphql::OperationKind;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::resolve_info::ResolveInfo;
use crate::subschema::MergedTypeConfig;
use crate::subschema::SubschemaRef;

/// Resolves the field described by `info` on `parent`, a value returned by delegation.
///
/// Values that are not delegated objects are read as plain JSON. For a delegated object:
/// - a field still missing waits for the pending incremental patches of its result, then for
///   a merged type, is fetched from another subschema that provides it;
/// - a field nulled by an error fails with that error, moved to `info.path`;
/// - a null field reports the object's unreported unpathed errors that concern it;
/// - objects and lists are returned as delegated values again, carrying the errors below them.
pub async fn default_merged_resolver(
    delegator: &Delegator,
    parent: &ExternalValue,
    context: &Context,
    info: &Arc<ResolveInfo>,
) -> Result<ExternalValue, DelegationError> {
    match parent {
        ExternalValue::Object(object) => {
            resolve_field(delegator, object.clone(), context, info, true).await
        }
        ExternalValue::Leaf(Value::Object(data)) => Ok(ExternalValue::Leaf(
            data.get(info.response_key()).cloned().unwrap_or_default(),
        )),
        ExternalValue::Error(error) => Err(DelegationError::Field(error.clone())),
        ExternalValue::Leaf(_) | ExternalValue::List(_) => Ok(ExternalValue::Leaf(Value::Null)),
    }
}

fn resolve_field<'a>(
    delegator: &'a Delegator,
    object: ExternalObject,
    context: &'a Context,
    info: &'a Arc<ResolveInfo>,
    merging: bool,
) -> BoxFuture<'a, Result<ExternalValue, DelegationError>> {
    Box::pin(async move {
        let key = info.response_key();
        let Some(value) = object.data.get(key) else {
            if let Some(source) = &object.incremental {
                if let Some(patched) = source.wait_for(&object, key).await {
                    return resolve_field(delegator, patched, context, info, merging).await;
                }
            }
            if merging && object.provenance.merging {
                if let Some(merged) = merge_field(delegator, &object, context, info).await? {
                    return Ok(merged);
                }
            }
            return report_unpathed_errors_via_null(&object.unpathed, key, &info.path);
        };

        if value.is_null() {
            if let Some(error) = object.field_error(key) {
                return Err(DelegationError::Field(
                    error.relocated(Some(info.path.clone())),
                ));
            }
            return report_unpathed_errors_via_null(&object.unpathed, key, &info.path);
        }

        let mut parent_path = info.path.clone();
        parent_path.0.pop();
        let (scope, _) = object
            .scope(parent_path)
            .descend(PathElement::Key(key.to_string()));
        Ok(scope.materialize(value.clone()))
    })
}

/// Fetches the field from another subschema holding the parent's merged type.
///
/// Returns `None` when no other subschema provides it, or when the merged lookup found no
/// object.
async fn merge_field(
    delegator: &Delegator,
    object: &ExternalObject,
    context: &Context,
    info: &Arc<ResolveInfo>,
) -> Result<Option<ExternalValue>, DelegationError> {
    let Some(stitching) = info.stitching_info.as_ref() else {
        return Ok(None);
    };
    let type_name = info.parent_type.as_str();
    let own = object
        .subschema()
        .as_subschema()
        .map(|subschema| stitching.processed(subschema));
    let Some(candidate) = stitching
        .merge_candidates(type_name, info.field_name())
        .find(|candidate| !matches!(&own, Some(own) if Arc::ptr_eq(candidate, own)))
        .cloned()
    else {
        return Ok(None);
    };
    let Some(config) = candidate.merged_type(type_name) else {
        return Ok(None);
    };

    tracing::debug!(
        type_name,
        field = info.field_name(),
        subschema = candidate.name(),
        "fetching a merged field"
    );
    let root_info = merge_root_info(info, config, object)?;
    let request = operation_request(
        OperationKind::Query,
        None,
        (*root_info.field).clone(),
        info,
    )?;
    let output = delegator
        .delegate_request(
            DelegateRequestOptions::builder()
                .subschema(SubschemaRef::Subschema(candidate.clone()))
                .request(request)
                .context(context.clone())
                .info(Arc::new(root_info))
                .operation(OperationKind::Query)
                .field_name(config.field_name.clone())
                .build(),
        )
        .await
        .map_err(|error| match error {
            // The merged lookup is located at the parent; its failure is this field's.
            DelegationError::Field(error) => {
                DelegationError::Field(error.relocated(Some(info.path.clone())))
            }
            error => error,
        })?;

    match output {
        DelegationOutput::Value(ExternalValue::Object(merged)) => {
            resolve_field(delegator, merged, context, info, false)
                .await
                .map(Some)
        }
        DelegationOutput::Value(ExternalValue::Error(error)) => Err(DelegationError::Field(
            error.relocated(Some(info.path.clone())),
        )),
        _ => Ok(None),
    }
}

/// The resolution info of the root field a merged type is fetched with: `config`'s root field,
/// selecting the field being resolved, located where the parent object is.
fn merge_root_info(
    info: &ResolveInfo,
    config: &MergedTypeConfig,
    object: &ExternalObject,
) -> Result<ResolveInfo, ConfigurationError> {
    let arguments = config
        .args(object.data())
        .iter()
        .map(|(name, value)| {
            Ok(Node::new(ast::Argument {
                name: parse_name(name.as_str())?,
                value: Node::new(json_to_ast_value(value)),
            }))
        })
        .collect::<Result<Vec<_>, ConfigurationError>>()?;
    let field = ast::Field {
        alias: None,
        name: parse_name(&config.field_name)?,
        arguments,
        directives: ast::DirectiveList::default(),
        selection_set: vec![ast::Selection::Field(info.field.clone())],
    };

    let mut path = info.path.clone();
    path.0.pop();
    Ok(ResolveInfo {
        parent_type: info
            .root_type(OperationKind::Query)
            .cloned()
            .unwrap_or_else(|| info.parent_type.clone()),
        field: Node::new(field),
        return_type: ast::Type::Named(info.parent_type.clone()),
        path,
        ..info.clone()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::delegate::DelegateOptions;
    use crate::executor::Backend;
    use crate::executor::ExecutorResponse;
    use crate::executor::Executor;
    use crate::executor::StaticBackend;
    use crate::graphql::Error;
    use crate::graphql::ExecutionRequest;
    use crate::graphql::Response;
    use crate::json_ext::Object;
    use crate::json_ext::Path;
    use crate::resolve_info::tests::schema;
    use crate::subschema::StitchingInfo;
    use crate::subschema::Subschema;
    use crate::transform::FilterObjectFields;
    use crate::transform::Transform;

    const SDL: &str = r#"
        type Query { product(id: ID!): Product products: [Product] }
        type Product { id: ID name: String price: Int reviews: [Review] }
        type Review { body: String }
    "#;

    fn backend(query: Value) -> Arc<dyn Backend> {
        Arc::new(
            StaticBackend::builder()
                .schema(schema(SDL))
                .query(query.as_object().unwrap().clone())
                .build(),
        )
    }

    fn infos(query: &str, stitching: Option<Arc<StitchingInfo>>) -> Vec<ResolveInfo> {
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        ResolveInfo::for_operation(schema(SDL), &document, None, Object::new(), stitching)
            .unwrap()
    }

    fn child(info: &ResolveInfo, key: &str) -> Arc<ResolveInfo> {
        Arc::new(
            info.children()
                .unwrap()
                .into_iter()
                .find(|child| child.response_key() == key)
                .unwrap(),
        )
    }

    fn without_price() -> Arc<dyn Transform> {
        Arc::new(FilterObjectFields::new(|type_name: &str, field_name: &str| {
            type_name != "Product" || field_name != "price"
        }))
    }

    async fn delegate(
        delegator: &Delegator,
        subschema: SubschemaRef,
        info: &ResolveInfo,
        executor: Option<Arc<dyn Executor>>,
    ) -> ExternalValue {
        delegator
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(subschema)
                    .context(Context::new())
                    .info(Arc::new(info.clone()))
                    .and_executor(executor)
                    .build(),
            )
            .await
            .unwrap()
            .into_value()
            .unwrap()
    }

    #[tokio::test]
    async fn plain_values_are_read_as_json() {
        let info = infos("{ product(id: 1) { name } }", None);
        let name = child(&info[0], "name");
        let parent = ExternalValue::Leaf(json!({ "name": "Chair" }));

        let value = default_merged_resolver(&Delegator::default(), &parent, &Context::new(), &name)
            .await
            .unwrap();
        assert_eq!(value.to_json(), json!("Chair"));
    }

    #[tokio::test]
    async fn nested_objects_stay_delegated() {
        let backend = backend(json!({
            "product": { "id": "1", "reviews": [{ "body": "great" }] },
        }));
        let info = infos("{ product(id: 1) { reviews { body } } }", None);
        let delegator = Delegator::default();
        let product = delegate(&delegator, SubschemaRef::Backend(backend), &info[0], None).await;

        let reviews_info = child(&info[0], "reviews");
        let reviews = default_merged_resolver(&delegator, &product, &Context::new(), &reviews_info)
            .await
            .unwrap();

        let ExternalValue::List(items) = reviews else {
            panic!("expected a list");
        };
        let review = items[0].as_object().unwrap();
        assert_eq!(
            review.path(),
            &Path(vec![
                PathElement::Key("product".into()),
                PathElement::Key("reviews".into()),
                PathElement::Index(0),
            ])
        );
        assert_eq!(review.data().get("body"), Some(&json!("great")));
    }

    #[tokio::test]
    async fn errors_at_null_fields_fail_the_field() {
        let executor: Arc<dyn Executor> = Arc::new(|_request: ExecutionRequest| {
            ExecutorResponse::ready(
                Response::builder()
                    .data(json!({ "item": { "id": "1", "price": null } }))
                    .error(
                        Error::builder()
                            .message("price unavailable")
                            .path(Path::from_slice(&["item", "price"]))
                            .build(),
                    )
                    .build(),
            )
        });
        let info = infos("{ item: product(id: 1) { id price } }", None);
        let delegator = Delegator::default();
        let product = delegate(
            &delegator,
            SubschemaRef::Backend(backend(json!({}))),
            &info[0],
            Some(executor),
        )
        .await;

        let price = child(&info[0], "price");
        let Err(DelegationError::Field(error)) =
            default_merged_resolver(&delegator, &product, &Context::new(), &price).await
        else {
            panic!("expected a field error");
        };
        assert_eq!(error.message, "price unavailable");
        assert_eq!(error.path, Some(Path::from_slice(&["item", "price"])));
    }

    /// A "names" subschema hiding `Product.price`, and a "prices" subschema answering through
    /// `prices_executor`, both merging `Product` by id.
    fn product_subschemas(
        prices_executor: Arc<dyn Executor>,
    ) -> (Arc<Subschema>, Arc<StitchingInfo>) {
        let by_id = || {
            MergedTypeConfig::new("product", |product: &Object| {
                let mut args = Object::new();
                if let Some(id) = product.get("id") {
                    args.insert("id", id.clone());
                }
                args
            })
        };
        let names = Arc::new(
            Subschema::builder()
                .name("names")
                .backend(backend(json!({ "product": { "id": "1", "name": "Chair" } })))
                .transform(without_price())
                .merged_type("Product", by_id())
                .build()
                .unwrap(),
        );
        let prices = Arc::new(
            Subschema::builder()
                .name("prices")
                .backend(backend(json!({ "product": { "id": "1", "price": 42 } })))
                .merged_type("Product", by_id())
                .executor(prices_executor)
                .build()
                .unwrap(),
        );
        let stitching = Arc::new(
            StitchingInfo::builder()
                .subschema(names.clone())
                .subschema(prices)
                .build(),
        );
        (names, stitching)
    }

    #[tokio::test]
    async fn missing_fields_are_fetched_from_merged_subschemas() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let prices_executor =
            backend(json!({ "product": { "id": "1", "price": 42 } })).executor(None);
        let counting: Arc<dyn Executor> = Arc::new(move |request: ExecutionRequest| {
            counted.fetch_add(1, Ordering::SeqCst);
            prices_executor.execute(request)
        });
        let (names, stitching) = product_subschemas(counting);
        let info = infos("{ product(id: 1) { id name price } }", Some(stitching));
        let delegator = Delegator::default();
        let product = delegate(&delegator, SubschemaRef::Subschema(names), &info[0], None).await;
        assert_eq!(product.to_json(), json!({ "id": "1", "name": "Chair" }));

        let price = child(&info[0], "price");
        let value = default_merged_resolver(&delegator, &product, &Context::new(), &price)
            .await
            .unwrap();

        assert_eq!(value.to_json(), json!(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_merged_lookups_fail_at_the_field_path() {
        let failing: Arc<dyn Executor> = Arc::new(|_request: ExecutionRequest| {
            ExecutorResponse::ready(
                Response::builder()
                    .data(json!({ "product": null }))
                    .error(Error::builder().message("prices unavailable").build())
                    .build(),
            )
        });
        let (names, stitching) = product_subschemas(failing);
        let info = infos("{ product(id: 1) { id name price } }", Some(stitching));
        let delegator = Delegator::default();
        let product = delegate(&delegator, SubschemaRef::Subschema(names), &info[0], None).await;

        let price = child(&info[0], "price");
        let Err(DelegationError::Field(error)) =
            default_merged_resolver(&delegator, &product, &Context::new(), &price).await
        else {
            panic!("expected a field error");
        };
        assert_eq!(error.message, "prices unavailable");
        assert_eq!(error.path, Some(Path::from_slice(&["product", "price"])));
    }

    #[tokio::test]
    async fn merging_is_skipped_when_disabled() {
        let info = infos("{ product(id: 1) { id price } }", None);
        let delegator = Delegator::default();
        let product = delegator
            .delegate_to_schema(
                DelegateOptions::builder()
                    .subschema(SubschemaRef::Subschema(Arc::new(
                        Subschema::builder()
                            .backend(backend(json!({ "product": { "id": "1" } })))
                            .transform(without_price())
                            .build()
                            .unwrap(),
                    )))
                    .context(Context::new())
                    .info(Arc::new(info[0].clone()))
                    .skip_type_merging(true)
                    .build(),
            )
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert!(!product.as_object().unwrap().provenance().merging);

        let price = child(&info[0], "price");
        let value = default_merged_resolver(&delegator, &product, &Context::new(), &price)
            .await
            .unwrap();
        assert_eq!(value.to_json(), Value::Null);
    }
}
