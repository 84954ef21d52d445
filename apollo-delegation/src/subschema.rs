//! Subschema descriptors: one backend, the transforms wrapped around it, how its types are
//! merged and the endpoint its requests go through.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use derivative::Derivative;
use indexmap::IndexMap;

use crate::batching::BatchingOptions;
use crate::configuration::ConfigurationError;
use crate::executor::Backend;
use crate::executor::Executor;
use crate::executor::Subscriber;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::transform::Transform;

/// The physical connection a subschema sends requests through.
///
/// Several subschemas may share one endpoint by holding the same `Arc`: calls to it can then
/// be batched together.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct Endpoint {
    #[derivative(Debug = "ignore")]
    executor: Option<Arc<dyn Executor>>,
    #[derivative(Debug = "ignore")]
    subscriber: Option<Arc<dyn Subscriber>>,
    batch: Option<bool>,
    batching_options: BatchingOptions,
}

#[buildstructor::buildstructor]
impl Endpoint {
    #[builder(visibility = "pub")]
    fn new(
        executor: Option<Arc<dyn Executor>>,
        subscriber: Option<Arc<dyn Subscriber>>,
        batch: Option<bool>,
        batching_options: Option<BatchingOptions>,
    ) -> Self {
        Self {
            executor,
            subscriber,
            batch,
            batching_options: batching_options.unwrap_or_default(),
        }
    }

    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.as_ref()
    }

    pub fn subscriber(&self) -> Option<&Arc<dyn Subscriber>> {
        self.subscriber.as_ref()
    }

    /// Whether calls are batched; `None` defers to the delegator's configuration.
    pub fn batch(&self) -> Option<bool> {
        self.batch
    }

    pub fn batching_options(&self) -> &BatchingOptions {
        &self.batching_options
    }
}

/// How to fetch more fields of a merged type from a subschema.
#[derive(Clone)]
pub struct MergedTypeConfig {
    /// Root query field returning the type.
    pub field_name: String,
    args: Arc<dyn Fn(&Object) -> Object + Send + Sync>,
}

impl MergedTypeConfig {
    /// `args` computes the root field's arguments from the partially resolved object.
    pub fn new(
        field_name: impl Into<String>,
        args: impl Fn(&Object) -> Object + Send + Sync + 'static,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            args: Arc::new(args),
        }
    }

    pub fn args(&self, original: &Object) -> Object {
        (self.args)(original)
    }
}

impl fmt::Debug for MergedTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedTypeConfig")
            .field("field_name", &self.field_name)
            .finish_non_exhaustive()
    }
}

/// A backend and the configuration used to delegate to it.
///
/// Immutable once built. Its identity (the `Arc` it is shared through) is what the
/// [`StitchingInfo`] registry is keyed on.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Subschema {
    name: Option<String>,
    #[derivative(Debug = "ignore")]
    backend: Arc<dyn Backend>,
    #[derivative(Debug = "ignore")]
    transforms: Vec<Arc<dyn Transform>>,
    #[derivative(Debug = "ignore")]
    transformed_schema: Arc<Valid<Schema>>,
    merged_types: HashMap<String, MergedTypeConfig>,
    endpoint: Arc<Endpoint>,
    root_value: Option<Value>,
}

#[buildstructor::buildstructor]
impl Subschema {
    /// Builds a subschema, running the schema stage of each transform.
    ///
    /// Without an `endpoint`, a private one is made from `executor`, `subscriber`, `batch` and
    /// `batching_options`. Setting both is a configuration error.
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: Option<String>,
        backend: Arc<dyn Backend>,
        transforms: Vec<Arc<dyn Transform>>,
        merged_types: HashMap<String, MergedTypeConfig>,
        endpoint: Option<Arc<Endpoint>>,
        executor: Option<Arc<dyn Executor>>,
        subscriber: Option<Arc<dyn Subscriber>>,
        batch: Option<bool>,
        batching_options: Option<BatchingOptions>,
        root_value: Option<Value>,
    ) -> Result<Self, ConfigurationError> {
        let endpoint = match endpoint {
            Some(endpoint) => {
                if executor.is_some()
                    || subscriber.is_some()
                    || batch.is_some()
                    || batching_options.is_some()
                {
                    return Err(ConfigurationError::InvalidConfiguration {
                        message: "subschema sets both an endpoint and endpoint settings",
                        error: name.clone().unwrap_or_default(),
                    });
                }
                endpoint
            }
            None => Arc::new(Endpoint::new(
                executor,
                subscriber,
                batch,
                batching_options,
            )),
        };

        let mut transformed_schema = backend.schema().clone();
        for transform in &transforms {
            transformed_schema = transform.transform_schema(transformed_schema)?;
        }

        Ok(Self {
            name,
            backend,
            transforms,
            transformed_schema,
            merged_types,
            endpoint,
            root_value,
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The backend's own schema, which requests are validated against.
    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        self.backend.schema()
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    /// The schema as seen through the transforms.
    pub fn transformed_schema(&self) -> &Arc<Valid<Schema>> {
        &self.transformed_schema
    }

    pub fn merged_type(&self, type_name: &str) -> Option<&MergedTypeConfig> {
        self.merged_types.get(type_name)
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn root_value(&self) -> Option<&Value> {
        self.root_value.as_ref()
    }

    /// True if the transformed schema has `field_name` on `type_name`.
    pub fn provides(&self, type_name: &str, field_name: &str) -> bool {
        self.transformed_schema
            .type_field(type_name, field_name)
            .is_ok()
    }
}

/// What a delegation targets: a subschema descriptor or a bare backend.
#[derive(Clone, Debug)]
pub enum SubschemaRef {
    Subschema(Arc<Subschema>),
    Backend(Arc<dyn Backend>),
}

impl SubschemaRef {
    pub fn schema(&self) -> &Arc<Valid<Schema>> {
        match self {
            SubschemaRef::Subschema(subschema) => subschema.schema(),
            SubschemaRef::Backend(backend) => backend.schema(),
        }
    }

    pub fn as_subschema(&self) -> Option<&Arc<Subschema>> {
        match self {
            SubschemaRef::Subschema(subschema) => Some(subschema),
            SubschemaRef::Backend(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SubschemaRef::Subschema(subschema) => subschema.name(),
            SubschemaRef::Backend(_) => "<backend>",
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &SubschemaRef) -> bool {
        match (self, other) {
            (SubschemaRef::Subschema(a), SubschemaRef::Subschema(b)) => Arc::ptr_eq(a, b),
            (SubschemaRef::Backend(a), SubschemaRef::Backend(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl From<Arc<Subschema>> for SubschemaRef {
    fn from(subschema: Arc<Subschema>) -> Self {
        SubschemaRef::Subschema(subschema)
    }
}

impl From<Arc<dyn Backend>> for SubschemaRef {
    fn from(backend: Arc<dyn Backend>) -> Self {
        SubschemaRef::Backend(backend)
    }
}

fn identity(subschema: &Arc<Subschema>) -> usize {
    Arc::as_ptr(subschema) as usize
}

#[derive(Debug)]
struct StitchingEntry {
    // Held so the identity key stays unique while registered.
    _original: Arc<Subschema>,
    processed: Arc<Subschema>,
}

/// Registry shared by the delegations of one composite schema.
///
/// Maps each subschema (by identity) to its processed version and lists the subschemas that
/// merged types can be fetched from.
#[derive(Debug, Default)]
pub struct StitchingInfo {
    entries: IndexMap<usize, StitchingEntry>,
}

#[buildstructor::buildstructor]
impl StitchingInfo {
    #[builder(visibility = "pub")]
    fn new(subschemas: Vec<Arc<Subschema>>) -> Self {
        let mut info = Self::default();
        for subschema in subschemas {
            info.register_processed(subschema.clone(), subschema);
        }
        info
    }

    /// Records `processed` as the version of `original` delegations should use.
    pub fn register_processed(&mut self, original: Arc<Subschema>, processed: Arc<Subschema>) {
        self.entries.insert(
            identity(&original),
            StitchingEntry {
                _original: original,
                processed,
            },
        );
    }

    /// The processed version of `subschema`, or `subschema` itself.
    pub fn processed(&self, subschema: &Arc<Subschema>) -> Arc<Subschema> {
        self.entries
            .get(&identity(subschema))
            .map(|entry| entry.processed.clone())
            .unwrap_or_else(|| subschema.clone())
    }

    /// Subschemas with a merge config for `type_name` that provide `field_name` on it, in
    /// registration order.
    pub fn merge_candidates<'a>(
        &'a self,
        type_name: &'a str,
        field_name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<Subschema>> + 'a {
        self.entries
            .values()
            .map(|entry| &entry.processed)
            .filter(move |subschema| {
                subschema.merged_type(type_name).is_some()
                    && subschema.provides(type_name, field_name)
            })
    }
}
