//! Delegated results, annotated with where they came from.
//!
//! An [`ExternalObject`] keeps the JSON a backend returned for one object together with the
//! subschema that produced it (and, per field, any other subschema that did), the errors found
//! inside it and the incremental patches still to come. Resolving a field of the object
//! descends into that state: errors follow the path they were reported at, so an error deep in
//! a result surfaces where the outer response has the matching field.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use futures::StreamExt;

use crate::delegate::DelegationContext;
use crate::error::DelegationError;
use crate::graphql::Error;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::subschema::Subschema;
use crate::subschema::SubschemaRef;
use crate::transform::FieldSubschemaMap;

mod resolver;

pub use resolver::default_merged_resolver;

/// A value produced by delegation.
#[derive(Clone, Debug)]
pub enum ExternalValue {
    /// A scalar, enum or null, or JSON the delegation engine does not track.
    Leaf(Value),
    Object(ExternalObject),
    List(Vec<ExternalValue>),
    /// A list item the backend nulled because of this error.
    Error(Error),
}

impl ExternalValue {
    pub fn as_object(&self) -> Option<&ExternalObject> {
        match self {
            ExternalValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The plain JSON form: objects as their data, errors as null.
    pub fn to_json(&self) -> Value {
        match self {
            ExternalValue::Leaf(value) => value.clone(),
            ExternalValue::Object(object) => Value::Object(object.data.clone()),
            ExternalValue::List(items) => {
                Value::Array(items.iter().map(ExternalValue::to_json).collect())
            }
            ExternalValue::Error(_) => Value::Null,
        }
    }
}

/// Which subschemas produced an object.
#[derive(Debug)]
pub struct Provenance {
    /// The subschema the object was fetched from.
    pub subschema: SubschemaRef,
    /// Fields that were fetched from another subschema.
    pub fields: HashMap<String, Arc<Subschema>>,
    /// Whether missing fields may be fetched from other subschemas.
    pub merging: bool,
}

/// An error the backend reported without a location in the data.
///
/// Carried by every object its path leads to, and surfaced (once) by the first field that
/// resolves to null in its place.
#[derive(Clone, Debug)]
pub struct UnpathedError {
    pub error: Error,
    /// Where the error was reported, relative to the object carrying it.
    pub path: Option<Path>,
    reported: Arc<AtomicBool>,
}

impl UnpathedError {
    fn new(error: Error, path: Option<Path>) -> Self {
        Self {
            error,
            path: path.filter(|path| !path.is_empty()),
            reported: Arc::default(),
        }
    }

    pub fn is_reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }

    /// Marks the error reported; true if it was not already.
    fn report(&self) -> bool {
        !self.reported.swap(true, Ordering::AcqRel)
    }
}

/// An object of a delegated result.
#[derive(Clone)]
pub struct ExternalObject {
    data: Object,
    /// Where the object is in the backend's response.
    path: Path,
    provenance: Arc<Provenance>,
    /// Errors that nulled a value of the object, relative to it.
    located: Vec<(Path, Error)>,
    unpathed: Vec<UnpathedError>,
    incremental: Option<IncrementalSource>,
}

impl fmt::Debug for ExternalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalObject")
            .field("data", &self.data)
            .field("path", &self.path)
            .field("subschema", &self.provenance.subschema.name())
            .field("located", &self.located)
            .field("unpathed", &self.unpathed)
            .field("incremental", &self.incremental.is_some())
            .finish()
    }
}

impl ExternalObject {
    pub fn data(&self) -> &Object {
        &self.data
    }

    /// Where the object is in the response of the backend it came from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// The subschema that produced the object.
    pub fn subschema(&self) -> &SubschemaRef {
        &self.provenance.subschema
    }

    /// The error that nulled the field under `key`, if any.
    pub fn field_error(&self, key: &str) -> Option<&Error> {
        self.located
            .iter()
            .find(|(path, _)| path.0.len() == 1 && path.0[0] == PathElement::Key(key.into()))
            .map(|(_, error)| error)
    }

    pub fn unpathed_errors(&self) -> &[UnpathedError] {
        &self.unpathed
    }

    pub fn has_pending_patches(&self) -> bool {
        self.incremental.is_some()
    }

    fn scope(&self, outer: Path) -> Scope {
        Scope {
            subschema: self.provenance.subschema.clone(),
            fields: self.provenance.fields.clone(),
            merging: self.provenance.merging,
            path: self.path.clone(),
            outer,
            located: self.located.clone(),
            unpathed: self.unpathed.clone(),
            incremental: self.incremental.clone(),
        }
    }
}

/// What an object being materialized inherits from its parent.
struct Scope {
    subschema: SubschemaRef,
    fields: HashMap<String, Arc<Subschema>>,
    merging: bool,
    /// Location in the backend response.
    path: Path,
    /// Location in the outer response.
    outer: Path,
    located: Vec<(Path, Error)>,
    unpathed: Vec<UnpathedError>,
    incremental: Option<IncrementalSource>,
}

impl Scope {
    /// The scope of the value under `element`, and the error that nulled it, if any.
    fn descend(&self, element: PathElement) -> (Scope, Option<Error>) {
        let mut sentinel = None;
        let mut located = Vec::new();
        for (path, error) in &self.located {
            if path.first() == Some(&element) {
                let rest = path.tail();
                if rest.is_empty() {
                    sentinel = Some(error.clone());
                } else {
                    located.push((rest, error.clone()));
                }
            }
        }
        let unpathed = self
            .unpathed
            .iter()
            .filter_map(|unpathed| match &unpathed.path {
                None => Some(unpathed.clone()),
                Some(path) if path.first() == Some(&element) => Some(UnpathedError {
                    path: Some(path.tail()).filter(|path| !path.is_empty()),
                    ..unpathed.clone()
                }),
                Some(_) => None,
            })
            .collect();
        let (subschema, fields) = match &element {
            PathElement::Key(key) => (
                self.fields
                    .get(key)
                    .map(|subschema| SubschemaRef::Subschema(subschema.clone()))
                    .unwrap_or_else(|| self.subschema.clone()),
                HashMap::new(),
            ),
            PathElement::Index(_) => (self.subschema.clone(), self.fields.clone()),
        };
        let scope = Scope {
            subschema,
            fields,
            merging: self.merging,
            path: self.path.join(element.clone()),
            outer: self.outer.join(element),
            located,
            unpathed,
            incremental: self.incremental.clone(),
        };
        (scope, sentinel)
    }

    fn materialize(self, value: Value) -> ExternalValue {
        match value {
            Value::Object(data) => ExternalValue::Object(ExternalObject {
                data,
                path: self.path,
                provenance: Arc::new(Provenance {
                    subschema: self.subschema,
                    fields: self.fields,
                    merging: self.merging,
                }),
                located: self.located,
                unpathed: self.unpathed,
                incremental: self.incremental,
            }),
            Value::Array(items) => ExternalValue::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let (scope, sentinel) = self.descend(PathElement::Index(index));
                        match (item, sentinel) {
                            (Value::Null, Some(error)) => {
                                ExternalValue::Error(error.relocated(Some(scope.outer)))
                            }
                            (item, _) => scope.materialize(item),
                        }
                    })
                    .collect(),
            ),
            leaf => ExternalValue::Leaf(leaf),
        }
    }
}

/// Turns the (transformed) result of a delegated call into the value of the delegated field.
///
/// Errors located at a null inside the value are attached there; other errors are carried as
/// unpathed errors. A null value with errors is a failure: the single error moved to the
/// caller's path, or all of them combined.
pub(crate) fn from_delegation_result(
    response: Response,
    delegation: &DelegationContext,
    field_subschemas: Option<&FieldSubschemaMap>,
    incremental: Option<IncrementalSource>,
) -> Result<ExternalValue, DelegationError> {
    let key = delegation.response_key.as_str();
    let value = match response.data {
        Some(Value::Object(mut data)) => data.remove(key).unwrap_or_default(),
        _ => Value::Null,
    };
    let root = Path::from_slice(&[key]);
    let outer = delegation.path().cloned().unwrap_or_else(|| root.clone());

    if value.is_null() {
        let mut errors = response.errors;
        return match errors.len() {
            0 => Ok(ExternalValue::Leaf(Value::Null)),
            1 => {
                let error = errors.remove(0);
                let path = match &error.path {
                    Some(path) => outer.concat(&path.tail()),
                    None => outer,
                };
                Err(DelegationError::Field(error.relocated(Some(path))))
            }
            _ => Err(DelegationError::Field(Error::combined(errors, Some(outer)))),
        };
    }

    let mut located = Vec::new();
    let mut unpathed = Vec::new();
    for error in response.errors {
        match error.path.as_ref().map(Path::tail) {
            Some(relative)
                if !relative.is_empty() && value.get_path(&relative) == Some(&Value::Null) =>
            {
                located.push((relative, error))
            }
            relative => unpathed.push(UnpathedError::new(error, relative)),
        }
    }

    let scope = Scope {
        subschema: delegation.subschema.clone(),
        fields: field_subschemas
            .map(|map| map.0.clone())
            .unwrap_or_default(),
        merging: !delegation.skip_type_merging,
        path: root,
        outer,
        located,
        unpathed,
        incremental,
    };
    Ok(scope.materialize(value))
}

/// Reports the errors explaining why the value at `path` (relative to `unpathed`'s owner) is
/// null: those reported below it, and those reported without a path.
///
/// Each error is only ever reported once. Returns the null when there is nothing left to
/// report.
pub(crate) fn report_unpathed_errors_via_null(
    unpathed: &[UnpathedError],
    key: &str,
    outer: &Path,
) -> Result<ExternalValue, DelegationError> {
    let element = PathElement::Key(key.to_string());
    let mut errors: Vec<Error> = unpathed
        .iter()
        .filter(|unpathed| match &unpathed.path {
            None => true,
            Some(path) => path.first() == Some(&element),
        })
        .filter(|unpathed| unpathed.report())
        .map(|unpathed| unpathed.error.clone())
        .collect();
    match errors.len() {
        0 => Ok(ExternalValue::Leaf(Value::Null)),
        1 => Err(DelegationError::Field(
            errors.remove(0).relocated(Some(outer.clone())),
        )),
        _ => Err(DelegationError::Field(Error::combined(
            errors,
            Some(outer.clone()),
        ))),
    }
}

/// The patches following a deferred initial result.
///
/// Shared by every object of the result: each waits for the patches that apply to it. Patches
/// are kept once received, so objects resolved later still see them.
#[derive(Clone)]
pub struct IncrementalSource {
    state: Arc<tokio::sync::Mutex<IncrementalState>>,
}

impl fmt::Debug for IncrementalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalSource").finish_non_exhaustive()
    }
}

struct IncrementalState {
    stream: Option<ResponseStream>,
    received: Vec<ReceivedPatch>,
}

struct ReceivedPatch {
    path: Path,
    data: Option<Value>,
    errors: Vec<(Option<Path>, UnpathedError)>,
}

impl IncrementalSource {
    pub(crate) fn new(stream: ResponseStream) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(IncrementalState {
                stream: Some(stream),
                received: Vec::new(),
            })),
        }
    }

    /// `object` with every patch for it applied, once one provides `key`.
    ///
    /// Returns `None` if the stream ends without providing it.
    pub(crate) async fn wait_for(&self, object: &ExternalObject, key: &str) -> Option<ExternalObject> {
        let mut state = self.state.lock().await;
        loop {
            let patched = apply_patches(object, &state.received);
            if patched.data.contains_key(key) {
                return Some(patched);
            }
            let next = match state.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return None,
            };
            match next {
                Some(response) => {
                    for patch in response.into_patches() {
                        let path = patch.path.unwrap_or_default();
                        let errors = patch
                            .errors
                            .into_iter()
                            .map(|error| (error.path.clone(), UnpathedError::new(error, None)))
                            .collect();
                        state.received.push(ReceivedPatch {
                            path,
                            data: patch.data,
                            errors,
                        });
                    }
                }
                None => state.stream = None,
            }
        }
    }
}

fn apply_patches(object: &ExternalObject, patches: &[ReceivedPatch]) -> ExternalObject {
    let mut data = Value::Object(object.data.clone());
    let mut unpathed = object.unpathed.clone();
    for patch in patches {
        if let Some(patch_data) = &patch.data {
            if let Some(relative) = patch.path.strip_prefix(&object.path) {
                data.merge_at(&relative, patch_data.clone());
            } else if let Some(rest) = object.path.strip_prefix(&patch.path) {
                if let Some(own) = patch_data.get_path(&rest) {
                    data.deep_merge(own.clone());
                }
            }
        }
        for (path, error) in &patch.errors {
            match path {
                None => unpathed.push(error.clone()),
                Some(path) => {
                    if let Some(relative) = path.strip_prefix(&object.path) {
                        unpathed.push(UnpathedError {
                            path: Some(relative).filter(|path| !path.is_empty()),
                            ..error.clone()
                        });
                    }
                }
            }
        }
    }
    ExternalObject {
        data: match data {
            Value::Object(data) => data,
            _ => object.data.clone(),
        },
        unpathed,
        ..object.clone()
    }
}
