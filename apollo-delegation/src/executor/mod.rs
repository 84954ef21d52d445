//! Executors and subscribers: the single-backend capabilities delegation runs requests with.
use std::fmt;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use futures::future::BoxFuture;
use tower::BoxError;

use crate::graphql::ExecutionRequest;
use crate::graphql::Response;
use crate::graphql::ResponseStream;
use crate::json_ext::Value;

pub(crate) mod in_memory;

pub use in_memory::StaticBackend;

/// What running a request produced: a single result or a live sequence of results.
pub enum ExecutionOutcome {
    Single(Response),
    Stream(ResponseStream),
}

impl fmt::Debug for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Single(response) => {
                f.debug_tuple("Single").field(response).finish()
            }
            ExecutionOutcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Response> for ExecutionOutcome {
    fn from(response: Response) -> Self {
        ExecutionOutcome::Single(response)
    }
}

/// The outcome of calling an executor, available right away or later.
pub enum ExecutorResponse {
    Ready(Result<ExecutionOutcome, BoxError>),
    Pending(BoxFuture<'static, Result<ExecutionOutcome, BoxError>>),
}

impl ExecutorResponse {
    /// A single response, available right away.
    pub fn ready(response: Response) -> Self {
        ExecutorResponse::Ready(Ok(ExecutionOutcome::Single(response)))
    }

    /// A live sequence of responses, available right away.
    pub fn stream(stream: ResponseStream) -> Self {
        ExecutorResponse::Ready(Ok(ExecutionOutcome::Stream(stream)))
    }

    /// An outcome that will be available once `future` completes.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<ExecutionOutcome, BoxError>> + Send + 'static,
    {
        ExecutorResponse::Pending(Box::pin(future))
    }

    /// A failure, available right away.
    pub fn error(error: impl Into<BoxError>) -> Self {
        ExecutorResponse::Ready(Err(error.into()))
    }

    /// Waits for the outcome.
    pub async fn resolve(self) -> Result<ExecutionOutcome, BoxError> {
        match self {
            ExecutorResponse::Ready(outcome) => outcome,
            ExecutorResponse::Pending(future) => future.await,
        }
    }
}

/// Runs query and mutation requests against one backend.
pub trait Executor: Send + Sync {
    fn execute(&self, request: ExecutionRequest) -> ExecutorResponse;
}

/// Runs subscription requests against one backend.
pub trait Subscriber: Send + Sync {
    fn subscribe(&self, request: ExecutionRequest) -> ExecutorResponse;
}

impl<F> Executor for F
where
    F: Fn(ExecutionRequest) -> ExecutorResponse + Send + Sync,
{
    fn execute(&self, request: ExecutionRequest) -> ExecutorResponse {
        self(request)
    }
}

/// Wraps a closure as a [`Subscriber`].
///
/// Closures implement [`Executor`] directly; this newtype keeps the two roles apart.
pub struct SubscriberFn<F>(pub F);

impl<F> Subscriber for SubscriberFn<F>
where
    F: Fn(ExecutionRequest) -> ExecutorResponse + Send + Sync,
{
    fn subscribe(&self, request: ExecutionRequest) -> ExecutorResponse {
        (self.0)(request)
    }
}

/// A query-capable backend, used directly when a delegation targets no subschema, and as the
/// default executor of a subschema whose endpoint sets none.
pub trait Backend: Send + Sync {
    /// The schema requests are validated against.
    fn schema(&self) -> &Arc<Valid<Schema>>;

    /// An executor bound to this backend, starting from `root_value` when given.
    fn executor(&self, root_value: Option<&Value>) -> Arc<dyn Executor>;

    /// A subscriber bound to this backend, if it supports subscriptions.
    fn subscriber(&self, _root_value: Option<&Value>) -> Option<Arc<dyn Subscriber>> {
        None
    }
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
