//! Coalescing of delegated calls to the same endpoint.
//!
//! Calls issued within one scheduling turn for the same (context, endpoint) pair are queued
//! instead of dispatched. When the queue is flushed, contiguous runs of calls with the same
//! operation kind are merged into one request, executed once, and the combined result is
//! split back per caller, in submission order.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use derivative::Derivative;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tower::BoxError;
use tracing::Instrument;

use crate::configuration::Batching;
use crate::context::Context;
use crate::context::WeakContext;
use crate::error::BatchingError;
use crate::error::DelegationError;
use crate::executor::ExecutionOutcome;
use crate::executor::Executor;
use crate::executor::ExecutorResponse;
use crate::graphql::ExecutionRequest;
use crate::graphql::OperationKind;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::subschema::Endpoint;

mod merge;
mod split;

pub use merge::PrefixMergePolicy;
pub use split::PrefixSplitPolicy;

/// Combines the extensions of the requests merged into one.
pub type ExtensionsReducer = Arc<dyn Fn(Object, &Request) -> Object + Send + Sync>;

/// Merges the requests of a run into one request that can be executed once.
pub trait MergePolicy: Send + Sync {
    fn merge(
        &self,
        requests: &[Request],
        reducer: &ExtensionsReducer,
    ) -> Result<Request, BatchingError>;
}

/// Splits the result of a merged request into one result per original request.
pub trait SplitPolicy: Send + Sync {
    fn split(&self, response: Response, count: usize) -> Result<Vec<Response>, BatchingError>;
}

/// How an endpoint batches its calls.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct BatchingOptions {
    /// How long the queue collects calls before it is flushed. Falls back to the delegator's
    /// configuration when unset.
    pub window: Option<Duration>,
    /// Maximum number of calls merged into one execution. Falls back to the delegator's
    /// configuration when unset.
    pub max_batch_size: Option<usize>,
    #[derivative(Debug = "ignore")]
    pub merge_policy: Arc<dyn MergePolicy>,
    #[derivative(Debug = "ignore")]
    pub split_policy: Arc<dyn SplitPolicy>,
    #[derivative(Debug = "ignore")]
    pub extensions_reducer: ExtensionsReducer,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[buildstructor::buildstructor]
impl BatchingOptions {
    #[builder(visibility = "pub")]
    fn new(
        window: Option<Duration>,
        max_batch_size: Option<usize>,
        merge_policy: Option<Arc<dyn MergePolicy>>,
        split_policy: Option<Arc<dyn SplitPolicy>>,
        extensions_reducer: Option<ExtensionsReducer>,
    ) -> Self {
        Self {
            window,
            max_batch_size,
            merge_policy: merge_policy.unwrap_or_else(|| Arc::new(PrefixMergePolicy)),
            split_policy: split_policy.unwrap_or_else(|| Arc::new(PrefixSplitPolicy)),
            extensions_reducer: extensions_reducer.unwrap_or_else(|| Arc::new(shallow_merge)),
        }
    }

    fn with_defaults(&self, defaults: &Batching) -> Self {
        Self {
            window: self.window.or(defaults.window),
            max_batch_size: self.max_batch_size.or(defaults.max_batch_size),
            ..self.clone()
        }
    }
}

/// Later requests' extensions overwrite earlier ones, key by key.
fn shallow_merge(mut extensions: Object, request: &Request) -> Object {
    for (key, value) in &request.extensions {
        extensions.insert(key.clone(), value.clone());
    }
    extensions
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BatchKey {
    context: String,
    endpoint: usize,
}

/// The batch queues of one [`crate::Delegator`], one per (context, endpoint) pair.
#[derive(Default)]
pub(crate) struct BatchRegistry {
    queues: DashMap<BatchKey, Arc<BatchQueue>>,
}

impl BatchRegistry {
    /// The batching executor for `context` and `endpoint`, created on first use.
    ///
    /// `executor` only matters when the queue is created: every call queued for the pair
    /// runs through the executor of the first one.
    pub(crate) fn executor(
        &self,
        context: &Context,
        endpoint: &Arc<Endpoint>,
        executor: Arc<dyn Executor>,
        defaults: &Batching,
    ) -> BatchingExecutor {
        let key = BatchKey {
            context: context.id().to_string(),
            endpoint: Arc::as_ptr(endpoint) as usize,
        };
        let existing = self.queues.get(&key).map(|queue| queue.clone());
        if let Some(queue) = existing {
            return BatchingExecutor { queue };
        }

        self.queues.retain(|_, queue| queue.context.is_alive());
        let queue = self
            .queues
            .entry(key)
            .or_insert_with(|| {
                Arc::new(BatchQueue {
                    context: context.downgrade(),
                    _endpoint: endpoint.clone(),
                    executor,
                    options: endpoint.batching_options().with_defaults(defaults),
                    pending: Mutex::new(Vec::new()),
                })
            })
            .clone();
        BatchingExecutor { queue }
    }

    pub(crate) fn finish_request(&self, context: &Context) {
        self.queues.retain(|key, _| key.context != context.id());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }
}

struct BatchQueue {
    context: WeakContext,
    // Keeps the endpoint alive so its address stays a unique key.
    _endpoint: Arc<Endpoint>,
    executor: Arc<dyn Executor>,
    options: BatchingOptions,
    pending: Mutex<Vec<QueuedCall>>,
}

struct QueuedCall {
    request: ExecutionRequest,
    kind: OperationKind,
    sender: oneshot::Sender<Result<ExecutionOutcome, DelegationError>>,
}

/// Queues calls for one (context, endpoint) pair.
#[derive(Clone)]
pub struct BatchingExecutor {
    queue: Arc<BatchQueue>,
}

impl fmt::Debug for BatchingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchingExecutor")
            .field("options", &self.queue.options)
            .finish_non_exhaustive()
    }
}

impl BatchingExecutor {
    /// Queues `request` and waits for its share of the batched result.
    ///
    /// The request is queued before this returns. The returned future lets the current
    /// turn finish (or waits for the batching window), then flushes whatever the queue holds
    /// if no other caller has done so yet. Calls queued by futures polled together, as in
    /// `join!`, therefore end up in the same flush whatever the runtime flavor.
    pub fn load(
        &self,
        request: ExecutionRequest,
    ) -> BoxFuture<'static, Result<ExecutionOutcome, DelegationError>> {
        let kind = request.request.operation_kind().unwrap_or_default();
        let (sender, receiver) = oneshot::channel();
        self.queue.pending.lock().push(QueuedCall {
            request,
            kind,
            sender,
        });

        let queue = self.queue.clone();
        Box::pin(async move {
            queue.wait().await;
            queue.flush();
            match receiver.await {
                Ok(result) => result,
                Err(_) => Err(BatchingError::SenderUnavailable.into()),
            }
        })
    }
}

impl Executor for BatchingExecutor {
    fn execute(&self, request: ExecutionRequest) -> ExecutorResponse {
        let result = self.load(request);
        ExecutorResponse::pending(async move { result.await.map_err(BoxError::from) })
    }
}

impl BatchQueue {
    async fn wait(&self) {
        match self.options.window {
            Some(window) if !window.is_zero() => tokio::time::sleep(window).await,
            _ => tokio::task::yield_now().await,
        }
    }

    /// Takes every queued call and executes them in the background, so that the results
    /// still reach the other callers if the flushing caller goes away.
    fn flush(self: &Arc<Self>) {
        let calls: Vec<QueuedCall> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .filter(|call| !call.sender.is_closed())
            .collect();
        if calls.is_empty() {
            return;
        }
        let runs = partition(calls, self.options.max_batch_size);
        tracing::debug!(
            runs = runs.len(),
            sizes = ?runs.iter().map(Vec::len).collect::<Vec<_>>(),
            "flushing batch queue"
        );
        let queue = self.clone();
        tokio::spawn(
            async move {
                for run in runs {
                    queue.execute_run(run).await;
                }
            }
            .instrument(tracing::debug_span!("batch_flush")),
        );
    }

    async fn execute_run(&self, run: Vec<QueuedCall>) {
        let count = run.len();
        let (requests, senders): (Vec<_>, Vec<_>) = run
            .into_iter()
            .map(|call| (call.request, call.sender))
            .unzip();

        let request = if count == 1 {
            requests[0].clone()
        } else {
            let originals: Vec<Request> = requests.iter().map(|r| r.request.clone()).collect();
            match self
                .options
                .merge_policy
                .merge(&originals, &self.options.extensions_reducer)
            {
                Ok(merged) => ExecutionRequest::builder()
                    .request(merged)
                    .context(requests[0].context.clone())
                    .and_info(requests[0].info.clone())
                    .build(),
                Err(error) => {
                    return broadcast(senders, || Err(error.clone().into()));
                }
            }
        };

        let response = match self.executor.execute(request).resolve().await {
            Ok(ExecutionOutcome::Single(response)) => response,
            Ok(ExecutionOutcome::Stream(_)) => {
                return broadcast(senders, || {
                    Err(DelegationError::Unsupported(
                        "batching is not possible for operations returning incremental results"
                            .to_string(),
                    ))
                });
            }
            Err(error) => {
                let error = Arc::new(error);
                return broadcast(senders, || Err(DelegationError::Backend(error.clone())));
            }
        };

        if count == 1 {
            return broadcast(senders, || Ok(ExecutionOutcome::Single(response.clone())));
        }
        match self.options.split_policy.split(response, count) {
            Ok(responses) if responses.len() == count => {
                for (sender, response) in senders.into_iter().zip(responses) {
                    // The caller may have given up on the result.
                    let _ = sender.send(Ok(ExecutionOutcome::Single(response)));
                }
            }
            Ok(responses) => {
                let error = BatchingError::Split(format!(
                    "expected {count} results, the split policy produced {}",
                    responses.len()
                ));
                broadcast(senders, || Err(error.clone().into()))
            }
            Err(error) => broadcast(senders, || Err(error.clone().into())),
        }
    }
}

fn broadcast(
    senders: Vec<oneshot::Sender<Result<ExecutionOutcome, DelegationError>>>,
    result: impl Fn() -> Result<ExecutionOutcome, DelegationError>,
) {
    for sender in senders {
        let _ = sender.send(result());
    }
}

/// Maximal contiguous runs of calls with the same operation kind, at most `max_batch_size`
/// long.
fn partition(calls: Vec<QueuedCall>, max_batch_size: Option<usize>) -> Vec<Vec<QueuedCall>> {
    let max_batch_size = max_batch_size.unwrap_or(usize::MAX).max(1);
    let mut runs: Vec<Vec<QueuedCall>> = Vec::new();
    for call in calls {
        match runs.last_mut() {
            Some(run) if run[0].kind == call.kind && run.len() < max_batch_size => run.push(call),
            _ => runs.push(vec![call]),
        }
    }
    runs
}
