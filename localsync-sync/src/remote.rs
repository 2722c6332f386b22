//! Remote collaborator abstraction.
//!
//! The engine never talks to the network directly. It drives a [`RemoteApi`]
//! for paged sync queries and mutations, a [`SubscriptionProvider`] for live
//! per-model change streams, and a [`RetryPolicy`] that decides whether a
//! failed call is worth repeating.

use crate::error::SyncError;
use async_trait::async_trait;
use localsync_model::{AnyModel, ModelSchema, QueryPredicate};
use localsync_types::{MutationEvent, MutationSync, Timestamp};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by the remote backend or the channel to it.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transport failure; the request may not have reached the backend.
    #[error("network error: {0}")]
    Network(String),

    /// The mutation's condition did not hold on the backend.
    #[error("conditional check failed: {0}")]
    ConditionalCheck(String),

    /// The backend detected a version conflict it could not resolve itself.
    #[error("unhandled conflict: {message}")]
    ConflictUnhandled {
        message: String,
        remote: Option<Box<MutationSync<AnyModel>>>,
    },

    /// Any other rejection.
    #[error("service error: {0}")]
    Service(String),
}

impl RemoteError {
    /// Transport failures are retryable; rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// One page request of a model's remote state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueryRequest {
    pub model_name: String,
    pub limit: usize,
    pub next_token: Option<String>,
    /// Only records changed since this time; `None` asks for everything.
    pub last_sync: Option<Timestamp>,
    pub filter: Option<QueryPredicate>,
}

/// One page of remote records.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedList {
    /// Raw payloads; decoding happens per item during reconciliation.
    pub items: Vec<MutationSync<Value>>,
    pub next_token: Option<String>,
    /// Server time at which the query started.
    pub started_at: Timestamp,
}

/// Connection state of one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected { unauthorized: bool },
}

/// An item on a live subscription stream.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Connection(ConnectionState),
    Mutation(MutationSync<Value>),
    /// The stream failed and will produce nothing further.
    Failed(RemoteError),
}

/// Paged queries and mutations against the backend.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetches one page of a model's records.
    async fn sync_query(&self, request: SyncQueryRequest) -> Result<PaginatedList, RemoteError>;

    /// Sends one local mutation; the response carries the new record state.
    async fn mutate(&self, event: &MutationEvent) -> Result<MutationSync<AnyModel>, RemoteError>;
}

/// Live change streams, one per model.
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    async fn subscribe(
        &self,
        schema: &ModelSchema,
    ) -> Result<mpsc::Receiver<SubscriptionEvent>, RemoteError>;
}

/// Outcome of consulting a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    RetryAfter(Duration),
    DoNotRetry,
}

/// Decides whether a failed operation should be repeated.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` counts failures so far, starting at 1.
    fn retry_advice(&self, error: &SyncError, attempt: u32) -> RetryAdvice;
}

/// Scripted collaborators for testing.
pub mod mock {
    use super::*;
    use localsync_types::{MutationSyncMetadata, MutationType};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A backend that answers from scripted responses and records requests.
    ///
    /// Without scripted pages a sync query returns one empty page. Without a
    /// scripted mutation response the event is accepted and echoed back with
    /// its version incremented.
    #[derive(Debug, Default)]
    pub struct MockRemoteApi {
        pages: Mutex<HashMap<String, VecDeque<Result<PaginatedList, RemoteError>>>>,
        mutation_responses: Mutex<VecDeque<Result<MutationSync<AnyModel>, RemoteError>>>,
        sync_requests: Mutex<Vec<SyncQueryRequest>>,
        mutations: Mutex<Vec<MutationEvent>>,
    }

    impl MockRemoteApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a page for the model's next sync query.
        pub fn push_page(&self, model_name: &str, page: PaginatedList) {
            lock(&self.pages)
                .entry(model_name.to_string())
                .or_default()
                .push_back(Ok(page));
        }

        /// Makes the model's next sync query fail.
        pub fn push_sync_error(&self, model_name: &str, error: RemoteError) {
            lock(&self.pages)
                .entry(model_name.to_string())
                .or_default()
                .push_back(Err(error));
        }

        /// Queues the response to the next mutation.
        pub fn push_mutation_response(&self, response: Result<MutationSync<AnyModel>, RemoteError>) {
            lock(&self.mutation_responses).push_back(response);
        }

        /// Sync queries received so far.
        pub fn sync_requests(&self) -> Vec<SyncQueryRequest> {
            lock(&self.sync_requests).clone()
        }

        /// Mutations received so far, including rejected ones.
        pub fn mutations(&self) -> Vec<MutationEvent> {
            lock(&self.mutations).clone()
        }

        fn echo(event: &MutationEvent) -> Result<MutationSync<AnyModel>, RemoteError> {
            let payload = event
                .payload()
                .map_err(|e| RemoteError::Service(e.to_string()))?;
            let model = AnyModel::new(event.model_name.clone(), payload)
                .map_err(|e| RemoteError::Service(e.to_string()))?;
            let mut metadata = MutationSyncMetadata::new(
                event.model_name.clone(),
                event.model_id.clone(),
                event.version.unwrap_or(0) + 1,
                Timestamp::now(),
            );
            metadata.deleted = event.mutation_type == MutationType::Delete;
            Ok(MutationSync::new(model, metadata))
        }
    }

    #[async_trait]
    impl RemoteApi for MockRemoteApi {
        async fn sync_query(&self, request: SyncQueryRequest) -> Result<PaginatedList, RemoteError> {
            let scripted = lock(&self.pages)
                .get_mut(&request.model_name)
                .and_then(VecDeque::pop_front);
            lock(&self.sync_requests).push(request);
            scripted.unwrap_or_else(|| {
                Ok(PaginatedList {
                    items: Vec::new(),
                    next_token: None,
                    started_at: Timestamp::now(),
                })
            })
        }

        async fn mutate(&self, event: &MutationEvent) -> Result<MutationSync<AnyModel>, RemoteError> {
            lock(&self.mutations).push(event.clone());
            let scripted = lock(&self.mutation_responses).pop_front();
            scripted.unwrap_or_else(|| Self::echo(event))
        }
    }

    /// Subscription streams that tests push events into.
    ///
    /// Each subscription starts by reporting `Connected`.
    #[derive(Debug, Default)]
    pub struct MockSubscriptionProvider {
        senders: Mutex<HashMap<String, mpsc::Sender<SubscriptionEvent>>>,
        failures: Mutex<HashMap<String, RemoteError>>,
        subscribe_calls: Mutex<Vec<String>>,
    }

    impl MockSubscriptionProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every later subscription to the model fail.
        pub fn fail_subscribe(&self, model_name: &str, error: RemoteError) {
            lock(&self.failures).insert(model_name.to_string(), error);
        }

        /// Stops failing subscriptions to the model.
        pub fn allow_subscribe(&self, model_name: &str) {
            lock(&self.failures).remove(model_name);
        }

        /// Models subscribed to so far, in call order.
        pub fn subscribe_calls(&self) -> Vec<String> {
            lock(&self.subscribe_calls).clone()
        }

        /// Delivers an event on the model's stream. Returns `false` if there is
        /// no open stream.
        pub async fn send(&self, model_name: &str, event: SubscriptionEvent) -> bool {
            let sender = lock(&self.senders).get(model_name).cloned();
            match sender {
                Some(tx) => tx.send(event).await.is_ok(),
                None => false,
            }
        }

        /// Delivers a remote record on the model's stream.
        pub async fn send_mutation(&self, item: MutationSync<Value>) -> bool {
            let model_name = item.sync_metadata.model_name.clone();
            self.send(&model_name, SubscriptionEvent::Mutation(item)).await
        }

        /// Closes the model's stream.
        pub fn close(&self, model_name: &str) {
            lock(&self.senders).remove(model_name);
        }
    }

    #[async_trait]
    impl SubscriptionProvider for MockSubscriptionProvider {
        async fn subscribe(
            &self,
            schema: &ModelSchema,
        ) -> Result<mpsc::Receiver<SubscriptionEvent>, RemoteError> {
            lock(&self.subscribe_calls).push(schema.name.clone());
            if let Some(error) = lock(&self.failures).get(&schema.name).cloned() {
                return Err(error);
            }
            let (tx, rx) = mpsc::channel(64);
            let _ = tx.try_send(SubscriptionEvent::Connection(ConnectionState::Connected));
            lock(&self.senders).insert(schema.name.clone(), tx);
            Ok(rx)
        }
    }
}
