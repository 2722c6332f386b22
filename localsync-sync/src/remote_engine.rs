//! Top-level sync lifecycle.
//!
//! A supervisor task walks the engine through startup:
//!
//! ```text
//! not_started -> storage_adapter_available -> subscriptions_paused
//!   -> mutations_paused -> cleared_state_outgoing_mutations
//!   -> subscriptions_initialized -> performed_initial_sync
//!   -> subscriptions_activated -> mutation_queue_started -> sync_started
//! ```
//!
//! Subscriptions are opened before the initial sync but their records are
//! buffered until it finishes, so a live change cannot be overwritten by an
//! older page. A startup failure either schedules a restart or cleans up,
//! as the retry policy advises. A subscription failure in steady state
//! cleans up without restarting. [`RemoteSyncEngine::stop`] ends in
//! `cleaned_up_for_termination` instead, so callers can tell the two apart.

use crate::conflict::{ApplyRemoteHandler, ConflictHandler};
use crate::error::{SyncError, SyncResult};
use crate::event::SyncEvent;
use crate::initial_sync::InitialSyncOrchestrator;
use crate::reconcile::ReconcileAndLocalSave;
use crate::reconciliation_queue::ReconciliationQueue;
use crate::remote::{RemoteApi, RetryAdvice, RetryPolicy, SubscriptionProvider};
use crate::storage_engine::StorageEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle states of the remote sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    StorageAdapterAvailable,
    SubscriptionsPaused,
    MutationsPaused,
    ClearedStateOutgoingMutations,
    SubscriptionsInitialized,
    PerformedInitialSync,
    SubscriptionsActivated,
    MutationQueueStarted,
    SyncStarted,
    /// Startup failed; a new attempt follows after a delay.
    SchedulingRestart,
    /// Sync ended after a failure.
    CleanedUp,
    /// Sync ended because [`RemoteSyncEngine::stop`] was called.
    CleanedUpForTermination,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CleanedUp | Self::CleanedUpForTermination)
    }
}

/// Resources of one run, released by `cleanup`.
struct Running {
    queue: ReconciliationQueue,
    failures: mpsc::UnboundedReceiver<SyncError>,
    cancelled: Arc<AtomicBool>,
}

pub struct RemoteSyncEngine {
    storage: Arc<StorageEngine>,
    api: Arc<dyn RemoteApi>,
    subscriptions: Arc<dyn SubscriptionProvider>,
    conflict_handler: Arc<dyn ConflictHandler>,
    retry: Arc<dyn RetryPolicy>,
    state: watch::Sender<EngineState>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteSyncEngine {
    /// Creates an engine using the storage engine's retry configuration and
    /// keeping the backend's record on conflicts.
    pub fn new(
        storage: Arc<StorageEngine>,
        api: Arc<dyn RemoteApi>,
        subscriptions: Arc<dyn SubscriptionProvider>,
    ) -> Self {
        let retry = Arc::new(storage.config().retry.clone());
        let (state, _) = watch::channel(EngineState::NotStarted);
        let (stop_tx, _) = watch::channel(false);
        Self {
            storage,
            api,
            subscriptions,
            conflict_handler: Arc::new(ApplyRemoteHandler),
            retry,
            state,
            stop_tx,
            task: Mutex::new(None),
        }
    }

    pub fn with_conflict_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        self.conflict_handler = handler;
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Watches lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Starts syncing in the background. Does nothing while a run is active.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("sync engine already running");
            return;
        }
        self.storage.register_sync_engine(Arc::downgrade(self));
        self.stop_tx.send_replace(false);
        let stop = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(Arc::clone(self).supervise(stop)));
        info!("sync engine started");
    }

    /// Stops syncing and waits for cleanup to finish.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("sync engine task failed: {e}");
            }
        }
    }

    fn transition(&self, state: EngineState) {
        self.state.send_replace(state);
        info!("sync engine: {state:?}");
        self.storage.events().emit(SyncEvent::Lifecycle(state));
    }

    async fn stop_requested(stop: &mut watch::Receiver<bool>) {
        loop {
            if *stop.borrow_and_update() {
                return;
            }
            if stop.changed().await.is_err() {
                return;
            }
        }
    }

    async fn supervise(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut attempt = 0;
        loop {
            let mut running = None;
            let started = tokio::select! {
                result = self.start_once(&mut running) => result,
                () = Self::stop_requested(&mut stop) => Err(SyncError::Cancelled),
            };

            if *stop.borrow() {
                self.cleanup(running).await;
                self.transition(EngineState::CleanedUpForTermination);
                return;
            }

            match started {
                Ok(()) => {
                    attempt = 0;
                    let failure = match running.as_mut() {
                        Some(run) => tokio::select! {
                            failure = run.failures.recv() => Some(failure.unwrap_or_else(|| {
                                SyncError::ChannelClosed("reconciliation failures".into())
                            })),
                            () = Self::stop_requested(&mut stop) => None,
                        },
                        None => Some(SyncError::Internal("sync started without resources".into())),
                    };
                    self.cleanup(running).await;
                    match failure {
                        Some(e) => {
                            error!("sync engine failed: {e}");
                            self.transition(EngineState::CleanedUp);
                        }
                        None => self.transition(EngineState::CleanedUpForTermination),
                    }
                    return;
                }
                Err(e) => {
                    self.cleanup(running).await;
                    attempt += 1;
                    match self.retry.retry_advice(&e, attempt) {
                        RetryAdvice::RetryAfter(delay) => {
                            warn!("sync engine failed to start: {e}, restarting in {delay:?}");
                            self.transition(EngineState::SchedulingRestart);
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = Self::stop_requested(&mut stop) => {
                                    self.transition(EngineState::CleanedUpForTermination);
                                    return;
                                }
                            }
                        }
                        RetryAdvice::DoNotRetry => {
                            error!("sync engine failed to start: {e}");
                            self.transition(EngineState::CleanedUp);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One startup attempt. Resources are placed in `running` as soon as
    /// they exist so an interrupted attempt can still be cleaned up.
    async fn start_once(&self, running: &mut Option<Running>) -> SyncResult<()> {
        let adapter = Arc::clone(self.storage.adapter());
        let events = self.storage.events().clone();
        let outbox = Arc::clone(self.storage.outbox());
        let config = self.storage.config().clone();
        let catalog = Arc::clone(adapter.catalog());

        adapter.session(|s| s.mutation_event_count())?;
        self.transition(EngineState::StorageAdapterAvailable);

        let reconciler = Arc::new(ReconcileAndLocalSave::new(Arc::clone(&adapter), events.clone()));
        let (queue, failures) = ReconciliationQueue::new(
            reconciler,
            events.clone(),
            catalog.syncable().map(|s| s.name.clone()),
        );
        let run = running.insert(Running {
            queue,
            failures,
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        self.transition(EngineState::SubscriptionsPaused);

        outbox.pause();
        self.transition(EngineState::MutationsPaused);

        let cleared = outbox.clear_in_process()?;
        debug!("cleared {cleared} in-flight outbox entries");
        self.transition(EngineState::ClearedStateOutgoingMutations);

        for schema in catalog.syncable() {
            let stream = self.subscriptions.subscribe(schema).await?;
            let filter = config.sync_expressions.get(&schema.name).cloned();
            run.queue.attach(&schema.name, stream, filter)?;
        }
        self.transition(EngineState::SubscriptionsInitialized);

        let orchestrator = InitialSyncOrchestrator::new(
            Arc::clone(&adapter),
            Arc::clone(&self.api),
            events.clone(),
            config,
            Arc::clone(&run.cancelled),
        );
        let reports = orchestrator.sync(&run.queue).await;
        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        if failed > 0 {
            warn!("initial sync failed for {failed} models, continuing");
        }
        self.transition(EngineState::PerformedInitialSync);

        run.queue.activate();
        self.transition(EngineState::SubscriptionsActivated);

        outbox
            .start(
                Arc::clone(&self.api),
                Arc::clone(&self.retry),
                Arc::clone(&self.conflict_handler),
            )
            .await?;
        self.transition(EngineState::MutationQueueStarted);

        self.transition(EngineState::SyncStarted);
        events.emit(SyncEvent::Ready);
        Ok(())
    }

    async fn cleanup(&self, running: Option<Running>) {
        if let Some(run) = running {
            run.cancelled.store(true, Ordering::SeqCst);
            run.queue.shutdown().await;
        }
        self.storage.outbox().stop().await;
        debug!("sync engine resources released");
    }
}
