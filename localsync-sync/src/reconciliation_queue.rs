//! Per-model queues that feed remote records to reconciliation.
//!
//! Every model gets one worker task, so records of a model are reconciled
//! strictly in arrival order while different models proceed concurrently.
//! Initial sync pages are offered directly. Live subscription records are
//! held back until [`ReconciliationQueue::activate`], which the engine calls
//! once the initial sync has finished.

use crate::error::{SyncError, SyncResult};
use crate::event::{EventHub, SyncEvent};
use crate::reconcile::{ReconcileAndLocalSave, ReconcileOutcome};
use crate::remote::SubscriptionEvent;
use localsync_model::QueryPredicate;
use localsync_types::MutationSync;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives the outcome of one offered record.
pub type OutcomeReceiver = oneshot::Receiver<SyncResult<ReconcileOutcome>>;

struct Job {
    item: MutationSync<Value>,
    reply: Option<oneshot::Sender<SyncResult<ReconcileOutcome>>>,
}

/// Routes remote records to per-model reconcile workers.
pub struct ReconciliationQueue {
    events: EventHub,
    workers: HashMap<String, mpsc::UnboundedSender<Job>>,
    worker_tasks: Vec<JoinHandle<()>>,
    listeners: Vec<JoinHandle<()>>,
    active: watch::Sender<bool>,
    cancelled: Arc<AtomicBool>,
    failures: mpsc::UnboundedSender<SyncError>,
}

impl ReconciliationQueue {
    /// Starts one worker per model. The receiver yields fatal subscription
    /// failures.
    pub fn new(
        reconciler: Arc<ReconcileAndLocalSave>,
        events: EventHub,
        model_names: impl IntoIterator<Item = String>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncError>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut workers = HashMap::new();
        let mut worker_tasks = Vec::new();
        for model_name in model_names {
            let (tx, rx) = mpsc::unbounded_channel();
            worker_tasks.push(tokio::spawn(work(
                Arc::clone(&reconciler),
                rx,
                Arc::clone(&cancelled),
            )));
            workers.insert(model_name, tx);
        }
        let (active, _) = watch::channel(false);
        let (failures, failures_rx) = mpsc::unbounded_channel();

        let queue = Self {
            events,
            workers,
            worker_tasks,
            listeners: Vec::new(),
            active,
            cancelled,
            failures,
        };
        (queue, failures_rx)
    }

    fn worker(&self, model_name: &str) -> SyncResult<&mpsc::UnboundedSender<Job>> {
        self.workers.get(model_name).ok_or_else(|| {
            SyncError::InvalidOperation(format!("no reconciliation queue for {model_name}"))
        })
    }

    /// Queues records for reconciliation without waiting for them. Each
    /// record's outcome arrives on the matching receiver.
    pub fn offer(&self, items: Vec<MutationSync<Value>>) -> SyncResult<Vec<OutcomeReceiver>> {
        let mut receivers = Vec::with_capacity(items.len());
        for item in items {
            let worker = self.worker(&item.sync_metadata.model_name)?;
            let (reply, rx) = oneshot::channel();
            worker
                .send(Job {
                    item,
                    reply: Some(reply),
                })
                .map_err(|_| SyncError::ChannelClosed("reconciliation worker".into()))?;
            receivers.push(rx);
        }
        Ok(receivers)
    }

    /// Listens to a live subscription. Records not matching `filter` are
    /// ignored; the rest are buffered until activation.
    pub fn attach(
        &mut self,
        model_name: &str,
        stream: mpsc::Receiver<SubscriptionEvent>,
        filter: Option<QueryPredicate>,
    ) -> SyncResult<()> {
        let jobs = self.worker(model_name)?.clone();
        let listener = Listener {
            model_name: model_name.to_string(),
            filter,
            jobs,
            active: self.active.subscribe(),
            events: self.events.clone(),
            failures: self.failures.clone(),
            buffer: VecDeque::new(),
        };
        self.listeners.push(tokio::spawn(listener.run(stream)));
        Ok(())
    }

    /// Releases buffered and future subscription records to reconciliation.
    pub fn activate(&self) {
        self.active.send_replace(true);
        info!("reconciliation queue activated");
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Stops listening and lets workers exit after their current record.
    /// Records still queued are answered with `Cancelled`.
    pub async fn shutdown(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for listener in &self.listeners {
            listener.abort();
        }
        for listener in self.listeners {
            let _ = listener.await;
        }
        drop(self.workers);
        for worker in self.worker_tasks {
            if let Err(e) = worker.await {
                warn!("reconciliation worker failed: {e}");
            }
        }
        debug!("reconciliation queue shut down");
    }
}

async fn work(
    reconciler: Arc<ReconcileAndLocalSave>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    cancelled: Arc<AtomicBool>,
) {
    while let Some(job) = jobs.recv().await {
        let outcome = if cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            let reconciler = Arc::clone(&reconciler);
            let item = job.item;
            match tokio::task::spawn_blocking(move || reconciler.run(item)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("spawn_blocking panicked during reconcile: {e}");
                    Err(SyncError::Internal(e.to_string()))
                }
            }
        };
        if let Some(reply) = job.reply {
            let _ = reply.send(outcome);
        }
    }
}

struct Listener {
    model_name: String,
    filter: Option<QueryPredicate>,
    jobs: mpsc::UnboundedSender<Job>,
    active: watch::Receiver<bool>,
    events: EventHub,
    failures: mpsc::UnboundedSender<SyncError>,
    buffer: VecDeque<MutationSync<Value>>,
}

impl Listener {
    async fn run(mut self, mut stream: mpsc::Receiver<SubscriptionEvent>) {
        loop {
            tokio::select! {
                changed = self.active.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *self.active.borrow_and_update() && !self.flush() {
                        break;
                    }
                }
                event = stream.recv() => match event {
                    Some(SubscriptionEvent::Connection(state)) => {
                        debug!("subscription {}: {state:?}", self.model_name);
                        self.events.emit(SyncEvent::Connection {
                            model_name: self.model_name.clone(),
                            state,
                        });
                    }
                    Some(SubscriptionEvent::Mutation(item)) => {
                        if !self.matches(&item) {
                            debug!("subscription {}: {} filtered out", self.model_name, item.sync_metadata.model_id);
                            continue;
                        }
                        self.buffer.push_back(item);
                        if *self.active.borrow() && !self.flush() {
                            break;
                        }
                    }
                    Some(SubscriptionEvent::Failed(e)) => {
                        warn!("subscription {} failed: {e}", self.model_name);
                        let _ = self.failures.send(SyncError::Remote(e));
                        break;
                    }
                    None => {
                        warn!("subscription {} closed", self.model_name);
                        let _ = self.failures.send(SyncError::ChannelClosed(format!(
                            "{} subscription",
                            self.model_name
                        )));
                        break;
                    }
                },
            }
        }
    }

    fn matches(&self, item: &MutationSync<Value>) -> bool {
        self.filter.as_ref().is_none_or(|filter| {
            item.model
                .as_object()
                .is_some_and(|instance| filter.evaluate(instance))
        })
    }

    /// Hands buffered records to the worker. Returns `false` once the worker
    /// is gone.
    fn flush(&mut self) -> bool {
        while let Some(item) = self.buffer.pop_front() {
            if self.jobs.send(Job { item, reply: None }).is_err() {
                return false;
            }
        }
        true
    }
}
