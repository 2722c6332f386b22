//! Durable, ordered queue of local mutations awaiting submission.
//!
//! Events are persisted before anything is sent and removed only once the
//! backend has answered. A single drain task submits the oldest event, so at
//! most one mutation is in flight and later writes to the same record queue
//! behind it. Pausing stops submission only; local enqueueing continues.

use crate::conflict::{resolve_conflict, ConflictAction, ConflictHandler};
use crate::error::{SyncError, SyncResult};
use crate::event::{EventHub, SyncEvent};
use crate::remote::{RemoteApi, RemoteError, RetryAdvice, RetryPolicy};
use localsync_model::AnyModel;
use localsync_storage::{SqliteStorageAdapter, StorageResult, StorageSession};
use localsync_types::{MutationEvent, MutationSync, MutationType};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of persisting an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    /// Stored as a new outbox entry.
    Inserted(MutationEvent),
    /// Folded into a pending entry for the same record; carries that entry.
    Merged(MutationEvent),
    /// A delete cancelled a pending create; both are gone.
    Cancelled(MutationEvent),
}

impl Persisted {
    /// The outbox entry affected.
    pub fn event(&self) -> &MutationEvent {
        match self {
            Self::Inserted(e) | Self::Merged(e) | Self::Cancelled(e) => e,
        }
    }
}

/// Persists `event` within the caller's session.
///
/// If the newest pending entry for the same record is not in flight, the new
/// event is merged into it instead of being appended:
/// create+update keeps a create with the new payload, create+delete removes
/// both and update+update replaces the payload. Update+delete drops the
/// update and appends the delete with the update's version when it has none.
/// Events carrying a condition are never merged.
pub fn persist(session: &StorageSession<'_>, event: MutationEvent) -> StorageResult<Persisted> {
    let pending = session.pending_mutation_events(&event.model_name, &event.model_id)?;
    let mergeable = pending
        .into_iter()
        .last()
        .filter(|existing| {
            !existing.in_process && existing.condition.is_none() && event.condition.is_none()
        });

    let Some(mut existing) = mergeable else {
        session.insert_mutation_event(&event)?;
        return Ok(Persisted::Inserted(event));
    };

    match (existing.mutation_type, event.mutation_type) {
        (MutationType::Create, MutationType::Update) => {
            existing.json = event.json;
            session.update_mutation_event(&existing)?;
            Ok(Persisted::Merged(existing))
        }
        (MutationType::Create, MutationType::Delete) => {
            session.delete_mutation_event(&existing.id)?;
            Ok(Persisted::Cancelled(existing))
        }
        (MutationType::Update, MutationType::Update) => {
            existing.json = event.json;
            session.update_mutation_event(&existing)?;
            Ok(Persisted::Merged(existing))
        }
        (MutationType::Update, MutationType::Delete) => {
            // The delete goes to the tail so it drains after deletes queued
            // since the update, such as a cascade's children.
            session.delete_mutation_event(&existing.id)?;
            let version = event.version.or(existing.version);
            let event = event.with_version(version);
            session.insert_mutation_event(&event)?;
            Ok(Persisted::Inserted(event))
        }
        _ => {
            session.insert_mutation_event(&event)?;
            Ok(Persisted::Inserted(event))
        }
    }
}

/// Whether the drain task may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    /// No drain task is running.
    Stopped,
    /// The drain task is idle until resumed.
    Paused,
    Active,
}

struct Inner {
    adapter: Arc<SqliteStorageAdapter>,
    events: EventHub,
    state: watch::Sender<OutboxState>,
    wake: Notify,
}

/// The mutation outbox.
pub struct MutationOutbox {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MutationOutbox {
    pub fn new(adapter: Arc<SqliteStorageAdapter>, events: EventHub) -> Self {
        let (state, _) = watch::channel(OutboxState::Stopped);
        Self {
            inner: Arc::new(Inner {
                adapter,
                events,
                state,
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Persists an event in its own transaction and wakes the drain task.
    pub fn enqueue(&self, event: MutationEvent) -> SyncResult<Persisted> {
        let persisted = self.inner.adapter.transaction(|s| persist(s, event))?;
        self.notify(&persisted);
        Ok(persisted)
    }

    /// Announces an event persisted by [`persist`] and wakes the drain task.
    pub fn notify(&self, persisted: &Persisted) {
        match persisted {
            Persisted::Inserted(e) | Persisted::Merged(e) => {
                debug!("outbox: queued {} {} {}", e.mutation_type, e.model_name, e.model_id);
                self.inner
                    .events
                    .emit(SyncEvent::OutboxMutationEnqueued(e.clone()));
            }
            Persisted::Cancelled(e) => {
                debug!("outbox: create of {} {} cancelled by delete", e.model_name, e.model_id);
            }
        }
        self.inner.announce_status();
        self.inner.wake.notify_one();
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.inner.adapter.session(|s| s.mutation_event_count())? == 0)
    }

    pub fn state(&self) -> OutboxState {
        *self.inner.state.borrow()
    }

    /// Stops submitting after the in-flight mutation completes.
    pub fn pause(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == OutboxState::Active {
                *state = OutboxState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Resumes submission of a paused outbox.
    pub fn resume(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == OutboxState::Paused {
                *state = OutboxState::Active;
                true
            } else {
                false
            }
        });
    }

    /// Clears in-flight flags left by an interrupted run.
    pub fn clear_in_process(&self) -> SyncResult<usize> {
        Ok(self.inner.adapter.session(|s| s.clear_in_process())?)
    }

    /// Starts draining persisted events, oldest first.
    pub async fn start(
        &self,
        api: Arc<dyn RemoteApi>,
        retry: Arc<dyn RetryPolicy>,
        conflict_handler: Arc<dyn ConflictHandler>,
    ) -> SyncResult<()> {
        self.stop().await;
        let cleared = self.clear_in_process()?;
        if cleared > 0 {
            info!("outbox: {cleared} interrupted submissions will be retried");
        }

        self.inner.state.send_replace(OutboxState::Active);
        let drain = Drain {
            inner: Arc::clone(&self.inner),
            api,
            retry,
            conflict_handler,
            state: self.inner.state.subscribe(),
        };
        *self.task.lock().await = Some(tokio::spawn(drain.run()));
        info!("outbox started");
        Ok(())
    }

    /// Stops the drain task and waits for it to exit. An interrupted
    /// submission stays persisted.
    pub async fn stop(&self) {
        self.inner.state.send_replace(OutboxState::Stopped);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("outbox drain task failed: {e}");
            }
            info!("outbox stopped");
        }
    }
}

impl Inner {
    fn announce_status(&self) {
        match self.adapter.session(|s| s.mutation_event_count()) {
            Ok(count) => self.events.emit(SyncEvent::OutboxStatus {
                is_empty: count == 0,
            }),
            Err(e) => warn!("outbox: cannot read status: {e}"),
        }
    }

    /// Stops draining until the next `resume` or `start`.
    fn halt(&self) {
        self.state.send_if_modified(|state| {
            if *state == OutboxState::Active {
                *state = OutboxState::Paused;
                true
            } else {
                false
            }
        });
    }

    fn release(&self, event: &MutationEvent) {
        if let Err(e) = self.adapter.session(|s| s.set_in_process(&event.id, false)) {
            warn!("outbox: cannot release {}: {e}", event.id);
        }
    }

    /// Records a successful submission.
    fn complete(&self, event: &MutationEvent, response: MutationSync<AnyModel>) {
        let metadata = response.sync_metadata;
        let result = self.adapter.transaction(|s| {
            s.delete_mutation_event(&event.id)?;
            s.save_mutation_sync_metadata(&metadata)?;
            for mut pending in s.pending_mutation_events(&event.model_name, &event.model_id)? {
                pending.version = Some(metadata.version);
                s.update_mutation_event(&pending)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => {
                debug!(
                    "outbox: {} {} accepted at version {}",
                    event.model_name, event.model_id, metadata.version
                );
                self.events.emit(SyncEvent::OutboxMutationProcessed {
                    event: event.clone(),
                    sync_metadata: metadata,
                });
                self.announce_status();
            }
            Err(e) => {
                error!("outbox: cannot record response for {}: {e}", event.id);
                self.halt();
            }
        }
    }

    /// Deletes `event` and applies the local effect of a conflict in one
    /// transaction.
    fn remove(&self, event: &MutationEvent, action: Option<ConflictAction>) -> SyncResult<()> {
        let mut applied = None;
        let mut resubmitted = None;
        self.adapter.transaction(|s| {
            s.delete_mutation_event(&event.id)?;
            match action {
                None | Some(ConflictAction::None) => {}
                Some(ConflictAction::SaveRemote(remote)) => {
                    let (model, kind) = s.save(&remote.model, None)?;
                    s.save_mutation_sync_metadata(&remote.sync_metadata)?;
                    applied = Some(MutationEvent::new(
                        remote.sync_metadata.model_id.clone(),
                        model.model_name.clone(),
                        model.to_json_string()?,
                        kind,
                    ));
                }
                Some(ConflictAction::DeleteLocal(remote)) => {
                    let metadata = &remote.sync_metadata;
                    if let Some(model) = s.delete(&metadata.model_name, &metadata.model_id, None)? {
                        applied = Some(MutationEvent::new(
                            metadata.model_id.clone(),
                            metadata.model_name.clone(),
                            model.to_json_string()?,
                            MutationType::Delete,
                        ));
                    }
                    s.save_mutation_sync_metadata(metadata)?;
                }
                Some(ConflictAction::Resubmit { model, version }) => {
                    let pending = s.pending_mutation_events(&event.model_name, &event.model_id)?;
                    if pending.is_empty() {
                        let (saved, _) = s.save(&model, None)?;
                        let retry = MutationEvent::new(
                            event.model_id.clone(),
                            event.model_name.clone(),
                            saved.to_json_string()?,
                            MutationType::Update,
                        )
                        .with_version(Some(version));
                        s.insert_mutation_event(&retry)?;
                        resubmitted = Some(retry);
                    } else {
                        for mut later in pending {
                            later.version = Some(version);
                            s.update_mutation_event(&later)?;
                        }
                    }
                }
            }
            Ok(())
        })?;

        if let Some(local) = applied {
            self.events.emit(SyncEvent::MutationEvent(local));
        }
        if let Some(retry) = resubmitted {
            info!(
                "outbox: resubmitting {} {} at version {}",
                retry.model_name,
                retry.model_id,
                retry.version.unwrap_or_default()
            );
            self.events.emit(SyncEvent::OutboxMutationEnqueued(retry));
        }
        Ok(())
    }
}

struct Drain {
    inner: Arc<Inner>,
    api: Arc<dyn RemoteApi>,
    retry: Arc<dyn RetryPolicy>,
    conflict_handler: Arc<dyn ConflictHandler>,
    state: watch::Receiver<OutboxState>,
}

impl Drain {
    async fn run(mut self) {
        loop {
            let state = *self.state.borrow_and_update();
            match state {
                OutboxState::Stopped => break,
                OutboxState::Paused => {
                    if self.state.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                OutboxState::Active => {}
            }

            let next = blocking(&self.inner, |inner| {
                Ok(inner.adapter.session(|s| s.next_mutation_event())?)
            });
            match next.await {
                Ok(Some(event)) => self.submit(event).await,
                Ok(None) => {
                    tokio::select! {
                        () = self.inner.wake.notified() => {}
                        changed = self.state.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("outbox: cannot read next event: {e}");
                    self.inner.halt();
                }
            }
        }
        debug!("outbox drain task exited");
    }

    /// Resolves once the outbox is stopped.
    async fn stopped(state: &mut watch::Receiver<OutboxState>) {
        loop {
            if *state.borrow_and_update() == OutboxState::Stopped {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    async fn submit(&mut self, event: MutationEvent) {
        let id = event.id;
        let marked = blocking(&self.inner, move |inner| {
            Ok(inner.adapter.session(|s| s.set_in_process(&id, true))?)
        });
        if let Err(e) = marked.await {
            error!("outbox: cannot mark {} in flight: {e}", event.id);
            self.inner.halt();
            return;
        }
        debug!(
            "outbox: submitting {} {} {}",
            event.mutation_type, event.model_name, event.model_id
        );

        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                result = self.api.mutate(&event) => result,
                () = Self::stopped(&mut self.state) => {
                    release(&self.inner, &event).await;
                    return;
                }
            };

            let error = match result {
                Ok(response) => {
                    let accepted = event.clone();
                    let _ = blocking(&self.inner, move |inner| {
                        inner.complete(&accepted, response);
                        Ok(())
                    })
                    .await;
                    return;
                }
                Err(e) => e,
            };

            if error.is_retryable() {
                attempt += 1;
                let advice = self
                    .retry
                    .retry_advice(&SyncError::Remote(error.clone()), attempt);
                match advice {
                    RetryAdvice::RetryAfter(delay) => {
                        warn!("outbox: {error}, retry {attempt} in {delay:?}");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => continue,
                            () = Self::stopped(&mut self.state) => {
                                release(&self.inner, &event).await;
                                return;
                            }
                        }
                    }
                    RetryAdvice::DoNotRetry => {
                        warn!("outbox: giving up on {} after {attempt} attempts: {error}", event.id);
                        release(&self.inner, &event).await;
                        self.inner.halt();
                        return;
                    }
                }
            }

            if let RemoteError::Unauthorized(message) = &error {
                warn!("outbox: unauthorized, pausing: {message}");
                release(&self.inner, &event).await;
                self.inner.halt();
                return;
            }

            self.reject(&event, error).await;
            return;
        }
    }

    /// Handles a mutation the backend answered with a rejection. The event
    /// is removed from the outbox in every case.
    async fn reject(&self, event: &MutationEvent, error: RemoteError) {
        let (action, notice) = match error {
            RemoteError::ConditionalCheck(message) => {
                warn!("outbox: condition failed for {}: {message}", event.id);
                (None, Some(SyncEvent::ConditionalSaveFailed(event.clone())))
            }
            RemoteError::ConflictUnhandled {
                message,
                remote: Some(remote),
            } => {
                warn!("outbox: conflict on {} {}: {message}", event.model_name, event.model_id);
                match resolve_conflict(event, *remote, self.conflict_handler.as_ref()).await {
                    Ok(action) => (Some(action), None),
                    Err(e) => (
                        None,
                        Some(SyncEvent::MutationFailed {
                            event: event.clone(),
                            message: e.to_string(),
                        }),
                    ),
                }
            }
            other => {
                let failure = SyncError::api(other.to_string(), event);
                warn!("outbox: {} {failure}", event.id);
                (
                    None,
                    Some(SyncEvent::MutationFailed {
                        event: event.clone(),
                        message: failure.to_string(),
                    }),
                )
            }
        };

        let id = event.id;
        let rejected = event.clone();
        let settled = blocking(&self.inner, move |inner| {
            inner.remove(&rejected, action)?;
            if let Some(notice) = notice {
                inner.events.emit(notice);
            }
            inner.announce_status();
            Ok(())
        })
        .await;
        if let Err(e) = settled {
            error!("outbox: cannot settle rejected {id}: {e}");
            self.inner.halt();
        }
    }
}

/// Runs a storage call on the blocking pool.
async fn blocking<T, F>(inner: &Arc<Inner>, f: F) -> SyncResult<T>
where
    F: FnOnce(&Inner) -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    let inner = Arc::clone(inner);
    match tokio::task::spawn_blocking(move || f(&inner)).await {
        Ok(result) => result,
        Err(e) => {
            warn!("spawn_blocking panicked during outbox storage call: {e}");
            Err(SyncError::Internal(e.to_string()))
        }
    }
}

async fn release(inner: &Arc<Inner>, event: &MutationEvent) {
    let event = event.clone();
    let _ = blocking(inner, move |inner| {
        inner.release(&event);
        Ok(())
    })
    .await;
}
