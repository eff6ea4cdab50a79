//! One in-flight load and its post-settlement cleanup.
//!
//! The operation is shared by every trigger that can finish the load: the
//! registered callback, the injector's failure observer, and the timeout
//! task. Whichever settles first schedules cleanup; the others are ignored.
//!
//! The winning settlement neutralizes the registry entry on the spot, so late
//! calls become no-ops and a fixed token is free for the next load as soon
//! as this one has settled. Everything else is deferred: cleanup is spawned
//! and yields once before touching anything, since the trigger may be the
//! artifact's own execution, still on the stack. Then:
//!
//! 1. the timeout task is aborted,
//! 2. the artifact is removed, after the configured extra delay,
//! 3. the registry entry is reclaimed after the grace delay.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jsonp_types::{CorrelationToken, LoadError, TransportError};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::inject::{Artifact, FailureObserver};
use crate::registry::{CallbackRegistry, EntryId};
use crate::resolved::CleanupTimings;
use crate::settle::{LoadResult, Settlement};

enum ArtifactSlot {
    /// Injection has not returned yet.
    Pending,
    Attached(Box<dyn Artifact>),
    /// Cleanup already ran; a late artifact is removed on arrival.
    Reaped,
}

pub(crate) struct Operation {
    token: CorrelationToken,
    /// Set when the loader registered its own handler under `token`.
    entry: Option<EntryId>,
    registry: CallbackRegistry,
    settlement: Settlement,
    timer: Mutex<Option<AbortHandle>>,
    artifact: Mutex<ArtifactSlot>,
    timings: CleanupTimings,
    runtime: Handle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Operation {
    pub(crate) fn new(
        token: CorrelationToken,
        entry: Option<EntryId>,
        registry: CallbackRegistry,
        settlement: Settlement,
        timings: CleanupTimings,
        runtime: Handle,
    ) -> Self {
        Self {
            token,
            entry,
            registry,
            settlement,
            timer: Mutex::new(None),
            artifact: Mutex::new(ArtifactSlot::Pending),
            timings,
            runtime,
        }
    }

    pub(crate) fn token(&self) -> &CorrelationToken {
        &self.token
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Settle the load with `outcome` unless it is already settled.
    pub(crate) fn settle(self: &Arc<Self>, outcome: LoadResult) {
        let kind = match &outcome {
            Ok(_) => "resolved",
            Err(LoadError::TimeoutExceeded { .. }) => "timeout",
            Err(LoadError::TransportFailure(_)) => "transport_failure",
            Err(LoadError::ServerReportedError(_)) => "server_error",
            Err(_) => "rejected",
        };
        if self.settlement.settle(outcome) {
            tracing::debug!(token = %self.token, outcome = kind, "Load settled");
            // Handlers run outside the registry lock.
            if let Some(id) = self.entry {
                self.registry.neutralize(&self.token, id);
            }
            self.schedule_cleanup();
        } else {
            tracing::trace!(token = %self.token, outcome = kind, "Ignoring late settlement");
        }
    }

    /// Observer handed to the injector.
    pub(crate) fn failure_observer(self: &Arc<Self>) -> FailureObserver {
        let op = Arc::clone(self);
        Box::new(move |error: TransportError| {
            op.settle(Err(LoadError::TransportFailure(error)));
        })
    }

    pub(crate) fn attach_timer(&self, timer: AbortHandle) {
        let mut slot = lock(&self.timer);
        if self.settlement.is_settled() {
            timer.abort();
        } else {
            *slot = Some(timer);
        }
    }

    pub(crate) fn attach_artifact(&self, artifact: Box<dyn Artifact>) {
        let mut slot = lock(&self.artifact);
        if matches!(*slot, ArtifactSlot::Reaped) {
            drop(slot);
            let token = self.token.clone();
            self.runtime.spawn(async move {
                tokio::task::yield_now().await;
                remove_artifact(&token, artifact.as_ref());
            });
        } else {
            *slot = ArtifactSlot::Attached(artifact);
        }
    }

    fn schedule_cleanup(self: &Arc<Self>) {
        let op = Arc::clone(self);
        self.runtime.spawn(async move { op.cleanup().await });
    }

    async fn cleanup(&self) {
        tokio::task::yield_now().await;

        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }

        if !self.timings.artifact_removal_delay.is_zero() {
            tokio::time::sleep(self.timings.artifact_removal_delay).await;
        }
        let artifact = mem::replace(&mut *lock(&self.artifact), ArtifactSlot::Reaped);
        if let ArtifactSlot::Attached(artifact) = artifact {
            remove_artifact(&self.token, artifact.as_ref());
        }

        if let Some(id) = self.entry {
            tokio::time::sleep(self.timings.reclaim_grace).await;
            if self.registry.reclaim(&self.token, id) {
                tracing::trace!(token = %self.token, "Reclaimed callback registration");
            }
        }
    }
}

// Removal is best-effort bookkeeping; failures never reach the caller.
fn remove_artifact(token: &CorrelationToken, artifact: &dyn Artifact) {
    if let Err(e) = artifact.remove() {
        tracing::debug!(token = %token, "Suppressed artifact removal error: {e}");
    }
}
