//! Resource injection collaborator.
//!
//! An [`Injector`] starts executing the resource behind a locator and hands
//! back an [`Artifact`] the loader removes once the load settles. Execution
//! reports back out of band: a successful script calls its callee through the
//! [`CallbackRegistry`](crate::CallbackRegistry), a failed one calls the
//! [`FailureObserver`] passed at injection time.

use jsonp_types::TransportError;
use thiserror::Error;
use tokio::task::AbortHandle;
use url::Url;

/// Notified at most once when the injected resource fails to load or run.
pub type FailureObserver = Box<dyn FnOnce(TransportError) + Send>;

pub trait Injector: Send + Sync {
    /// Start executing the resource at `url`.
    ///
    /// Must not block. The observer may be called from any thread, including
    /// synchronously before `inject` returns.
    fn inject(&self, url: &Url, on_failure: FailureObserver) -> Box<dyn Artifact>;
}

/// Handle to a transient injected resource.
pub trait Artifact: Send + Sync {
    /// Tear the resource down.
    ///
    /// Must be safe to call repeatedly and on an already finished resource.
    /// Errors are reported to the loader, which logs and suppresses them.
    fn remove(&self) -> Result<(), RemovalError>;
}

#[derive(Debug, Error)]
#[error("failed to remove injected artifact: {0}")]
pub struct RemovalError(pub String);

/// Artifact backed by a spawned task; removal aborts the task.
#[derive(Debug)]
pub struct TaskArtifact {
    handle: AbortHandle,
}

impl TaskArtifact {
    #[must_use]
    pub fn new(handle: AbortHandle) -> Self {
        Self { handle }
    }
}

impl Artifact for TaskArtifact {
    fn remove(&self) -> Result<(), RemovalError> {
        self.handle.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn task_artifact_removal_is_idempotent() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let artifact = TaskArtifact::new(task.abort_handle());

        artifact.remove().unwrap();
        artifact.remove().unwrap();

        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
        artifact.remove().unwrap();
    }
}
