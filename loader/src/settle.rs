//! Single-assignment settlement of a pending load.
//!
//! Every trigger that can finish a load (callback, transport failure, timer)
//! goes through [`Settlement::settle`]. The first call takes the sender and
//! wins; later calls find it gone and report `false`, which is what makes
//! settlement the serialization point between racing triggers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use jsonp_types::{LoadError, Payload};
use tokio::sync::oneshot;

pub type LoadResult = Result<Payload, LoadError>;

pub(crate) struct Settlement {
    sender: Mutex<Option<oneshot::Sender<LoadResult>>>,
}

impl Settlement {
    pub(crate) fn channel() -> (Self, PendingLoad) {
        let (tx, rx) = oneshot::channel();
        let settlement = Self {
            sender: Mutex::new(Some(tx)),
        };
        (settlement, PendingLoad::waiting(rx))
    }

    /// Deliver `outcome` if nothing has been delivered yet.
    ///
    /// Returns whether this call settled the load. A dropped `PendingLoad`
    /// still counts as settled: the outcome is discarded but cleanup must run.
    pub(crate) fn settle(&self, outcome: LoadResult) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::trace!("Load settled after its caller stopped waiting");
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

enum State {
    Waiting(oneshot::Receiver<LoadResult>),
    Ready(Option<LoadResult>),
    Chained(BoxFuture<'static, LoadResult>),
}

/// Future returned by [`Loader::load`](crate::Loader::load).
///
/// Dropping it does not cancel the load; the operation still ends at its
/// timeout and cleans up after itself.
#[must_use = "a pending load does nothing observable unless awaited"]
pub struct PendingLoad {
    state: State,
}

impl PendingLoad {
    fn waiting(rx: oneshot::Receiver<LoadResult>) -> Self {
        Self {
            state: State::Waiting(rx),
        }
    }

    /// An already-settled load, for interceptors that answer without
    /// dispatching.
    pub fn ready(result: LoadResult) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }

    /// A load settled by `future`, for interceptors that observe or
    /// transform the result of the load they delegate to.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = LoadResult> + Send + 'static,
    {
        Self {
            state: State::Chained(Box::pin(future)),
        }
    }
}

impl Future for PendingLoad {
    type Output = LoadResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            State::Waiting(rx) => rx
                .poll_unpin(cx)
                .map(|received| received.unwrap_or(Err(LoadError::Abandoned))),
            State::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(LoadError::Abandoned))),
            State::Chained(future) => future.poll_unpin(cx),
        }
    }
}
