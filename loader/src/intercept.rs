//! Request interception.
//!
//! An [`Interceptor`] installed on a [`Loader`] sees every descriptor before
//! dispatch. It can rewrite the descriptor and continue through [`Next`],
//! answer on its own with [`PendingLoad::ready`] (canned responses in tests,
//! a kill switch), or wrap the delegated load with [`PendingLoad::from_future`]
//! to observe or transform its result (an in-memory cache).

use jsonp_types::RequestDescriptor;

use crate::loader::Loader;
use crate::settle::PendingLoad;

pub trait Interceptor: Send + Sync {
    fn intercept(&self, descriptor: RequestDescriptor, next: Next<'_>) -> PendingLoad;
}

impl<F> Interceptor for F
where
    F: for<'a> Fn(RequestDescriptor, Next<'a>) -> PendingLoad + Send + Sync,
{
    fn intercept(&self, descriptor: RequestDescriptor, next: Next<'_>) -> PendingLoad {
        self(descriptor, next)
    }
}

/// Continuation into the loader's own dispatch.
pub struct Next<'a> {
    loader: &'a Loader,
}

impl<'a> Next<'a> {
    pub(crate) fn new(loader: &'a Loader) -> Self {
        Self { loader }
    }

    /// Dispatch `descriptor` as if no interceptor were installed.
    pub fn run(self, descriptor: RequestDescriptor) -> PendingLoad {
        self.loader.dispatch(descriptor)
    }
}
