//! Correlated callback loader.
//!
//! Issues requests whose response arrives as an injected script calling a
//! named function, and turns that out-of-band call back into a future:
//!
//! - a correlation token ties each request to one registry entry,
//! - the registry routes the script's call to the right pending load,
//! - a timeout and the injector's failure observer race the callback,
//! - the first outcome wins and the rest are ignored,
//! - cleanup retires the registry entry in two phases and removes the
//!   injected artifact, off the settling call stack.
//!
//! [`Loader::http`] gives a ready-made loader fetching scripts over HTTP.
//! Other environments plug in their own [`Injector`].

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::module_name_repetitions)]

mod http;
mod inject;
mod intercept;
mod loader;
mod locator;
mod operation;
mod query;
mod registry;
mod resolved;
mod script;
mod settle;
mod token;

pub use http::HttpInjector;
pub use inject::{Artifact, FailureObserver, Injector, RemovalError, TaskArtifact};
pub use intercept::{Interceptor, Next};
pub use loader::{BuildError, Loader};
pub use locator::CACHE_BUST_PARAM;
pub use query::{FormQueryEncoder, QueryEncoder};
pub use registry::{Callback, CallbackRegistry, EntryId, Invocation, Occupied};
pub use resolved::{CleanupTimings, ResolvedConfig, ResolvedHttpConfig};
pub use settle::{LoadResult, PendingLoad};
pub use token::{DEFAULT_TOKEN_PREFIX, SequentialTokenGenerator, TokenGenerator};

pub use jsonp_types::{
    CorrelationToken, ErrorCode, LoadError, ParamValue, Payload, QueryParams, RequestDescriptor,
    TransportError,
};
