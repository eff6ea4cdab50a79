//! The correlated callback loader.
//!
//! `load` dispatches synchronously and hands back a [`PendingLoad`]:
//!
//! 1. pick the correlation token (caller-owned padding, fixed padding key, or
//!    a freshly generated one) and, unless caller-owned, register a handler
//!    under it that validates the payload and settles the load,
//! 2. assemble the locator,
//! 3. start the timeout task,
//! 4. inject the resource with a failure observer attached.
//!
//! The handler, the failure observer and the timeout race; the first to
//! settle wins and the others become no-ops. See [`crate::operation`] for
//! the cleanup that follows.

use std::fmt;
use std::sync::Arc;

use jsonp_config::{ConfigError, LoaderConfig};
use jsonp_types::{CorrelationToken, LoadError, RequestDescriptor, ResponsePolicy, TokenSource};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::http::HttpInjector;
use crate::inject::Injector;
use crate::intercept::{Interceptor, Next};
use crate::locator::{self, LocatorParts};
use crate::operation::Operation;
use crate::query::{FormQueryEncoder, QueryEncoder};
use crate::registry::{Callback, CallbackRegistry};
use crate::resolved::{ResolvedConfig, ResolvedRequest};
use crate::settle::{PendingLoad, Settlement};
use crate::token::{SequentialTokenGenerator, TokenGenerator};

/// Generated tokens tried before giving up on finding a free one.
const MAX_TOKEN_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct Loader {
    injector: Arc<dyn Injector>,
    registry: CallbackRegistry,
    tokens: Arc<dyn TokenGenerator>,
    encoder: Arc<dyn QueryEncoder>,
    interceptor: Option<Arc<dyn Interceptor>>,
    config: ResolvedConfig,
}

impl Loader {
    /// A loader with default settings.
    ///
    /// `registry` must be the one the injector invokes callees through.
    #[must_use]
    pub fn new(injector: Arc<dyn Injector>, registry: CallbackRegistry) -> Self {
        let config = ResolvedConfig::default();
        Self {
            injector,
            registry,
            tokens: Arc::new(SequentialTokenGenerator::new(&config.token_prefix)),
            encoder: Arc::new(FormQueryEncoder),
            interceptor: None,
            config,
        }
    }

    /// A loader executing scripts over HTTP, with its own registry.
    pub fn http(config: &LoaderConfig) -> Result<Self, BuildError> {
        let resolved = ResolvedConfig::from_config(config)?;
        let registry = CallbackRegistry::new();
        let injector = HttpInjector::new(registry.clone(), &resolved.http)?;
        Ok(Self::new(Arc::new(injector), registry).with_settings(resolved))
    }

    /// Replace the settings. Also resets the token generator to one using
    /// the configured prefix.
    #[must_use]
    pub fn with_settings(mut self, config: ResolvedConfig) -> Self {
        self.tokens = Arc::new(SequentialTokenGenerator::new(&config.token_prefix));
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_token_generator(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_query_encoder(mut self, encoder: Arc<dyn QueryEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Registry shared with the injector. Callers using a caller-owned
    /// padding register their handlers here.
    #[must_use]
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Issue a correlated request.
    ///
    /// Returns immediately; the returned future settles exactly once with
    /// the validated payload or a [`LoadError`].
    ///
    /// Timer and cleanup run on the current Tokio runtime. Outside one,
    /// nothing is dispatched and the load rejects with
    /// [`LoadError::Abandoned`].
    pub fn load(&self, descriptor: RequestDescriptor) -> PendingLoad {
        match &self.interceptor {
            Some(interceptor) => interceptor.intercept(descriptor, Next::new(self)),
            None => self.dispatch(descriptor),
        }
    }

    pub(crate) fn dispatch(&self, descriptor: RequestDescriptor) -> PendingLoad {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(url = %descriptor.url(), "Load issued outside a Tokio runtime");
            return PendingLoad::ready(Err(LoadError::Abandoned));
        };
        let request = ResolvedRequest::from_descriptor(&descriptor, &self.config);
        let (op, pending) = match self.prepare(&request, &runtime) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!("Load rejected before dispatch: {e}");
                return PendingLoad::ready(Err(e));
            }
        };

        let url = locator::build(
            &LocatorParts {
                base: &request.url,
                param_name: &request.param_name,
                token: op.token(),
                params: &request.params,
                cache_bust: request.cache_bust,
                postprocess: request.postprocess.as_ref(),
            },
            self.encoder.as_ref(),
        );
        tracing::debug!(
            token = %op.token(),
            url = %url,
            timeout_ms = request.timeout.as_millis() as u64,
            "Dispatching load"
        );

        let timeout = request.timeout;
        let timer = {
            let op = Arc::clone(&op);
            op.runtime().clone().spawn(async move {
                tokio::time::sleep(timeout).await;
                op.settle(Err(LoadError::timeout(timeout)));
            })
        };
        op.attach_timer(timer.abort_handle());

        let artifact = self.injector.inject(&url, op.failure_observer());
        op.attach_artifact(artifact);

        pending
    }

    /// Resolve the token and register the loader's handler if it owns one.
    fn prepare(
        &self,
        request: &ResolvedRequest,
        runtime: &Handle,
    ) -> Result<(Arc<Operation>, PendingLoad), LoadError> {
        match &request.token_source {
            TokenSource::CallerOwned(token) => {
                let (settlement, pending) = Settlement::channel();
                let op = Operation::new(
                    token.clone(),
                    None,
                    self.registry.clone(),
                    settlement,
                    self.config.cleanup,
                    runtime.clone(),
                );
                Ok((Arc::new(op), pending))
            }
            TokenSource::Named(token) => self
                .register(token.clone(), &request.policy, runtime)
                .ok_or_else(|| LoadError::TokenInUse {
                    token: token.to_string(),
                }),
            TokenSource::Generated => {
                let mut last = None;
                for _ in 0..MAX_TOKEN_ATTEMPTS {
                    let token = self.tokens.generate();
                    if !self.registry.contains(token.as_str())
                        && let Some(prepared) =
                            self.register(token.clone(), &request.policy, runtime)
                    {
                        return Ok(prepared);
                    }
                    last = Some(token);
                }
                Err(LoadError::TokenInUse {
                    token: last.map(CorrelationToken::into_inner).unwrap_or_default(),
                })
            }
        }
    }

    fn register(
        &self,
        token: CorrelationToken,
        policy: &ResponsePolicy,
        runtime: &Handle,
    ) -> Option<(Arc<Operation>, PendingLoad)> {
        let id = self.registry.allocate();
        let (settlement, pending) = Settlement::channel();
        let op = Arc::new(Operation::new(
            token,
            Some(id),
            self.registry.clone(),
            settlement,
            self.config.cleanup,
            runtime.clone(),
        ));

        let callback: Callback = {
            let op = Arc::clone(&op);
            let policy = policy.clone();
            Arc::new(move |payload| op.settle(policy.interpret(payload)))
        };
        match self.registry.try_register_as(op.token(), id, callback) {
            Ok(()) => Some((op, pending)),
            Err(occupied) => {
                tracing::debug!("{occupied}");
                None
            }
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("registry", &self.registry)
            .field("interceptor", &self.interceptor.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::FutureExt;
    use jsonp_types::TransportError;
    use serde_json::{Value, json};
    use tokio::time::Instant;
    use url::Url;

    use super::*;
    use crate::inject::{Artifact, FailureObserver, RemovalError};

    struct Injection {
        url: Url,
        on_failure: Option<FailureObserver>,
        removals: Arc<AtomicUsize>,
    }

    /// Records injections; tests drive execution by hand.
    #[derive(Default)]
    struct ManualInjector {
        injections: Mutex<Vec<Injection>>,
        fail_synchronously: Option<TransportError>,
    }

    struct CountingArtifact(Arc<AtomicUsize>);

    impl Artifact for CountingArtifact {
        fn remove(&self) -> Result<(), RemovalError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Injector for ManualInjector {
        fn inject(&self, url: &Url, on_failure: FailureObserver) -> Box<dyn Artifact> {
            let removals = Arc::new(AtomicUsize::new(0));
            let on_failure = match &self.fail_synchronously {
                Some(error) => {
                    on_failure(error.clone());
                    None
                }
                None => Some(on_failure),
            };
            self.injections.lock().unwrap().push(Injection {
                url: url.clone(),
                on_failure,
                removals: Arc::clone(&removals),
            });
            Box::new(CountingArtifact(removals))
        }
    }

    impl ManualInjector {
        fn url(&self, index: usize) -> Url {
            self.injections.lock().unwrap()[index].url.clone()
        }

        fn token(&self, index: usize, param: &str) -> String {
            self.url(index)
                .query_pairs()
                .find(|(k, _)| k == param)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        }

        fn fail(&self, index: usize, error: TransportError) {
            let observer = self.injections.lock().unwrap()[index]
                .on_failure
                .take()
                .unwrap();
            observer(error);
        }

        fn removals(&self, index: usize) -> usize {
            self.injections.lock().unwrap()[index]
                .removals
                .load(Ordering::SeqCst)
        }
    }

    fn setup() -> (Loader, Arc<ManualInjector>) {
        let injector = Arc::new(ManualInjector::default());
        let loader = Loader::new(injector.clone(), CallbackRegistry::new());
        (loader, injector)
    }

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor::new("http://x/y").unwrap()
    }

    fn server_error(result: Result<Value, LoadError>) -> Value {
        match result {
            Err(LoadError::ServerReportedError(value)) => value,
            other => panic!("expected ServerReportedError, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_configured_duration() {
        let (loader, injector) = setup();
        let start = Instant::now();
        let result = loader
            .load(descriptor().with_timeout(Duration::from_millis(50)).unwrap())
            .await;

        assert!(matches!(
            result,
            Err(LoadError::TimeoutExceeded { timeout }) if timeout == Duration::from_millis(50)
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(60));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(injector.removals(0), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_is_thirty_seconds() {
        let (loader, _injector) = setup();
        let start = Instant::now();
        let result = loader.load(descriptor()).await;
        assert!(matches!(result, Err(LoadError::TimeoutExceeded { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn resolves_with_response_field() {
        let (loader, injector) = setup();
        let pending = loader.load(descriptor());
        let token = injector.token(0, "callback");

        loader
            .registry()
            .invoke(&token, json!({ "response": { "value": 1 } }));
        assert_eq!(pending.await.unwrap(), json!({ "value": 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_with_server_error_value() {
        let (loader, injector) = setup();
        let pending = loader.load(descriptor());
        let token = injector.token(0, "callback");

        loader
            .registry()
            .invoke(&token, json!({ "error": { "message": "denied" } }));
        assert_eq!(server_error(pending.await), json!({ "message": "denied" }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(injector.removals(0), 1);
        assert!(loader.registry().is_empty());
    }

    #[tokio::test]
    async fn unchecked_response_resolves_raw_payload() {
        let (loader, injector) = setup();
        let pending = loader.load(descriptor().with_check_response(false));
        let token = injector.token(0, "callback");

        loader.registry().invoke(&token, json!(42));
        assert_eq!(pending.await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn unchecked_response_ignores_error_field() {
        let (loader, injector) = setup();
        let pending = loader.load(descriptor().with_check_response(false));
        let token = injector.token(0, "callback");

        loader.registry().invoke(&token, json!({ "error": "boom" }));
        assert_eq!(pending.await.unwrap(), json!({ "error": "boom" }));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_rejects() {
        let (loader, injector) = setup();
        let pending = loader.load(descriptor());
        let token = injector.token(0, "callback");

        injector.fail(0, TransportError::Status(404));
        assert!(matches!(
            pending.await,
            Err(LoadError::TransportFailure(TransportError::Status(404)))
        ));
        assert!(!loader.registry().is_active(&token));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(injector.removals(0), 1);
        assert!(loader.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_injection_failure_rejects() {
        let injector = Arc::new(ManualInjector {
            fail_synchronously: Some(TransportError::Network("refused".into())),
            ..Default::default()
        });
        let loader = Loader::new(injector.clone(), CallbackRegistry::new());

        let result = loader.load(descriptor()).await;
        assert!(matches!(
            result,
            Err(LoadError::TransportFailure(TransportError::Network(_)))
        ));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(injector.removals(0), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_callback_after_timeout_is_ignored() {
        let (loader, injector) = setup();
        let result = loader
            .load(descriptor().with_timeout(Duration::from_millis(50)).unwrap())
            .await;
        assert!(matches!(result, Err(LoadError::TimeoutExceeded { .. })));

        let token = injector.token(0, "callback");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            loader.registry().invoke(&token, json!({ "response": 1 })),
            crate::Invocation::Inert
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(loader.registry().is_empty());
        assert_eq!(injector.removals(0), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_callback_is_a_no_op() {
        let (loader, injector) = setup();
        let pending = loader.load(descriptor());
        let token = injector.token(0, "callback");

        loader.registry().invoke(&token, json!({ "response": "first" }));
        loader.registry().invoke(&token, json!({ "response": "second" }));
        injector.fail(0, TransportError::Status(500));
        assert_eq!(pending.await.unwrap(), json!("first"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(injector.removals(0), 1);
        assert!(loader.registry().is_empty());
    }

    #[tokio::test]
    async fn concurrent_loads_do_not_interfere() {
        let (loader, injector) = setup();
        let first = loader.load(descriptor());
        let second = loader.load(descriptor());
        let a = injector.token(0, "callback");
        let b = injector.token(1, "callback");
        assert_ne!(a, b);

        loader.registry().invoke(&b, json!({ "response": "b" }));
        loader.registry().invoke(&a, json!({ "response": "a" }));
        assert_eq!(first.await.unwrap(), json!("a"));
        assert_eq!(second.await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn locator_carries_param_name_params_and_postprocess() {
        let (loader, injector) = setup();
        let _pending = loader.load(
            descriptor()
                .with_param_name("jsonp")
                .unwrap()
                .with_padding_key("geo_cb")
                .unwrap()
                .with_param("ll", vec!["37.6", "55.7"])
                .with_postprocess(|mut url| {
                    url.set_path("/signed");
                    url
                }),
        );
        assert_eq!(
            injector.url(0).as_str(),
            "http://x/signed?jsonp=geo_cb&ll=37.6%2C55.7"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn caller_owned_padding_registers_nothing() {
        let (loader, injector) = setup();
        let pending = loader.load(
            descriptor()
                .with_padding("myHandler")
                .unwrap()
                .with_timeout(Duration::from_millis(20))
                .unwrap(),
        );
        assert_eq!(injector.token(0, "callback"), "myHandler");
        assert!(loader.registry().is_empty());
        assert!(matches!(
            pending.await,
            Err(LoadError::TimeoutExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn active_padding_key_is_rejected() {
        let (loader, injector) = setup();
        let _first = loader.load(descriptor().with_padding_key("shared").unwrap());
        let second = loader
            .load(descriptor().with_padding_key("shared").unwrap())
            .await;
        assert!(matches!(
            second,
            Err(LoadError::TokenInUse { token }) if token == "shared"
        ));
        assert_eq!(injector.injections.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn padding_key_is_reusable_after_settlement() {
        let (loader, injector) = setup();
        let first = loader.load(descriptor().with_padding_key("shared").unwrap());
        loader.registry().invoke("shared", json!({ "response": 1 }));
        assert_eq!(first.await.unwrap(), json!(1));

        // Immediately, with the first load's cleanup not yet run.
        let second = loader.load(descriptor().with_padding_key("shared").unwrap());
        assert!(loader.registry().is_active("shared"));

        // The first load's delayed reclaim leaves the new entry alone.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(loader.registry().is_active("shared"));

        loader.registry().invoke("shared", json!({ "response": 2 }));
        assert_eq!(second.await.unwrap(), json!(2));
        assert_eq!(injector.injections.lock().unwrap().len(), 2);
    }

    struct FixedTokens(Mutex<Vec<&'static str>>);

    impl TokenGenerator for FixedTokens {
        fn generate(&self) -> CorrelationToken {
            let next = self.0.lock().unwrap().remove(0);
            CorrelationToken::new(next).unwrap()
        }
    }

    #[tokio::test]
    async fn generated_token_skips_occupied_names() {
        let (loader, injector) = setup();
        let loader = loader.with_token_generator(Arc::new(FixedTokens(Mutex::new(vec![
            "taken", "free",
        ]))));
        loader.registry().register(
            &CorrelationToken::new("taken").unwrap(),
            Arc::new(|_| {}),
        );

        let _pending = loader.load(descriptor());
        assert_eq!(injector.token(0, "callback"), "free");
    }

    #[tokio::test]
    async fn interceptor_can_answer_without_dispatch() {
        let (loader, injector) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let loader = loader.with_interceptor(Arc::new(
            move |d: RequestDescriptor, next: Next<'_>| {
                seen.fetch_add(1, Ordering::SeqCst);
                if d.url().path() == "/cached" {
                    PendingLoad::ready(Ok(json!("from cache")))
                } else {
                    next.run(d)
                }
            },
        ));

        let cached = loader
            .load(RequestDescriptor::new("http://x/cached").unwrap())
            .await;
        assert_eq!(cached.unwrap(), json!("from cache"));
        assert!(injector.injections.lock().unwrap().is_empty());

        let _live = loader.load(descriptor());
        assert_eq!(injector.injections.lock().unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interceptor_can_rewrite_descriptor() {
        let (loader, injector) = setup();
        let loader = loader.with_interceptor(Arc::new(
            |d: RequestDescriptor, next: Next<'_>| next.run(d.with_param("lang", "en")),
        ));
        let _pending = loader.load(descriptor());
        assert!(injector.url(0).as_str().ends_with("&lang=en"));
    }

    #[tokio::test]
    async fn interceptor_can_transform_delegated_result() {
        let (loader, injector) = setup();
        let loader = loader.with_interceptor(Arc::new(
            |d: RequestDescriptor, next: Next<'_>| {
                let inner = next.run(d);
                PendingLoad::from_future(async move {
                    inner.await.map(|value| json!({ "wrapped": value }))
                })
            },
        ));

        let pending = loader.load(descriptor());
        let token = injector.token(0, "callback");
        loader.registry().invoke(&token, json!({ "response": 5 }));
        assert_eq!(pending.await.unwrap(), json!({ "wrapped": 5 }));
    }

    #[tokio::test]
    async fn interceptor_can_cache_results() {
        let (loader, injector) = setup();
        let cache: Arc<Mutex<HashMap<String, Value>>> = Arc::default();
        let store = Arc::clone(&cache);
        let loader = loader.with_interceptor(Arc::new(
            move |d: RequestDescriptor, next: Next<'_>| {
                let key = d.url().to_string();
                if let Some(hit) = store.lock().unwrap().get(&key) {
                    return PendingLoad::ready(Ok(hit.clone()));
                }
                let inner = next.run(d);
                let store = Arc::clone(&store);
                PendingLoad::from_future(async move {
                    let result = inner.await;
                    if let Ok(value) = &result {
                        store.lock().unwrap().insert(key, value.clone());
                    }
                    result
                })
            },
        ));

        let first = loader.load(descriptor());
        let token = injector.token(0, "callback");
        loader.registry().invoke(&token, json!({ "response": "fresh" }));
        assert_eq!(first.await.unwrap(), json!("fresh"));

        let second = loader.load(descriptor()).await;
        assert_eq!(second.unwrap(), json!("fresh"));
        assert_eq!(injector.injections.lock().unwrap().len(), 1);
        assert_eq!(cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn load_outside_runtime_is_abandoned() {
        let (loader, injector) = setup();
        let result = loader.load(descriptor()).now_or_never();
        assert!(matches!(result, Some(Err(LoadError::Abandoned))));
        assert!(injector.injections.lock().unwrap().is_empty());
        assert!(loader.registry().is_empty());
    }

    #[tokio::test]
    async fn settings_apply_to_unset_options() {
        let injector = Arc::new(ManualInjector::default());
        let settings = ResolvedConfig {
            param_name: "cb".to_string(),
            response_field: "data".to_string(),
            ..ResolvedConfig::default()
        };
        let loader =
            Loader::new(injector.clone(), CallbackRegistry::new()).with_settings(settings);
        let pending = loader.load(descriptor());
        let token = injector.token(0, "cb");

        loader
            .registry()
            .invoke(&token, json!({ "data": [1, 2], "response": "ignored" }));
        assert_eq!(pending.await.unwrap(), json!([1, 2]));
    }
}
