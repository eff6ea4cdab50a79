//! Injector that fetches padded-JSON scripts over HTTP.
//!
//! Each injection is a spawned task: GET the locator, parse the body as a
//! single callee invocation and run it against the shared registry. The
//! artifact aborts the task, so removal also cancels a request still in
//! flight.

use jsonp_types::TransportError;
use reqwest::redirect::Policy;
use url::Url;

use crate::inject::{Artifact, FailureObserver, Injector, TaskArtifact};
use crate::registry::{CallbackRegistry, Invocation};
use crate::resolved::ResolvedHttpConfig;
use crate::script;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct HttpInjector {
    client: reqwest::Client,
    registry: CallbackRegistry,
}

impl HttpInjector {
    /// Build an injector invoking callees through `registry`.
    pub fn new(
        registry: CallbackRegistry,
        config: &ResolvedHttpConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client, registry })
    }

    /// Use a preconfigured client.
    #[must_use]
    pub fn with_client(registry: CallbackRegistry, client: reqwest::Client) -> Self {
        Self { client, registry }
    }
}

impl Injector for HttpInjector {
    fn inject(&self, url: &Url, on_failure: FailureObserver) -> Box<dyn Artifact> {
        let client = self.client.clone();
        let registry = self.registry.clone();
        let url = url.clone();
        let task = tokio::spawn(async move {
            if let Err(error) = execute(&client, &registry, url).await {
                tracing::debug!("Injected script failed: {error}");
                on_failure(error);
            }
        });
        Box::new(TaskArtifact::new(task.abort_handle()))
    }
}

async fn execute(
    client: &reqwest::Client,
    registry: &CallbackRegistry,
    url: Url,
) -> Result<(), TransportError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let body = response
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    let call = script::parse(&body)?;

    match registry.invoke(&call.callee, call.payload) {
        Invocation::Dispatched => Ok(()),
        Invocation::Inert => {
            tracing::trace!(callee = %call.callee, "Script called a settled handler");
            Ok(())
        }
        Invocation::Unknown => {
            tracing::warn!(callee = %call.callee, "Script called an unregistered callback");
            Err(TransportError::UnknownCallback(call.callee))
        }
    }
}
