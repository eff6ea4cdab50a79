//! Request descriptor accepted by the loader.
//!
//! Optional fields stay `None` here and are resolved against the loader's
//! configured defaults at dispatch, so one descriptor type serves every
//! configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::DescriptorError;
use crate::params::{ParamValue, QueryParams};
use crate::token::{CorrelationToken, TokenSource};

pub const DEFAULT_PARAM_NAME: &str = "callback";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Final rewrite applied to the assembled locator.
pub type PostProcess = Arc<dyn Fn(Url) -> Url + Send + Sync>;

/// A single correlated request. Immutable once handed to the loader.
#[derive(Clone)]
pub struct RequestDescriptor {
    url: Url,
    param_name: Option<String>,
    token_source: TokenSource,
    params: QueryParams,
    no_cache: bool,
    timeout: Option<Duration>,
    check_response: Option<bool>,
    response_field: Option<String>,
    postprocess: Option<PostProcess>,
}

impl RequestDescriptor {
    /// Create a descriptor targeting `url`.
    pub fn new(url: impl AsRef<str>) -> Result<Self, DescriptorError> {
        let raw = url.as_ref();
        if raw.trim().is_empty() {
            return Err(DescriptorError::EmptyUrl);
        }
        let url = Url::parse(raw).map_err(|e| DescriptorError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_url(url))
    }

    #[must_use]
    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            param_name: None,
            token_source: TokenSource::Generated,
            params: QueryParams::new(),
            no_cache: false,
            timeout: None,
            check_response: None,
            response_field: None,
            postprocess: None,
        }
    }

    /// Name of the query parameter carrying the token.
    pub fn with_param_name(mut self, name: impl Into<String>) -> Result<Self, DescriptorError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DescriptorError::EmptyName {
                field: "param_name",
            });
        }
        self.param_name = Some(name);
        Ok(self)
    }

    /// Use a caller-owned handler name. The loader registers nothing, so the
    /// load only settles through transport failure or timeout.
    pub fn with_padding(mut self, padding: impl Into<String>) -> Result<Self, DescriptorError> {
        self.token_source = TokenSource::CallerOwned(CorrelationToken::new(padding)?);
        Ok(self)
    }

    /// Register the loader's handler under a fixed name instead of a
    /// generated one. Has no effect once a padding is set.
    pub fn with_padding_key(mut self, key: impl Into<String>) -> Result<Self, DescriptorError> {
        let token = CorrelationToken::new(key)?;
        if !matches!(self.token_source, TokenSource::CallerOwned(_)) {
            self.token_source = TokenSource::Named(token);
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    /// Append a random `_` parameter to defeat caches.
    #[must_use]
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, DescriptorError> {
        if timeout.is_zero() {
            return Err(DescriptorError::ZeroTimeout);
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    #[must_use]
    pub fn with_check_response(mut self, check: bool) -> Self {
        self.check_response = Some(check);
        self
    }

    pub fn with_response_field(mut self, field: impl Into<String>) -> Result<Self, DescriptorError> {
        let field = field.into();
        if field.is_empty() {
            return Err(DescriptorError::EmptyName {
                field: "response_field",
            });
        }
        self.response_field = Some(field);
        Ok(self)
    }

    #[must_use]
    pub fn with_postprocess<F>(mut self, f: F) -> Self
    where
        F: Fn(Url) -> Url + Send + Sync + 'static,
    {
        self.postprocess = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn param_name(&self) -> Option<&str> {
        self.param_name.as_deref()
    }

    #[must_use]
    pub fn token_source(&self) -> &TokenSource {
        &self.token_source
    }

    #[must_use]
    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    #[must_use]
    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn check_response(&self) -> Option<bool> {
        self.check_response
    }

    #[must_use]
    pub fn response_field(&self) -> Option<&str> {
        self.response_field.as_deref()
    }

    #[must_use]
    pub fn postprocess(&self) -> Option<&PostProcess> {
        self.postprocess.as_ref()
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("url", &self.url.as_str())
            .field("param_name", &self.param_name)
            .field("token_source", &self.token_source)
            .field("params", &self.params)
            .field("no_cache", &self.no_cache)
            .field("timeout", &self.timeout)
            .field("check_response", &self.check_response)
            .field("response_field", &self.response_field)
            .field("postprocess", &self.postprocess.is_some())
            .finish()
    }
}
