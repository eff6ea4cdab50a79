//! Resolved, invariant-safe configuration and request types.
//!
//! This module converts optional, boundary-level configuration into concrete
//! values for the loader core, and fills a descriptor's unset options from
//! those values at dispatch.

use std::time::Duration;

use jsonp_config::{ConfigError, LoaderConfig};
use jsonp_types::{
    DEFAULT_PARAM_NAME, DEFAULT_RESPONSE_FIELD, DEFAULT_TIMEOUT, PostProcess, QueryParams,
    RequestDescriptor, ResponsePolicy, TokenSource,
};
use url::Url;

use crate::token::DEFAULT_TOKEN_PREFIX;

pub(crate) const DEFAULT_USER_AGENT: &str = "jsonp-loader/0.1";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECLAIM_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub timeout: Duration,
    pub param_name: String,
    pub response_field: String,
    pub token_prefix: String,
    pub cleanup: CleanupTimings,
    pub http: ResolvedHttpConfig,
}

/// Delays of the post-settlement cleanup protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupTimings {
    /// Wait before removing the artifact, on top of the mandatory yield.
    pub artifact_removal_delay: Duration,
    /// Wait between neutralizing a registry entry and deleting it.
    pub reclaim_grace: Duration,
}

impl Default for CleanupTimings {
    fn default() -> Self {
        Self {
            artifact_removal_delay: Duration::ZERO,
            reclaim_grace: DEFAULT_RECLAIM_GRACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedHttpConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
}

impl Default for ResolvedHttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            param_name: DEFAULT_PARAM_NAME.to_string(),
            response_field: DEFAULT_RESPONSE_FIELD.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            cleanup: CleanupTimings::default(),
            http: ResolvedHttpConfig::default(),
        }
    }
}

fn non_empty(
    value: Option<&String>,
    field: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    match value {
        None => Ok(default.to_string()),
        Some(v) if v.trim().is_empty() => Err(ConfigError::Invalid {
            field,
            message: "must not be empty".to_string(),
        }),
        Some(v) => Ok(v.clone()),
    }
}

impl ResolvedConfig {
    pub fn from_config(config: &LoaderConfig) -> Result<Self, ConfigError> {
        let timeout = match config.timeout_ms {
            None => DEFAULT_TIMEOUT,
            Some(0) => {
                return Err(ConfigError::Invalid {
                    field: "loader.timeout_ms",
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(ms) => Duration::from_millis(ms),
        };

        let param_name = non_empty(
            config.param_name.as_ref(),
            "loader.param_name",
            DEFAULT_PARAM_NAME,
        )?;
        let response_field = non_empty(
            config.response_field.as_ref(),
            "loader.response_field",
            DEFAULT_RESPONSE_FIELD,
        )?;
        let token_prefix = config
            .token_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_PREFIX.to_string());

        let defaults = CleanupTimings::default();
        let cleanup = config.cleanup.as_ref();
        let cleanup = CleanupTimings {
            artifact_removal_delay: cleanup
                .and_then(|c| c.artifact_removal_delay_ms)
                .map_or(defaults.artifact_removal_delay, Duration::from_millis),
            reclaim_grace: cleanup
                .and_then(|c| c.reclaim_grace_ms)
                .map_or(defaults.reclaim_grace, Duration::from_millis),
        };

        let http = config.http.as_ref();
        let http = ResolvedHttpConfig {
            user_agent: http
                .and_then(|h| h.user_agent.clone())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            connect_timeout: http
                .and_then(|h| h.connect_timeout_ms)
                .filter(|ms| *ms > 0)
                .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_millis),
        };

        Ok(Self {
            timeout,
            param_name,
            response_field,
            token_prefix,
            cleanup,
            http,
        })
    }
}

/// A descriptor with every option filled in.
#[derive(Clone)]
pub(crate) struct ResolvedRequest {
    pub url: Url,
    pub param_name: String,
    pub token_source: TokenSource,
    pub params: QueryParams,
    pub cache_bust: bool,
    pub timeout: Duration,
    pub policy: ResponsePolicy,
    pub postprocess: Option<PostProcess>,
}

impl ResolvedRequest {
    pub fn from_descriptor(descriptor: &RequestDescriptor, config: &ResolvedConfig) -> Self {
        Self {
            url: descriptor.url().clone(),
            param_name: descriptor
                .param_name()
                .unwrap_or(config.param_name.as_str())
                .to_string(),
            token_source: descriptor.token_source().clone(),
            params: descriptor.params().clone(),
            cache_bust: descriptor.no_cache(),
            timeout: descriptor.timeout().unwrap_or(config.timeout),
            policy: ResponsePolicy {
                check_response: descriptor.check_response().unwrap_or(true),
                field_name: descriptor
                    .response_field()
                    .unwrap_or(config.response_field.as_str())
                    .to_string(),
            },
            postprocess: descriptor.postprocess().cloned(),
        }
    }
}
