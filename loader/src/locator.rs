//! Target locator assembly.
//!
//! Order: base URL, correlation parameter, extra parameters, cache buster,
//! then the caller's post-processing hook over the finished locator.

use jsonp_types::{CorrelationToken, PostProcess, QueryParams};
use url::Url;

use crate::query::QueryEncoder;

/// Name of the cache-busting parameter.
pub const CACHE_BUST_PARAM: &str = "_";

const CACHE_BUST_RANGE: u32 = 10_000_000;

pub(crate) struct LocatorParts<'a> {
    pub base: &'a Url,
    pub param_name: &'a str,
    pub token: &'a CorrelationToken,
    pub params: &'a QueryParams,
    pub cache_bust: bool,
    pub postprocess: Option<&'a PostProcess>,
}

pub(crate) fn build(parts: &LocatorParts<'_>, encoder: &dyn QueryEncoder) -> Url {
    let mut url = parts.base.clone();
    url.query_pairs_mut()
        .append_pair(parts.param_name, parts.token.as_str());

    let extra = encoder.encode(parts.params, true);
    if !extra.is_empty() {
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
            _ => extra,
        };
        url.set_query(Some(&query));
    }

    if parts.cache_bust {
        let nonce = rand::random_range(0..CACHE_BUST_RANGE);
        url.query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &nonce.to_string());
    }

    match parts.postprocess {
        Some(postprocess) => postprocess(url),
        None => url,
    }
}
