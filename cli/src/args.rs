//! Command-line arguments.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use jsonp_loader::{ParamValue, QueryParams, RequestDescriptor};

#[derive(Debug, Parser)]
#[command(name = "jsonp")]
#[command(about = "Issue one correlated callback request and print the result")]
pub struct Args {
    /// Endpoint URL
    pub url: String,

    /// Query parameter carrying the callback name
    #[arg(long, value_name = "NAME")]
    pub param_name: Option<String>,

    /// Register the handler under a fixed name
    #[arg(long, value_name = "KEY")]
    pub padding_key: Option<String>,

    /// Give up after N milliseconds
    #[arg(long, value_name = "N")]
    pub timeout_ms: Option<u64>,

    /// Append a random cache-busting parameter
    #[arg(long)]
    pub no_cache: bool,

    /// Skip response validation and print the raw payload
    #[arg(long)]
    pub raw: bool,

    /// Field holding the result (default: response)
    #[arg(long, value_name = "NAME")]
    pub response_field: Option<String>,

    /// Extra query parameter; repeat a key to send a list
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err("parameter key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

impl Args {
    pub fn descriptor(&self) -> Result<RequestDescriptor> {
        let mut descriptor = RequestDescriptor::new(&self.url)?
            .with_no_cache(self.no_cache)
            .with_check_response(!self.raw);
        if let Some(name) = &self.param_name {
            descriptor = descriptor.with_param_name(name)?;
        }
        if let Some(key) = &self.padding_key {
            descriptor = descriptor.with_padding_key(key)?;
        }
        if let Some(ms) = self.timeout_ms {
            descriptor = descriptor.with_timeout(Duration::from_millis(ms))?;
        }
        if let Some(field) = &self.response_field {
            descriptor = descriptor.with_response_field(field)?;
        }

        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, value) in &self.params {
            grouped
                .entry(key.as_str())
                .or_default()
                .push(value.as_str());
        }
        let params: QueryParams = grouped
            .into_iter()
            .map(|(key, values)| {
                let value = match values.as_slice() {
                    [single] => ParamValue::from(*single),
                    many => ParamValue::from(many.to_vec()),
                };
                (key, value)
            })
            .collect();
        Ok(descriptor.with_params(params))
    }
}
