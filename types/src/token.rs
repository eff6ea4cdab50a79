//! Correlation tokens and where a request's token comes from.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// Name under which an out-of-band response finds its pending operation.
///
/// The token travels as a query value and comes back as the callee of the
/// injected script, so it is restricted to characters a script may call:
/// `[A-Za-z0-9_$.]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn new(value: impl Into<String>) -> Result<Self, DescriptorError> {
        let value = value.into();
        if value.is_empty() || !value.chars().all(is_token_char) {
            return Err(DescriptorError::InvalidToken(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Characters accepted in a token and in a script callee.
#[must_use]
pub fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.')
}

impl TryFrom<String> for CorrelationToken {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CorrelationToken> for String {
    fn from(value: CorrelationToken) -> Self {
        value.0
    }
}

impl AsRef<str> for CorrelationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the correlation token of a request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Caller-owned handler (`padding`): nothing is registered by the loader.
    CallerOwned(CorrelationToken),
    /// Fixed name (`paddingKey`): the loader registers its handler under it.
    Named(CorrelationToken),
    /// The loader generates a fresh token and registers under it.
    Generated,
}
