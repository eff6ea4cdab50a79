//! Correlation token generation.

use std::sync::atomic::{AtomicU64, Ordering};

use jsonp_types::CorrelationToken;
use uuid::Uuid;

pub const DEFAULT_TOKEN_PREFIX: &str = "id_";

pub trait TokenGenerator: Send + Sync {
    /// A token unique within the process with overwhelming probability.
    fn generate(&self) -> CorrelationToken;
}

/// `prefix` + a random per-generator segment + a monotonic counter.
///
/// The random segment keeps tokens from independent generators (and from
/// earlier process runs whose responses may still be in flight) apart; the
/// counter keeps tokens from this generator apart.
#[derive(Debug)]
pub struct SequentialTokenGenerator {
    stem: String,
    counter: AtomicU64,
}

impl SequentialTokenGenerator {
    /// `prefix` is sanitized to token characters; anything else is dropped.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let mut stem: String = prefix
            .chars()
            .filter(|c| jsonp_types::is_token_char(*c))
            .collect();
        let random = Uuid::new_v4().simple().to_string();
        stem.push_str(&random[..12]);
        stem.push('_');
        Self {
            stem,
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for SequentialTokenGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PREFIX)
    }
}

impl TokenGenerator for SequentialTokenGenerator {
    fn generate(&self) -> CorrelationToken {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        CorrelationToken::new(format!("{}{n}", self.stem))
            .unwrap_or_else(|_| unreachable!("stem is built from token characters"))
    }
}
