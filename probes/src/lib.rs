//! Capability probes.
//!
//! A probe answers one yes/no question about the environment. Most answers
//! never change, so the first result is kept. Some capabilities can drop
//! away at runtime (a GPU context lost under memory pressure); those probes
//! re-check on every call until the capability is gone, and then report it
//! gone for good.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A nullary capability check.
pub trait Probe: Send + Sync {
    fn check(&self) -> bool;
}

impl<F> Probe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn check(&self) -> bool {
        self()
    }
}

/// When a probe result may be reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Memoization {
    /// Keep the first result.
    #[default]
    Always,
    /// Re-probe on every call.
    Never,
    /// Re-probe while available; once a check fails, keep `false`.
    UntilLost,
}

/// Wraps a probe with a memoization policy.
pub struct CachedProbe<P> {
    name: String,
    probe: P,
    policy: Memoization,
    last: Mutex<Option<bool>>,
}

impl<P: Probe> CachedProbe<P> {
    #[must_use]
    pub fn new(name: impl Into<String>, probe: P, policy: Memoization) -> Self {
        Self {
            name: name.into(),
            probe,
            policy,
            last: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn policy(&self) -> Memoization {
        self.policy
    }

    /// Last observed result, without probing.
    #[must_use]
    pub fn last(&self) -> Option<bool> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Probe> Probe for CachedProbe<P> {
    fn check(&self) -> bool {
        // Held across the probe so concurrent first calls probe once.
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let reuse = match (self.policy, *last) {
            (_, None) | (Memoization::Never, _) => None,
            (Memoization::Always, Some(seen)) | (Memoization::UntilLost, Some(seen @ false)) => {
                Some(seen)
            }
            (Memoization::UntilLost, Some(true)) => None,
        };
        if let Some(seen) = reuse {
            return seen;
        }

        let available = self.probe.check();
        match *last {
            None => tracing::debug!(probe = %self.name, available, "Capability probed"),
            Some(true) if !available => {
                tracing::debug!(probe = %self.name, "Capability lost");
            }
            _ => {}
        }
        *last = Some(available);
        available
    }
}

impl<P> fmt::Debug for CachedProbe<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedProbe")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Named collection of probes.
#[derive(Clone, Default)]
pub struct ProbeSet {
    probes: BTreeMap<String, Arc<dyn Probe>>,
}

impl ProbeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `probe` under `name` with `policy`, replacing any previous one.
    pub fn insert<P>(&mut self, name: impl Into<String>, probe: P, policy: Memoization)
    where
        P: Probe + 'static,
    {
        let name = name.into();
        let cached = CachedProbe::new(name.clone(), probe, policy);
        self.probes.insert(name, Arc::new(cached));
    }

    #[must_use]
    pub fn with<P>(mut self, name: impl Into<String>, probe: P, policy: Memoization) -> Self
    where
        P: Probe + 'static,
    {
        self.insert(name, probe, policy);
        self
    }

    /// Run the named probe. `None` if no probe has that name.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<bool> {
        self.probes.get(name).map(|probe| probe.check())
    }

    /// Whether the named probe exists and reports the capability.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.check(name).unwrap_or(false)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.probes.keys().map(String::as_str)
    }

    /// Check every probe.
    #[must_use]
    pub fn report(&self) -> BTreeMap<String, bool> {
        self.probes
            .iter()
            .map(|(name, probe)| (name.clone(), probe.check()))
            .collect()
    }
}

impl fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.probes.keys()).finish()
    }
}
