//! Process-wide callback registry.
//!
//! Maps correlation tokens to the handlers that settle pending loads. The
//! registry is an explicit, cloneable handle rather than ambient global state:
//! the loader registers and retires its own entries, injectors invoke entries
//! by the callee name found in the executed script, and callers using a
//! caller-owned `padding` register their handlers here themselves.
//!
//! Retiring an entry is two-phase. `neutralize` swaps the handler for an
//! inert slot right after settlement, so late calls from the artifact's
//! trailing code are silent no-ops; `reclaim` physically deletes the slot
//! after a grace delay. Both phases carry the [`EntryId`] handed out at
//! registration and leave the slot alone if the token has since been
//! registered again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jsonp_types::{CorrelationToken, Payload};
use thiserror::Error;

/// Callback invoked with the payload of an executed script.
pub type Callback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Identity of one registration, distinct across re-registrations of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

/// Outcome of invoking a name through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// An active handler ran.
    Dispatched,
    /// The name belongs to a settled load; the call was swallowed.
    Inert,
    /// Nothing is registered under the name.
    Unknown,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("token `{0}` already has an active handler")]
pub struct Occupied(pub String);

enum Handler {
    Active(Callback),
    Inert,
}

struct Slot {
    id: EntryId,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct CallbackRegistry {
    inner: Arc<Inner>,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Handlers never run under the lock, so a poisoned map is still consistent.
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` unless the token already has an active handler.
    ///
    /// An inert slot (a settled load still inside its grace window) is
    /// replaced, so a fixed token can be reused by consecutive loads.
    pub fn try_register(
        &self,
        token: &CorrelationToken,
        callback: Callback,
    ) -> Result<EntryId, Occupied> {
        let id = self.allocate();
        self.try_register_as(token, id, callback).map(|()| id)
    }

    /// Reserve an entry id ahead of registration, so the handler's owner
    /// knows its identity before the handler can possibly run.
    pub(crate) fn allocate(&self) -> EntryId {
        EntryId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn try_register_as(
        &self,
        token: &CorrelationToken,
        id: EntryId,
        callback: Callback,
    ) -> Result<(), Occupied> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(token.as_str())
            && matches!(slot.handler, Handler::Active(_))
        {
            return Err(Occupied(token.to_string()));
        }
        slots.insert(
            token.to_string(),
            Slot {
                id,
                handler: Handler::Active(callback),
            },
        );
        Ok(())
    }

    /// Register `callback`, replacing whatever is under the token.
    pub fn register(&self, token: &CorrelationToken, callback: Callback) -> EntryId {
        let id = self.allocate();
        let previous = self.slots().insert(
            token.to_string(),
            Slot {
                id,
                handler: Handler::Active(callback),
            },
        );
        if previous.is_some() {
            tracing::debug!(token = %token, "Replaced existing callback registration");
        }
        id
    }

    /// Remove a registration immediately, whatever its state.
    pub fn unregister(&self, token: &CorrelationToken) -> bool {
        self.slots().remove(token.as_str()).is_some()
    }

    /// Invoke the handler registered under `name` with `payload`.
    pub fn invoke(&self, name: &str, payload: Payload) -> Invocation {
        let callback = {
            let slots = self.slots();
            match slots.get(name) {
                None => return Invocation::Unknown,
                Some(Slot {
                    handler: Handler::Inert,
                    ..
                }) => {
                    tracing::trace!(name, "Ignoring call to neutralized callback");
                    return Invocation::Inert;
                }
                Some(Slot {
                    handler: Handler::Active(callback),
                    ..
                }) => Arc::clone(callback),
            }
        };
        callback(payload);
        Invocation::Dispatched
    }

    /// Replace the handler of registration `id` with an inert no-op.
    pub fn neutralize(&self, token: &CorrelationToken, id: EntryId) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(token.as_str()) {
            Some(slot) if slot.id == id => {
                slot.handler = Handler::Inert;
                true
            }
            _ => false,
        }
    }

    /// Delete registration `id` if it is still the one under `token`.
    pub fn reclaim(&self, token: &CorrelationToken, id: EntryId) -> bool {
        let mut slots = self.slots();
        if slots.get(token.as_str()).is_some_and(|slot| slot.id == id) {
            slots.remove(token.as_str());
            true
        } else {
            false
        }
    }

    /// Whether `token` currently has an active handler.
    #[must_use]
    pub fn is_active(&self, token: &str) -> bool {
        self.slots()
            .get(token)
            .is_some_and(|slot| matches!(slot.handler, Handler::Active(_)))
    }

    /// Whether `token` has any slot, active or inert.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.slots().contains_key(token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots();
        let active = slots
            .values()
            .filter(|slot| matches!(slot.handler, Handler::Active(_)))
            .count();
        f.debug_struct("CallbackRegistry")
            .field("entries", &slots.len())
            .field("active", &active)
            .finish()
    }
}
