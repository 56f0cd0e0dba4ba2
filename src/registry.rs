//! Correlation registry: one pending request per permission name.
//!
//! Host answers come back keyed by name on a channel that has no notion of
//! who asked. The registry is what ties an answer back to its waiters. It
//! holds at most one [`PendingGrant`] per name; a handle is removed the moment
//! it resolves, so the next request for that name starts fresh.
//!
//! Clearing the registry abandons every handle without resolving it. Waiters
//! on an abandoned handle see their channel close and never get an answer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::errors::{PermissionError, Result};
use crate::permission::Permission;

/// Receiving half handed to each waiter of a pending grant.
pub type GrantReceiver = oneshot::Receiver<Permission>;

// ---------------------------------------------------------------------------
// PendingGrant
// ---------------------------------------------------------------------------

enum GrantState {
    Pending(Vec<oneshot::Sender<Permission>>),
    Resolved(Permission),
}

/// A single outstanding request for one permission name.
///
/// Any number of waiters may subscribe while it is pending; all of them
/// receive the same answer.
pub struct PendingGrant {
    name: String,
    state: Mutex<GrantState>,
}

impl PendingGrant {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(GrantState::Pending(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a waiter. Subscribing after resolution yields the answer
    /// immediately.
    pub fn subscribe(&self) -> GrantReceiver {
        let (tx, rx) = oneshot::channel();
        match &mut *self.state.lock() {
            GrantState::Pending(waiters) => waiters.push(tx),
            GrantState::Resolved(outcome) => {
                let _ = tx.send(outcome.clone());
            }
        }
        rx
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.lock(), GrantState::Resolved(_))
    }

    /// Waiters that are still listening.
    pub fn waiter_count(&self) -> usize {
        match &*self.state.lock() {
            GrantState::Pending(waiters) => waiters.iter().filter(|tx| !tx.is_closed()).count(),
            GrantState::Resolved(_) => 0,
        }
    }

    /// Deliver `outcome` to every waiter and mark the handle terminal.
    /// Returns how many waiters were still listening. A second completion is
    /// ignored.
    fn complete(&self, outcome: Permission) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            let waiters = match &mut *state {
                GrantState::Pending(waiters) => std::mem::take(waiters),
                GrantState::Resolved(_) => return 0,
            };
            *state = GrantState::Resolved(outcome.clone());
            waiters
        };

        waiters
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

impl std::fmt::Debug for PendingGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGrant")
            .field("name", &self.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Outcome of [`CorrelationRegistry::join_or_register`].
#[derive(Debug)]
pub struct Subscription {
    pub receiver: GrantReceiver,
    /// `true` when this call created the handle, meaning nobody has asked the
    /// host for this name yet.
    pub registered: bool,
}

// ---------------------------------------------------------------------------
// CorrelationRegistry
// ---------------------------------------------------------------------------

/// Table of pending grants keyed by permission name.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, Arc<PendingGrant>>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a fresh handle for `name`.
    ///
    /// Rejects the call if a handle already exists; the existing one is left
    /// in place so its waiters are not lost.
    pub fn register(&self, name: &str) -> Result<Arc<PendingGrant>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(name) {
            log::warn!(
                target: "grantflow",
                "Refusing to register '{}': a request for it is already pending",
                name
            );
            return Err(PermissionError::DuplicateRegistration {
                name: name.to_string(),
            });
        }
        let grant = Arc::new(PendingGrant::new(name));
        pending.insert(name.to_string(), Arc::clone(&grant));
        Ok(grant)
    }

    /// Subscribe to the pending handle for `name`, creating it if needed.
    ///
    /// Lookup and creation happen under one lock so two callers racing on the
    /// same name end up sharing a handle.
    pub fn join_or_register(&self, name: &str) -> Subscription {
        let mut pending = self.pending.lock();
        match pending.get(name) {
            Some(grant) => Subscription {
                receiver: grant.subscribe(),
                registered: false,
            },
            None => {
                let grant = Arc::new(PendingGrant::new(name));
                let receiver = grant.subscribe();
                pending.insert(name.to_string(), grant);
                Subscription {
                    receiver,
                    registered: true,
                }
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<PendingGrant>> {
        self.pending.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pending.lock().contains_key(name)
    }

    /// Remove the handle for `outcome.name` and deliver `outcome` to its
    /// waiters. Returns how many waiters observed it.
    ///
    /// An answer nobody is waiting for is reported as
    /// [`PermissionError::CorrelationMismatch`] and otherwise ignored.
    pub fn resolve(&self, outcome: Permission) -> Result<usize> {
        let grant = self.pending.lock().remove(&outcome.name);
        match grant {
            Some(grant) => Ok(grant.complete(outcome)),
            None => {
                log::error!(
                    target: "grantflow",
                    "Received an answer for '{}' but found no matching permission request",
                    outcome.name
                );
                Err(PermissionError::CorrelationMismatch { name: outcome.name })
            }
        }
    }

    /// Drop every handle without resolving it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped: Vec<_> = self.pending.lock().drain().collect();
        dropped.len()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Names with a pending handle, sorted.
    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
