//! Sequencer: one custom-strategy request in flight at a time.
//!
//! Host-default permissions are sent to the host together in one batch and
//! never wait on each other. Custom strategies usually open their own
//! attention-grabbing host flow, so they are chained: the next strategy is
//! only asked once the pending grant of the previous one has resolved.
//!
//! Chaining is an explicit cursor walk driven by resolution events. A
//! strategy that answers synchronously from inside its own `request` does not
//! recurse; the walk that is already running picks up the next step.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::host::{HostBridge, StrategySink};
use crate::permission::Permission;
use crate::registry::CorrelationRegistry;

// ---------------------------------------------------------------------------
// SequencingCursor
// ---------------------------------------------------------------------------

/// Ordered position over the custom-strategy permissions of one
/// orchestration call.
#[derive(Debug, Clone)]
pub struct SequencingCursor {
    permissions: Vec<Permission>,
    position: usize,
}

impl SequencingCursor {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self {
            permissions,
            position: 0,
        }
    }

    pub fn current(&self) -> Option<&Permission> {
        self.permissions.get(self.position)
    }

    /// Move past the current permission.
    pub fn advance(&mut self) {
        if self.position < self.permissions.len() {
            self.position += 1;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.position >= self.permissions.len()
    }

    pub fn remaining(&self) -> usize {
        self.permissions.len() - self.position
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SequencerState {
    cursors: VecDeque<SequencingCursor>,
    in_flight: Option<Permission>,
    walking: bool,
}

impl SequencerState {
    /// Next queued strategy permission whose grant is still pending.
    /// Permissions answered or abandoned while queued are skipped.
    fn next_pending(&mut self, registry: &CorrelationRegistry) -> Option<Permission> {
        while let Some(cursor) = self.cursors.front_mut() {
            let Some(permission) = cursor.current().cloned() else {
                self.cursors.pop_front();
                continue;
            };
            cursor.advance();
            if registry.contains(&permission.name) {
                return Some(permission);
            }
            log::debug!(
                target: "grantflow",
                "Skipping '{}': no longer pending",
                permission.name
            );
        }
        None
    }
}

/// Drives permission requests for one container.
#[derive(Debug, Default)]
pub struct Sequencer {
    state: Mutex<SequencerState>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand over the newly registered permissions of one orchestration call.
    ///
    /// Host-default permissions go out immediately in one batch, in input
    /// order, even those listed after a strategy permission. A strategy's
    /// flow and the host's own prompt can therefore be open at the same time.
    /// Strategy permissions join the queue as one cursor.
    pub fn submit(
        &self,
        permissions: Vec<Permission>,
        host: &dyn HostBridge,
        registry: &CorrelationRegistry,
        request_code: i32,
    ) {
        let (custom, default): (Vec<Permission>, Vec<Permission>) =
            permissions.into_iter().partition(Permission::has_strategy);

        if !default.is_empty() {
            let names: Vec<String> = default.into_iter().map(|p| p.name).collect();
            log::debug!(target: "grantflow", "Requesting {:?} from host", names);
            host.request_batch(&names, request_code);
        }

        if !custom.is_empty() {
            self.state
                .lock()
                .cursors
                .push_back(SequencingCursor::new(custom));
        }

        self.pump(host, registry, request_code);
    }

    /// Note that `name` resolved. Returns `true` if it was the in-flight
    /// strategy, which frees the sequencer to move on at the next
    /// [`pump`](Self::pump).
    pub fn on_resolved(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        match &state.in_flight {
            Some(current) if current.name == name => {
                state.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Request queued strategies until one is left waiting on the host.
    pub fn pump(&self, host: &dyn HostBridge, registry: &CorrelationRegistry, request_code: i32) {
        {
            let mut state = self.state.lock();
            if state.walking {
                return;
            }
            state.walking = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                let next = if state.in_flight.is_some() {
                    None
                } else {
                    state.next_pending(registry)
                };
                match next {
                    Some(permission) => {
                        state.in_flight = Some(permission.clone());
                        permission
                    }
                    None => {
                        state.walking = false;
                        return;
                    }
                }
            };

            if let Some(strategy) = &next.strategy {
                log::debug!(target: "grantflow", "Requesting '{}' through its strategy", next.name);
                strategy.request(&StrategySink::new(&next.name, host, request_code));
            }
        }
    }

    /// The strategy permission currently waiting on the host.
    pub fn in_flight(&self) -> Option<Permission> {
        self.state.lock().in_flight.clone()
    }

    /// Strategy permissions queued behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.state.lock().cursors.iter().map(SequencingCursor::remaining).sum()
    }

    /// Forget every cursor and the in-flight strategy.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.cursors.clear();
        state.in_flight = None;
    }
}
