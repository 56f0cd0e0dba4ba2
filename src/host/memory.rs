//! In-memory host authority.
//!
//! A simulated [`HostBridge`] backed by plain sets. It records every prompt it
//! is asked to show so callers can answer them later through the container's
//! delivery callbacks. Used by the demo binary and throughout the tests.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::HostBridge;

#[derive(Debug, Default)]
struct HostState {
    granted: HashSet<String>,
    revoked: HashSet<String>,
    rationale: HashSet<String>,
    legacy: bool,
    batches: Vec<(Vec<String>, i32)>,
    flows: Vec<(String, i32)>,
}

/// Simulated host with a mutable grant table.
#[derive(Debug, Default)]
pub struct InMemoryHost {
    state: Mutex<HostState>,
}

impl InMemoryHost {
    /// Create a host where nothing is granted yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host that predates runtime permission checks.
    pub fn legacy() -> Self {
        let host = Self::new();
        host.state.lock().legacy = true;
        host
    }

    /// Mark `name` as granted.
    pub fn grant(&self, name: &str) {
        self.state.lock().granted.insert(name.to_string());
    }

    /// Mark `name` as not granted.
    pub fn deny(&self, name: &str) {
        self.state.lock().granted.remove(name);
    }

    /// Mark `name` as revoked by policy.
    pub fn revoke(&self, name: &str) {
        self.state.lock().revoked.insert(name.to_string());
    }

    /// Set the rationale hint reported for `name`.
    pub fn set_rationale(&self, name: &str, show: bool) {
        let mut state = self.state.lock();
        if show {
            state.rationale.insert(name.to_string());
        } else {
            state.rationale.remove(name);
        }
    }

    /// Every batch prompt shown so far, oldest first.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .batches
            .iter()
            .map(|(names, _)| names.clone())
            .collect()
    }

    /// Number of batch prompts shown so far.
    pub fn batch_count(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// How many batch prompts included `name`.
    pub fn times_requested(&self, name: &str) -> usize {
        self.state
            .lock()
            .batches
            .iter()
            .filter(|(names, _)| names.iter().any(|n| n == name))
            .count()
    }

    /// Every flow launched so far, as `(action, request_code)`.
    pub fn flows(&self) -> Vec<(String, i32)> {
        self.state.lock().flows.clone()
    }
}

impl HostBridge for InMemoryHost {
    fn check_granted(&self, name: &str) -> bool {
        self.state.lock().granted.contains(name)
    }

    fn check_revoked_by_policy(&self, name: &str) -> bool {
        self.state.lock().revoked.contains(name)
    }

    fn should_show_rationale(&self, name: &str) -> bool {
        self.state.lock().rationale.contains(name)
    }

    fn request_batch(&self, names: &[String], request_code: i32) {
        self.state
            .lock()
            .batches
            .push((names.to_vec(), request_code));
    }

    fn launch_flow(&self, action: &str, request_code: i32) {
        self.state
            .lock()
            .flows
            .push((action.to_string(), request_code));
    }

    fn is_legacy_host(&self) -> bool {
        self.state.lock().legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_table() {
        let host = InMemoryHost::new();
        assert!(!host.check_granted("p"));
        host.grant("p");
        assert!(host.check_granted("p"));
        host.deny("p");
        assert!(!host.check_granted("p"));
    }

    #[test]
    fn test_records_batches() {
        let host = InMemoryHost::new();
        host.request_batch(&["a".to_string(), "b".to_string()], 42);
        host.request_batch(&["b".to_string()], 42);

        assert_eq!(host.batch_count(), 2);
        assert_eq!(host.times_requested("a"), 1);
        assert_eq!(host.times_requested("b"), 2);
        assert_eq!(host.batches()[0], vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_legacy_flag() {
        assert!(InMemoryHost::legacy().is_legacy_host());
        assert!(!InMemoryHost::new().is_legacy_host());
    }
}
