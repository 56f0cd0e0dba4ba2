//! The permissions container.
//!
//! One container exists per UI container (window, screen, activity). It owns
//! the correlation registry and the sequencer, tracks whether a live host
//! context is attached, and receives the host's answers.
//!
//! Lifecycle:
//!
//! ```text
//! attach(host) ──► detach() ──► attach(host) ──► teardown()
//!                  pending grants survive        pending grants abandoned
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::PermissionsConfig;
use crate::errors::{PermissionError, Result};
use crate::host::HostBridge;
use crate::permission::Permission;
use crate::registry::CorrelationRegistry;
use crate::sequencer::Sequencer;

/// Per-UI-container owner of pending requests and the host delivery
/// callbacks.
pub struct PermissionsContainer {
    host: RwLock<Option<Arc<dyn HostBridge>>>,
    registry: CorrelationRegistry,
    sequencer: Sequencer,
    logging: AtomicBool,
    deferred_flow: Mutex<Option<String>>,
    request_code: i32,
}

impl PermissionsContainer {
    /// A container attached to `host` with the default configuration.
    pub fn new(host: Arc<dyn HostBridge>) -> Self {
        Self::with_config(host, &PermissionsConfig::default())
    }

    /// A container attached to `host`.
    pub fn with_config(host: Arc<dyn HostBridge>, config: &PermissionsConfig) -> Self {
        let container = Self::detached(config);
        *container.host.write() = Some(host);
        container
    }

    /// A container with no host context yet.
    pub fn detached(config: &PermissionsConfig) -> Self {
        Self {
            host: RwLock::new(None),
            registry: CorrelationRegistry::new(),
            sequencer: Sequencer::new(),
            logging: AtomicBool::new(config.logging),
            deferred_flow: Mutex::new(None),
            request_code: config.request_code,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Attach a live host context. A flow result that arrived while detached
    /// is applied first, then strategies queued while detached are requested.
    pub fn attach(&self, host: Arc<dyn HostBridge>) {
        *self.host.write() = Some(Arc::clone(&host));
        self.log(|| "Attached to host".to_string());

        let deferred = self.deferred_flow.lock().take();
        if let Some(name) = deferred {
            // Only if nothing answered the strategy in the meantime.
            if self.sequencer.in_flight().is_some_and(|p| p.name == name) {
                self.finish_flow(host.as_ref());
            }
        }
        self.sequencer
            .pump(host.as_ref(), &self.registry, self.request_code);
    }

    /// Drop the host context. Pending grants stay registered and still
    /// resolve once answers arrive.
    pub fn detach(&self) {
        *self.host.write() = None;
        self.log(|| "Detached from host".to_string());
    }

    /// Detach and abandon every pending grant. Waiters on abandoned grants
    /// never receive an answer.
    pub fn teardown(&self) {
        self.detach();
        *self.deferred_flow.lock() = None;
        self.sequencer.reset();
        let abandoned = self.registry.clear();
        if abandoned > 0 {
            self.log(|| format!("Teardown abandoned {} pending request(s)", abandoned));
        }
    }

    pub fn is_attached(&self) -> bool {
        self.host.read().is_some()
    }

    /// The attached host, or [`PermissionError::DetachedContext`].
    pub fn host(&self) -> Result<Arc<dyn HostBridge>> {
        self.host
            .read()
            .as_ref()
            .cloned()
            .ok_or(PermissionError::DetachedContext)
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn request_code(&self) -> i32 {
        self.request_code
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    pub fn set_logging(&self, logging: bool) {
        self.logging.store(logging, Ordering::Relaxed);
    }

    pub fn is_logging(&self) -> bool {
        self.logging.load(Ordering::Relaxed)
    }

    pub(crate) fn log(&self, message: impl FnOnce() -> String) {
        if self.is_logging() {
            log::debug!(target: "grantflow", "{}", message());
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current grant state. Legacy hosts grant everything.
    pub fn is_granted(&self, permission: &Permission) -> Result<bool> {
        let host = self.host()?;
        Ok(host.is_legacy_host() || permission.is_granted(host.as_ref()))
    }

    /// Policy revocation state. Nothing is revoked on legacy hosts.
    pub fn is_revoked(&self, permission: &Permission) -> Result<bool> {
        let host = self.host()?;
        Ok(!host.is_legacy_host() && permission.is_revoked(host.as_ref()))
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Ask the host for permissions whose grants were just registered.
    pub fn request_permissions(&self, permissions: Vec<Permission>) -> Result<()> {
        let host = self.host()?;
        self.log(|| {
            let names: Vec<&str> = permissions.iter().map(|p| p.name.as_str()).collect();
            format!("Requesting permissions {}", names.join(", "))
        });
        self.sequencer
            .submit(permissions, host.as_ref(), &self.registry, self.request_code);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Delivery callbacks
    // -----------------------------------------------------------------------

    /// Deliver a batch of positionally aligned answers. Answers are matched
    /// to waiters by name; a stray name is logged and skipped without
    /// affecting the others. Returns how many grants were resolved.
    pub fn deliver<S: AsRef<str>>(
        &self,
        names: &[S],
        granted: &[bool],
        should_show_rationale: &[bool],
    ) -> usize {
        let aligned = names.len().min(granted.len()).min(should_show_rationale.len());
        if aligned != names.len() || aligned != granted.len() || aligned != should_show_rationale.len() {
            log::warn!(
                target: "grantflow",
                "Misaligned answer batch ({} names, {} grants, {} rationale flags); using the first {}",
                names.len(),
                granted.len(),
                should_show_rationale.len(),
                aligned
            );
        }

        let mut resolved = 0;
        for ((name, &granted), &rationale) in names.iter().zip(granted).zip(should_show_rationale) {
            let name = name.as_ref();
            self.log(|| format!("Answer received for {}", name));
            let outcome = Permission::new(name)
                .with_granted(granted)
                .with_rationale(rationale);
            if self.resolve(outcome).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }

    /// Host answer to a batch prompt. Rationale flags are read from the host;
    /// while detached they are reported as `false`.
    pub fn on_request_permissions_result<S: AsRef<str>>(
        &self,
        request_code: i32,
        names: &[S],
        granted: &[bool],
    ) -> usize {
        if request_code != self.request_code {
            self.log(|| format!("Ignoring answer with request code {}", request_code));
            return 0;
        }

        let rationale: Vec<bool> = match self.host() {
            Ok(host) => names
                .iter()
                .map(|name| host.should_show_rationale(name.as_ref()))
                .collect(),
            Err(_) => {
                log::warn!(
                    target: "grantflow",
                    "Answer arrived while detached; rationale flags unavailable"
                );
                vec![false; names.len()]
            }
        };

        self.deliver(names, granted, &rationale)
    }

    /// Host signal that the flow launched by the in-flight strategy ended.
    /// The strategy is asked for the resulting grant state; a revoked
    /// permission is reported denied.
    ///
    /// While detached the result is kept and applied on the next
    /// [`attach`](Self::attach). Returns `true` when a grant was resolved now.
    pub fn on_flow_result(&self, request_code: i32) -> bool {
        if request_code != self.request_code {
            self.log(|| format!("Ignoring flow result with request code {}", request_code));
            return false;
        }

        match self.host() {
            Ok(host) => self.finish_flow(host.as_ref()),
            Err(_) => {
                if let Some(current) = self.sequencer.in_flight() {
                    log::warn!(
                        target: "grantflow",
                        "Flow result for '{}' arrived while detached; applying it on attach",
                        current.name
                    );
                    *self.deferred_flow.lock() = Some(current.name);
                }
                false
            }
        }
    }

    fn finish_flow(&self, host: &dyn HostBridge) -> bool {
        let Some(current) = self.sequencer.in_flight() else {
            log::error!(
                target: "grantflow",
                "Flow result received but no strategy request is in flight"
            );
            return false;
        };

        let granted = !current.is_revoked(host) && current.is_granted(host);
        self.resolve(current.answered(granted, false)).is_ok()
    }

    fn resolve(&self, outcome: Permission) -> Result<usize> {
        let name = outcome.name.clone();
        let observed = self.registry.resolve(outcome)?;
        self.log(|| format!("Resolved {} for {} waiter(s)", name, observed));

        if self.sequencer.on_resolved(&name) {
            // The host may have gone away while the flow was open; the queue
            // resumes on the next attach.
            if let Ok(host) = self.host() {
                self.sequencer
                    .pump(host.as_ref(), &self.registry, self.request_code);
            }
        }
        Ok(observed)
    }
}

impl std::fmt::Debug for PermissionsContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionsContainer")
            .field("attached", &self.is_attached())
            .field("pending", &self.registry.pending_names())
            .field("in_flight", &self.sequencer.in_flight().map(|p| p.name))
            .field("request_code", &self.request_code)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;
    use crate::permission::PermissionRequest;

    fn attached() -> (Arc<InMemoryHost>, PermissionsContainer) {
        let host = Arc::new(InMemoryHost::new());
        let container = PermissionsContainer::new(host.clone());
        (host, container)
    }

    #[test]
    fn test_queries_fail_when_detached() {
        let container = PermissionsContainer::detached(&PermissionsConfig::default());
        let camera = Permission::new("CAMERA");
        assert_eq!(container.is_granted(&camera), Err(PermissionError::DetachedContext));
        assert_eq!(container.is_revoked(&camera), Err(PermissionError::DetachedContext));
        assert_eq!(
            container.request_permissions(vec![camera]),
            Err(PermissionError::DetachedContext)
        );
    }

    #[test]
    fn test_legacy_host_grants_everything() {
        let container = PermissionsContainer::new(Arc::new(InMemoryHost::legacy()));
        let camera = Permission::new("CAMERA");
        assert_eq!(container.is_granted(&camera), Ok(true));
        assert_eq!(container.is_revoked(&camera), Ok(false));
    }

    #[test]
    fn test_deliver_skips_stray_names() {
        let (_host, container) = attached();
        let mut a = container.registry().register("A").unwrap().subscribe();
        let mut b = container.registry().register("B").unwrap().subscribe();

        let resolved = container.deliver(&["A", "STRAY", "B"], &[true, true, false], &[false, false, true]);

        assert_eq!(resolved, 2);
        assert!(a.try_recv().unwrap().granted);
        assert_eq!(b.try_recv().unwrap(), Permission::new("B").with_rationale(true));
    }

    #[test]
    fn test_deliver_truncates_misaligned_batch() {
        let (_host, container) = attached();
        container.registry().register("A").unwrap();
        container.registry().register("B").unwrap();

        assert_eq!(container.deliver(&["A", "B"], &[true], &[false, false]), 1);
        assert!(container.registry().contains("B"));
    }

    #[test]
    fn test_request_code_filter() {
        let (host, container) = attached();
        host.set_rationale("A", true);
        let mut rx = container.registry().register("A").unwrap().subscribe();

        assert_eq!(container.on_request_permissions_result(7, &["A"], &[true]), 0);
        assert!(container.registry().contains("A"));

        assert_eq!(container.on_request_permissions_result(42, &["A"], &[false]), 1);
        assert_eq!(rx.try_recv().unwrap(), Permission::new("A").with_rationale(true));
    }

    #[test]
    fn test_answers_while_detached_still_resolve() {
        let (host, container) = attached();
        host.set_rationale("A", true);
        let mut rx = container.registry().register("A").unwrap().subscribe();

        container.detach();
        assert_eq!(container.on_request_permissions_result(42, &["A"], &[false]), 1);
        assert!(!rx.try_recv().unwrap().should_show_rationale);
    }

    #[test]
    fn test_flow_result_resolves_in_flight_strategy() {
        let (host, container) = attached();
        let battery = Permission::with_strategy(
            "battery",
            Arc::new(PermissionRequest::new(
                |sink| sink.launch_flow("settings"),
                |host| host.check_granted("battery"),
                |_| false,
            )),
        );
        let mut rx = container.registry().register("battery").unwrap().subscribe();
        container.request_permissions(vec![battery]).unwrap();
        assert_eq!(host.flows(), vec![("settings".to_string(), 42)]);

        assert!(!container.on_flow_result(1));
        host.grant("battery");
        assert!(container.on_flow_result(42));
        assert!(rx.try_recv().unwrap().granted);
        assert!(container.sequencer().in_flight().is_none());
    }

    #[test]
    fn test_flow_result_without_strategy_is_ignored() {
        let (_host, container) = attached();
        assert!(!container.on_flow_result(42));
    }

    #[test]
    fn test_teardown_abandons_pending() {
        let (_host, container) = attached();
        let mut rx = container.registry().register("A").unwrap().subscribe();

        container.teardown();

        assert!(!container.is_attached());
        assert!(container.registry().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(container.deliver(&["A"], &[true], &[false]), 0);
    }

    #[test]
    fn test_queue_resumes_on_attach() {
        let (host, container) = attached();
        let strategy = |action: &'static str| {
            Arc::new(PermissionRequest::new(
                move |sink| sink.launch_flow(action),
                |_| true,
                |_| false,
            ))
        };
        let x = Permission::with_strategy("X", strategy("open-x"));
        let y = Permission::with_strategy("Y", strategy("open-y"));
        container.registry().register("X").unwrap();
        container.registry().register("Y").unwrap();
        container.request_permissions(vec![x, y]).unwrap();

        container.detach();
        container.deliver(&["X"], &[true], &[false]);
        assert_eq!(host.flows().len(), 1);

        container.attach(host.clone());
        assert_eq!(host.flows().len(), 2);
        assert_eq!(container.sequencer().in_flight().unwrap().name, "Y");
    }

    fn flow(name: &'static str, action: &'static str) -> Permission {
        Permission::with_strategy(
            name,
            Arc::new(PermissionRequest::new(
                move |sink| sink.launch_flow(action),
                move |host| host.check_granted(name),
                move |host| host.check_revoked_by_policy(name),
            )),
        )
    }

    #[test]
    fn test_flow_result_while_detached_applies_on_attach() {
        let (host, container) = attached();
        let mut x = container.registry().register("X").unwrap().subscribe();
        container.registry().register("Y").unwrap();
        container
            .request_permissions(vec![flow("X", "open-x"), flow("Y", "open-y")])
            .unwrap();

        container.detach();
        host.grant("X");
        assert!(!container.on_flow_result(42));
        assert_eq!(container.sequencer().in_flight().unwrap().name, "X");

        container.attach(host.clone());
        assert!(x.try_recv().unwrap().granted);
        assert_eq!(container.sequencer().in_flight().unwrap().name, "Y");
        assert_eq!(host.flows().len(), 2);
    }

    #[test]
    fn test_deferred_flow_result_dropped_once_answered() {
        let (host, container) = attached();
        container.registry().register("X").unwrap();
        let mut y = container.registry().register("Y").unwrap().subscribe();
        container
            .request_permissions(vec![flow("X", "open-x"), flow("Y", "open-y")])
            .unwrap();

        container.detach();
        assert!(!container.on_flow_result(42));
        container.deliver(&["X"], &[false], &[false]);

        container.attach(host.clone());
        // Y was launched by the attach and still waits on its own flow.
        assert_eq!(container.sequencer().in_flight().unwrap().name, "Y");
        assert_eq!(host.flows().len(), 2);
        assert!(y.try_recv().is_err());
    }

    #[test]
    fn test_flow_result_reports_revoked_as_denied() {
        let (host, container) = attached();
        let mut rx = container.registry().register("X").unwrap().subscribe();
        container.request_permissions(vec![flow("X", "open-x")]).unwrap();

        host.grant("X");
        host.revoke("X");
        assert!(container.on_flow_result(42));
        assert!(!rx.try_recv().unwrap().granted);
    }
}
