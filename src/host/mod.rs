//! Host authority seam.
//!
//! The host platform owns the true grant state. The engine only queries it
//! synchronously ([`HostBridge::check_granted`] and friends) and asks it to
//! prompt ([`HostBridge::request_batch`], [`HostBridge::launch_flow`]). The
//! host answers later through the container's delivery callbacks
//! (`PermissionsContainer::deliver`, `on_request_permissions_result`,
//! `on_flow_result`), never through a return value.

pub mod memory;

pub use memory::InMemoryHost;

/// Request code stamped on every prompt the engine starts.
pub const DEFAULT_REQUEST_CODE: i32 = 42;

// ---------------------------------------------------------------------------
// HostBridge
// ---------------------------------------------------------------------------

/// The external permission authority as seen by the engine.
///
/// Implementations must not call back into the container synchronously from
/// `request_batch`; answers are expected on a later invocation. Doing so is
/// tolerated (no lock is held across the call) but defeats batching.
pub trait HostBridge: Send + Sync {
    /// Current grant state of `name`.
    fn check_granted(&self, name: &str) -> bool;

    /// Whether a policy has forcibly revoked `name`.
    fn check_revoked_by_policy(&self, name: &str) -> bool;

    /// Whether the user declined `name` before without blocking future prompts.
    fn should_show_rationale(&self, _name: &str) -> bool {
        false
    }

    /// Show the host's native multi-permission prompt.
    fn request_batch(&self, names: &[String], request_code: i32);

    /// Start a host flow (a settings screen, say) for a custom strategy.
    fn launch_flow(&self, _action: &str, _request_code: i32) {}

    /// Hosts predating runtime permission checks grant everything up front.
    fn is_legacy_host(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// StrategySink
// ---------------------------------------------------------------------------

/// What a custom acquisition strategy gets to work with when it is asked to
/// request its permission.
pub struct StrategySink<'a> {
    name: &'a str,
    host: &'a dyn HostBridge,
    request_code: i32,
}

impl<'a> StrategySink<'a> {
    pub(crate) fn new(name: &'a str, host: &'a dyn HostBridge, request_code: i32) -> Self {
        Self {
            name,
            host,
            request_code,
        }
    }

    /// Name of the permission being requested.
    pub fn name(&self) -> &str {
        self.name
    }

    /// The attached host.
    pub fn host(&self) -> &dyn HostBridge {
        self.host
    }

    /// Code the host must echo back through `on_flow_result`.
    pub fn request_code(&self) -> i32 {
        self.request_code
    }

    /// Launch a host flow tagged with this container's request code.
    pub fn launch_flow(&self, action: &str) {
        self.host.launch_flow(action, self.request_code);
    }
}

impl std::fmt::Debug for StrategySink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategySink")
            .field("name", &self.name)
            .field("request_code", &self.request_code)
            .finish()
    }
}
