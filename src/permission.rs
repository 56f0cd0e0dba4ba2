//! Permission descriptors and custom acquisition strategies.
//!
//! A [`Permission`] names one host capability and carries its last known
//! answer. Descriptors built with a strategy bypass the host's native prompt
//! and are requested through [`AcquisitionStrategy::request`] instead.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::host::{HostBridge, StrategySink};

/// Separator used when joining member names into an aggregate name.
pub const AGGREGATE_SEPARATOR: &str = ", ";

// ---------------------------------------------------------------------------
// AcquisitionStrategy
// ---------------------------------------------------------------------------

/// A capability-specific way of asking the user to enable a permission,
/// outside the host's default prompt.
pub trait AcquisitionStrategy: Send + Sync {
    /// Start acquiring the permission. The answer arrives later through the
    /// container (`on_flow_result` or `deliver`).
    fn request(&self, sink: &StrategySink<'_>);

    /// Current grant state as this strategy sees it.
    fn is_granted(&self, host: &dyn HostBridge) -> bool;

    /// Whether the permission is revoked as this strategy sees it.
    fn is_revoked(&self, host: &dyn HostBridge) -> bool;
}

type RequestFn = dyn Fn(&StrategySink<'_>) + Send + Sync;
type QueryFn = dyn Fn(&dyn HostBridge) -> bool + Send + Sync;

/// Closure-backed [`AcquisitionStrategy`].
///
/// ```ignore
/// let battery = PermissionRequest::new(
///     |sink| sink.launch_flow("REQUEST_IGNORE_BATTERY_OPTIMIZATIONS"),
///     |host| host.check_granted("battery:unrestricted"),
///     |_| false,
/// );
/// ```
pub struct PermissionRequest {
    request: Box<RequestFn>,
    is_granted: Box<QueryFn>,
    is_revoked: Box<QueryFn>,
}

impl PermissionRequest {
    pub fn new<R, G, V>(request: R, is_granted: G, is_revoked: V) -> Self
    where
        R: Fn(&StrategySink<'_>) + Send + Sync + 'static,
        G: Fn(&dyn HostBridge) -> bool + Send + Sync + 'static,
        V: Fn(&dyn HostBridge) -> bool + Send + Sync + 'static,
    {
        Self {
            request: Box::new(request),
            is_granted: Box::new(is_granted),
            is_revoked: Box::new(is_revoked),
        }
    }
}

impl AcquisitionStrategy for PermissionRequest {
    fn request(&self, sink: &StrategySink<'_>) {
        (self.request)(sink)
    }

    fn is_granted(&self, host: &dyn HostBridge) -> bool {
        (self.is_granted)(host)
    }

    fn is_revoked(&self, host: &dyn HostBridge) -> bool {
        (self.is_revoked)(host)
    }
}

impl fmt::Debug for PermissionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PermissionRequest { .. }")
    }
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

/// A named capability and its last known answer.
///
/// Equality ignores the strategy: two descriptors are equal when their name,
/// grant and rationale flags match.
#[derive(Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Capability name; for aggregates, the member names joined in order.
    pub name: String,

    /// Custom acquisition strategy, if any.
    #[serde(skip)]
    pub strategy: Option<Arc<dyn AcquisitionStrategy>>,

    /// Last known grant state.
    #[serde(default)]
    pub granted: bool,

    /// Host hint that the user declined without blocking future prompts.
    #[serde(default)]
    pub should_show_rationale: bool,
}

impl Permission {
    /// A host-default permission with no answer yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: None,
            granted: false,
            should_show_rationale: false,
        }
    }

    /// A permission acquired through `strategy` instead of the host prompt.
    pub fn with_strategy(name: impl Into<String>, strategy: Arc<dyn AcquisitionStrategy>) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::new(name)
        }
    }

    pub fn with_granted(mut self, granted: bool) -> Self {
        self.granted = granted;
        self
    }

    pub fn with_rationale(mut self, should_show_rationale: bool) -> Self {
        self.should_show_rationale = should_show_rationale;
        self
    }

    /// Whether this permission bypasses the host's default prompt.
    pub fn has_strategy(&self) -> bool {
        self.strategy.is_some()
    }

    /// Copy of this descriptor carrying a host answer.
    pub fn answered(&self, granted: bool, should_show_rationale: bool) -> Self {
        Self {
            name: self.name.clone(),
            strategy: self.strategy.clone(),
            granted,
            should_show_rationale,
        }
    }

    /// Current grant state, through the strategy when there is one.
    pub fn is_granted(&self, host: &dyn HostBridge) -> bool {
        match &self.strategy {
            Some(strategy) => strategy.is_granted(host),
            None => host.check_granted(&self.name),
        }
    }

    /// Policy revocation state, through the strategy when there is one.
    pub fn is_revoked(&self, host: &dyn HostBridge) -> bool {
        match &self.strategy {
            Some(strategy) => strategy.is_revoked(host),
            None => host.check_revoked_by_policy(&self.name),
        }
    }

    /// Merge descriptors into one aggregate: names joined in input order,
    /// granted if every member is, rationale if any member has it.
    ///
    /// The empty slice yields the empty aggregate (`""`, granted, no
    /// rationale).
    pub fn combined(permissions: &[Permission]) -> Self {
        let name = permissions
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(AGGREGATE_SEPARATOR);

        Self {
            name,
            strategy: None,
            granted: permissions.iter().all(|p| p.granted),
            should_show_rationale: permissions.iter().any(|p| p.should_show_rationale),
        }
    }
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.granted == other.granted
            && self.should_show_rationale == other.should_show_rationale
    }
}

impl Eq for Permission {}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permission")
            .field("name", &self.name)
            .field("granted", &self.granted)
            .field("should_show_rationale", &self.should_show_rationale)
            .field("has_strategy", &self.has_strategy())
            .finish()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.granted { "granted" } else { "denied" };
        write!(f, "{} ({}", self.name, state)?;
        if self.should_show_rationale {
            f.write_str(", show rationale")?;
        }
        f.write_str(")")
    }
}
