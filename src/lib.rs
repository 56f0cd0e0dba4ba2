//! # grantflow
//!
//! Request de-duplication and sequencing for host-owned runtime permissions.
//!
//! A host platform owns the real grant state and answers permission prompts
//! asynchronously, in batches, keyed only by name. `grantflow` lets callers
//! ask for one or more permissions and get back a single well-defined result
//! stream, however many of them were already granted and in whatever order
//! the host answers.
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use grantflow::{host::InMemoryHost, Permission, Permissions};
//!
//! let host = Arc::new(InMemoryHost::new());
//! let permissions = Permissions::new(host.clone());
//!
//! let mut results = permissions.request_each(vec![
//!     Permission::new("android.permission.CAMERA"),
//!     Permission::new("android.permission.READ_PHONE_STATE"),
//! ])?;
//!
//! // Later, when the host answers:
//! permissions.on_request_permissions_result(
//!     grantflow::host::DEFAULT_REQUEST_CODE,
//!     &["android.permission.READ_PHONE_STATE", "android.permission.CAMERA"],
//!     &[true, false],
//! );
//! ```
//!
//! Building blocks, leaves first:
//!
//! - [`permission`]: descriptors and custom acquisition strategies
//! - [`registry`]: one pending grant per name, resolved by name
//! - [`sequencer`]: batches host prompts, chains custom strategies
//! - [`container`]: per-UI-container state and host delivery callbacks
//! - [`orchestrator`]: the public result shapes

pub mod config;
pub mod container;
pub mod errors;
pub mod host;
pub mod orchestrator;
pub mod permission;
pub mod registry;
pub mod sequencer;

pub use config::PermissionsConfig;
pub use container::PermissionsContainer;
pub use errors::{PermissionError, Result};
pub use host::{HostBridge, StrategySink, DEFAULT_REQUEST_CODE};
pub use orchestrator::{PermissionStream, Permissions};
pub use permission::{AcquisitionStrategy, Permission, PermissionRequest};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
