//! grantflow demo binary.
//!
//! Plays both sides against an in-memory host: a consumer task asks for a
//! camera permission and a battery-optimisation exemption (custom strategy)
//! on every simulated button click, while the main task answers the prompts
//! the host was asked to show.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: tracing filter (default: "info,grantflow=debug")
//! - `GRANTFLOW_LOGGING`: per-request debug logging (default: on for the demo)
//! - `GRANTFLOW_REQUEST_CODE`: request code echoed by the host
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin grantflow-demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use grantflow::config::ENV_LOGGING;
use grantflow::host::{HostBridge, InMemoryHost};
use grantflow::{Permission, PermissionRequest, Permissions, PermissionsConfig};

const CAMERA: &str = "android.permission.CAMERA";
const IGNORE_BATTERY_OPTIMIZATIONS: &str =
    "android.permission.REQUEST_IGNORE_BATTERY_OPTIMIZATIONS";
const BATTERY_SETTINGS: &str = "android.settings.REQUEST_IGNORE_BATTERY_OPTIMIZATIONS";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,grantflow=debug".into()),
        )
        .init();

    let mut config = PermissionsConfig::from_env();
    if std::env::var(ENV_LOGGING).is_err() {
        config.logging = true;
    }

    let host = Arc::new(InMemoryHost::new());
    let permissions = Permissions::with_config(host.clone(), &config);

    let battery = PermissionRequest::new(
        |sink| sink.launch_flow(BATTERY_SETTINGS),
        |host| host.check_granted(IGNORE_BATTERY_OPTIMIZATIONS),
        |_| false,
    );

    let (mut clicks, click_events) = mpsc::unbounded::<()>();
    let mut results = permissions.ensure_each(
        click_events,
        vec![
            Permission::new(CAMERA),
            Permission::with_strategy(IGNORE_BATTERY_OPTIMIZATIONS, Arc::new(battery)),
        ],
    )?;

    let consumer = tokio::spawn(async move {
        while let Some(result) = results.next().await {
            match result {
                Ok(permission) => tracing::info!("Permission result {}", permission),
                Err(e) => tracing::error!("Permission request failed: {}", e),
            }
        }
        tracing::info!("Result stream completed");
    });

    tracing::info!("Button clicked");
    clicks.unbounded_send(())?;

    while host.batch_count() == 0 {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    tracing::info!("Host: user granted {}", CAMERA);
    host.grant(CAMERA);
    permissions.on_request_permissions_result(config.request_code, &[CAMERA], &[true]);

    while host.flows().is_empty() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    tracing::info!("Host: user left battery settings without a change");
    permissions.on_flow_result(config.request_code);

    clicks.close_channel();
    consumer.await?;

    tracing::info!(
        "Host legacy mode: {}, prompts shown: {}, flows launched: {}",
        host.is_legacy_host(),
        host.batch_count(),
        host.flows().len()
    );
    Ok(())
}
