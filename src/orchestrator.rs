//! Public entry point: turn trigger events into permission results.
//!
//! Every shape takes a trigger stream and one or more descriptors, and
//! returns a lazy result stream. Nothing happens until the result stream is
//! polled; then, for each trigger event, the container is asked which
//! permissions are already settled, pending grants are registered (or joined)
//! for the rest, and the sequencer asks the host.
//!
//! | shape                  | items per trigger | item                         |
//! |------------------------|-------------------|------------------------------|
//! | `ensure_each`          | one per input     | that input's `Permission`    |
//! | `ensure_each_combined` | one               | AND/OR aggregate `Permission`|
//! | `ensure`               | one               | `bool`, AND of all grants    |
//!
//! Trigger events are independent: a later event is handled as soon as it
//! arrives, joining whatever an earlier event left pending. Items of one
//! event keep their order; items of different events interleave as answers
//! arrive. Result streams yield `Err` at most once, then end.

use std::future::Future;
use std::sync::Arc;
use std::task::Poll;

use futures::future::{self, join_all};
use futures::stream::{self, BoxStream, FusedStream, SelectAll, Stream, StreamExt};

use crate::config::PermissionsConfig;
use crate::container::PermissionsContainer;
use crate::errors::{PermissionError, Result};
use crate::host::HostBridge;
use crate::permission::Permission;
use crate::registry::GrantReceiver;

/// Lazy stream of orchestration results.
pub type PermissionStream<T> = BoxStream<'static, Result<T>>;

// ---------------------------------------------------------------------------
// Answer
// ---------------------------------------------------------------------------

/// One descriptor's answer for one trigger event: known now, or awaited from
/// the registry.
enum Answer {
    Ready(Permission),
    Waiting(GrantReceiver),
}

impl Answer {
    /// Wait for the answer. A grant abandoned by teardown never completes.
    async fn resolve(self) -> Permission {
        match self {
            Answer::Ready(permission) => permission,
            Answer::Waiting(receiver) => match receiver.await {
                Ok(permission) => permission,
                Err(_) => future::pending().await,
            },
        }
    }
}

/// Decide, register and request for one trigger event.
///
/// Fails with [`PermissionError::DetachedContext`] before touching the
/// registry when no host is attached.
fn begin(container: &PermissionsContainer, permissions: &[Permission]) -> Result<Vec<Answer>> {
    let host = container.host()?;

    if host.is_legacy_host() {
        container.log(|| "Legacy host, granting everything".to_string());
        return Ok(permissions
            .iter()
            .map(|p| Answer::Ready(p.answered(true, false)))
            .collect());
    }

    let mut answers = Vec::with_capacity(permissions.len());
    let mut unrequested = Vec::new();

    for permission in permissions {
        container.log(|| format!("Requesting permission {}", permission.name));

        // Revocation wins over a stale grant.
        if permission.is_revoked(host.as_ref()) {
            answers.push(Answer::Ready(permission.answered(false, false)));
            continue;
        }
        if permission.is_granted(host.as_ref()) {
            answers.push(Answer::Ready(permission.answered(true, false)));
            continue;
        }

        let subscription = container.registry().join_or_register(&permission.name);
        if subscription.registered {
            unrequested.push(permission.clone());
        } else {
            container.log(|| format!("{} already requested, joining", permission.name));
        }
        answers.push(Answer::Waiting(subscription.receiver));
    }

    if !unrequested.is_empty() {
        container.request_permissions(unrequested)?;
    }

    Ok(answers)
}

fn reject_empty(permissions: &[Permission], operation: &str) -> Result<()> {
    if permissions.is_empty() {
        return Err(PermissionError::InvalidArgument(format!(
            "{} requires at least one input permission",
            operation
        )));
    }
    Ok(())
}

/// End the stream right after its first error.
fn stop_after_error<T, S>(stream: S) -> PermissionStream<T>
where
    T: Send + 'static,
    S: Stream<Item = Result<T>> + Send + 'static,
{
    stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// Trigger events with their payload dropped.
type Events = BoxStream<'static, ()>;

fn single_trigger() -> Events {
    stream::once(future::ready(())).boxed()
}

fn granted_only(combined: PermissionStream<Permission>) -> PermissionStream<bool> {
    combined.map(|result| result.map(|p| p.granted)).boxed()
}

/// Call `start` for every trigger event the moment it arrives and merge the
/// per-event streams as they produce items. Items of one event keep their
/// order; events do not wait on each other.
fn fan_out<I, F>(events: Events, mut start: F) -> impl Stream<Item = Result<I>> + Send + 'static
where
    I: Send + 'static,
    F: FnMut() -> PermissionStream<I> + Send + 'static,
{
    let mut events = events.fuse();
    let mut active: SelectAll<PermissionStream<I>> = SelectAll::new();

    stream::poll_fn(move |cx| {
        while let Poll::Ready(Some(())) = events.poll_next_unpin(cx) {
            active.push(start());
        }
        match active.poll_next_unpin(cx) {
            Poll::Ready(None) if !events.is_terminated() => Poll::Pending,
            polled => polled,
        }
    })
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Consumer-facing handle bound to one permissions container.
///
/// Cheap to clone; clones share the container.
#[derive(Debug, Clone)]
pub struct Permissions {
    container: Arc<PermissionsContainer>,
}

impl Permissions {
    /// Bind to a fresh container attached to `host`.
    pub fn new(host: Arc<dyn HostBridge>) -> Self {
        Self::with_config(host, &PermissionsConfig::default())
    }

    pub fn with_config(host: Arc<dyn HostBridge>, config: &PermissionsConfig) -> Self {
        Self::from_container(Arc::new(PermissionsContainer::with_config(host, config)))
    }

    /// Bind to an existing container, sharing its pending grants.
    pub fn from_container(container: Arc<PermissionsContainer>) -> Self {
        Self { container }
    }

    pub fn container(&self) -> &Arc<PermissionsContainer> {
        &self.container
    }

    // -----------------------------------------------------------------------
    // Shapes
    // -----------------------------------------------------------------------

    /// One `bool` per trigger event: `true` only if every permission ended up
    /// granted.
    pub fn ensure<T>(&self, trigger: T, permissions: Vec<Permission>) -> Result<PermissionStream<bool>>
    where
        T: Stream + Send + 'static,
    {
        reject_empty(&permissions, "ensure")?;
        let events = self.trigger_events(trigger, &permissions);
        Ok(granted_only(self.combined_stream(events, permissions)))
    }

    /// One item per permission per trigger event, in input order regardless
    /// of the order the host answers in.
    pub fn ensure_each<T>(
        &self,
        trigger: T,
        permissions: Vec<Permission>,
    ) -> Result<PermissionStream<Permission>>
    where
        T: Stream + Send + 'static,
    {
        reject_empty(&permissions, "ensure_each")?;
        let events = self.trigger_events(trigger, &permissions);
        Ok(self.each_stream(events, permissions))
    }

    /// One aggregate item per trigger event: names joined, granted if all
    /// were, rationale if any had it.
    pub fn ensure_each_combined<T>(
        &self,
        trigger: T,
        permissions: Vec<Permission>,
    ) -> Result<PermissionStream<Permission>>
    where
        T: Stream + Send + 'static,
    {
        reject_empty(&permissions, "ensure_each_combined")?;
        let events = self.trigger_events(trigger, &permissions);
        Ok(self.combined_stream(events, permissions))
    }

    /// [`ensure`](Self::ensure) with a single immediate trigger.
    pub fn request(&self, permissions: Vec<Permission>) -> Result<PermissionStream<bool>> {
        reject_empty(&permissions, "request")?;
        Ok(granted_only(self.combined_stream(single_trigger(), permissions)))
    }

    /// [`ensure_each`](Self::ensure_each) with a single immediate trigger.
    pub fn request_each(&self, permissions: Vec<Permission>) -> Result<PermissionStream<Permission>> {
        reject_empty(&permissions, "request_each")?;
        Ok(self.each_stream(single_trigger(), permissions))
    }

    /// [`ensure_each_combined`](Self::ensure_each_combined) with a single
    /// immediate trigger.
    pub fn request_each_combined(
        &self,
        permissions: Vec<Permission>,
    ) -> Result<PermissionStream<Permission>> {
        reject_empty(&permissions, "request_each_combined")?;
        Ok(self.combined_stream(single_trigger(), permissions))
    }

    /// The caller's trigger events, preceded by one extra event on first poll
    /// if any of `permissions` already has a pending request. A consumer
    /// rebuilt while a prompt is open picks up its answer that way.
    fn trigger_events<T>(&self, trigger: T, permissions: &[Permission]) -> Events
    where
        T: Stream + Send + 'static,
    {
        let container = Arc::clone(&self.container);
        let names: Vec<String> = permissions.iter().map(|p| p.name.clone()).collect();

        let resume = stream::once(future::lazy(move |_| {
            let pending = names.iter().any(|name| container.registry().contains(name));
            if pending {
                container.log(|| "Resuming pending request".to_string());
            }
            pending
        }))
        .filter_map(|pending| future::ready(pending.then_some(())));

        resume.chain(trigger.map(|_| ())).boxed()
    }

    fn each_stream(&self, events: Events, permissions: Vec<Permission>) -> PermissionStream<Permission> {
        let container = Arc::clone(&self.container);
        let permissions: Arc<[Permission]> = permissions.into();

        stop_after_error(fan_out(events, move || -> PermissionStream<Permission> {
            match begin(&container, &permissions) {
                Ok(answers) => stream::iter(answers).then(Answer::resolve).map(Ok).boxed(),
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            }
        }))
    }

    fn combined_stream(&self, events: Events, permissions: Vec<Permission>) -> PermissionStream<Permission> {
        let container = Arc::clone(&self.container);
        let permissions: Arc<[Permission]> = permissions.into();

        stop_after_error(fan_out(events, move || {
            let answers = begin(&container, &permissions);
            stream::once(combine(answers)).boxed()
        }))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_granted(&self, permission: &Permission) -> Result<bool> {
        self.container.is_granted(permission)
    }

    pub fn is_revoked(&self, permission: &Permission) -> Result<bool> {
        self.container.is_revoked(permission)
    }

    /// `true` if every permission that is not granted yet carries the host's
    /// rationale hint. Always `false` on legacy hosts.
    pub fn should_show_request_permission_rationale(&self, permissions: &[Permission]) -> Result<bool> {
        reject_empty(permissions, "should_show_request_permission_rationale")?;
        let host = self.container.host()?;
        if host.is_legacy_host() {
            return Ok(false);
        }
        Ok(permissions
            .iter()
            .filter(|p| !p.is_granted(host.as_ref()))
            .all(|p| host.should_show_rationale(&p.name)))
    }

    // -----------------------------------------------------------------------
    // Container passthrough
    // -----------------------------------------------------------------------

    pub fn set_logging(&self, logging: bool) {
        self.container.set_logging(logging);
    }

    pub fn attach(&self, host: Arc<dyn HostBridge>) {
        self.container.attach(host);
    }

    pub fn detach(&self) {
        self.container.detach();
    }

    pub fn teardown(&self) {
        self.container.teardown();
    }

    pub fn on_request_permissions_result<S: AsRef<str>>(
        &self,
        request_code: i32,
        names: &[S],
        granted: &[bool],
    ) -> usize {
        self.container
            .on_request_permissions_result(request_code, names, granted)
    }

    pub fn on_flow_result(&self, request_code: i32) -> bool {
        self.container.on_flow_result(request_code)
    }
}

/// Merge every answer of one trigger event into a single aggregate.
fn combine(answers: Result<Vec<Answer>>) -> impl Future<Output = Result<Permission>> + Send {
    async move {
        let answers = answers?;
        let permissions = join_all(answers.into_iter().map(Answer::resolve)).await;
        Ok(Permission::combined(&permissions))
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::StreamExt;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::host::InMemoryHost;

    fn setup() -> (Arc<InMemoryHost>, Permissions) {
        let host = Arc::new(InMemoryHost::new());
        let permissions = Permissions::new(host.clone());
        (host, permissions)
    }

    #[tokio::test]
    async fn test_already_granted_completes_without_host_request() {
        let (host, permissions) = setup();
        host.grant("READ_PHONE_STATE");

        let results: Vec<_> = permissions
            .request(vec![Permission::new("READ_PHONE_STATE")])
            .unwrap()
            .collect()
            .await;

        assert_eq!(results, vec![Ok(true)]);
        assert_eq!(host.batch_count(), 0);
    }

    #[test]
    fn test_nothing_runs_before_poll() {
        let (host, permissions) = setup();
        let stream = permissions
            .request_each(vec![Permission::new("CAMERA")])
            .unwrap();

        assert_eq!(host.batch_count(), 0);
        assert!(permissions.container().registry().is_empty());

        let mut stream = task::spawn(stream);
        assert_pending!(stream.poll_next());
        assert_eq!(host.batches(), vec![vec!["CAMERA".to_string()]]);
    }

    #[test]
    fn test_denied_single_permission() {
        let (_host, permissions) = setup();
        let mut each = task::spawn(
            permissions
                .request_each(vec![Permission::new("READ_PHONE_STATE")])
                .unwrap(),
        );
        assert_pending!(each.poll_next());

        permissions.on_request_permissions_result(42, &["READ_PHONE_STATE"], &[false]);

        assert!(each.is_woken());
        let item = assert_ready!(each.poll_next());
        assert_eq!(item, Some(Ok(Permission::new("READ_PHONE_STATE"))));
        assert_eq!(assert_ready!(each.poll_next()), None);
    }

    #[test]
    fn test_empty_input_rejected() {
        let (_host, permissions) = setup();
        assert!(matches!(
            permissions.request(vec![]),
            Err(PermissionError::InvalidArgument(_))
        ));
        assert!(matches!(
            permissions.request_each(vec![]),
            Err(PermissionError::InvalidArgument(_))
        ));
        assert!(matches!(
            permissions.request_each_combined(vec![]),
            Err(PermissionError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_detached_fails_before_registering() {
        let (_host, permissions) = setup();
        permissions.detach();

        let results: Vec<_> = permissions
            .ensure_each(
                stream::iter(vec![1, 2]),
                vec![Permission::new("CAMERA"), Permission::new("SMS")],
            )
            .unwrap()
            .collect()
            .await;

        assert_eq!(results, vec![Err(PermissionError::DetachedContext)]);
        assert!(permissions.container().registry().is_empty());
    }

    #[test]
    fn test_rationale_query() {
        let (host, permissions) = setup();
        let p1 = Permission::new("p1");
        let p2 = Permission::new("p2");

        host.set_rationale("p1", true);
        host.set_rationale("p2", true);
        assert_eq!(
            permissions.should_show_request_permission_rationale(&[p1.clone(), p2.clone()]),
            Ok(true)
        );

        host.set_rationale("p2", false);
        assert_eq!(
            permissions.should_show_request_permission_rationale(&[p1.clone(), p2.clone()]),
            Ok(false)
        );

        // Granted permissions are not asked about.
        host.grant("p2");
        assert_eq!(
            permissions.should_show_request_permission_rationale(&[p1.clone(), p2.clone()]),
            Ok(true)
        );

        host.set_rationale("p1", false);
        assert_eq!(
            permissions.should_show_request_permission_rationale(&[p1, p2]),
            Ok(false)
        );
    }

    #[test]
    fn test_rationale_query_on_legacy_host() {
        let host = Arc::new(InMemoryHost::legacy());
        host.set_rationale("p1", true);
        let permissions = Permissions::new(host);
        assert_eq!(
            permissions.should_show_request_permission_rationale(&[Permission::new("p1")]),
            Ok(false)
        );
    }
}
