//! Named, scoped event bus for host completion events.
//!
//! The host owns one [`EventBus`] and publishes HTTP and download completions
//! on it. Handlers are registered under a `(scope, name)` pair so that an
//! updater can ask which of its handlers already exist before installing new
//! ones. Every handler of the matching kind sees every event; handlers are
//! responsible for ignoring events that were not addressed to them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The four completion events an updater listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    HttpDone,
    HttpError,
    DownloadDone,
    DownloadError,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::HttpDone,
        EventKind::HttpError,
        EventKind::DownloadDone,
        EventKind::DownloadError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpDone => "http_done",
            Self::HttpError => "http_error",
            Self::DownloadDone => "download_done",
            Self::DownloadError => "download_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Completion event published by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// An HTTP GET finished successfully.
    HttpDone { url: String, body: String },
    /// An HTTP GET failed.
    HttpError { url: String, error: String },
    /// A file download finished and was written to `path`.
    DownloadDone { path: PathBuf, size: u64 },
    /// A file download to `path` from `url` failed.
    DownloadError {
        path: PathBuf,
        error: String,
        url: String,
    },
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::HttpDone { .. } => EventKind::HttpDone,
            Self::HttpError { .. } => EventKind::HttpError,
            Self::DownloadDone { .. } => EventKind::DownloadDone,
            Self::DownloadError { .. } => EventKind::DownloadError,
        }
    }
}

/// Callback invoked for every dispatched event of the kind it was registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &HostEvent);
}

/// Identifier returned when a handler is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    scope: String,
    name: String,
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
}

/// Host-side registry of named event handlers.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `(scope, name)`.
    ///
    /// A handler already registered under the same pair is replaced, so a
    /// name is never bound twice.
    pub fn subscribe(
        &self,
        scope: &str,
        name: &str,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|sub| !(sub.scope == scope && sub.name == name));
        subscriptions.push(Subscription {
            id,
            scope: scope.to_string(),
            name: name.to_string(),
            kind,
            handler,
        });
        tracing::trace!(scope, name, kind = %kind, "event handler registered");
        id
    }

    /// Remove the handler registered under `(scope, name)`, if any.
    pub fn unsubscribe_named(&self, scope: &str, name: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|sub| !(sub.scope == scope && sub.name == name));
        before != subscriptions.len()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        before != subscriptions.len()
    }

    /// Names of all handlers currently registered under `scope`.
    pub fn handler_names(&self, scope: &str) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .filter(|sub| sub.scope == scope)
            .map(|sub| sub.name.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Deliver `event` to every handler of its kind, in registration order.
    ///
    /// Handlers run one after another on the calling task. The handler list is
    /// snapshotted first, so handlers may register or unregister freely while
    /// the event is being delivered. Returns the number of handlers invoked.
    pub async fn dispatch(&self, event: HostEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|sub| sub.kind == kind)
            .map(|sub| Arc::clone(&sub.handler))
            .collect();

        tracing::trace!(kind = %kind, handlers = handlers.len(), "dispatching host event");
        for handler in &handlers {
            handler.handle(&event).await;
        }
        handlers.len()
    }
}
