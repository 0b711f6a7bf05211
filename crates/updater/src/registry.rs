use crate::events::{EventBus, EventHandler, EventKind, SubscriptionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Namespace for one package's handlers and timers within one host profile.
///
/// Two profiles running the same package, or two packages in one profile,
/// always get different scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerScope {
    package: String,
    profile: String,
    key: String,
}

impl HandlerScope {
    pub fn new(package: impl Into<String>, profile: impl Into<String>) -> Self {
        let package = package.into();
        let profile = profile.into();
        let key = format!("{package}@{profile}");
        Self {
            package,
            profile,
            key,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Scope string used on the event bus and timer table.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handler_name(&self, kind: EventKind) -> String {
        format!("{}_updater_{}", self.package, kind.as_str())
    }

    /// Name of the timer marking an update of this package as running.
    pub fn guard_timer_name(&self) -> String {
        format!("{}_updater_running", self.package)
    }

    /// Name of the timer that defers the install after an uninstall.
    pub fn install_timer_name(&self) -> String {
        format!("{}_updater_install", self.package)
    }
}

impl fmt::Display for HandlerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// The set of event handlers one updater has installed.
///
/// Dropping the registry does not touch the bus; call
/// [`HandlerRegistry::unregister`] on teardown.
#[derive(Debug)]
pub struct HandlerRegistry {
    scope: HandlerScope,
    installed: HashMap<EventKind, SubscriptionId>,
}

impl HandlerRegistry {
    pub fn new(scope: HandlerScope) -> Self {
        Self {
            scope,
            installed: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &HandlerScope {
        &self.scope
    }

    /// Install `handler` for all four event kinds.
    ///
    /// Names already present on the bus under this scope are skipped, so
    /// registering twice never makes an event fire twice. Returns how many
    /// handlers were newly installed.
    pub fn register(&mut self, bus: &EventBus, handler: Arc<dyn EventHandler>) -> usize {
        let existing = bus.handler_names(self.scope.key());
        let mut added = 0;
        for kind in EventKind::ALL {
            let name = self.scope.handler_name(kind);
            if existing.contains(&name) {
                tracing::debug!(scope = %self.scope, handler = %name, "handler already registered");
                continue;
            }
            let id = bus.subscribe(self.scope.key(), &name, kind, Arc::clone(&handler));
            self.installed.insert(kind, id);
            added += 1;
        }
        added
    }

    /// Remove the four handlers this scope owns. Missing handlers are ignored.
    ///
    /// Handlers this registry installed are removed by their subscription id.
    /// Names it skipped at registration, because they already existed, are
    /// removed by name so a stale handler left in the scope is reclaimed.
    pub fn unregister(&mut self, bus: &EventBus) -> usize {
        let mut removed = 0;
        for kind in EventKind::ALL {
            let released = match self.installed.remove(&kind) {
                Some(id) => bus.unsubscribe(id),
                None => bus.unsubscribe_named(self.scope.key(), &self.scope.handler_name(kind)),
            };
            if released {
                removed += 1;
            }
        }
        removed
    }

    /// Kinds this registry installed itself and has not yet released.
    pub fn active(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.installed.contains_key(kind))
            .collect()
    }
}
