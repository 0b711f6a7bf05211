//! Named one-shot timers backed by tokio tasks.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type TimerKey = (String, String);

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Host-side table of named timers.
///
/// A timer is visible through [`TimerTable::exists`] from the moment it is
/// started until just before its callback runs, or until it is killed. This
/// makes a live timer usable as a process-wide "something is running" marker.
/// Must be used from within a tokio runtime.
#[derive(Default)]
pub struct TimerTable {
    generation: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerKey, TimerEntry>>>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`, replacing any timer with the same name.
    pub fn start<F>(&self, scope: &str, name: &str, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key: TimerKey = (scope.to_string(), name.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let callback: BoxFuture<'static, ()> = callback.boxed();

        // Hold the table while spawning so a zero delay cannot observe the
        // table before its own entry is inserted.
        let mut table = self.timers.lock();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = timers.lock();
                match timers.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        timers.remove(&task_key);
                    }
                    // Replaced or killed in the meantime.
                    _ => return,
                }
            }
            callback.await;
        });

        if let Some(previous) = table.insert(key, TimerEntry { generation, handle }) {
            previous.handle.abort();
        }
        drop(table);
        tracing::trace!(scope, name, delay_ms = delay.as_millis() as u64, "timer started");
    }

    pub fn exists(&self, scope: &str, name: &str) -> bool {
        self.timers
            .lock()
            .contains_key(&(scope.to_string(), name.to_string()))
    }

    /// Cancel a pending timer. Returns `false` if no such timer was pending.
    pub fn kill(&self, scope: &str, name: &str) -> bool {
        let removed = self
            .timers
            .lock()
            .remove(&(scope.to_string(), name.to_string()));
        match removed {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        for (_, entry) in self.timers.lock().drain() {
            entry.handle.abort();
        }
    }
}
