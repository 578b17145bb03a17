//! In-process publish/subscribe with typed payloads.
//!
//! Used twice by a [`Desk`](crate::Desk): once for the "batches changed"
//! signal that lets independently-initialized panels refresh, and once
//! for cache events consumed by the view layer.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Callback invoked for every published event.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`Broadcaster::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out to any number of listeners.
///
/// - Delivery happens on the publishing thread, in registration order.
/// - A listener that panics is logged and skipped; later listeners still
///   run and the publisher never sees the panic.
/// - Listeners may subscribe or unsubscribe from inside a callback; the
///   change applies from the next publish.
pub struct Broadcaster<E> {
    listeners: RwLock<Vec<(SubscriptionId, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> Broadcaster<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() < before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener. Returns how many returned normally.
    pub fn publish(&self, event: &E) -> usize {
        // Snapshot so callbacks run without the lock held.
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut delivered = 0;
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        listener = index,
                        reason = panic_message(panic.as_ref()),
                        "listener panicked; continuing fan-out"
                    );
                }
            }
        }
        delivered
    }
}

impl<E> Default for Broadcaster<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Broadcaster<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster").field("listeners", &self.len()).finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

// ── Batches-changed channel ─────────────────────────────────────────

/// Which kind of confirmed mutation triggered a change signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOrigin {
    Create,
    Update,
    Delete,
    DeleteByFilter,
    Upload,
    /// Every batch deleted and the server's seed data reloaded.
    Reset,
    Init,
    SyncFiles,
    AutoCreate,
}

/// Payload of the "batches changed" signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchesChanged {
    pub at: DateTime<Utc>,
    pub origin: ChangeOrigin,
}

/// The process-wide "batches changed" channel.
pub type ChangeBroadcaster = Broadcaster<BatchesChanged>;

impl Broadcaster<BatchesChanged> {
    /// Announce a confirmed mutation that happened at `at`.
    pub fn notify_changed(&self, at: DateTime<Utc>, origin: ChangeOrigin) -> usize {
        let delivered = self.publish(&BatchesChanged { at, origin });
        tracing::debug!(?origin, delivered, "batches changed");
        delivered
    }
}
