use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;

/// How long a notification stays visible.
pub const DISMISS_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where user-facing status messages go.
pub trait NotificationSink: Send + Sync {
    fn show(&self, message: &str, severity: Severity);
}

/// One rendered status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    /// Increases by one per `show`; lets a view detect replacement.
    pub seq: u64,
    pub shown_at: Instant,
}

/// Single-slot notification area: the latest message wins.
///
/// Each `show` replaces whatever is visible and restarts the dismissal
/// interval. Nothing is queued.
#[derive(Debug)]
pub struct Toast {
    dismiss_after: Duration,
    slot: RwLock<Option<Notification>>,
    seq: AtomicU64,
}

impl Toast {
    pub fn new() -> Self {
        Self::with_dismiss_after(DISMISS_AFTER)
    }

    pub fn with_dismiss_after(dismiss_after: Duration) -> Self {
        Self {
            dismiss_after,
            slot: RwLock::new(None),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dismiss_after(&self) -> Duration {
        self.dismiss_after
    }

    /// The notification visible right now, if any.
    pub fn current(&self) -> Option<Notification> {
        self.current_at(Instant::now())
    }

    /// The notification that would be visible at `now`.
    pub fn current_at(&self, now: Instant) -> Option<Notification> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|n| now.saturating_duration_since(n.shown_at) < self.dismiss_after)
            .cloned()
    }

    /// Hide the current notification early.
    pub fn dismiss(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Total notifications shown since creation.
    pub fn shown(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for Toast {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for Toast {
    fn show(&self, message: &str, severity: Severity) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let next = Notification {
            message: message.to_string(),
            severity,
            seq,
            shown_at: Instant::now(),
        };
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(next);
    }
}
