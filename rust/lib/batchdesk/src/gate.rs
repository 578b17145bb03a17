use std::sync::atomic::{AtomicBool, Ordering};

/// Advisory single-flight flag for user-triggered mutations.
///
/// At most one guarded operation runs per gate. A second attempt while the
/// gate is held is refused, not queued. The gate does not coordinate with
/// other processes or with the server.
#[derive(Debug, Default)]
pub struct BusyGate {
    busy: AtomicBool,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition `idle -> busy`. Returns `false` with no state change if
    /// the gate is already held.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition to `idle`. Safe to call when already idle.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Scoped acquisition: the gate is released when the guard drops,
    /// including on early return, panic unwind, or a dropped future.
    pub fn enter(&self, operation: &'static str) -> Option<BusyGuard<'_>> {
        if self.try_acquire() {
            tracing::debug!(operation, "gate acquired");
            Some(BusyGuard { gate: self, operation })
        } else {
            None
        }
    }
}

/// Holds a [`BusyGate`] for the duration of one operation.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    gate: &'a BusyGate,
    operation: &'static str,
}

impl BusyGuard<'_> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
        tracing::debug!(operation = self.operation, "gate released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_without_release_fails() {
        let gate = BusyGate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert!(gate.is_busy());
    }

    #[test]
    fn release_when_idle_stays_idle() {
        let gate = BusyGate::new();
        gate.release();
        assert!(!gate.is_busy());
        gate.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire());
    }

    #[test]
    fn guard_releases_on_drop() {
        let gate = BusyGate::new();
        {
            let guard = gate.enter("sync").unwrap();
            assert_eq!(guard.operation(), "sync");
            assert!(gate.is_busy());
            assert!(gate.enter("upload").is_none());
        }
        assert!(!gate.is_busy());
        assert!(gate.enter("upload").is_some());
    }

    #[test]
    fn guard_releases_on_panic() {
        let gate = BusyGate::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = gate.enter("boom").unwrap();
            panic!("operation blew up");
        }));
        assert!(result.is_err());
        assert!(!gate.is_busy());
    }
}
