//! Bridge statistics.
//!
//! Counters for session lifecycle events, shared between the session
//! manager and the synchronizations it registers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Session lifecycle counters.
///
/// All counters are atomic and can be read while sessions are in flight.
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Sessions opened from a factory.
    sessions_opened: AtomicU64,
    /// Acquisitions served by an already-bound session.
    sessions_reused: AtomicU64,
    /// Releases that only decremented a bound holder.
    sessions_released: AtomicU64,
    /// Sessions actually closed.
    sessions_closed: AtomicU64,
    /// Session commits triggered by transaction synchronization.
    session_commits: AtomicU64,
    /// Failures replaced by a translated error.
    translations: AtomicU64,
    /// Close failures swallowed during completion.
    cleanup_failures: AtomicU64,
}

impl BridgeStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_reused(&self) {
        self.sessions_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_released(&self) {
        self.sessions_released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_commit(&self) {
        self.session_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_translation(&self) {
        self.translations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of sessions opened.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Returns the number of acquisitions served by a bound session.
    pub fn sessions_reused(&self) -> u64 {
        self.sessions_reused.load(Ordering::Relaxed)
    }

    /// Returns the number of releases of bound sessions.
    pub fn sessions_released(&self) -> u64 {
        self.sessions_released.load(Ordering::Relaxed)
    }

    /// Returns the number of sessions closed.
    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
    }

    /// Returns the number of synchronized session commits.
    pub fn session_commits(&self) -> u64 {
        self.session_commits.load(Ordering::Relaxed)
    }

    /// Returns the number of translated failures.
    pub fn translations(&self) -> u64 {
        self.translations.load(Ordering::Relaxed)
    }

    /// Returns the number of suppressed cleanup failures.
    ///
    /// A non-zero value means sessions failed to close during completion.
    pub fn cleanup_failures(&self) -> u64 {
        self.cleanup_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_opened: self.sessions_opened(),
            sessions_reused: self.sessions_reused(),
            sessions_released: self.sessions_released(),
            sessions_closed: self.sessions_closed(),
            session_commits: self.session_commits(),
            translations: self.translations(),
            cleanup_failures: self.cleanup_failures(),
        }
    }
}

/// A point-in-time snapshot of bridge statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Sessions opened from a factory.
    pub sessions_opened: u64,
    /// Acquisitions served by an already-bound session.
    pub sessions_reused: u64,
    /// Releases of bound sessions.
    pub sessions_released: u64,
    /// Sessions closed.
    pub sessions_closed: u64,
    /// Synchronized session commits.
    pub session_commits: u64,
    /// Translated failures.
    pub translations: u64,
    /// Suppressed cleanup failures.
    pub cleanup_failures: u64,
}

impl StatsSnapshot {
    /// Sessions opened but not yet closed.
    #[must_use]
    pub fn sessions_outstanding(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = BridgeStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn snapshot_reflects_records() {
        let stats = BridgeStats::new();
        stats.record_session_opened();
        stats.record_session_opened();
        stats.record_session_reused();
        stats.record_session_closed();

        let snap = stats.snapshot();
        assert_eq!(snap.sessions_opened, 2);
        assert_eq!(snap.sessions_reused, 1);
        assert_eq!(snap.sessions_outstanding(), 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(BridgeStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_session_opened();
                        s.record_session_closed();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.sessions_opened(), 800);
        assert_eq!(stats.sessions_closed(), 800);
    }
}
