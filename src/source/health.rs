//! Health counters for one source

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Health metrics for a source
///
/// Tracks attempts, failures and relayed traffic. The consecutive failure
/// streak resets whenever a session is established, which is what a
/// failure-streak observer keys on. All fields are atomics.
pub struct SourceHealth {
    /// Number of connect-and-stream attempts started
    pub attempts: AtomicU64,

    /// Number of failed dials
    pub connect_failures: AtomicU64,

    /// Number of sessions that ended with a read error
    pub read_failures: AtomicU64,

    /// Number of sessions established
    pub sessions: AtomicU64,

    /// Failures since the last established session
    pub consecutive_failures: AtomicU64,

    pub frames_relayed: AtomicU64,

    pub bytes_relayed: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last relayed frame
    pub last_frame_time: AtomicU64,
}

impl SourceHealth {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            frames_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed dial, returning the current failure streak
    pub fn record_connect_failure(&self) -> u64 {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a session ending in error, returning the current failure streak
    pub fn record_read_failure(&self) -> u64 {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_frame(&self, size: usize) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    /// Timestamp of the last relayed frame (Unix microseconds)
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Check if no frame was relayed for the given duration
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_frame_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            attempts: self.attempts(),
            connect_failures: self.connect_failures(),
            read_failures: self.read_failures(),
            sessions: self.sessions(),
            consecutive_failures: self.consecutive_failures(),
            frames_relayed: self.frames_relayed(),
            bytes_relayed: self.bytes_relayed(),
        }
    }
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub attempts: u64,
    pub connect_failures: u64,
    pub read_failures: u64,
    pub sessions: u64,
    pub consecutive_failures: u64,
    pub frames_relayed: u64,
    pub bytes_relayed: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} attempts ({} connect failures, {} read failures, {} in a row), {} sessions, {} frames, {} bytes",
            self.attempts,
            self.connect_failures,
            self.read_failures,
            self.consecutive_failures,
            self.sessions,
            self.frames_relayed,
            self.bytes_relayed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_streak_resets_on_session() {
        let health = SourceHealth::new();

        assert_eq!(health.record_connect_failure(), 1);
        assert_eq!(health.record_connect_failure(), 2);
        health.record_session();
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.record_read_failure(), 1);

        let summary = health.summary();
        assert_eq!(summary.connect_failures, 2);
        assert_eq!(summary.read_failures, 1);
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.consecutive_failures, 1);
    }

    #[test]
    fn test_frame_counters() {
        let health = SourceHealth::new();

        health.record_frame(1000);
        health.record_frame(500);

        assert_eq!(health.frames_relayed(), 2);
        assert_eq!(health.bytes_relayed(), 1500);
        assert!(health.summary().to_string().contains("2 frames, 1500 bytes"));
    }

    #[test]
    fn test_stall_detection() {
        let health = SourceHealth::new();
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_frame(10);
        std::thread::sleep(Duration::from_millis(150));

        assert!(health.is_stalled(Duration::from_millis(100)));
    }
}
