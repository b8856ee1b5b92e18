//! Participant configuration

use std::time::Duration;

/// Configuration for a participant actor
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// Rewrite the log during recovery, dropping records nobody needs
    pub compact_on_recovery: bool,

    /// How long a transaction worker waits for more messages before retiring
    pub worker_idle_timeout: Duration,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            compact_on_recovery: true,
            worker_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ParticipantConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable log compaction during recovery
    pub fn with_compact_on_recovery(mut self, compact: bool) -> Self {
        self.compact_on_recovery = compact;
        self
    }

    /// Set the idle timeout of transaction workers
    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }
}
