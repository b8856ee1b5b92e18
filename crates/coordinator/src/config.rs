//! Coordinator configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default time to wait for every vote
pub const DEFAULT_VOTE_TIMEOUT: Duration = Duration::from_secs(6);

/// Default pause between decision broadcasts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(6);

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long the prepare phase waits for outstanding votes
    pub vote_timeout: Duration,

    /// How long to wait for ACKs before sending the decision again
    pub retry_interval: Duration,

    /// Directory committed artifacts are published into
    pub publish_dir: PathBuf,

    /// Drop finished transactions from the log during recovery
    pub compact_on_recovery: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            vote_timeout: DEFAULT_VOTE_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            publish_dir: PathBuf::from("."),
            compact_on_recovery: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration publishing into `publish_dir`
    pub fn new(publish_dir: impl Into<PathBuf>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_vote_timeout(mut self, timeout: Duration) -> Self {
        self.vote_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_publish_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.publish_dir = dir.into();
        self
    }

    pub fn with_compact_on_recovery(mut self, compact: bool) -> Self {
        self.compact_on_recovery = compact;
        self
    }
}
