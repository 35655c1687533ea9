use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options for the automation session pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on concurrently live sessions.
    pub concurrency: usize,
    /// Additional attempts for bounded retry policies.
    pub retries: u32,
    /// Overall deadline for deadline-bounded operations, in seconds.
    pub timeout_secs: u64,
    /// Close a session that has seen no activity for this many seconds.
    pub idle_secs: Option<u64>,
    /// Delay inserted before every automation call, in milliseconds.
    pub action_delay_ms: u64,
    pub headless: bool,
    /// Root for per-session scratch directories. A temporary directory is
    /// used when unset.
    pub user_data_dir: Option<PathBuf>,
}
impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle(&self) -> Option<Duration> {
        self.idle_secs.map(Duration::from_secs)
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retries: 3,
            timeout_secs: 30,
            idle_secs: None,
            action_delay_ms: 0,
            headless: true,
            user_data_dir: None,
        }
    }
}
