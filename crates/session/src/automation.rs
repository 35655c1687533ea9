//! The remote automation surface, as seen by the pool.
//!
//! The transport behind it (a browser driver, a remote protocol) is not this
//! crate's business; it only needs something that can be launched into a
//! scratch directory, drive a page, and be shut down again.

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// One running automation instance (e.g. a headless browser).
#[async_trait]
pub trait Automation: Send + Sync {
    /// Load `url` in the instance's page.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Run `script` in the current page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Fetch a resource through the instance, so session-bound locators
    /// (cookies, signed URLs) resolve.
    async fn fetch_resource(&self, url: &str) -> Result<Vec<u8>>;

    /// Terminate the instance. Called at most once.
    async fn close(&self) -> Result<()>;
}

/// Starts [`Automation`] instances.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn Automation>>;
}

/// Per-session launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Scratch directory owned by the session.
    pub user_data_dir: PathBuf,
    pub headless: bool,
}
