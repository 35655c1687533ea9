//! Scripted automation for tests.

use crate::automation::{Automation, LaunchSpec, Launcher};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Counters {
    launches: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    dirs: Mutex<Vec<PathBuf>>,
}

/// Launcher producing [`MockAutomation`] instances that share counters, so
/// tests can assert on how many were started and how many ran at once.
///
/// `evaluate` returns the URL last navigated to; `fetch_resource` serves
/// bytes registered with [`with_resource`](Self::with_resource) and fails
/// with a navigation error for anything else.
#[derive(Clone, Default)]
pub struct MockLauncher {
    counters: Arc<Counters>,
    resources: Arc<HashMap<String, Vec<u8>>>,
    broken: Arc<AtomicBool>,
}

impl MockLauncher {
    pub fn with_resource(mut self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.resources).insert(url.into(), data.into());
        self
    }

    /// Make every following launch fail.
    pub fn break_launches(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Instances currently alive.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Most instances ever alive at once.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.counters.navigations.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Scratch directories instances were launched into.
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.counters.dirs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn Automation>> {
        if self.broken.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Launch("mock launcher is broken".to_string()));
        }
        let counters = &self.counters;
        counters.launches.fetch_add(1, Ordering::SeqCst);
        let live = counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(live, Ordering::SeqCst);
        counters.dirs.lock().unwrap_or_else(PoisonError::into_inner).push(spec.user_data_dir.clone());
        Ok(Box::new(MockAutomation {
            counters: self.counters.clone(),
            resources: self.resources.clone(),
            url: Mutex::new(None),
        }))
    }
}

pub struct MockAutomation {
    counters: Arc<Counters>,
    resources: Arc<HashMap<String, Vec<u8>>>,
    url: Mutex<Option<String>>,
}

#[async_trait]
impl Automation for MockAutomation {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.counters.navigations.lock().unwrap_or_else(PoisonError::into_inner).push(url.to_string());
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        let url = self.url.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(url.map_or(serde_json::Value::Null, serde_json::Value::String))
    }

    async fn fetch_resource(&self, url: &str) -> Result<Vec<u8>> {
        match self.resources.get(url) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::Navigation(format!("{url}: not found"))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockAutomation {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}
