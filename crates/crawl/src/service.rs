//! Request-level entry points over the crawl pipeline.

use crate::crawler::Crawler;
use crate::error::{ErrorKind, Result, limit_error, session_error};
use crate::source::{SearchResult, Source, SourceRegistry};
use exn::ResultExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tome_config::{Config, LIMIT_CACHE, LIMIT_DOWNLOAD, LIMIT_INFO, LIMIT_SEARCH};
use tome_limit::{Limiter, Progress};
use tome_package::{Artifact, ArtifactBuilder, Packager};
use tome_record::{Catalog, Position, RecordKey, RecordStore, Selection};
use tome_resource::ResourceCache;
use tome_session::{Launcher, Pool, RetryPolicy};
use tome_storage::BackendHandle;
use tome_storage::backend::LocalBackend;
use tracing::instrument;

/// Shared front door for catalog lookups, searches, background caching and
/// in-memory extraction, each throttled by its own limiter category.
///
/// Background crawls are keyed by `{source}_{id}`; at most one runs per key
/// and its [`Progress`] stays readable through [`progress`](Self::progress)
/// after it finishes.
pub struct Service {
    registry: Arc<SourceRegistry>,
    pool: Pool,
    limiter: Limiter,
    records: BackendHandle,
    output: BackendHandle,
    builder: Arc<dyn ArtifactBuilder>,
    config: Config,
    tasks: TaskTracker,
    running: Arc<Mutex<HashSet<String>>>,
    progress: Mutex<BTreeMap<String, Arc<Progress>>>,
}

impl Service {
    pub fn new(
        registry: SourceRegistry,
        pool: Pool,
        records: BackendHandle,
        output: BackendHandle,
        builder: Arc<dyn ArtifactBuilder>,
        config: Config,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            pool,
            limiter: Limiter::new(config.limits.clone()),
            records,
            output,
            builder,
            config,
            tasks: TaskTracker::new(),
            running: Arc::default(),
            progress: Mutex::default(),
        }
    }

    /// Build the pool and local storage described by `config`.
    pub fn from_config(
        registry: SourceRegistry,
        launcher: Arc<dyn Launcher>,
        builder: Arc<dyn ArtifactBuilder>,
        config: Config,
        token: &CancellationToken,
    ) -> Result<Self> {
        let pool = Pool::new(launcher, &config.session, token).map_err(session_error)?;
        let record_dir = std::path::absolute(&config.record_dir).or_raise(|| ErrorKind::Storage)?;
        let output_dir = std::path::absolute(&config.package.output).or_raise(|| ErrorKind::Storage)?;
        let records: BackendHandle = Arc::new(LocalBackend::new("records", record_dir).or_raise(|| ErrorKind::Storage)?);
        let output: BackendHandle = Arc::new(LocalBackend::new("output", output_dir).or_raise(|| ErrorKind::Storage)?);
        Ok(Self::new(registry, pool, records, output, builder, config))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn crawler(&self, source: &str) -> Result<Crawler> {
        Ok(Crawler::new(
            self.registry.get(source)?,
            self.pool.clone(),
            self.records.clone(),
            self.output.clone(),
            self.builder.clone(),
            self.config.package.clone(),
            self.config.session.clone(),
        ))
    }

    /// Fetch the catalog of `id` without touching the record or caching any
    /// resources.
    #[instrument(skip(self))]
    pub async fn info(&self, source: &str, id: &str) -> Result<Catalog> {
        let source = self.registry.get(source)?;
        let _slot = self.limiter.acquire(LIMIT_INFO, self.pool.token()).await.map_err(limit_error)?;
        let source = source.as_ref();
        let resources = &ResourceCache::disabled();
        self.pool
            .run(RetryPolicy::deadline(&self.config.session), |session| async move {
                source.fetch_catalog(&session, id, resources).await
            })
            .await
            .map_err(session_error)
    }

    #[instrument(skip(self))]
    pub async fn search(&self, source: &str, query: &str) -> Result<Vec<SearchResult>> {
        let source = self.registry.get(source)?;
        let _slot = self.limiter.acquire(LIMIT_SEARCH, self.pool.token()).await.map_err(limit_error)?;
        let source = source.as_ref();
        self.pool
            .run(RetryPolicy::deadline(&self.config.session), |session| async move {
                source.search(&session, query).await
            })
            .await
            .map_err(session_error)
    }

    /// Start a background crawl of `id` and return its progress.
    ///
    /// Fails with [`AlreadyCaching`](ErrorKind::AlreadyCaching) while an
    /// earlier crawl of the same item is still running.
    pub fn cache(&self, source: &str, id: &str, selection: Selection) -> Result<Arc<Progress>> {
        let crawler = self.crawler(source)?;
        let key = crawler.key(id).to_string();
        if !lock(&self.running).insert(key.clone()) {
            exn::bail!(ErrorKind::AlreadyCaching(key));
        }
        let progress = Arc::new(Progress::indeterminate());
        lock(&self.progress).insert(key.clone(), progress.clone());

        let limiter = self.limiter.clone();
        let token = self.pool.token().clone();
        let running = self.running.clone();
        let id = id.to_string();
        let tracked = progress.clone();
        self.tasks.spawn(async move {
            match limiter.acquire(LIMIT_CACHE, &token).await {
                Ok(_slot) => {
                    if let Ok(summary) = crawler.download(&id, &selection, &tracked).await {
                        tracing::debug!(record = %key, fetched = summary.fetched, "cache finished");
                    }
                },
                Err(err) => {
                    tracing::warn!(record = %key, error = %err, "cache never started");
                    tracked.fail(&err);
                },
            }
            lock(&running).remove(&key);
        });
        Ok(progress)
    }

    /// Rendered progress of every crawl started through [`cache`](Self::cache).
    pub fn progress(&self) -> BTreeMap<String, String> {
        lock(&self.progress).iter().map(|(key, progress)| (key.clone(), progress.to_string())).collect()
    }

    /// Crawls currently running.
    pub fn running(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.running).iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Wait for every background crawl started so far.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Names of the volumes the saved record holds in full.
    pub async fn loaded_volumes(&self, source: &str, id: &str) -> Result<Vec<String>> {
        let source = self.registry.get(source)?;
        let key = RecordKey::new(source.name(), id);
        let record = RecordStore::new(self.records.clone())
            .load(&key, &ResourceCache::disabled())
            .await
            .or_raise(|| ErrorKind::Record)?;
        Ok(record.loaded_volumes())
    }

    /// Build a book-level artifact for the given 1-based volumes from the
    /// saved record, without fetching anything or writing to storage.
    #[instrument(skip(self))]
    pub async fn extract(&self, source: &str, id: &str, volumes: &[usize]) -> Result<Artifact> {
        let source = self.registry.get(source)?;
        let _slot = self.limiter.acquire(LIMIT_DOWNLOAD, self.pool.token()).await.map_err(limit_error)?;
        let key = RecordKey::new(source.name(), id);
        let resources = ResourceCache::new();
        let record = RecordStore::new(self.records.clone())
            .load(&key, &resources)
            .await
            .or_raise(|| ErrorKind::Record)?;
        let Some(catalog) = record.catalog.as_ref().filter(|_| record.tree.is_loaded(Position::Book)) else {
            exn::bail!(ErrorKind::NotLoaded(key.to_string()));
        };
        let selection = Selection::volumes(volumes.iter().copied());
        selection.validate(catalog).or_raise(|| ErrorKind::Record)?;
        if let Some(volume) = (0..catalog.volumes.len())
            .find(|&v| selection.includes_volume(v) && !record.tree.is_loaded(Position::Volume(v)))
        {
            exn::bail!(ErrorKind::NotLoaded(format!("{key} volume {}", volume + 1)));
        }
        let packager = self.packager(source.as_ref());
        packager.extract(&record, &resources, &selection).or_raise(|| ErrorKind::Package)
    }

    /// Cancel background crawls, wait for them to stop and close the pool.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.pool.shutdown().await;
        self.tasks.wait().await;
        tracing::debug!("service stopped");
    }

    fn packager(&self, source: &dyn Source) -> Packager {
        let package = &self.config.package;
        Packager::new(self.output.clone(), self.builder.clone(), source.name(), package.mode, &package.lang)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
