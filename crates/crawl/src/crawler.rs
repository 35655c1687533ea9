//! The download pipeline for one book.
//!
//! Load the saved record, fetch (or reuse) the catalog, reconcile and save
//! before anything else is fetched, then walk the selected volumes in
//! catalog order. Chapters of a volume are fetched in parallel through a
//! [`WorkerPool`]; each one is written into the record and saved as soon as
//! it arrives, and artifacts are built as soon as the node they cover is
//! complete.

use crate::error::{ErrorKind, Result, session_error};
use crate::source::{Source, cache_covers};
use async_trait::async_trait;
use exn::ResultExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tome_config::{PackageConfig, SessionConfig};
use tome_limit::Progress;
use tome_package::{ArtifactBuilder, BuiltArtifact, Packager};
use tome_record::{Catalog, ChapterContent, Position, Record, RecordKey, RecordStore, Selection};
use tome_resource::ResourceCache;
use tome_session::{Job, Pool, RetryPolicy, SessionHandle, WorkerPool};
use tome_storage::BackendHandle;
use tracing::instrument;

/// What a finished download did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Chapters fetched from the source during this run.
    pub fetched: usize,
    pub built: Vec<BuiltArtifact>,
    /// The record file was removed because everything is loaded.
    pub record_deleted: bool,
}

pub struct Crawler {
    source: Arc<dyn Source>,
    pool: Pool,
    store: RecordStore,
    packager: Packager,
    package: PackageConfig,
    session: SessionConfig,
}

impl Crawler {
    pub fn new(
        source: Arc<dyn Source>,
        pool: Pool,
        records: BackendHandle,
        output: BackendHandle,
        builder: Arc<dyn ArtifactBuilder>,
        package: PackageConfig,
        session: SessionConfig,
    ) -> Self {
        let packager = Packager::new(output, builder, source.name(), package.mode, &package.lang);
        Self {
            source,
            pool,
            store: RecordStore::new(records),
            packager,
            package,
            session,
        }
    }

    pub fn key(&self, id: &str) -> RecordKey {
        RecordKey::new(self.source.name(), id)
    }

    /// Crawl `id`, resuming from whatever the saved record already holds.
    ///
    /// `progress` gets the selected chapter count as its total and moves
    /// once per selected chapter; a failure is recorded on it as well as
    /// returned.
    #[instrument(skip(self, selection, progress), fields(source = %self.source.name()))]
    pub async fn download(&self, id: &str, selection: &Selection, progress: &Progress) -> Result<DownloadSummary> {
        let result = self.crawl(id, selection, progress).await;
        match &result {
            Ok(summary) => tracing::info!(fetched = summary.fetched, built = summary.built.len(), "download finished"),
            Err(err) => {
                tracing::error!(error = %err, "download failed");
                progress.fail(err);
            },
        }
        result
    }

    async fn crawl(&self, id: &str, selection: &Selection, progress: &Progress) -> Result<DownloadSummary> {
        let key = self.key(id);
        let resources = Arc::new(ResourceCache::new());
        let mut record = self.store.load(&key, &resources).await.or_raise(|| ErrorKind::Record)?;
        let catalog = match record.catalog.clone() {
            Some(catalog) if !self.package.sync => {
                tracing::debug!(record = %key, "reusing saved catalog");
                catalog
            },
            _ => self.fetch_catalog(id, &resources).await?,
        };
        record.config = self.package.clone();
        let plan = self
            .store
            .reconcile(&key, &mut record, catalog, selection, &resources)
            .await
            .or_raise(|| ErrorKind::Record)?;
        progress.set_total(i64::try_from(plan.selected).unwrap_or(i64::MAX));
        progress.advance((plan.selected - plan.pending) as u64);
        tracing::info!(record = %key, selected = plan.selected, pending = plan.pending, "crawl planned");

        let workers = WorkerPool::new(&self.pool, self.pool.concurrency());
        let mut run = Run {
            key: &key,
            record: &mut record,
            resources: &resources,
            selection,
            progress,
            summary: DownloadSummary::default(),
        };
        let walked = self.walk(&mut run, &workers).await;
        if walked.is_err() {
            workers.cancel();
        }
        workers.shutdown().await;
        walked?;

        let Run { mut summary, .. } = run;
        let removed = resources.compact(record.retained_resources());
        if removed > 0 {
            tracing::debug!(removed, "unreferenced resources dropped");
        }
        self.store.save(&key, &record, &resources).await.or_raise(|| ErrorKind::Record)?;
        if record.tree.is_fully_loaded() && !self.package.keep_record {
            self.store.delete(&key).await.or_raise(|| ErrorKind::Record)?;
            summary.record_deleted = true;
        }
        Ok(summary)
    }

    async fn fetch_catalog(&self, id: &str, resources: &ResourceCache) -> Result<Catalog> {
        let source = &self.source;
        self.pool
            .run(RetryPolicy::recovering(&self.session), |session| async move {
                let mut catalog = source.fetch_catalog(&session, id, resources).await?;
                cache_covers(&session, &mut catalog, resources).await?;
                Ok(catalog)
            })
            .await
            .map_err(session_error)
    }

    /// Fetch and package every selected volume in catalog order, then the
    /// book.
    async fn walk(&self, run: &mut Run<'_>, workers: &WorkerPool) -> Result<()> {
        let catalog = Arc::new(run.record.catalog.clone().ok_or_else(|| exn::Exn::from(ErrorKind::Record))?);
        for (v, volume) in catalog.volumes.iter().enumerate() {
            if !run.selection.includes_volume(v) {
                continue;
            }
            self.fetch_volume(run, workers, &catalog, v).await?;
            for c in 0..volume.chapters.len() {
                self.package(run, Position::Chapter(v, c)).await?;
            }
            let complete = (0..volume.chapters.len())
                .filter(|&c| run.selection.includes_chapter(v, c))
                .all(|c| run.record.tree.is_loaded(Position::Chapter(v, c)));
            if complete {
                run.record
                    .tree
                    .mark_loaded(Position::Volume(v), volume.identity())
                    .or_raise(|| ErrorKind::Record)?;
                run.save(&self.store).await?;
                self.package(run, Position::Volume(v)).await?;
            }
        }

        let complete = (0..catalog.volumes.len())
            .filter(|&v| run.selection.includes_volume(v))
            .all(|v| run.record.tree.is_loaded(Position::Volume(v)));
        if complete {
            run.record
                .tree
                .mark_loaded(Position::Book, catalog.book.identity())
                .or_raise(|| ErrorKind::Record)?;
            run.save(&self.store).await?;
            self.package(run, Position::Book).await?;
        }
        Ok(())
    }

    async fn fetch_volume(&self, run: &mut Run<'_>, workers: &WorkerPool, catalog: &Arc<Catalog>, v: usize) -> Result<()> {
        let volume = &catalog.volumes[v];
        let pending: Vec<usize> = (0..volume.chapters.len())
            .filter(|&c| run.selection.includes_chapter(v, c) && !run.record.tree.is_loaded(Position::Chapter(v, c)))
            .collect();
        if pending.is_empty() {
            tracing::debug!(volume = %volume.name, "volume already loaded");
            return Ok(());
        }
        tracing::debug!(volume = %volume.name, chapters = pending.len(), "fetching volume");

        let (results, mut arrivals) = mpsc::unbounded_channel();
        for &chapter in &pending {
            let job = ChapterJob {
                source: self.source.clone(),
                catalog: catalog.clone(),
                resources: run.resources.clone(),
                volume: v,
                chapter,
                results: results.clone(),
            };
            workers.submit(job).await;
        }
        drop(results);

        while let Some(Fetched { chapter, content }) = arrivals.recv().await {
            let content = content.map_err(session_error)?;
            let identity = volume.chapters[chapter].identity();
            run.record.tree.store_chapter(v, chapter, identity, content).or_raise(|| ErrorKind::Record)?;
            run.save(&self.store).await?;
            run.progress.advance(1);
            run.summary.fetched += 1;
            tracing::debug!(volume = v, chapter, "chapter stored");
            self.package(run, Position::Chapter(v, chapter)).await?;
        }
        Ok(())
    }

    /// Build the artifact for `position` if the packager wants one, saving
    /// the record when a new artifact hash was stored.
    async fn package(&self, run: &mut Run<'_>, position: Position) -> Result<()> {
        if !self.packager.applies_to(position) {
            return Ok(());
        }
        let built = self
            .packager
            .package(position, run.record, run.resources, run.selection)
            .await
            .or_raise(|| ErrorKind::Package)?;
        if let Some(artifact) = built {
            run.summary.built.push(artifact);
            run.save(&self.store).await?;
        }
        Ok(())
    }
}

/// State threaded through one crawl.
struct Run<'a> {
    key: &'a RecordKey,
    record: &'a mut Record,
    resources: &'a Arc<ResourceCache>,
    selection: &'a Selection,
    progress: &'a Progress,
    summary: DownloadSummary,
}

impl Run<'_> {
    async fn save(&self, store: &RecordStore) -> Result<()> {
        store.save(self.key, &*self.record, self.resources).await.or_raise(|| ErrorKind::Record)
    }
}

struct Fetched {
    chapter: usize,
    content: tome_session::error::Result<ChapterContent>,
}

struct ChapterJob {
    source: Arc<dyn Source>,
    catalog: Arc<Catalog>,
    resources: Arc<ResourceCache>,
    volume: usize,
    chapter: usize,
    results: mpsc::UnboundedSender<Fetched>,
}

impl ChapterJob {
    fn deliver(&self, content: tome_session::error::Result<ChapterContent>) {
        let fetched = Fetched {
            chapter: self.chapter,
            content,
        };
        if self.results.send(fetched).is_err() {
            tracing::trace!(volume = self.volume, chapter = self.chapter, "crawl stopped waiting for chapter");
        }
    }
}

#[async_trait]
impl Job for ChapterJob {
    async fn run(&mut self, session: SessionHandle) -> tome_session::error::Result<()> {
        let content = self
            .source
            .fetch_chapter(&session, &self.catalog, self.volume, self.chapter, &self.resources)
            .await?;
        self.deliver(Ok(content));
        Ok(())
    }

    async fn abandon(self: Box<Self>, reason: tome_session::error::Error) {
        self.deliver(Err(reason));
    }
}
