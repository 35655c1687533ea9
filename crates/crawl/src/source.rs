//! Sites to crawl and the registry they are looked up in.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tome_record::{Catalog, ChapterContent};
use tome_resource::ResourceCache;
use tome_session::SessionHandle;

/// One search hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
}

/// Site-specific scraping.
///
/// Implementations drive the given session and report page trouble as
/// retryable session errors ([`Navigation`], [`Structure`]); the pool
/// decides whether to try again.
///
/// [`Navigation`]: tome_session::error::ErrorKind::Navigation
/// [`Structure`]: tome_session::error::ErrorKind::Structure
#[async_trait]
pub trait Source: Send + Sync {
    /// Registry key, also the first part of record file names.
    fn name(&self) -> &str;

    /// Fetch the book's catalog. Cover locators go in `cover`; the crawler
    /// caches them.
    async fn fetch_catalog(
        &self,
        session: &SessionHandle,
        id: &str,
        resources: &ResourceCache,
    ) -> tome_session::error::Result<Catalog>;

    /// Fetch one chapter (0-based indices into `catalog`). Images should be
    /// registered in `resources` and referenced by id in the content.
    async fn fetch_chapter(
        &self,
        session: &SessionHandle,
        catalog: &Catalog,
        volume: usize,
        chapter: usize,
        resources: &ResourceCache,
    ) -> tome_session::error::Result<ChapterContent>;

    async fn search(&self, session: &SessionHandle, query: &str) -> tome_session::error::Result<Vec<SearchResult>>;
}

/// Fetch `locator` through the session and register it, returning the
/// resource id. A disabled cache skips the fetch entirely.
pub async fn cache_resource(
    session: &SessionHandle,
    resources: &ResourceCache,
    locator: &str,
) -> tome_session::error::Result<Option<String>> {
    if !resources.is_enabled() {
        return Ok(None);
    }
    let data = session.fetch_resource(locator).await?;
    Ok(resources.register(locator, data))
}

/// Cache the book cover under the `cover` slot and volume covers under
/// `cover_{n}` (1-based), recording the ids on the catalog.
pub(crate) async fn cache_covers(
    session: &SessionHandle,
    catalog: &mut Catalog,
    resources: &ResourceCache,
) -> tome_session::error::Result<()> {
    if !resources.is_enabled() {
        return Ok(());
    }
    if let Some(cover) = catalog.book.cover.as_deref() {
        let data = session.fetch_resource(cover).await?;
        catalog.book.cover_id = resources.register_slot("cover", cover, data);
    }
    for (v, volume) in catalog.volumes.iter_mut().enumerate() {
        if let Some(cover) = volume.cover.as_deref() {
            let data = session.fetch_resource(cover).await?;
            volume.cover_id = resources.register_slot(&format!("cover_{}", v + 1), cover, data);
        }
    }
    Ok(())
}

/// Sources by name. Built once at startup and passed to whoever needs it.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: impl Source + 'static) -> Result<()> {
        self.register_arc(Arc::new(source))
    }

    pub fn register_arc(&mut self, source: Arc<dyn Source>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            exn::bail!(ErrorKind::DuplicateSource(name));
        }
        tracing::debug!(source = %name, "source registered");
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Source>> {
        self.sources.get(name).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSource(name.to_string())))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Source for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch_catalog(
            &self,
            _session: &SessionHandle,
            id: &str,
            _resources: &ResourceCache,
        ) -> tome_session::error::Result<Catalog> {
            exn::bail!(tome_session::error::ErrorKind::Structure(format!("no catalog for {id}")))
        }

        async fn fetch_chapter(
            &self,
            _session: &SessionHandle,
            _catalog: &Catalog,
            _volume: usize,
            _chapter: usize,
            _resources: &ResourceCache,
        ) -> tome_session::error::Result<ChapterContent> {
            Ok(ChapterContent::default())
        }

        async fn search(&self, _session: &SessionHandle, _query: &str) -> tome_session::error::Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_registry() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());
        registry.register(Named("wenku")).unwrap();
        registry.register(Named("bili")).unwrap();
        assert_eq!(registry.names(), vec!["bili".to_string(), "wenku".to_string()]);
        assert_eq!(registry.get("bili").unwrap().name(), "bili");

        let err = registry.register(Named("bili")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateSource(name) if name == "bili"));
        let err = registry.get("nope").err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnknownSource(name) if name == "nope"));
        assert_eq!(registry.len(), 2);
    }
}
