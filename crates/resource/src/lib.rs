//! Deduplicating resource cache.
//!
//! Chapters reference images through locators that are often
//! session-relative or expiring, so the generated markup refers to stable
//! resource ids instead. The cache owns the bytes (`id -> resource`) and
//! keeps a lookup-only index from locator to id so that a locator seen
//! twice resolves to the same id.
//!
//! A [`ResourceCache::disabled`] cache accepts every call and stores
//! nothing, for catalog lookups whose resources are never packaged.

mod export;

pub use crate::export::{ExportedResource, ResourceExport};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Prefix shared by every resource id.
pub const ID_PREFIX: &str = "res_";

/// Resource bytes as stored at the moment they were looked up.
///
/// Refreshing a resource swaps in a new allocation, so a build holding a
/// `Bytes` keeps a consistent copy.
pub type Bytes = Arc<[u8]>;

#[derive(Debug)]
pub struct ResourceCache {
    index: Option<RwLock<Index>>,
}

#[derive(Debug, Default)]
struct Index {
    by_id: HashMap<String, Entry>,
    by_source: HashMap<String, String>,
}

#[derive(Debug)]
struct Entry {
    source: String,
    data: Bytes,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            index: Some(RwLock::new(Index::default())),
        }
    }

    /// A cache that stores nothing: registration yields no id and lookups
    /// yield no bytes.
    pub fn disabled() -> Self {
        Self { index: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.index.is_some()
    }

    /// Register bytes fetched from `source`.
    ///
    /// The id is derived from the locator alone, so re-registering the same
    /// locator returns the same id. Differing bytes replace what is stored.
    pub fn register(&self, source: &str, data: impl Into<Bytes>) -> Option<String> {
        let mut index = self.write()?;
        if let Some(id) = index.by_source.get(source).cloned() {
            index.refresh(&id, source, data.into());
            return Some(id);
        }
        let digest = blake3::hash(source.as_bytes()).to_hex();
        let id = format!("{ID_PREFIX}{}{}", &digest[..16], extension(source));
        index.by_source.insert(source.to_string(), id.clone());
        index.by_id.insert(
            id.clone(),
            Entry {
                source: source.to_string(),
                data: data.into(),
            },
        );
        tracing::trace!(%id, source, "resource registered");
        Some(id)
    }

    /// Register bytes under a caller-chosen slot (`cover`, `cover_2`).
    ///
    /// The id is `res_{slot}` plus the extension of `source`. A slot always
    /// holds the latest bytes given to it; the locator index only points at
    /// the slot if no other resource already claimed that locator.
    pub fn register_slot(&self, slot: &str, source: &str, data: impl Into<Bytes>) -> Option<String> {
        let mut index = self.write()?;
        let id = format!("{ID_PREFIX}{slot}{}", extension(source));
        let previous = index.by_id.insert(
            id.clone(),
            Entry {
                source: source.to_string(),
                data: data.into(),
            },
        );
        if let Some(previous) = previous
            && previous.source != source
            && index.by_source.get(&previous.source) == Some(&id)
        {
            index.by_source.remove(&previous.source);
        }
        index.by_source.entry(source.to_string()).or_insert_with(|| id.clone());
        Some(id)
    }

    pub fn get(&self, id: &str) -> Option<Bytes> {
        self.read()?.by_id.get(id).map(|entry| Arc::clone(&entry.data))
    }

    /// Id previously assigned to `source`, if any.
    pub fn lookup(&self, source: &str) -> Option<String> {
        self.read()?.by_source.get(source).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().map_or(0, |index| index.by_id.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy every resource out for persistence.
    pub fn export(&self) -> ResourceExport {
        let Some(index) = self.read() else {
            return ResourceExport::new();
        };
        index
            .by_id
            .iter()
            .map(|(id, entry)| (id.clone(), ExportedResource::new(id, &entry.source, &entry.data)))
            .collect()
    }

    /// Replace the whole cache with a previous export.
    pub fn import(&self, resources: ResourceExport) {
        let Some(mut index) = self.write() else {
            return;
        };
        index.by_id.clear();
        index.by_source.clear();
        for (id, resource) in resources {
            index.by_source.entry(resource.source.clone()).or_insert_with(|| id.clone());
            index.by_id.insert(
                id,
                Entry {
                    source: resource.source,
                    data: resource.data.into(),
                },
            );
        }
        tracing::debug!(resources = index.by_id.len(), "resource cache imported");
    }

    /// Drop every resource whose id appears in none of `retained`, then
    /// rebuild the locator index from what is left. Returns how many
    /// resources were removed.
    pub fn compact<G, S>(&self, retained: impl IntoIterator<Item = G>) -> usize
    where
        G: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: HashSet<String> = retained.into_iter().flatten().map(|id| id.as_ref().to_string()).collect();
        let Some(mut index) = self.write() else {
            return 0;
        };
        let before = index.by_id.len();
        index.by_id.retain(|id, _| keep.contains(id));
        let Index { by_id, by_source } = &mut *index;
        by_source.clear();
        for (id, entry) in by_id.iter() {
            by_source.entry(entry.source.clone()).or_insert_with(|| id.clone());
        }
        let removed = before - by_id.len();
        tracing::debug!(removed, kept = by_id.len(), "resource cache compacted");
        removed
    }

    fn read(&self) -> Option<RwLockReadGuard<'_, Index>> {
        self.index.as_ref().map(|lock| lock.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> Option<RwLockWriteGuard<'_, Index>> {
        self.index.as_ref().map(|lock| lock.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    fn refresh(&mut self, id: &str, source: &str, data: Bytes) {
        match self.by_id.get_mut(id) {
            Some(entry) if entry.data != data => {
                tracing::trace!(%id, "resource bytes changed; refreshing");
                entry.data = data;
            },
            Some(_) => {},
            None => {
                self.by_id.insert(
                    id.to_string(),
                    Entry {
                        source: source.to_string(),
                        data,
                    },
                );
            },
        }
    }
}

/// Extension (with the dot) of the last path segment of a locator, ignoring
/// any query string or fragment.
fn extension(source: &str) -> &str {
    let path = source.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    match name.rfind('.') {
        Some(dot) if dot > 0 && name[dot + 1..].chars().all(|c| c.is_ascii_alphanumeric()) && name.len() > dot + 1 => {
            &name[dot..]
        },
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://img.example.com/a/b/pic.jpg", ".jpg")]
    #[case("https://img.example.com/pic.webp?token=abc.def", ".webp")]
    #[case("https://img.example.com/pic.png#frag", ".png")]
    #[case("https://img.example.com/noext", "")]
    #[case("https://img.example.com/dir.v2/file", "")]
    #[case("cover.jpg", ".jpg")]
    #[case(".hidden", "")]
    #[case("trailing.", "")]
    fn test_extension(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(extension(source), expected);
    }

    #[test]
    fn test_same_locator_same_id() {
        let cache = ResourceCache::new();
        let first = cache.register("https://cdn/x/1.jpg", b"abc".as_slice()).unwrap();
        let second = cache.register("https://cdn/x/1.jpg", b"abc".as_slice()).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(ID_PREFIX));
        assert!(first.ends_with(".jpg"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.compact([[first.as_str()]]), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ids_are_stable_across_caches() {
        let a = ResourceCache::new().register("https://cdn/x/1.jpg", b"abc".as_slice());
        let b = ResourceCache::new().register("https://cdn/x/1.jpg", b"other".as_slice());
        assert_eq!(a, b);
    }

    #[test]
    fn test_changed_bytes_refresh_in_place() {
        let cache = ResourceCache::new();
        let id = cache.register("https://cdn/p.png", b"v1".as_slice()).unwrap();
        let snapshot = cache.get(&id).unwrap();
        let again = cache.register("https://cdn/p.png", b"v2".as_slice()).unwrap();
        assert_eq!(id, again);
        assert_eq!(&*cache.get(&id).unwrap(), b"v2");
        // Earlier lookups keep the bytes they saw.
        assert_eq!(&*snapshot, b"v1");
    }

    #[test]
    fn test_slot_registration() {
        let cache = ResourceCache::new();
        let id = cache.register_slot("cover", "https://cdn/c1.jpg", b"one".as_slice()).unwrap();
        assert_eq!(id, "res_cover.jpg");
        assert_eq!(cache.lookup("https://cdn/c1.jpg").as_deref(), Some("res_cover.jpg"));
        // A new cover locator rebinds the slot and forgets the old locator.
        let id = cache.register_slot("cover", "https://cdn/c2.jpg", b"two".as_slice()).unwrap();
        assert_eq!(id, "res_cover.jpg");
        assert_eq!(&*cache.get(&id).unwrap(), b"two");
        assert_eq!(cache.lookup("https://cdn/c1.jpg"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_compact_discards_unreferenced_and_rebuilds_index() {
        let cache = ResourceCache::new();
        let cover = cache.register_slot("cover", "c.jpg", b"c".as_slice()).unwrap();
        let kept = cache.register("https://cdn/1.jpg", b"1".as_slice()).unwrap();
        cache.register("https://cdn/2.jpg", b"2".as_slice()).unwrap();
        let removed = cache.compact(vec![vec![cover.clone()], vec![kept.clone(), kept.clone()]]);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("https://cdn/2.jpg"), None);
        assert_eq!(cache.lookup("https://cdn/1.jpg"), Some(kept));
    }

    #[test]
    fn test_export_import() {
        let cache = ResourceCache::new();
        let id = cache.register("https://cdn/1.gif", b"GIF89a".as_slice()).unwrap();
        let exported = cache.export();
        let restored = ResourceCache::new();
        restored.register("https://cdn/stale.gif", b"old".as_slice());
        restored.import(exported);
        assert_eq!(restored.len(), 1);
        assert_eq!(&*restored.get(&id).unwrap(), b"GIF89a");
        assert_eq!(restored.lookup("https://cdn/1.gif"), Some(id));
    }

    #[test]
    fn test_disabled_cache_is_a_no_op() {
        let cache = ResourceCache::disabled();
        assert!(!cache.is_enabled());
        assert_eq!(cache.register("https://cdn/1.jpg", b"1".as_slice()), None);
        assert_eq!(cache.register_slot("cover", "c.jpg", b"c".as_slice()), None);
        assert_eq!(cache.get("res_cover.jpg"), None);
        assert!(cache.export().is_empty());
        assert_eq!(cache.compact([["res_cover.jpg"]]), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_registration_dedups() {
        let cache = Arc::new(ResourceCache::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    (0..50).map(|n| cache.register(&format!("https://cdn/{}.jpg", (n + worker) % 10), vec![1u8])).collect::<Vec<_>>()
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(Option::is_some));
        assert_eq!(cache.len(), 10);
    }
}
