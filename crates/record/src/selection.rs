//! Which volumes and chapters a crawl or build covers.

use crate::catalog::Catalog;
use crate::error::{ErrorKind, Result};
use std::collections::{BTreeMap, BTreeSet};
use tome_config::PackageConfig;

/// Volume/chapter filter using the 1-based indices users type.
///
/// An empty selection covers everything; a volume without a chapter
/// filter covers all of its chapters.
///
/// # Examples
///
/// ```
/// use tome_record::Selection;
///
/// let selection = Selection::volumes([2]).with_chapters(3, [1, 4]);
/// // Lookups take 0-based positions.
/// assert!(selection.includes_chapter(1, 7));
/// assert!(selection.includes_chapter(2, 3));
/// assert!(!selection.includes_chapter(2, 1));
/// assert!(!selection.includes_volume(0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    volumes: BTreeMap<usize, BTreeSet<usize>>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn volumes(volumes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            volumes: volumes.into_iter().map(|v| (v, BTreeSet::new())).collect(),
        }
    }

    /// Restrict `volume` to `chapters` (adding the volume if needed).
    pub fn with_chapters(mut self, volume: usize, chapters: impl IntoIterator<Item = usize>) -> Self {
        self.volumes.entry(volume).or_default().extend(chapters);
        self
    }

    pub fn from_config(config: &PackageConfig) -> Self {
        config
            .chapters
            .iter()
            .fold(Self::volumes(config.volumes.iter().copied()), |selection, filter| {
                selection.with_chapters(filter.volume, filter.chapters.iter().copied())
            })
    }

    pub fn is_all(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Reject indices the catalog does not have. Runs before any fetch.
    pub fn validate(&self, catalog: &Catalog) -> Result<()> {
        for (&volume, chapters) in &self.volumes {
            let Some(info) = volume.checked_sub(1).and_then(|v| catalog.volumes.get(v)) else {
                exn::bail!(ErrorKind::SelectionOutOfRange(format!(
                    "volume {volume} (catalog has {})",
                    catalog.volumes.len()
                )));
            };
            if let Some(&chapter) = chapters.iter().find(|&&c| c == 0 || c > info.chapters.len()) {
                exn::bail!(ErrorKind::SelectionOutOfRange(format!(
                    "chapter {chapter} of volume {volume} (volume has {})",
                    info.chapters.len()
                )));
            }
        }
        Ok(())
    }

    /// 0-based volume index.
    pub fn includes_volume(&self, volume: usize) -> bool {
        self.is_all() || self.volumes.contains_key(&(volume + 1))
    }

    /// 0-based volume and chapter indices.
    pub fn includes_chapter(&self, volume: usize, chapter: usize) -> bool {
        if self.is_all() {
            return true;
        }
        self.volumes.get(&(volume + 1)).is_some_and(|chapters| chapters.is_empty() || chapters.contains(&(chapter + 1)))
    }

    /// `true` when no chapter of `volume` is filtered out.
    pub fn covers_whole_volume(&self, volume: usize) -> bool {
        self.is_all() || self.volumes.get(&(volume + 1)).is_some_and(BTreeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ChapterInfo, VolumeInfo};
    use rstest::rstest;
    use tome_config::ChapterFilter;

    fn catalog(shape: &[usize]) -> Catalog {
        Catalog {
            volumes: shape
                .iter()
                .map(|&n| VolumeInfo {
                    chapters: vec![ChapterInfo::default(); n],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_selects_everything() {
        let selection = Selection::all();
        assert!(selection.includes_volume(9));
        assert!(selection.includes_chapter(9, 9));
        assert!(selection.covers_whole_volume(0));
        assert!(selection.validate(&catalog(&[])).is_ok());
    }

    #[rstest]
    #[case(Selection::volumes([1, 2]), true)]
    #[case(Selection::volumes([3]), false)]
    #[case(Selection::volumes([0]), false)]
    #[case(Selection::volumes([2]).with_chapters(2, [2]), true)]
    #[case(Selection::volumes([2]).with_chapters(2, [3]), false)]
    #[case(Selection::all().with_chapters(1, [0]), false)]
    fn test_validate(#[case] selection: Selection, #[case] valid: bool) {
        let result = selection.validate(&catalog(&[3, 2]));
        assert_eq!(result.is_ok(), valid);
        if let Err(err) = result {
            assert!(matches!(&*err, ErrorKind::SelectionOutOfRange(_)));
        }
    }

    #[test]
    fn test_from_config() {
        let config = PackageConfig {
            volumes: vec![1],
            chapters: vec![ChapterFilter { volume: 2, chapters: vec![2] }],
            ..Default::default()
        };
        let selection = Selection::from_config(&config);
        assert!(selection.covers_whole_volume(0));
        assert!(!selection.covers_whole_volume(1));
        assert!(selection.includes_chapter(1, 1));
        assert!(!selection.includes_chapter(1, 0));
        assert!(!selection.includes_volume(2));
    }
}
