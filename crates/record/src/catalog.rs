//! The live description of a book as fetched from a source.

use serde::{Deserialize, Serialize};

/// Name plus external id (empty when the source has none).
///
/// Record nodes store the identity of the catalog node they were fetched
/// for; a mismatch means the content at that position has changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}
impl Identity {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, String::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub book: BookInfo,
    pub volumes: Vec<VolumeInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Locator of the cover image.
    #[serde(default)]
    pub cover: Option<String>,
    /// Resource id of the cover once it has been cached.
    #[serde(default)]
    pub cover_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub cover_id: Option<String>,
    pub chapters: Vec<ChapterInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub name: String,
    /// Where the chapter's content is fetched from.
    pub locator: String,
}

impl BookInfo {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.name, &self.id)
    }
}
impl VolumeInfo {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.name, &self.id)
    }
}
impl ChapterInfo {
    pub fn identity(&self) -> Identity {
        Identity::named(&self.name)
    }
}

impl Catalog {
    pub fn chapter_count(&self) -> usize {
        self.volumes.iter().map(|v| v.chapters.len()).sum()
    }

    /// Every resource id the catalog itself refers to (covers).
    pub fn cover_ids(&self) -> Vec<String> {
        self.book.cover_id.iter().chain(self.volumes.iter().filter_map(|v| v.cover_id.as_ref())).cloned().collect()
    }
}
