//! Record nodes addressed by position.
//!
//! The record mirrors the catalog by index, not by id. All access goes
//! through a [`Position`], and every structural change (growing,
//! truncating, invalidating) is a bounds-checked method here rather than
//! ad hoc slice surgery at the call site.

use crate::catalog::Identity;
use crate::error::{ErrorKind, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Address of a node within one book's record, 0-based.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Position {
    #[display("book")]
    Book,
    #[display("volume {_0}")]
    Volume(usize),
    #[display("chapter {_0}.{_1}")]
    Chapter(usize, usize),
}
impl Position {
    /// The containing node, or `None` for the book.
    pub fn parent(self) -> Option<Position> {
        match self {
            Self::Book => None,
            Self::Volume(_) => Some(Self::Book),
            Self::Chapter(v, _) => Some(Self::Volume(v)),
        }
    }
}

/// Extracted text of a chapter and the resources it references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub paragraphs: Vec<String>,
    /// Resource ids, in the order they appear.
    pub resources: Vec<String>,
}
impl ChapterContent {
    /// blake3 over the paragraphs, newline separated.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (n, paragraph) in self.paragraphs.iter().enumerate() {
            if n > 0 {
                hasher.update(b"\n");
            }
            hasher.update(paragraph.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Fetch and build state of one book, volume or chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordNode {
    pub loaded: bool,
    /// Identity of the catalog node this state was produced for.
    pub identity: Identity,
    /// Hash of the fetched content (chapters only).
    pub content_hash: Option<String>,
    /// Hash of the artifact last built for this node.
    pub artifact_hash: Option<String>,
    /// Fetched content (chapters only).
    pub content: Option<ChapterContent>,
}
impl RecordNode {
    /// Forget that this node is loaded or built.
    fn invalidate(&mut self) {
        self.loaded = false;
        self.artifact_hash = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct VolumeSlot {
    node: RecordNode,
    chapters: Vec<RecordNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTree {
    book: RecordNode,
    volumes: Vec<VolumeSlot>,
}

impl RecordTree {
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn chapter_count(&self, volume: usize) -> Option<usize> {
        self.volumes.get(volume).map(|slot| slot.chapters.len())
    }

    pub fn get(&self, position: Position) -> Option<&RecordNode> {
        match position {
            Position::Book => Some(&self.book),
            Position::Volume(v) => self.volumes.get(v).map(|slot| &slot.node),
            Position::Chapter(v, c) => self.volumes.get(v).and_then(|slot| slot.chapters.get(c)),
        }
    }

    pub fn get_mut(&mut self, position: Position) -> Option<&mut RecordNode> {
        match position {
            Position::Book => Some(&mut self.book),
            Position::Volume(v) => self.volumes.get_mut(v).map(|slot| &mut slot.node),
            Position::Chapter(v, c) => self.volumes.get_mut(v).and_then(|slot| slot.chapters.get_mut(c)),
        }
    }

    /// Like [`get`](Self::get) but an error for a missing node.
    pub fn node(&self, position: Position) -> Result<&RecordNode> {
        self.get(position).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchNode(position)))
    }

    pub fn node_mut(&mut self, position: Position) -> Result<&mut RecordNode> {
        self.get_mut(position).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchNode(position)))
    }

    pub fn is_loaded(&self, position: Position) -> bool {
        self.get(position).is_some_and(|node| node.loaded)
    }

    /// Mark a node and every ancestor up to the book as not loaded.
    pub fn invalidate(&mut self, position: Position) {
        let mut cursor = Some(position);
        while let Some(at) = cursor {
            if let Some(node) = self.get_mut(at) {
                node.invalidate();
            }
            cursor = at.parent();
        }
    }

    /// Invalidate a volume, all of its chapters, and the book.
    pub fn invalidate_volume(&mut self, volume: usize) {
        if let Some(slot) = self.volumes.get_mut(volume) {
            slot.chapters.iter_mut().for_each(RecordNode::invalidate);
        }
        self.invalidate(Position::Volume(volume));
    }

    /// Grow to at least `count` volumes. Returns `true` if anything was
    /// added, in which case the book is invalidated.
    pub fn ensure_volumes(&mut self, count: usize) -> bool {
        if self.volumes.len() >= count {
            return false;
        }
        self.volumes.resize_with(count, VolumeSlot::default);
        self.invalidate(Position::Book);
        true
    }

    /// Grow a volume to at least `count` chapters, invalidating its
    /// ancestors when anything was added.
    pub fn ensure_chapters(&mut self, volume: usize, count: usize) -> Result<bool> {
        let slot = self.volumes.get_mut(volume).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchNode(Position::Volume(volume))))?;
        if slot.chapters.len() >= count {
            return Ok(false);
        }
        slot.chapters.resize_with(count, RecordNode::default);
        self.invalidate(Position::Volume(volume));
        Ok(true)
    }

    /// Drop volumes past `count`. Returns `true` if any were removed, in
    /// which case the book is invalidated.
    pub fn truncate_volumes(&mut self, count: usize) -> bool {
        if self.volumes.len() <= count {
            return false;
        }
        self.volumes.truncate(count);
        self.invalidate(Position::Book);
        true
    }

    /// Drop chapters past `count` in a volume, invalidating its ancestors
    /// when any were removed.
    pub fn truncate_chapters(&mut self, volume: usize, count: usize) -> Result<bool> {
        let slot = self.volumes.get_mut(volume).ok_or_else(|| exn::Exn::from(ErrorKind::NoSuchNode(Position::Volume(volume))))?;
        if slot.chapters.len() <= count {
            return Ok(false);
        }
        slot.chapters.truncate(count);
        self.invalidate(Position::Volume(volume));
        Ok(true)
    }

    /// Store freshly fetched chapter content and mark the chapter loaded.
    ///
    /// Artifacts built for the containing volume and book no longer cover
    /// this content, so their hashes are dropped.
    pub fn store_chapter(&mut self, volume: usize, chapter: usize, identity: Identity, content: ChapterContent) -> Result<()> {
        let node = self.node_mut(Position::Chapter(volume, chapter))?;
        node.content_hash = Some(content.hash());
        node.content = Some(content);
        node.identity = identity;
        node.loaded = true;
        self.volumes[volume].node.artifact_hash = None;
        self.book.artifact_hash = None;
        Ok(())
    }

    /// Mark a volume or the book loaded under `identity`.
    pub fn mark_loaded(&mut self, position: Position, identity: Identity) -> Result<()> {
        let node = self.node_mut(position)?;
        node.identity = identity;
        node.loaded = true;
        Ok(())
    }

    /// `true` when every chapter of every volume has been fetched.
    pub fn is_fully_loaded(&self) -> bool {
        self.book.loaded
            && self.volumes.iter().all(|slot| slot.node.loaded && slot.chapters.iter().all(|c| c.loaded))
    }

    /// Positions of every chapter node, in order.
    pub fn chapters(&self) -> impl Iterator<Item = (Position, &RecordNode)> + '_ {
        self.volumes.iter().enumerate().flat_map(|(v, slot)| {
            slot.chapters.iter().enumerate().map(move |(c, node)| (Position::Chapter(v, c), node))
        })
    }

    /// Resource ids referenced by loaded chapters, one group per chapter.
    pub fn resource_groups(&self) -> Vec<Vec<String>> {
        self.chapters()
            .filter(|(_, node)| node.loaded)
            .filter_map(|(_, node)| node.content.as_ref().map(|content| content.resources.clone()))
            .collect()
    }
}
