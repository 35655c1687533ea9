//! What an [`ArtifactBuilder`] is asked to turn into a file.

use crate::error::{ErrorKind, Result};
use std::collections::HashSet;
use tome_record::{Catalog, Position, Record, Selection};
use tome_resource::{Bytes, ResourceCache};

/// Container writer, e.g. an EPUB generator.
///
/// Implementations must be deterministic for the build gate to skip
/// unchanged artifacts.
pub trait ArtifactBuilder: Send + Sync {
    /// File extension of produced artifacts, without the dot.
    fn extension(&self) -> &str;

    fn build(&self, manuscript: &Manuscript) -> Result<Vec<u8>>;
}

/// Structured content of one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Manuscript {
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub lang: String,
    /// Resource id of the cover, also present in `assets`.
    pub cover: Option<String>,
    pub sections: Vec<Section>,
    /// Every referenced resource, each once.
    pub assets: Vec<Asset>,
}

/// One volume's worth of chapters.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub description: String,
    /// Resource id of the volume cover.
    pub cover: Option<String>,
    pub chapters: Vec<ChapterText>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterText {
    pub title: String,
    pub paragraphs: Vec<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: String,
    pub data: Bytes,
}

/// Collects assets while a manuscript is assembled, once per id.
struct Assets<'a> {
    resources: &'a ResourceCache,
    seen: HashSet<String>,
    assets: Vec<Asset>,
}
impl Assets<'_> {
    fn add(&mut self, id: &str) -> Result<()> {
        if !self.seen.insert(id.to_string()) {
            return Ok(());
        }
        let data = self.resources.get(id).ok_or_else(|| exn::Exn::from(ErrorKind::MissingResource(id.to_string())))?;
        self.assets.push(Asset { id: id.to_string(), data });
        Ok(())
    }
}

/// Assemble the manuscript for `position` from loaded, selected content.
pub fn assemble(
    source: &str,
    lang: &str,
    record: &Record,
    position: Position,
    resources: &ResourceCache,
    selection: &Selection,
) -> Result<Manuscript> {
    let catalog = record.catalog.as_ref().ok_or_else(|| exn::Exn::from(ErrorKind::NoCatalog))?;
    let mut assets = Assets {
        resources,
        seen: HashSet::new(),
        assets: Vec::new(),
    };
    let book = &catalog.book;
    let (identifier, title, description, cover, volumes): (_, _, _, _, Vec<usize>) = match position {
        Position::Book => (
            format!("{source}_{}", book.id),
            book.name.clone(),
            book.description.clone(),
            book.cover_id.clone(),
            (0..catalog.volumes.len()).collect(),
        ),
        Position::Volume(v) | Position::Chapter(v, _) => {
            let volume = catalog.volumes.get(v).ok_or_else(|| exn::Exn::from(ErrorKind::Record))?;
            let mut identifier = format!("{source}_{}_{}", book.id, volume_key(catalog, v));
            let mut title = format!("{} {}", book.name, volume.name);
            if let Position::Chapter(_, c) = position {
                let chapter = volume.chapters.get(c).ok_or_else(|| exn::Exn::from(ErrorKind::Record))?;
                identifier = format!("{identifier}_{}", c + 1);
                title = format!("{title} {}", chapter.name);
            }
            let cover = volume.cover_id.clone().or_else(|| book.cover_id.clone());
            (identifier, title, volume.description.clone(), cover, vec![v])
        },
    };
    if let Some(cover) = &cover {
        assets.add(cover)?;
    }

    let mut sections = Vec::new();
    for v in volumes {
        let info = &catalog.volumes[v];
        if position == Position::Book && (!selection.includes_volume(v) || !record.tree.is_loaded(Position::Volume(v))) {
            continue;
        }
        let mut chapters = Vec::new();
        for (c, chapter) in info.chapters.iter().enumerate() {
            let wanted = match position {
                Position::Chapter(_, only) => c == only,
                _ => selection.includes_chapter(v, c),
            };
            let Some(node) = record.tree.get(Position::Chapter(v, c)).filter(|node| wanted && node.loaded) else {
                continue;
            };
            let content = node.content.clone().unwrap_or_default();
            for image in &content.resources {
                assets.add(image)?;
            }
            chapters.push(ChapterText {
                title: chapter.name.clone(),
                paragraphs: content.paragraphs,
                images: content.resources,
            });
        }
        if let Some(volume_cover) = &info.cover_id {
            assets.add(volume_cover)?;
        }
        sections.push(Section {
            title: info.name.clone(),
            description: info.description.clone(),
            cover: info.cover_id.clone(),
            chapters,
        });
    }

    Ok(Manuscript {
        identifier,
        title,
        author: book.author.clone(),
        description,
        lang: lang.to_string(),
        cover,
        sections,
        assets: assets.assets,
    })
}

fn volume_key(catalog: &Catalog, volume: usize) -> String {
    match catalog.volumes.get(volume).map(|v| v.id.as_str()) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => (volume + 1).to_string(),
    }
}
