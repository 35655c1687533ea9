//! Catalog/record reconciliation.
//!
//! Walks a freshly fetched catalog and the saved record side by side, by
//! position. Nodes that are new or whose identity changed lose their
//! `loaded` flag (and so does everything above them); everything else keeps
//! whatever state it had. Afterwards the record has exactly the catalog's
//! shape.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::selection::Selection;
use crate::tree::{Position, RecordTree};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Chapters inside the selection.
    pub selected: usize,
    /// Selected chapters that are not loaded and must be fetched.
    pub pending: usize,
}

/// Bring `tree` in line with `catalog`.
///
/// A changed volume identity invalidates the volume's chapters too: their
/// position no longer refers to the same content. Book and volume nodes
/// take the catalog identity as soon as they are reconciled, so a crawl
/// interrupted partway through a volume resumes where it stopped.
pub fn reconcile(catalog: &Catalog, tree: &mut RecordTree, selection: &Selection) -> Result<Reconciliation> {
    let identity = catalog.book.identity();
    let book = tree.node_mut(Position::Book)?;
    if book.identity != identity {
        tracing::debug!(book = %catalog.book.name, "book identity changed");
        book.identity = identity;
        tree.invalidate(Position::Book);
    }
    tree.ensure_volumes(catalog.volumes.len());

    for (v, volume) in catalog.volumes.iter().enumerate() {
        let identity = volume.identity();
        let node = tree.node_mut(Position::Volume(v))?;
        if node.identity != identity {
            tracing::debug!(volume = v, name = %volume.name, "volume identity changed");
            node.identity = identity;
            tree.invalidate_volume(v);
        }
        tree.ensure_chapters(v, volume.chapters.len())?;
        for (c, chapter) in volume.chapters.iter().enumerate() {
            let position = Position::Chapter(v, c);
            if tree.get(position).is_some_and(|node| node.identity != chapter.identity()) {
                tracing::trace!(volume = v, chapter = c, name = %chapter.name, "chapter identity changed");
                tree.invalidate(position);
            }
        }
        tree.truncate_chapters(v, volume.chapters.len())?;
    }
    tree.truncate_volumes(catalog.volumes.len());

    let mut outcome = Reconciliation::default();
    for (position, node) in tree.chapters() {
        let Position::Chapter(v, c) = position else {
            continue;
        };
        if selection.includes_chapter(v, c) {
            outcome.selected += 1;
            if !node.loaded {
                outcome.pending += 1;
            }
        }
    }
    tracing::debug!(selected = outcome.selected, pending = outcome.pending, "record reconciled");
    Ok(outcome)
}
