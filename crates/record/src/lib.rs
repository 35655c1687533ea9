//! The resumable crawl record.
//!
//! A [`Catalog`] is what the source says exists right now; a
//! [`RecordTree`] is what has already been fetched and built, aligned with
//! the catalog by position. [`reconcile`] diffs the two and decides what
//! must be fetched again; [`RecordStore`] persists the result.

pub mod catalog;
pub mod error;
mod reconcile;
mod selection;
mod store;
pub mod tree;

pub use crate::catalog::{BookInfo, Catalog, ChapterInfo, Identity, VolumeInfo};
pub use crate::reconcile::{Reconciliation, reconcile};
pub use crate::selection::Selection;
pub use crate::store::{RECORD_EXTENSION, RecordKey, RecordStore};
pub use crate::tree::{ChapterContent, Position, RecordNode, RecordTree};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use tome_config::PackageConfig;

/// Everything known about one crawled item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Packaging options the record was last crawled with.
    pub config: PackageConfig,
    /// Catalog from the last successful fetch.
    pub catalog: Option<Catalog>,
    pub tree: RecordTree,
}

impl Record {
    /// Validate `selection`, reconcile the tree against `catalog` and adopt
    /// it as the current catalog.
    pub fn reconcile(&mut self, catalog: Catalog, selection: &Selection) -> Result<Reconciliation> {
        selection.validate(&catalog)?;
        let outcome = reconcile(&catalog, &mut self.tree, selection)?;
        self.catalog = Some(catalog);
        Ok(outcome)
    }

    /// Names of volumes whose content is fully loaded, in catalog order.
    pub fn loaded_volumes(&self) -> Vec<String> {
        let Some(catalog) = &self.catalog else {
            return Vec::new();
        };
        catalog
            .volumes
            .iter()
            .enumerate()
            .filter(|(v, _)| self.tree.is_loaded(Position::Volume(*v)))
            .map(|(_, volume)| volume.name.clone())
            .collect()
    }

    /// Every resource id still referenced: covers plus each loaded
    /// chapter's image list.
    pub fn retained_resources(&self) -> Vec<Vec<String>> {
        let covers = self.catalog.as_ref().map(Catalog::cover_ids).unwrap_or_default();
        std::iter::once(covers).chain(self.tree.resource_groups()).collect()
    }
}
