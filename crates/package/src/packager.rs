use crate::error::{ErrorKind, Result};
use crate::gate::{BuildGate, artifact_hash};
use crate::manuscript::{ArtifactBuilder, assemble};
use crate::naming::artifact_path;
use exn::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;
use tome_config::PackageMode;
use tome_record::{Position, Record, Selection};
use tome_resource::ResourceCache;
use tome_storage::BackendHandle;
use tracing::instrument;

/// An artifact written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub position: Position,
    pub path: PathBuf,
    pub hash: String,
}

/// An artifact built in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: PathBuf,
    pub bytes: Vec<u8>,
}

/// Builds artifacts for record nodes at the configured granularity,
/// consulting the [`BuildGate`] first.
#[derive(Clone)]
pub struct Packager {
    storage: BackendHandle,
    builder: Arc<dyn ArtifactBuilder>,
    source: String,
    mode: PackageMode,
    lang: String,
}

impl Packager {
    pub fn new(
        storage: BackendHandle,
        builder: Arc<dyn ArtifactBuilder>,
        source: impl Into<String>,
        mode: PackageMode,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            builder,
            source: source.into(),
            mode,
            lang: lang.into(),
        }
    }

    /// Whether the packaging mode produces artifacts for nodes like `position`.
    pub fn applies_to(&self, position: Position) -> bool {
        matches!(
            (self.mode, position),
            (PackageMode::Book, Position::Book)
                | (PackageMode::Volume, Position::Volume(_))
                | (PackageMode::Chapter, Position::Chapter(..))
        )
    }

    /// Build the artifact for `position` if the mode, the selection and the
    /// build gate all allow it, recording the new artifact hash on the node.
    #[instrument(skip_all, fields(source = %self.source, %position))]
    pub async fn package(
        &self,
        position: Position,
        record: &mut Record,
        resources: &ResourceCache,
        selection: &Selection,
    ) -> Result<Option<BuiltArtifact>> {
        if !self.applies_to(position) || excluded(position, selection) {
            return Ok(None);
        }
        let catalog = record.catalog.as_ref().ok_or_else(|| exn::Exn::from(ErrorKind::NoCatalog))?;
        let path = artifact_path(catalog, position, self.builder.extension())?;
        let node = record.tree.node(position).or_raise(|| ErrorKind::Record)?;
        if !BuildGate::new(&*self.storage).should_build(&path, node).await? {
            tracing::trace!(path = %path.display(), "artifact up to date");
            return Ok(None);
        }

        let manuscript = assemble(&self.source, &self.lang, record, position, resources, selection)?;
        let bytes = self.builder.build(&manuscript)?;
        self.storage.write_atomic(&path, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        let hash = artifact_hash(&bytes);
        record.tree.node_mut(position).or_raise(|| ErrorKind::Record)?.artifact_hash = Some(hash.clone());
        tracing::info!(path = %path.display(), bytes = bytes.len(), "artifact built");
        Ok(Some(BuiltArtifact { position, path, hash }))
    }

    /// Build a book-level artifact from `record` in memory, bypassing the
    /// gate and storage.
    pub fn extract(&self, record: &Record, resources: &ResourceCache, selection: &Selection) -> Result<Artifact> {
        let catalog = record.catalog.as_ref().ok_or_else(|| exn::Exn::from(ErrorKind::NoCatalog))?;
        let name = artifact_path(catalog, Position::Book, self.builder.extension())?;
        let manuscript = assemble(&self.source, &self.lang, record, Position::Book, resources, selection)?;
        let bytes = self.builder.build(&manuscript)?;
        Ok(Artifact { name, bytes })
    }
}

fn excluded(position: Position, selection: &Selection) -> bool {
    match position {
        Position::Book => false,
        Position::Volume(v) => !selection.includes_volume(v),
        Position::Chapter(v, c) => !selection.includes_chapter(v, c),
    }
}
