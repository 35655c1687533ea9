//! Skip rebuilding artifacts that are already up to date.
//!
//! The hash is taken over the artifact bytes, not the source content, so a
//! nondeterministic builder shows up as "changed" while a deterministic one
//! turns this into a pure content-change check.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::Path;
use tome_record::RecordNode;
use tome_storage::StorageBackend;

/// blake3 of artifact bytes, hex encoded.
pub fn artifact_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub struct BuildGate<'a> {
    storage: &'a dyn StorageBackend,
}

impl<'a> BuildGate<'a> {
    pub fn new(storage: &'a dyn StorageBackend) -> Self {
        Self { storage }
    }

    /// `false` when the node is not loaded (nothing to build yet) or when
    /// the artifact at `path` hashes to the value recorded on the node.
    pub async fn should_build(&self, path: &Path, node: &RecordNode) -> Result<bool> {
        if !node.loaded {
            return Ok(false);
        }
        let Some(recorded) = node.artifact_hash.as_deref() else {
            return Ok(true);
        };
        if !self.storage.exists(path).await.or_raise(|| ErrorKind::Storage)? {
            tracing::debug!(path = %path.display(), "artifact missing; rebuilding");
            return Ok(true);
        }
        let existing = self.storage.read(path).await.or_raise(|| ErrorKind::Storage)?;
        let fresh = artifact_hash(&existing) == recorded;
        if !fresh {
            tracing::debug!(path = %path.display(), "artifact hash differs from record; rebuilding");
        }
        Ok(!fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tome_storage::backend::MockBackend;

    fn built(bytes: &[u8]) -> RecordNode {
        RecordNode {
            loaded: true,
            artifact_hash: Some(artifact_hash(bytes)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_matching_hash_skips() {
        let storage = MockBackend::with_files([("Book.epub", Vec::from(*b"artifact"))]);
        let gate = BuildGate::new(&storage);
        assert!(!gate.should_build(Path::new("Book.epub"), &built(b"artifact")).await.unwrap());
    }

    #[tokio::test]
    async fn test_changed_record_hash_builds() {
        let storage = MockBackend::with_files([("Book.epub", Vec::from(*b"artifact"))]);
        let gate = BuildGate::new(&storage);
        assert!(gate.should_build(Path::new("Book.epub"), &built(b"other")).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_artifact_builds() {
        let storage = MockBackend::with_files([("Book.epub", Vec::from(*b"artifact"))]);
        storage.delete(Path::new("Book.epub")).await.unwrap();
        let gate = BuildGate::new(&storage);
        assert!(gate.should_build(Path::new("Book.epub"), &built(b"artifact")).await.unwrap());
    }

    #[tokio::test]
    async fn test_never_built_builds() {
        let storage = MockBackend::default();
        let node = RecordNode {
            loaded: true,
            ..Default::default()
        };
        assert!(BuildGate::new(&storage).should_build(Path::new("Book.epub"), &node).await.unwrap());
    }

    #[tokio::test]
    async fn test_unloaded_node_never_builds() {
        let storage = MockBackend::default();
        let mut node = built(b"artifact");
        node.loaded = false;
        assert!(!BuildGate::new(&storage).should_build(Path::new("Book.epub"), &node).await.unwrap());
    }
}
