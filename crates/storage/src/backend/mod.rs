//! Storage backend trait and implementations.
//!
//! Everything the pipeline persists (record files, packaged artifacts) goes
//! through [`StorageBackend`], so the crawl never touches the filesystem
//! directly and tests can swap in an in-memory backend.

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Unified interface for storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tome_storage::{backend::StorageBackend, error::Result};
///
/// async fn artifact_size(backend: &dyn StorageBackend) -> Result<usize> {
///     let path = Path::new("Novel_1_Volume.epub");
///     if backend.exists(path).await? {
///         Ok(backend.read(path).await?.len())
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating parent directories as needed and
    /// overwriting any existing file.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Rename a file within the same backend, overwriting the destination.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// file does not exist.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Replace a file's contents so that readers observe either the old or
    /// the new bytes, never a partial write.
    ///
    /// The default implementation writes a sibling `.partial` file and
    /// renames it over the target.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let staging = partial_path(path);
        self.write(&staging, data).await?;
        self.rename(&staging, path).await
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_is_sibling() {
        assert_eq!(partial_path(Path::new("records/a.tome")), Path::new("records/a.tome.partial"));
        assert_eq!(partial_path(Path::new("Novel.epub")), Path::new("Novel.epub.partial"));
    }
}
