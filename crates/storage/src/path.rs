//! Path validation.
//!
//! Record files and artifacts are addressed by paths relative to a backend
//! root. Anything that could land outside that root is rejected here.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a relative storage path, refusing anything that escapes the
/// backend root.
///
/// `.` segments, repeated separators and a leading `/` are dropped; `..`
/// is resolved lexically and fails once it would climb above the root.
/// Null bytes and Windows drive prefixes are rejected, as is a path that
/// normalizes to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tome_storage::validate_path;
///
/// assert!(validate_path("records/bilinovel_42.tome").is_ok());
/// assert!(validate_path("../outside.epub").is_err());
/// assert_eq!(
///     validate_path("./books//draft/../Novel.epub").unwrap(),
///     Path::new("books/Novel.epub")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let reject = || exn::Exn::from(ErrorKind::InvalidPath(original.to_path_buf()));

    let mut kept = Vec::new();
    for component in original.components() {
        match component {
            // Null bytes survive `components()` on Unix but truncate paths in syscalls.
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => return Err(reject()),
            Component::Normal(part) => kept.push(part),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(reject()),
            Component::ParentDir => {
                kept.pop().ok_or_else(reject)?;
            },
        }
    }
    if kept.is_empty() {
        return Err(reject());
    }
    Ok(kept.into_iter().collect())
}
