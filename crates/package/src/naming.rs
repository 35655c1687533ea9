//! Deterministic artifact paths.

use crate::error::{ErrorKind, Result};
use std::path::PathBuf;
use tome_record::{Catalog, Position};

/// Replace characters that are unsafe in file names (`\ / : * ? " < > |`
/// and any whitespace) with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Path of the artifact for `position`, relative to the output root.
///
/// Volume and chapter numbers in the name are 1-based.
pub fn artifact_path(catalog: &Catalog, position: Position, extension: &str) -> Result<PathBuf> {
    let book = sanitize(&catalog.book.name);
    let stem = match position {
        Position::Book => book,
        Position::Volume(v) => {
            let volume = catalog.volumes.get(v).ok_or_else(|| exn::Exn::from(ErrorKind::Record))?;
            format!("{book}_{}_{}", v + 1, sanitize(&volume.name))
        },
        Position::Chapter(v, c) => {
            let volume = catalog.volumes.get(v).ok_or_else(|| exn::Exn::from(ErrorKind::Record))?;
            let chapter = volume.chapters.get(c).ok_or_else(|| exn::Exn::from(ErrorKind::Record))?;
            format!("{book}_{}_{}_{}_{}", v + 1, sanitize(&volume.name), c + 1, sanitize(&chapter.name))
        },
    };
    Ok(PathBuf::from(format!("{stem}.{extension}")))
}
