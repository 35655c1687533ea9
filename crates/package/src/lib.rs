//! Turning crawl records into artifacts.
//!
//! [`Packager`] decides which nodes get an artifact (by [`PackageMode`] and
//! selection), names it deterministically, asks the [`BuildGate`] whether
//! the file on disk is already current, and hands a [`Manuscript`] to the
//! configured [`ArtifactBuilder`].
//!
//! [`PackageMode`]: tome_config::PackageMode

pub mod error;
mod gate;
mod manuscript;
mod naming;
mod packager;

pub use crate::gate::{BuildGate, artifact_hash};
pub use crate::manuscript::{ArtifactBuilder, Asset, ChapterText, Manuscript, Section, assemble};
pub use crate::naming::{artifact_path, sanitize};
pub use crate::packager::{Artifact, BuiltArtifact, Packager};
