use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Granularity at which artifacts are produced.
///
/// Unknown names are rejected during deserialization, so an invalid mode
/// never makes it past configuration loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageMode {
    /// Crawl and record only.
    None,
    /// One artifact for the whole (selected) book.
    #[default]
    Book,
    /// One artifact per selected volume.
    Volume,
    /// One artifact per selected chapter.
    Chapter,
}

/// Packaging options, persisted alongside each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Keep the record file after a fully-loaded crawl.
    pub keep_record: bool,
    /// Directory artifacts are written to.
    pub output: PathBuf,
    /// Refetch the catalog even when the record already has one.
    pub sync: bool,
    pub mode: PackageMode,
    /// 1-based volume indices; empty selects every volume.
    pub volumes: Vec<usize>,
    /// Per-volume chapter filters; volumes without one keep every chapter.
    pub chapters: Vec<ChapterFilter>,
    pub lang: String,
}
impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            keep_record: false,
            output: PathBuf::from("./"),
            sync: true,
            mode: PackageMode::default(),
            volumes: Vec::new(),
            chapters: Vec::new(),
            lang: "zh".to_string(),
        }
    }
}

/// Restricts a selected volume to some of its chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFilter {
    /// 1-based volume index.
    pub volume: usize,
    /// 1-based chapter indices within that volume.
    pub chapters: Vec<usize>,
}
