//! Resumable crawling of book, volume and chapter trees.
//!
//! A [`Source`] knows how to scrape one site through a leased session. The
//! [`Crawler`] drives it for a single book: it reconciles the fresh catalog
//! against the saved record, fetches only what is missing or changed, saves
//! after every chapter, and packages whatever became complete. [`Service`]
//! puts per-category limits and per-item progress in front of that.

mod crawler;
pub mod error;
mod service;
mod source;

pub use crate::crawler::{Crawler, DownloadSummary};
pub use crate::service::Service;
pub use crate::source::{SearchResult, Source, SourceRegistry, cache_resource};
