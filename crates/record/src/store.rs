//! Durable record files.
//!
//! One file per crawled item holding the packaging config, the last
//! catalog, the record tree and an export of the resource cache: JSON,
//! gzip-compressed. There is no schema version; a file that does not decode
//! is reported as malformed rather than migrated.

use crate::Record;
use crate::catalog::Catalog;
use crate::error::{ErrorKind, Result};
use crate::reconcile::Reconciliation;
use crate::selection::Selection;
use crate::tree::RecordTree;
use exn::ResultExt;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use tome_config::PackageConfig;
use tome_resource::{ResourceCache, ResourceExport};
use tome_storage::BackendHandle;
use tome_storage::error::ErrorKind as StorageErrorKind;

pub const RECORD_EXTENSION: &str = "tome";

/// Identifies the record of one item from one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub source: String,
    pub id: String,
}
impl RecordKey {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }

    /// File name of the record; anything outside `[A-Za-z0-9_-]` becomes `_`.
    pub fn file_name(&self) -> PathBuf {
        let safe = |s: &str| -> String {
            s.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
        };
        PathBuf::from(format!("{}_{}.{RECORD_EXTENSION}", safe(&self.source), safe(&self.id)))
    }
}
impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.source, self.id)
    }
}

#[derive(Serialize)]
struct RecordFileRef<'a> {
    config: &'a PackageConfig,
    catalog: &'a Option<Catalog>,
    tree: &'a RecordTree,
    resources: ResourceExport,
}

#[derive(Deserialize)]
struct RecordFile {
    config: PackageConfig,
    catalog: Option<Catalog>,
    tree: RecordTree,
    resources: ResourceExport,
}

#[derive(Clone)]
pub struct RecordStore {
    backend: BackendHandle,
}

impl RecordStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    /// Load a record, importing its resources into `resources`.
    ///
    /// A record that was never saved loads as an empty one.
    pub async fn load(&self, key: &RecordKey, resources: &ResourceCache) -> Result<Record> {
        let path = key.file_name();
        let bytes = match self.backend.read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                tracing::debug!(record = %key, "no saved record; starting empty");
                return Ok(Record::default());
            },
            Err(err) => return Err(err.raise(ErrorKind::Storage)),
        };
        let file = decode(&bytes).or_raise(|| ErrorKind::Malformed(key.to_string()))?;
        resources.import(file.resources);
        tracing::debug!(record = %key, bytes = bytes.len(), "record loaded");
        Ok(Record {
            config: file.config,
            catalog: file.catalog,
            tree: file.tree,
        })
    }

    /// Persist a record together with the current resources.
    pub async fn save(&self, key: &RecordKey, record: &Record, resources: &ResourceCache) -> Result<()> {
        let file = RecordFileRef {
            config: &record.config,
            catalog: &record.catalog,
            tree: &record.tree,
            resources: resources.export(),
        };
        let bytes = encode(&file)?;
        self.backend.write_atomic(&key.file_name(), &bytes).await.or_raise(|| ErrorKind::Storage)?;
        tracing::trace!(record = %key, bytes = bytes.len(), "record saved");
        Ok(())
    }

    /// Remove a record file. Removing a record that does not exist is fine.
    pub async fn delete(&self, key: &RecordKey) -> Result<()> {
        match self.backend.delete(&key.file_name()).await {
            Ok(()) => {
                tracing::debug!(record = %key, "record deleted");
                Ok(())
            },
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => Ok(()),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }

    pub async fn exists(&self, key: &RecordKey) -> Result<bool> {
        self.backend.exists(&key.file_name()).await.or_raise(|| ErrorKind::Storage)
    }

    /// Reconcile `record` against `catalog` and persist the outcome before
    /// returning, so the fetch plan survives a crash.
    pub async fn reconcile(
        &self,
        key: &RecordKey,
        record: &mut Record,
        catalog: Catalog,
        selection: &Selection,
        resources: &ResourceCache,
    ) -> Result<Reconciliation> {
        let outcome = record.reconcile(catalog, selection)?;
        self.save(key, record, resources).await?;
        Ok(outcome)
    }
}

fn encode(file: &RecordFileRef<'_>) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(file).or_raise(|| ErrorKind::Encode)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json).or_raise(|| ErrorKind::Encode)?;
    encoder.finish().or_raise(|| ErrorKind::Encode)
}

fn decode(bytes: &[u8]) -> std::result::Result<RecordFile, DecodeError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json).map_err(DecodeError::Gzip)?;
    serde_json::from_slice(&json).map_err(DecodeError::Json)
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
enum DecodeError {
    #[display("not a gzip stream: {_0}")]
    Gzip(std::io::Error),
    #[display("unexpected record layout: {_0}")]
    Json(serde_json::Error),
}
