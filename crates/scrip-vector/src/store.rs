//! Persisted catalog: `metadata.json` + `index.svec` in one directory.
//!
//! Both files are written to temporaries, fsynced, then renamed into place
//! (index first). The index header carries the blake3 digest of the metadata
//! file, so a pair torn by a crash between the two renames is refused at load.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use scrip_core::data_processor::normalize_entry;
use scrip_core::error::{CatalogLoadError, Error, Result};
use scrip_core::traits::Embedder;
use scrip_core::types::{Record, Statistics};

use crate::file;
use crate::index::FlatIndex;

pub const INDEX_FILE: &str = "index.svec";
pub const METADATA_FILE: &str = "metadata.json";
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Ordered records; position `i` joins index row `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    records: Vec<Record>,
}

impl Catalog {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Record> {
        self.records.get(i)
    }

    pub fn get_all(&self) -> &[Record] {
        &self.records
    }

    /// Full scan; not cached.
    pub fn statistics(&self) -> Statistics {
        Statistics::from_records(&self.records)
    }
}

pub struct CatalogStore {
    dir: PathBuf,
    batch_size: usize,
}

impl CatalogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn load(&self) -> Result<(Catalog, FlatIndex)> {
        let index_path = self.index_path();
        let metadata_path = self.metadata_path();
        match (index_path.exists(), metadata_path.exists()) {
            (false, false) => return Err(CatalogLoadError::NotFound(self.dir.clone()).into()),
            (true, false) => return Err(self.incomplete(METADATA_FILE)),
            (false, true) => return Err(self.incomplete(INDEX_FILE)),
            (true, true) => {}
        }

        let meta_bytes = fs::read(&metadata_path).map_err(|e| corrupt(&metadata_path, e))?;
        let records = parse_metadata(&meta_bytes).map_err(|reason| corrupt(&metadata_path, reason))?;

        let index_bytes = fs::read(&index_path).map_err(|e| corrupt(&index_path, e))?;
        let (header, index) = file::decode(&index_bytes).map_err(|reason| corrupt(&index_path, reason))?;

        if header.metadata_digest != *blake3::hash(&meta_bytes).as_bytes() {
            return Err(self.inconsistent("metadata file does not match the index it was built with"));
        }
        if index.len() != records.len() {
            return Err(self.inconsistent(&format!("{} vectors for {} records", index.len(), records.len())));
        }

        let built_at = Utc.timestamp_millis_opt(header.built_at_ms).single().map(|t| t.to_rfc3339()).unwrap_or_default();
        info!(dir = %self.dir.display(), records = records.len(), dim = index.dim(), %built_at, "catalog loaded");
        Ok((Catalog::new(records), index))
    }

    /// Embed every record, build a fresh index and persist both files.
    pub fn rebuild(&self, records: Vec<Record>, embedder: &dyn Embedder) -> Result<(Catalog, FlatIndex)> {
        info!(dir = %self.dir.display(), records = records.len(), embedder = embedder.id(), "rebuilding catalog");
        let index = embed_records(&records, embedder, self.batch_size)?;
        let catalog = Catalog::new(records);
        self.persist(&catalog, &index)?;
        Ok((catalog, index))
    }

    /// Add documents: the whole catalog is re-embedded and rewritten.
    pub fn append(&self, current: &Catalog, more: Vec<Record>, embedder: &dyn Embedder) -> Result<(Catalog, FlatIndex)> {
        let mut records = current.get_all().to_vec();
        records.extend(more);
        self.rebuild(records, embedder)
    }

    fn persist(&self, catalog: &Catalog, index: &FlatIndex) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let meta_bytes = serde_json::to_vec_pretty(catalog.get_all())?;
        let digest = *blake3::hash(&meta_bytes).as_bytes();
        let index_bytes = file::encode(index, Utc::now().timestamp_millis(), digest)
            .map_err(|reason| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, reason)))?;

        let index_tmp = self.write_temp(&index_bytes)?;
        let meta_tmp = self.write_temp(&meta_bytes)?;
        index_tmp.persist(self.index_path()).map_err(|e| e.error)?;
        meta_tmp.persist(self.metadata_path()).map_err(|e| e.error)?;
        sync_dir(&self.dir)?;
        info!(dir = %self.dir.display(), records = catalog.len(), "catalog persisted");
        Ok(())
    }

    fn write_temp(&self, bytes: &[u8]) -> Result<NamedTempFile> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    fn incomplete(&self, missing: &str) -> Error {
        CatalogLoadError::Incomplete { dir: self.dir.clone(), missing: missing.to_string() }.into()
    }

    fn inconsistent(&self, reason: &str) -> Error {
        CatalogLoadError::Inconsistent { dir: self.dir.clone(), reason: reason.to_string() }.into()
    }
}

/// Embed each record's `content` in batches of `batch_size`.
pub fn embed_records(records: &[Record], embedder: &dyn Embedder, batch_size: usize) -> Result<FlatIndex> {
    let mut vectors = Vec::with_capacity(records.len());
    for (batch_no, batch) in records.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|r| r.content.clone()).collect();
        let embs = embedder
            .embed_batch(&texts)
            .map_err(|e| Error::EmbeddingUnavailable(format!("{e:#}")))?;
        if embs.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedder returned {} vectors for {} texts",
                embs.len(),
                texts.len()
            )));
        }
        debug!(batch = batch_no, size = texts.len(), "embedded batch");
        vectors.extend(embs);
    }
    FlatIndex::from_vectors(vectors)
}

fn corrupt(path: &Path, reason: impl ToString) -> Error {
    CatalogLoadError::Corrupt { path: path.to_path_buf(), reason: reason.to_string() }.into()
}

fn parse_metadata(bytes: &[u8]) -> std::result::Result<Vec<Record>, String> {
    let entries = match serde_json::from_slice::<Value>(bytes).map_err(|e| e.to_string())? {
        Value::Array(entries) => entries,
        other => return Err(format!("expected a JSON array, got {}", kind(&other))),
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| normalize_entry(entry).map_err(|e| format!("entry {i}: {e}")))
        .collect()
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<()> {
    fs::File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<()> {
    Ok(())
}
