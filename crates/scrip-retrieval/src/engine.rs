//! Dual-mode retrieval over one catalog snapshot.
//!
//! Readers clone the current `Arc<Snapshot>` and run without holding any
//! lock. `rebuild`/`append` are serialized by the writer mutex and publish a
//! fresh snapshot when done; queries already running keep the old one.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use scrip_core::config::SearchSettings;
use scrip_core::deadline::Deadline;
use scrip_core::error::{Error, Result};
use scrip_core::predicate::{FilterValue, Predicate, SupportRequirement};
use scrip_core::traits::Embedder;
use scrip_core::types::{Metadata, Record, SearchResult, Statistics, SupportType};
use scrip_vector::{embed_records, Catalog, CatalogStore, FlatIndex, DEFAULT_BATCH_SIZE};

/// Records checked between two deadline checks in full scans.
const SCAN_STRIDE: usize = 1024;

/// A catalog and the index built from it, row `i` for record `i`.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub catalog: Catalog,
    pub index: FlatIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalRequest {
    Semantic { query: String, k: Option<usize>, filter: Option<Predicate> },
    Region { region: String, support_type: Option<SupportType> },
    SupportType(SupportRequirement),
    FullListing,
    Statistics,
    MetadataFilter(Predicate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResponse {
    Results(Vec<SearchResult>),
    Statistics(Statistics),
}

pub struct RetrievalEngine {
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    embedder: Arc<dyn Embedder>,
    settings: SearchSettings,
    store: Option<CatalogStore>,
    batch_size: usize,
}

impl RetrievalEngine {
    /// In-memory engine; `store` is where rebuilds are persisted, if anywhere.
    ///
    /// Rebuilds embed in the store's batch size, or [`DEFAULT_BATCH_SIZE`]
    /// without a store.
    pub fn new(
        catalog: Catalog,
        index: FlatIndex,
        embedder: Arc<dyn Embedder>,
        settings: SearchSettings,
        store: Option<CatalogStore>,
    ) -> Self {
        let batch_size = store.as_ref().map_or(DEFAULT_BATCH_SIZE, CatalogStore::batch_size);
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot { catalog, index })),
            writer: Mutex::new(()),
            embedder,
            settings,
            store,
            batch_size,
        }
    }

    /// Batch size for in-memory rebuilds and appends.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load a persisted catalog. Load failures are fatal to the caller.
    pub fn open(store: CatalogStore, embedder: Arc<dyn Embedder>, settings: SearchSettings) -> Result<Self> {
        let (catalog, index) = store.load()?;
        if !index.is_empty() && index.dim() != embedder.dim() {
            return Err(Error::DimensionMismatch { expected: index.dim(), got: embedder.dim() });
        }
        Ok(Self::new(catalog, index, embedder, settings, Some(store)))
    }

    /// Embed `records` in batches of `batch_size` and serve them without
    /// touching disk.
    pub fn from_records(
        records: Vec<Record>,
        embedder: Arc<dyn Embedder>,
        settings: SearchSettings,
        batch_size: usize,
    ) -> Result<Self> {
        let index = embed_records(&records, embedder.as_ref(), batch_size)?;
        Ok(Self::new(Catalog::new(records), index, embedder, settings, None).with_batch_size(batch_size))
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.snapshot().catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank records by cosine similarity to `query`.
    ///
    /// With a non-empty `filter` the index is over-fetched by
    /// `oversample_factor` and only matching records are kept, so fewer than
    /// `k` results may come back; non-matches are never used as padding.
    pub fn semantic_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Predicate>,
        deadline: &Deadline,
    ) -> Result<Vec<SearchResult>> {
        deadline.check()?;
        let snap = self.snapshot();
        if k == 0 || snap.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).map_err(|e| Error::EmbeddingUnavailable(format!("{e:#}")))?;
        deadline.check()?;

        let filter = filter.filter(|p| !p.is_empty());
        let fetch = match filter {
            Some(_) => k.saturating_mul(self.settings.oversample_factor).min(snap.index.len()),
            None => k,
        };
        let hits = snap.index.query_with_deadline(&vector, fetch, deadline)?;
        let fetched = hits.len();

        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|(row, score)| snap.catalog.get(row).map(|r| (r, score)))
            .filter(|(r, _)| filter.map_or(true, |p| p.matches(&r.metadata)))
            .take(k)
            .enumerate()
            .map(|(i, (record, score))| SearchResult { rank: i + 1, score, record: record.clone() })
            .collect();
        debug!(query, k, fetched, returned = results.len(), filtered = filter.is_some(), "semantic search");
        Ok(results)
    }

    /// Records whose major region contains `region`, optionally restricted to
    /// one support type.
    pub fn region_search(
        &self,
        region: &str,
        support_type: Option<SupportType>,
        deadline: &Deadline,
    ) -> Result<Vec<SearchResult>> {
        let mut predicate = Predicate::new().with("region_major", FilterValue::text(region));
        if let Some(t) = support_type {
            predicate = predicate.with("supported", FilterValue::text(t.label()));
        }
        self.scan(deadline, |meta| predicate.matches(meta))
    }

    pub fn support_type_search(&self, requirement: &SupportRequirement, deadline: &Deadline) -> Result<Vec<SearchResult>> {
        self.scan(deadline, |meta| requirement.matches(meta))
    }

    pub fn metadata_filter(&self, predicate: &Predicate, deadline: &Deadline) -> Result<Vec<SearchResult>> {
        self.scan(deadline, |meta| predicate.matches(meta))
    }

    /// Every record in catalog order. Never truncated here.
    pub fn all_data(&self) -> Vec<SearchResult> {
        let snap = self.snapshot();
        snap.catalog.get_all().iter().enumerate().map(|(i, r)| exact_hit(i + 1, r)).collect()
    }

    pub fn statistics(&self) -> Statistics {
        self.snapshot().catalog.statistics()
    }

    pub fn execute(&self, request: &RetrievalRequest, deadline: &Deadline) -> Result<RetrievalResponse> {
        let results = match request {
            RetrievalRequest::Semantic { query, k, filter } => {
                self.semantic_search(query, k.unwrap_or(self.settings.default_k), filter.as_ref(), deadline)?
            }
            RetrievalRequest::Region { region, support_type } => self.region_search(region, *support_type, deadline)?,
            RetrievalRequest::SupportType(req) => self.support_type_search(req, deadline)?,
            RetrievalRequest::FullListing => self.all_data(),
            RetrievalRequest::Statistics => return Ok(RetrievalResponse::Statistics(self.statistics())),
            RetrievalRequest::MetadataFilter(p) => self.metadata_filter(p, deadline)?,
        };
        Ok(RetrievalResponse::Results(results))
    }

    /// Replace the whole catalog with `records`.
    pub fn rebuild(&self, records: Vec<Record>) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let (catalog, index) = match &self.store {
            Some(store) => store.rebuild(records, self.embedder.as_ref())?,
            None => {
                let index = embed_records(&records, self.embedder.as_ref(), self.batch_size)?;
                (Catalog::new(records), index)
            }
        };
        self.publish(catalog, index);
        Ok(())
    }

    /// Add records after the current ones; the catalog is re-embedded whole.
    pub fn append(&self, more: Vec<Record>) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let (catalog, index) = match &self.store {
            Some(store) => store.append(&current.catalog, more, self.embedder.as_ref())?,
            None => {
                let mut records = current.catalog.get_all().to_vec();
                records.extend(more);
                let index = embed_records(&records, self.embedder.as_ref(), self.batch_size)?;
                (Catalog::new(records), index)
            }
        };
        self.publish(catalog, index);
        Ok(())
    }

    fn publish(&self, catalog: Catalog, index: FlatIndex) {
        let records = catalog.len();
        let next = Arc::new(Snapshot { catalog, index });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!(records, "published catalog snapshot");
    }

    fn scan<F>(&self, deadline: &Deadline, keep: F) -> Result<Vec<SearchResult>>
    where
        F: Fn(&Metadata) -> bool,
    {
        let snap = self.snapshot();
        let mut out = Vec::new();
        for (i, record) in snap.catalog.get_all().iter().enumerate() {
            if i % SCAN_STRIDE == 0 {
                deadline.check()?;
            }
            if keep(&record.metadata) {
                out.push(exact_hit(out.len() + 1, record));
            }
        }
        Ok(out)
    }
}

fn exact_hit(rank: usize, record: &Record) -> SearchResult {
    SearchResult { rank, score: 1.0, record: record.clone() }
}
