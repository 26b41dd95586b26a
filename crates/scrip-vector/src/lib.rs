//! Embedding index and persisted catalog store.

pub mod file;
pub mod index;
pub mod store;

pub use index::FlatIndex;
pub use store::{embed_records, Catalog, CatalogStore, DEFAULT_BATCH_SIZE, INDEX_FILE, METADATA_FILE};
