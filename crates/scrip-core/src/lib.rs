pub mod config;
pub mod data_processor;
pub mod deadline;
pub mod error;
pub mod predicate;
pub mod traits;
pub mod types;

pub use error::{CatalogLoadError, Error, Result};
pub use types::{Metadata, Record, SearchResult, Statistics, SupportSet, SupportType};
