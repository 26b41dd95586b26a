//! String-in, string-out operations for a conversational caller.
//!
//! Every failure is turned into a message; nothing here returns `Err`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use scrip_core::deadline::Deadline;
use scrip_core::error::Result;
use scrip_core::predicate::{FilterValue, Predicate, SupportRequirement};
use scrip_core::types::SupportType;

use crate::engine::RetrievalEngine;
use crate::format;

pub struct ToolSurface {
    engine: Arc<RetrievalEngine>,
}

impl ToolSurface {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<RetrievalEngine> {
        &self.engine
    }

    fn deadline(&self) -> Deadline {
        match self.engine.settings().timeout_ms {
            Some(ms) => Deadline::after(Duration::from_millis(ms)),
            None => Deadline::none(),
        }
    }

    pub fn semantic_search(&self, query: &str, k: Option<usize>) -> String {
        let k = k.unwrap_or(self.engine.settings().default_k);
        let out = self.engine.semantic_search(query, k, None, &self.deadline());
        respond("search", out, |results| format::render_semantic(query, &results))
    }

    pub fn region_search(&self, region: &str, support_type: Option<&str>) -> String {
        let support_type = match support_type.map(str::parse::<SupportType>).transpose() {
            Ok(t) => t,
            Err(e) => return format!("An error occurred during region search: {e}"),
        };
        let out = self.engine.region_search(region, support_type, &self.deadline());
        respond("region search", out, |results| format::render_region(region, support_type, &results))
    }

    pub fn support_type_search(&self, support_types: &[&str], exclude_types: &[&str]) -> String {
        let parsed = parse_types(support_types).and_then(|req| Ok((req, parse_types(exclude_types)?)));
        let requirement = match parsed {
            Ok((required, excluded)) => SupportRequirement::new(required, excluded),
            Err(e) => return format!("An error occurred during support type search: {e}"),
        };
        let out = self.engine.support_type_search(&requirement, &self.deadline());
        respond("support type search", out, |results| format::render_support(&requirement, &results))
    }

    pub fn all_data(&self) -> String {
        format::render_listing(&self.engine.all_data(), self.engine.settings().listing_cap)
    }

    pub fn statistics(&self) -> String {
        format::render_statistics(&self.engine.statistics())
    }

    pub fn metadata_filter(&self, filters: BTreeMap<String, FilterValue>) -> String {
        let predicate = Predicate::from_filters(filters);
        let out = self.engine.metadata_filter(&predicate, &self.deadline());
        respond("filtering", out, |results| format::render_filter(&predicate, &results))
    }

    /// Same as [`Self::metadata_filter`] but takes the filters as a JSON object.
    pub fn metadata_filter_json(&self, filters: &str) -> String {
        let predicate = serde_json::from_str::<serde_json::Value>(filters)
            .map_err(scrip_core::Error::from)
            .and_then(|v| Predicate::from_json(&v));
        match predicate {
            Ok(p) => {
                let out = self.engine.metadata_filter(&p, &self.deadline());
                respond("filtering", out, |results| format::render_filter(&p, &results))
            }
            Err(e) => format!("An error occurred during filtering: {e}"),
        }
    }
}

fn parse_types(tokens: &[&str]) -> std::result::Result<Vec<SupportType>, String> {
    tokens.iter().map(|t| t.parse::<SupportType>()).collect()
}

fn respond<T, F>(what: &str, out: Result<T>, render: F) -> String
where
    F: FnOnce(T) -> String,
{
    match out {
        Ok(v) => render(v),
        Err(e) => {
            warn!(error = %e, "{what} failed");
            format!("An error occurred during {what}: {e}")
        }
    }
}
