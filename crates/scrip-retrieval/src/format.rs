//! Plain-text rendering of retrieval results.

use std::fmt::Write;

use scrip_core::predicate::{Predicate, SupportRequirement};
use scrip_core::types::{Record, SearchResult, Statistics, SupportType};

use crate::engine::{RetrievalRequest, RetrievalResponse};

fn join_labels(types: &[SupportType]) -> String {
    types.iter().map(|t| t.label()).collect::<Vec<_>>().join(", ")
}

fn push_block(out: &mut String, label: &str, record: &Record, score: Option<f32>) {
    let meta = &record.metadata;
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{label}");
    let _ = writeln!(out, "  - Region: {} {}", meta.region_major, meta.region_minor);
    let _ = writeln!(out, "  - Supported: {}", meta.supported.labels().join(", "));
    if !meta.unsupported.is_empty() {
        let _ = writeln!(out, "  - Unsupported: {}", meta.unsupported.labels().join(", "));
    }
    if let Some(score) = score {
        let _ = writeln!(out, "  - Similarity: {score:.3}");
    }
    let _ = writeln!(out, "  - Details: {}", meta.detail_link);
    out.push('\n');
}

fn push_exact_blocks(out: &mut String, results: &[SearchResult]) {
    for r in results {
        push_block(out, &format!("{}. {}", r.rank, r.record.metadata.name), &r.record, None);
    }
}

pub fn render_semantic(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results for '{query}'.");
    }
    let mut out = format!("'{query}' search results ({}):\n\n", results.len());
    for r in results {
        let label = format!("Rank {}: {}", r.rank, r.record.metadata.name);
        push_block(&mut out, &label, &r.record, Some(r.score));
    }
    out
}

pub fn render_region(region: &str, support_type: Option<SupportType>, results: &[SearchResult]) -> String {
    if results.is_empty() {
        let condition = match support_type {
            Some(t) => format!("region: {region}, supported: {t}"),
            None => format!("region: {region}"),
        };
        return format!("No results match '{condition}'.");
    }
    let heading = match support_type {
        Some(t) => format!("{region} ({t} supported)"),
        None => region.to_string(),
    };
    let mut out = format!("{heading} programs ({}):\n\n", results.len());
    push_exact_blocks(&mut out, results);
    out
}

pub fn render_support(requirement: &SupportRequirement, results: &[SearchResult]) -> String {
    let supported = join_labels(&requirement.required);
    let excluded = join_labels(&requirement.excluded);
    if results.is_empty() {
        let condition = if excluded.is_empty() {
            format!("supported: {supported}")
        } else {
            format!("supported: {supported}, excluded: {excluded}")
        };
        return format!("No results match '{condition}'.");
    }
    let heading = if excluded.is_empty() {
        format!("{supported} supported")
    } else {
        format!("{supported} supported (excluding {excluded})")
    };
    let mut out = format!("{heading} programs ({}):\n\n", results.len());
    push_exact_blocks(&mut out, results);
    out
}

pub fn render_filter(predicate: &Predicate, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results match filter '{predicate}'.");
    }
    let mut out = format!("Filter results ({}):\n\n", results.len());
    push_exact_blocks(&mut out, results);
    out
}

/// At most `cap` blocks, then a count of what was left out.
pub fn render_listing(results: &[SearchResult], cap: usize) -> String {
    if results.is_empty() {
        return "The catalog is empty.".to_string();
    }
    let mut out = format!("All programs ({}):\n\n", results.len());
    push_exact_blocks(&mut out, &results[..results.len().min(cap)]);
    if results.len() > cap {
        let _ = writeln!(out, "... and {} more", results.len() - cap);
    }
    out
}

pub fn render_statistics(stats: &Statistics) -> String {
    if stats.total_count == 0 {
        return "No statistics: the catalog is empty.".to_string();
    }
    let mut out = String::from("Scrip statistics:\n\n");
    let _ = writeln!(out, "Total programs: {}\n", stats.total_count);
    out.push_str("By region:\n");
    for (region, count) in &stats.region_counts {
        let _ = writeln!(out, "  - {region}: {count}");
    }
    out.push_str("\nBy support type:\n");
    for (support, count) in &stats.support_counts {
        let _ = writeln!(out, "  - {support}: {count}");
    }
    out
}

/// Render whatever `execute` returned for `request`.
///
/// Statistics requests pair with statistics responses and every other mode
/// with results; any other pairing renders as a mismatch notice.
pub fn render(request: &RetrievalRequest, response: &RetrievalResponse, listing_cap: usize) -> String {
    use RetrievalRequest as Req;
    use RetrievalResponse::{Results, Statistics as Stats};

    match (request, response) {
        (Req::Statistics, Stats(stats)) => render_statistics(stats),
        (Req::Semantic { query, .. }, Results(results)) => render_semantic(query, results),
        (Req::Region { region, support_type }, Results(results)) => render_region(region, *support_type, results),
        (Req::SupportType(req), Results(results)) => render_support(req, results),
        (Req::FullListing, Results(results)) => render_listing(results, listing_cap),
        (Req::MetadataFilter(p), Results(results)) => render_filter(p, results),
        (Req::Statistics, Results(_)) => {
            "Unexpected response: statistics were requested but results came back.".to_string()
        }
        (_, Stats(_)) => "Unexpected response: results were requested but statistics came back.".to_string(),
    }
}
