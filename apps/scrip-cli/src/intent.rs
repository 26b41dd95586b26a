//! Keyword intent extraction for free-text questions.
//!
//! Maps a Korean question to one structured [`RetrievalRequest`] by plain
//! substring checks. Anything it cannot place falls through to semantic search.

use scrip_core::predicate::{FilterValue, Predicate, SupportRequirement};
use scrip_core::types::SupportType;
use scrip_retrieval::RetrievalRequest;

const LISTING_WORDS: &[&str] = &["모든", "전체"];
const STATISTICS_WORDS: &[&str] = &["통계", "현황", "얼마나"];
const EXCLUSION_WORDS: &[&str] = &["제외", "빼고", "말고", "안 되", "안되", "불가"];

/// Metropolitan and provincial names as stored in `region_major`.
const REGIONS: &[&str] = &[
    "서울", "부산", "대구", "인천", "광주", "대전", "울산", "세종", "경기", "강원", "충북", "충남", "전북", "전남",
    "경북", "경남", "제주",
];

/// Colloquial province names covering two stored regions.
const PROVINCES: &[(&str, [&str; 2])] = &[
    ("경상도", ["경북", "경남"]),
    ("충청도", ["충북", "충남"]),
    ("전라도", ["전북", "전남"]),
];

const SUPPORT_WORDS: &[(&str, SupportType)] = &[
    ("모바일", SupportType::Mobile),
    ("카드", SupportType::Card),
    ("지류", SupportType::Paper),
];

fn mentions(query: &str, words: &[&str]) -> bool {
    words.iter().any(|w| query.contains(w))
}

/// Support types named in `query`, split into wanted and excluded.
///
/// A type counts as excluded when an exclusion word follows it before the
/// next support keyword, so "모바일은 되고 카드는 빼고" wants mobile only.
fn support_mentions(query: &str) -> (Vec<SupportType>, Vec<SupportType>) {
    let mut found: Vec<(usize, usize, SupportType)> = SUPPORT_WORDS
        .iter()
        .filter_map(|(word, t)| query.find(word).map(|at| (at, at + word.len(), *t)))
        .collect();
    found.sort_by_key(|(at, _, _)| *at);

    let mut wanted = Vec::new();
    let mut excluded = Vec::new();
    for (i, (_, end, t)) in found.iter().enumerate() {
        let stop = found.get(i + 1).map_or(query.len(), |next| next.0);
        if mentions(&query[*end..stop], EXCLUSION_WORDS) {
            excluded.push(*t);
        } else {
            wanted.push(*t);
        }
    }
    (wanted, excluded)
}

pub fn extract(query: &str) -> RetrievalRequest {
    let query = query.trim();
    let semantic = || RetrievalRequest::Semantic { query: query.to_string(), k: None, filter: None };

    if mentions(query, LISTING_WORDS) {
        return if mentions(query, STATISTICS_WORDS) { RetrievalRequest::Statistics } else { RetrievalRequest::FullListing };
    }

    let (wanted, excluded) = support_mentions(query);

    if let Some((_, regions)) = PROVINCES.iter().find(|(name, _)| query.contains(name)) {
        let mut predicate = Predicate::new().with("region_major", FilterValue::set(regions.iter().copied()));
        if let Some(t) = wanted.first() {
            predicate = predicate.with("supported", FilterValue::text(t.label()));
        }
        return RetrievalRequest::MetadataFilter(predicate);
    }

    if let Some(region) = REGIONS.iter().find(|r| query.contains(*r)) {
        return RetrievalRequest::Region { region: region.to_string(), support_type: wanted.first().copied() };
    }

    if !wanted.is_empty() {
        return RetrievalRequest::SupportType(SupportRequirement::new(wanted, excluded));
    }
    if !excluded.is_empty() {
        return semantic();
    }

    if mentions(query, STATISTICS_WORDS) {
        return RetrievalRequest::Statistics;
    }
    semantic()
}
