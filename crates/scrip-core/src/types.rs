//! Domain types shared by the index, the catalog store and the retrieval engine.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How a scrip program's value can be spent.
///
/// The Korean label is the canonical form on disk and in rendered output;
/// `FromStr` additionally accepts the English aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SupportType {
    Mobile,
    Card,
    Paper,
}

impl SupportType {
    pub const ALL: [SupportType; 3] = [SupportType::Mobile, SupportType::Card, SupportType::Paper];

    pub fn label(self) -> &'static str {
        match self {
            SupportType::Mobile => "모바일",
            SupportType::Card => "카드형",
            SupportType::Paper => "지류형",
        }
    }
}

impl fmt::Display for SupportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SupportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "모바일" => return Ok(SupportType::Mobile),
            "카드형" => return Ok(SupportType::Card),
            "지류형" => return Ok(SupportType::Paper),
            _ => {}
        }
        match s.to_ascii_lowercase().as_str() {
            "mobile" => Ok(SupportType::Mobile),
            "card" => Ok(SupportType::Card),
            "paper" => Ok(SupportType::Paper),
            _ => Err(format!("unknown support type '{s}'")),
        }
    }
}

impl Serialize for SupportType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for SupportType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Ordered set of support types: duplicates collapse, first-seen order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportSet(Vec<SupportType>);

impl SupportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, t: SupportType) -> bool {
        if self.0.contains(&t) {
            return false;
        }
        self.0.push(t);
        true
    }

    pub fn contains(&self, t: SupportType) -> bool {
        self.0.contains(&t)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SupportType> + '_ {
        self.0.iter().copied()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.iter().map(SupportType::label).collect()
    }
}

impl FromIterator<SupportType> for SupportSet {
    fn from_iter<I: IntoIterator<Item = SupportType>>(iter: I) -> Self {
        let mut set = SupportSet::new();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

impl Serialize for SupportSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for t in &self.0 {
            seq.serialize_element(t.label())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SupportSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older exports store a comma separated string instead of a list.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Joined(String),
            List(Vec<String>),
        }

        let tokens = match Option::<Raw>::deserialize(deserializer)? {
            None => Vec::new(),
            Some(Raw::List(items)) => items,
            Some(Raw::Joined(s)) => s.split(',').map(str::to_string).collect(),
        };
        let mut set = SupportSet::new();
        for token in tokens {
            if token.trim().is_empty() {
                continue;
            }
            set.insert(token.parse().map_err(de::Error::custom)?);
        }
        Ok(set)
    }
}

/// Structured attributes of one scrip program.
///
/// Known keys accept both the English names and the Korean keys used by the
/// source data. Absent or null keys default to empty. Anything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, alias = "이름", deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, alias = "지역1", deserialize_with = "null_as_empty")]
    pub region_major: String,
    #[serde(default, alias = "지역2", deserialize_with = "null_as_empty")]
    pub region_minor: String,
    #[serde(default, alias = "지원방식")]
    pub supported: SupportSet,
    #[serde(default, alias = "비지원방식")]
    pub unsupported: SupportSet,
    #[serde(default, alias = "링크", deserialize_with = "null_as_empty")]
    pub detail_link: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// One catalog entry: free text for embedding plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub content: String,
    pub metadata: Metadata,
}

impl Record {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self { content: content.into(), metadata }
    }
}

/// One ranked hit. `rank` is 1-based and dense; metadata-only matches score 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub rank: usize,
    pub score: f32,
    pub record: Record,
}

/// Aggregate counts over the whole catalog, keyed in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_count: usize,
    pub region_counts: BTreeMap<String, usize>,
    pub support_counts: BTreeMap<String, usize>,
}

pub const UNKNOWN_REGION: &str = "Unknown";

impl Statistics {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut stats = Statistics::default();
        for record in records {
            stats.total_count += 1;
            let meta = &record.metadata;
            let region = if meta.region_major.is_empty() { UNKNOWN_REGION } else { meta.region_major.as_str() };
            *stats.region_counts.entry(region.to_string()).or_insert(0) += 1;
            for t in meta.supported.iter() {
                *stats.support_counts.entry(t.label().to_string()).or_insert(0) += 1;
            }
        }
        stats
    }
}
