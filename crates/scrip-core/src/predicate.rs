//! Structured filters over record metadata.
//!
//! A predicate maps field names to a scalar or a set of acceptable values.
//! Matching is dispatched on the shape of both sides:
//!
//! | record field | filter | matches when |
//! |---|---|---|
//! | set    | set    | the two sets intersect |
//! | set    | scalar | the scalar is a member |
//! | scalar | set    | the field value is a member |
//! | scalar | text   | the field contains the text |
//! | scalar | other  | exact equality |
//!
//! Fields are AND-ed. A field the record does not carry fails the predicate.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::types::{Metadata, SupportSet, SupportType};

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(Number),
    Bool(bool),
}

impl Scalar {
    fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    Set(Vec<Scalar>),
}

impl FilterValue {
    pub fn text(s: impl Into<String>) -> Self {
        FilterValue::Scalar(Scalar::Text(s.into()))
    }

    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Set(items.into_iter().map(|s| Scalar::Text(s.into())).collect())
    }

    /// Accepts a JSON string, number, bool, or array of those.
    pub fn from_json(v: &Value) -> Result<Self> {
        if let Some(s) = Scalar::from_json(v) {
            return Ok(FilterValue::Scalar(s));
        }
        match v {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    Scalar::from_json(item)
                        .ok_or_else(|| Error::InvalidPredicate(format!("set members must be scalars, got {item}")))
                })
                .collect::<Result<Vec<_>>>()
                .map(FilterValue::Set),
            other => Err(Error::InvalidPredicate(format!("expected a scalar or a list, got {other}"))),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Scalar(s) => write!(f, "{s}"),
            FilterValue::Set(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Name,
    RegionMajor,
    RegionMinor,
    Supported,
    Unsupported,
    DetailLink,
    Extra(String),
}

impl Field {
    fn from_key(key: &str) -> Self {
        match key {
            "name" | "이름" => Field::Name,
            "region_major" | "지역1" => Field::RegionMajor,
            "region_minor" | "지역2" => Field::RegionMinor,
            "supported" | "지원방식" => Field::Supported,
            "unsupported" | "비지원방식" => Field::Unsupported,
            "detail_link" | "링크" => Field::DetailLink,
            other => Field::Extra(other.to_string()),
        }
    }

    fn is_support_set(&self) -> bool {
        matches!(self, Field::Supported | Field::Unsupported)
    }
}

/// Record-side value of one field.
enum Attr {
    One(Scalar),
    Many(Vec<Scalar>),
}

fn support_attr(set: &SupportSet) -> Attr {
    Attr::Many(set.iter().map(|t| Scalar::Text(t.label().to_string())).collect())
}

fn attr_of(meta: &Metadata, field: &Field) -> Option<Attr> {
    let text = |s: &str| Some(Attr::One(Scalar::Text(s.to_string())));
    match field {
        Field::Name => text(&meta.name),
        Field::RegionMajor => text(&meta.region_major),
        Field::RegionMinor => text(&meta.region_minor),
        Field::DetailLink => text(&meta.detail_link),
        Field::Supported => Some(support_attr(&meta.supported)),
        Field::Unsupported => Some(support_attr(&meta.unsupported)),
        Field::Extra(key) => match meta.extra.get(key)? {
            Value::Array(items) => items.iter().map(Scalar::from_json).collect::<Option<Vec<_>>>().map(Attr::Many),
            v => Scalar::from_json(v).map(Attr::One),
        },
    }
}

fn canonical_support(s: Scalar) -> Scalar {
    match s {
        Scalar::Text(t) => match t.parse::<SupportType>() {
            Ok(st) => Scalar::Text(st.label().to_string()),
            Err(_) => Scalar::Text(t),
        },
        other => other,
    }
}

fn clause_matches(attr: &Attr, want: &FilterValue) -> bool {
    match (attr, want) {
        (Attr::Many(have), FilterValue::Set(want)) => want.iter().any(|w| have.contains(w)),
        (Attr::Many(have), FilterValue::Scalar(w)) => have.contains(w),
        (Attr::One(have), FilterValue::Set(want)) => want.contains(have),
        (Attr::One(Scalar::Text(have)), FilterValue::Scalar(Scalar::Text(w))) => have.contains(w.as_str()),
        // A text filter reads numbers and booleans through their text form.
        (Attr::One(have), FilterValue::Scalar(Scalar::Text(w))) => have.to_string().contains(w.as_str()),
        (Attr::One(have), FilterValue::Scalar(w)) => have == w,
    }
}

/// A conjunction of field clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<(String, Field, FilterValue)>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: FilterValue) -> Self {
        let field = Field::from_key(key);
        let value = if field.is_support_set() {
            match value {
                FilterValue::Scalar(s) => FilterValue::Scalar(canonical_support(s)),
                FilterValue::Set(items) => FilterValue::Set(items.into_iter().map(canonical_support).collect()),
            }
        } else {
            value
        };
        self.clauses.push((key.to_string(), field, value));
        self
    }

    pub fn from_filters(filters: BTreeMap<String, FilterValue>) -> Self {
        filters.into_iter().fold(Self::new(), |p, (k, v)| p.with(&k, v))
    }

    /// Parses a JSON object such as `{"region_major": "경기", "supported": ["카드형"]}`.
    pub fn from_json(v: &Value) -> Result<Self> {
        let obj = v
            .as_object()
            .ok_or_else(|| Error::InvalidPredicate(format!("filters must be an object, got {v}")))?;
        let mut p = Self::new();
        for (key, value) in obj {
            p = p.with(key, FilterValue::from_json(value)?);
        }
        Ok(p)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        self.clauses.iter().all(|(_, field, want)| match attr_of(meta, field) {
            Some(attr) => clause_matches(&attr, want),
            None => false,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(|(k, _, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

/// All of `required` and none of `excluded` must appear in the supported set.
///
/// Exclusion is checked against `supported`, not `unsupported`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportRequirement {
    pub required: Vec<SupportType>,
    pub excluded: Vec<SupportType>,
}

impl SupportRequirement {
    pub fn new(required: Vec<SupportType>, excluded: Vec<SupportType>) -> Self {
        Self { required, excluded }
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        self.required.iter().all(|t| meta.supported.contains(*t))
            && !self.excluded.iter().any(|t| meta.supported.contains(*t))
    }
}
