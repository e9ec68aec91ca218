//! Record and match types shared by the crawlers and the resolver

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cell value of a scraped record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Text as written to a CSV cell (null becomes an empty cell)
    pub fn to_cell(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{:.0}", n),
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }

    /// Inverse of `to_cell`; numbers stay text until read through `RawRecord::number`
    pub fn from_cell(cell: &str) -> Self {
        if cell.is_empty() {
            Scalar::Null
        } else {
            Scalar::Text(cell.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}

impl From<u32> for Scalar {
    fn from(n: u32) -> Self {
        Scalar::Number(n as f64)
    }
}

impl From<usize> for Scalar {
    fn from(n: usize) -> Self {
        Scalar::Number(n as f64)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Scalar::Null)
    }
}

static NULL: Scalar = Scalar::Null;

/// One flat record parsed from a listing or detail page
///
/// Built once by an extractor (or read back from a checkpoint) and not
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub source_url: String,
    pub source_id: Option<String>,
    fields: BTreeMap<String, Scalar>,
}

impl RawRecord {
    pub fn new(source_url: impl Into<String>, source_id: Option<String>) -> Self {
        Self {
            source_url: source_url.into(),
            source_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Field value, `Null` when the field is absent
    pub fn get(&self, name: &str) -> &Scalar {
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).as_str().filter(|s| !s.is_empty())
    }

    /// Numeric view of a field; text cells are parsed on demand
    #[cfg(test)]
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Null => None,
        }
    }

    /// Identity strings used for crawl de-duplication
    pub fn identities(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if !self.source_url.is_empty() {
            ids.push(format!("url:{}", self.source_url));
        }
        if let Some(id) = &self.source_id {
            ids.push(format!("id:{}", id));
        }
        ids
    }
}

/// Outcome for one left-hand record of a resolver run
///
/// Indices point into the `left` and `right` slices the resolver was given.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Exact { left: usize, right: usize },
    Fuzzy { left: usize, right: usize, score: f64 },
    Unresolved { left: usize },
}

impl MatchResult {
    pub fn left(&self) -> usize {
        match self {
            MatchResult::Exact { left, .. }
            | MatchResult::Fuzzy { left, .. }
            | MatchResult::Unresolved { left } => *left,
        }
    }

    pub fn right(&self) -> Option<usize> {
        match self {
            MatchResult::Exact { right, .. } | MatchResult::Fuzzy { right, .. } => Some(*right),
            MatchResult::Unresolved { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MatchResult::Exact { .. } => "exact",
            MatchResult::Fuzzy { .. } => "fuzzy",
            MatchResult::Unresolved { .. } => "unresolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_round_trip_of_null_and_numbers() {
        assert_eq!(Scalar::Null.to_cell(), "");
        assert_eq!(Scalar::Number(52300000.0).to_cell(), "52300000");
        assert_eq!(Scalar::Number(24.5).to_cell(), "24.5");
        assert_eq!(Scalar::from_cell(""), Scalar::Null);
        assert_eq!(Scalar::from_cell("x"), Scalar::Text("x".into()));
    }

    #[test]
    fn test_record_accessors() {
        let r = RawRecord::new("https://sofifa.com/team/1/x/", Some("1".into()))
            .with("name", "Arsenal")
            .with("rating", "82")
            .with("stadium", None::<String>);
        assert_eq!(r.text("name"), Some("Arsenal"));
        assert_eq!(r.number("rating"), Some(82.0));
        assert!(r.get("stadium").is_null());
        assert!(r.get("missing").is_null());
        assert_eq!(
            r.identities(),
            vec!["url:https://sofifa.com/team/1/x/".to_string(), "id:1".to_string()]
        );
    }
}
