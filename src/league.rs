//! Competition label canonicalization
//!
//! Both sources name the same competitions differently (sponsor renames,
//! Transfermarkt vs SoFIFA spellings) and some labels such as "Super League"
//! are used verbatim by several countries. The rules live in a CONL table
//! (`leagues.conl`, embedded at build time) so adding a league or a synonym
//! never touches code.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::normalize::fold;

const DEFAULT_TABLE: &str = include_str!("../leagues.conl");

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LeagueTableFile {
    #[serde(default)]
    renames: BTreeMap<String, String>,
    #[serde(default)]
    ambiguous: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    sources: BTreeMap<String, Vec<String>>,
}

/// Lookup table mapping source-specific labels to one canonical label
#[derive(Debug, Clone, Default)]
pub struct LeagueTable {
    /// folded raw label -> canonical label
    renames: HashMap<String, String>,
    /// folded generic label -> (folded country -> canonical label)
    ambiguous: HashMap<String, HashMap<String, String>>,
    /// folded canonical label -> candidate listing URLs
    sources: HashMap<String, Vec<String>>,
}

impl LeagueTable {
    /// The table shipped with the binary
    pub fn builtin() -> Result<Self> {
        Self::from_conl(DEFAULT_TABLE).context("Failed to parse built-in leagues.conl")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read league table: {}", path.display()))?;
        Self::from_conl(&content)
            .with_context(|| format!("Failed to parse league table: {}", path.display()))
    }

    pub fn from_conl(content: &str) -> Result<Self> {
        let file: LeagueTableFile = serde_conl::from_str(content)?;
        let mut table = LeagueTable::default();

        for (raw, canonical) in file.renames {
            insert_unique(&mut table.renames, fold(&raw), canonical, &raw)?;
        }

        for (label, by_country) in file.ambiguous {
            let mut countries = HashMap::new();
            for (country, canonical) in by_country {
                insert_unique(&mut countries, fold(&country), canonical, &country)?;
            }
            if table.ambiguous.insert(fold(&label), countries).is_some() {
                bail!("Ambiguous label '{}' is listed twice", label);
            }
        }

        for (league, urls) in file.sources {
            table.sources.insert(fold(&league), urls);
        }

        Ok(table)
    }

    /// Canonical label for a competition as seen in a given country.
    ///
    /// Rename rules apply first; a label that is generic across countries is
    /// then qualified by `country`. Anything unknown comes back unchanged.
    pub fn canonicalize(&self, raw_label: &str, country: Option<&str>) -> String {
        let label = self
            .renames
            .get(&fold(raw_label))
            .map(String::as_str)
            .unwrap_or(raw_label);

        if let Some(by_country) = self.ambiguous.get(&fold(label)) {
            if let Some(canonical) = country.and_then(|c| by_country.get(&fold(c))) {
                return canonical.clone();
            }
        }

        label.to_string()
    }

    /// True when the label needs a country to be resolved
    pub fn is_ambiguous(&self, label: &str) -> bool {
        self.ambiguous.contains_key(&fold(label))
    }

    /// Transfermarkt competition page candidates for a canonical league
    pub fn listing_urls(&self, canonical: &str) -> &[String] {
        self.sources
            .get(&fold(canonical))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn insert_unique(
    map: &mut HashMap<String, String>,
    key: String,
    value: String,
    raw: &str,
) -> Result<()> {
    if let Some(existing) = map.get(&key) {
        if existing != &value {
            bail!(
                "Conflicting entries for '{}': '{}' vs '{}'",
                raw,
                existing,
                value
            );
        }
    }
    map.insert(key, value);
    Ok(())
}
