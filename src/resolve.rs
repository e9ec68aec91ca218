//! Cross-source entity resolution
//!
//! Two passes over fully materialized record sets:
//!
//! 1. exact join on `(canonical league, normalized name)`, pairing records
//!    that share a key in encounter order;
//! 2. for every left record still unmatched, in encounter order, the best
//!    remaining right record by token-sort similarity is taken if it scores at
//!    least the threshold. A taken right record leaves the pool, so an earlier
//!    left record can claim a candidate a later one would have scored higher
//!    on. That greedy order is the contract; it is not a global optimum.
//!
//! Ties at the best score go to the lowest right-hand index. Scoring runs in
//! parallel; consumption is committed sequentially afterwards so the output
//! does not depend on thread scheduling.

use rayon::prelude::*;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

use crate::league::LeagueTable;
use crate::normalize::{fold, normalize_opt};
use crate::similarity::{Scorer, ScorerKind};
use crate::types::{MatchResult, RawRecord};

pub const DEFAULT_THRESHOLD: f64 = 80.0;

/// Which columns of a record carry the name and its competition context
#[derive(Debug, Clone)]
pub struct FieldMap {
    pub name: String,
    pub league: Option<String>,
    pub country: Option<String>,
}

impl FieldMap {
    pub fn name_only(name: &str) -> Self {
        Self {
            name: name.to_string(),
            league: None,
            country: None,
        }
    }

    pub fn scoped(name: &str, league: &str, country: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            league: Some(league.to_string()),
            country: country.map(str::to_string),
        }
    }

    /// Every column this map reads
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.name.as_str()];
        cols.extend(self.league.as_deref());
        cols.extend(self.country.as_deref());
        cols
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum fuzzy score (0-100) for a match; inclusive
    pub threshold: f64,
    /// Only compare fuzzy candidates within the same canonical league
    pub scope_by_league: bool,
    pub scorer: ScorerKind,
    pub left: FieldMap,
    pub right: FieldMap,
}

impl ResolverConfig {
    pub fn new(left: FieldMap, right: FieldMap) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            scope_by_league: false,
            scorer: ScorerKind::default(),
            left,
            right,
        }
    }
}

/// Exact-join key of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub league: Option<String>,
    pub name: String,
}

/// Resolver output: exactly one `MatchResult` per left record, in left order
#[derive(Debug, Clone)]
pub struct Resolution {
    pub matches: Vec<MatchResult>,
    right_len: usize,
}

impl Resolution {
    pub fn exact(&self) -> impl Iterator<Item = &MatchResult> {
        self.matches
            .iter()
            .filter(|m| matches!(m, MatchResult::Exact { .. }))
    }

    pub fn fuzzy(&self) -> impl Iterator<Item = &MatchResult> {
        self.matches
            .iter()
            .filter(|m| matches!(m, MatchResult::Fuzzy { .. }))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &MatchResult> {
        self.matches
            .iter()
            .filter(|m| matches!(m, MatchResult::Unresolved { .. }))
    }

    /// Right-hand indices no left record claimed, ascending
    pub fn unmatched_right(&self) -> Vec<usize> {
        let mut used = vec![false; self.right_len];
        for right in self.matches.iter().filter_map(MatchResult::right) {
            used[right] = true;
        }
        (0..self.right_len).filter(|&i| !used[i]).collect()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.exact().count(),
            self.fuzzy().count(),
            self.unresolved().count(),
        )
    }
}

pub struct Resolver<'a> {
    leagues: &'a LeagueTable,
    config: ResolverConfig,
    scorer: Box<dyn Scorer>,
}

impl<'a> Resolver<'a> {
    pub fn new(leagues: &'a LeagueTable, config: ResolverConfig) -> Self {
        let scorer = config.scorer.scorer();
        Self {
            leagues,
            config,
            scorer,
        }
    }

    /// Replace the similarity function picked by the config
    #[cfg(test)]
    pub fn with_scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn key(&self, record: &RawRecord, fields: &FieldMap) -> EntityKey {
        let league = fields.league.as_deref().map(|col| {
            let label = record.text(col).unwrap_or_default();
            let country = fields.country.as_deref().and_then(|c| record.text(c));
            fold(&self.leagues.canonicalize(label, country))
        });
        EntityKey {
            league,
            name: normalize_opt(record.text(&fields.name)),
        }
    }

    pub fn resolve(&self, left: &[RawRecord], right: &[RawRecord]) -> Resolution {
        let left_keys: Vec<EntityKey> = left.iter().map(|r| self.key(r, &self.config.left)).collect();
        let right_keys: Vec<EntityKey> = right
            .iter()
            .map(|r| self.key(r, &self.config.right))
            .collect();

        let mut results: Vec<Option<MatchResult>> = vec![None; left.len()];
        let mut consumed = vec![false; right.len()];

        // Exact phase
        let mut by_key: HashMap<&EntityKey, VecDeque<usize>> = HashMap::new();
        for (ri, key) in right_keys.iter().enumerate() {
            if !key.name.is_empty() {
                by_key.entry(key).or_default().push_back(ri);
            }
        }
        for (li, key) in left_keys.iter().enumerate() {
            if key.name.is_empty() {
                results[li] = Some(MatchResult::Unresolved { left: li });
                continue;
            }
            if let Some(ri) = by_key.get_mut(key).and_then(VecDeque::pop_front) {
                consumed[ri] = true;
                results[li] = Some(MatchResult::Exact { left: li, right: ri });
            }
        }

        // Fuzzy phase: rank in parallel, commit in left order
        let pending: Vec<usize> = (0..left.len()).filter(|&i| results[i].is_none()).collect();
        let pool: Vec<usize> = (0..right.len())
            .filter(|&i| !consumed[i] && !right_keys[i].name.is_empty())
            .collect();
        debug!(
            "Fuzzy phase: {} left records against {} candidates",
            pending.len(),
            pool.len()
        );

        let ranked: Vec<Vec<(usize, f64)>> = pending
            .par_iter()
            .map(|&li| self.rank_candidates(&left_keys[li], &right_keys, &pool))
            .collect();

        for (&li, candidates) in pending.iter().zip(ranked) {
            let pick = candidates.into_iter().find(|(ri, _)| !consumed[*ri]);
            results[li] = Some(match pick {
                Some((ri, score)) => {
                    consumed[ri] = true;
                    MatchResult::Fuzzy {
                        left: li,
                        right: ri,
                        score,
                    }
                }
                None => MatchResult::Unresolved { left: li },
            });
        }

        let matches: Vec<MatchResult> = results
            .into_iter()
            .enumerate()
            .map(|(li, r)| r.unwrap_or(MatchResult::Unresolved { left: li }))
            .collect();

        let resolution = Resolution {
            matches,
            right_len: right.len(),
        };
        let (exact, fuzzy, unresolved) = resolution.counts();
        info!(
            "Resolved {} records: {} exact, {} fuzzy, {} unresolved",
            left.len(),
            exact,
            fuzzy,
            unresolved
        );
        resolution
    }

    /// Candidates at or above the threshold, best first, lowest index on ties
    fn rank_candidates(
        &self,
        key: &EntityKey,
        right_keys: &[EntityKey],
        pool: &[usize],
    ) -> Vec<(usize, f64)> {
        let mut scored: Vec<(usize, f64)> = pool
            .iter()
            .filter(|&&ri| !self.config.scope_by_league || right_keys[ri].league == key.league)
            .map(|&ri| (ri, self.scorer.score(&key.name, &right_keys[ri].name)))
            .filter(|(_, score)| *score >= self.config.threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
    }
}
