//! `link` stage: join a SoFIFA table to a Transfermarkt table and write the
//! merged, unresolved and unmatched sets

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::checkpoint::{read_table, write_table, Table};
use crate::config::DataPaths;
use crate::league::LeagueTable;
use crate::resolve::{FieldMap, Resolution, Resolver, ResolverConfig};
use crate::types::MatchResult;

/// Prefix of right-hand columns in the merged file
const RIGHT_PREFIX: &str = "tm_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Clubs,
    Players,
}

impl Entity {
    fn stem(self) -> &'static str {
        match self {
            Entity::Clubs => "clubs",
            Entity::Players => "players",
        }
    }

    /// Column mapping of the files this pipeline writes
    pub fn default_fields(self) -> (FieldMap, FieldMap) {
        match self {
            Entity::Clubs => (
                FieldMap::scoped("name", "league", Some("country")),
                FieldMap::scoped("club", "league_name", None),
            ),
            Entity::Players => (
                FieldMap::name_only("full_name"),
                FieldMap::name_only("player_name"),
            ),
        }
    }

    /// (left, right) url columns
    fn url_columns(self) -> (&'static str, &'static str) {
        match self {
            Entity::Clubs => ("url", "club_url"),
            Entity::Players => ("url", "player_url"),
        }
    }

    pub fn default_inputs(self, paths: &DataPaths) -> (PathBuf, PathBuf) {
        match self {
            Entity::Clubs => (paths.sofifa_clubs(), paths.tm_clubs_sofifa_only()),
            Entity::Players => (paths.sofifa_players(), paths.tm_players()),
        }
    }
}

pub struct LinkJob {
    pub entity: Entity,
    pub left: PathBuf,
    pub right: PathBuf,
    pub out_dir: PathBuf,
    pub config: ResolverConfig,
}

/// Written next to the CSV outputs as `link_<entity>_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub entity: Entity,
    pub left_file: PathBuf,
    pub right_file: PathBuf,
    pub left_records: usize,
    pub right_records: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub unresolved: usize,
    pub unmatched_right: usize,
    pub threshold: f64,
    pub scope_by_league: bool,
    pub scorer: crate::similarity::ScorerKind,
    pub merged_file: PathBuf,
    pub unresolved_file: PathBuf,
    pub unmatched_file: PathBuf,
    pub summary_file: PathBuf,
}

pub fn run(job: &LinkJob, leagues: &LeagueTable) -> Result<LinkSummary> {
    let (left_url, right_url) = job.entity.url_columns();
    let left = read_table(&job.left, &job.config.left.columns(), left_url)?;
    let right = read_table(&job.right, &job.config.right.columns(), right_url)?;
    info!(
        "Linking {}: {} records from {} against {} from {}",
        job.entity.stem(),
        left.records.len(),
        job.left.display(),
        right.records.len(),
        job.right.display()
    );

    let resolution = Resolver::new(leagues, job.config.clone()).resolve(&left.records, &right.records);

    fs::create_dir_all(&job.out_dir)
        .with_context(|| format!("Failed to create {}", job.out_dir.display()))?;
    let stem = job.entity.stem();
    let merged_file = job.out_dir.join(format!("merged_{}.csv", stem));
    let unresolved_file = job.out_dir.join(format!("unresolved_{}.csv", stem));
    let unmatched_file = job.out_dir.join(format!("unmatched_tm_{}.csv", stem));
    let summary_file = job.out_dir.join(format!("link_{}_summary.json", stem));

    write_merged(&merged_file, &left, &right, &resolution)?;
    write_table(
        &unresolved_file,
        &left.headers,
        resolution
            .unresolved()
            .map(|m| row_cells(&left, m.left())),
    )?;
    let unmatched = resolution.unmatched_right();
    write_table(
        &unmatched_file,
        &right.headers,
        unmatched.iter().map(|&ri| row_cells(&right, ri)),
    )?;

    let (exact, fuzzy, unresolved) = resolution.counts();
    let summary = LinkSummary {
        entity: job.entity,
        left_file: job.left.clone(),
        right_file: job.right.clone(),
        left_records: left.records.len(),
        right_records: right.records.len(),
        exact,
        fuzzy,
        unresolved,
        unmatched_right: unmatched.len(),
        threshold: job.config.threshold,
        scope_by_league: job.config.scope_by_league,
        scorer: job.config.scorer,
        merged_file,
        unresolved_file,
        unmatched_file,
        summary_file: summary_file.clone(),
    };
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(&summary_file, json)
        .with_context(|| format!("Failed to write {}", summary_file.display()))?;
    Ok(summary)
}

fn row_cells(table: &Table, index: usize) -> Vec<String> {
    let record = &table.records[index];
    table.headers.iter().map(|h| record.get(h).to_cell()).collect()
}

fn write_merged(path: &Path, left: &Table, right: &Table, resolution: &Resolution) -> Result<usize> {
    let mut headers = left.headers.clone();
    headers.extend(right.headers.iter().map(|h| format!("{}{}", RIGHT_PREFIX, h)));
    headers.push("match_kind".to_string());
    headers.push("match_score".to_string());

    let rows = resolution.matches.iter().filter_map(|m| {
        let ri = m.right()?;
        let score = match m {
            MatchResult::Fuzzy { score, .. } => format!("{:.1}", score),
            _ => "100.0".to_string(),
        };
        let mut row = row_cells(left, m.left());
        row.extend(row_cells(right, ri));
        row.push(m.kind().to_string());
        row.push(score);
        Some(row)
    });
    write_table(path, &headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::ScorerKind;

    fn job(dir: &Path, entity: Entity, left: &str, right: &str) -> LinkJob {
        let left_path = dir.join("left.csv");
        let right_path = dir.join("right.csv");
        fs::write(&left_path, left).unwrap();
        fs::write(&right_path, right).unwrap();
        let (l, r) = entity.default_fields();
        LinkJob {
            entity,
            left: left_path,
            right: right_path,
            out_dir: dir.join("Merged"),
            config: ResolverConfig::new(l, r),
        }
    }

    #[test]
    fn test_link_players_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(
            dir.path(),
            Entity::Players,
            "full_name,overall\nBukayo Saka,87\nSmith John,70\nZzz Unknown,50\n",
            "player_name,player_url\nBukayo Saka,https://tm/saka\nJohn Smith,https://tm/smith\nMartin Ødegaard,https://tm/mo\n",
        );
        let leagues = LeagueTable::default();
        let summary = run(&job, &leagues).unwrap();

        assert_eq!(summary.left_records, 3);
        assert_eq!((summary.exact, summary.fuzzy, summary.unresolved), (1, 1, 1));
        assert_eq!(summary.unmatched_right, 1);

        let merged = fs::read_to_string(&summary.merged_file).unwrap();
        let mut lines = merged.lines();
        assert_eq!(
            lines.next(),
            Some("full_name,overall,tm_player_name,tm_player_url,match_kind,match_score")
        );
        assert_eq!(
            lines.next(),
            Some("Bukayo Saka,87,Bukayo Saka,https://tm/saka,exact,100.0")
        );
        assert_eq!(
            lines.next(),
            Some("Smith John,70,John Smith,https://tm/smith,fuzzy,100.0")
        );
        assert_eq!(lines.next(), None);

        let unresolved = fs::read_to_string(&summary.unresolved_file).unwrap();
        assert_eq!(unresolved, "full_name,overall\nZzz Unknown,50\n");

        let unmatched = fs::read_to_string(&summary.unmatched_file).unwrap();
        assert!(unmatched.contains("Martin Ødegaard"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&summary.summary_file).unwrap()).unwrap();
        assert_eq!(json["entity"], "players");
        assert_eq!(json["fuzzy"], 1);
        assert_eq!(json["scorer"], "token-sort");
    }

    #[test]
    fn test_link_clubs_with_league_scope() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(
            dir.path(),
            Entity::Clubs,
            "name,league,country,url\nArsenal,Premier League,England,https://sofifa.com/team/1/\n",
            "club,league_name,club_url\nArsenal FC,Premier League,https://tm/11\n",
        );
        job.config.scope_by_league = true;
        job.config.scorer = ScorerKind::TokenSort;
        let leagues = LeagueTable::builtin().unwrap();
        let summary = run(&job, &leagues).unwrap();
        assert_eq!(summary.fuzzy + summary.exact, 1);
        assert_eq!(summary.unmatched_right, 0);
    }

    #[test]
    fn test_missing_name_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(
            dir.path(),
            Entity::Players,
            "name\nBukayo Saka\n",
            "player_name\nBukayo Saka\n",
        );
        let err = run(&job, &LeagueTable::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("full_name"));
    }
}
