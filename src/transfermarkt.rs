//! Transfermarkt: competition club tables and club squads

use anyhow::Result;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::checkpoint::{read_table, write_records, Schema};
use crate::config::Runtime;
use crate::crawl::{crawl_targets, CrawlOptions, CrawlReport, Target};
use crate::extract::{absolutize, clean_cell, element_text, id_from_url, parse_money, selector};
use crate::normalize::{fold, normalize};
use crate::types::RawRecord;

const BASE_URL: &str = "https://www.transfermarkt.com";

pub const CLUBS: Schema = Schema {
    columns: &[
        "league_name",
        "club",
        "club_id",
        "club_url",
        "average_market_value",
        "total_market_value",
        "average_market_value_eur",
        "total_market_value_eur",
        "source_url",
    ],
    url_column: "club_url",
    id_column: Some("club_id"),
    target_column: Some("league_name"),
    identity_scope: None,
};

pub const PLAYERS: Schema = Schema {
    columns: &[
        "league_name",
        "club",
        "club_id",
        "club_url",
        "player_name",
        "player_id",
        "player_url",
        "position",
        "age",
        "nationality",
        "market_value",
        "market_value_eur",
        "squad_url",
    ],
    url_column: "player_url",
    id_column: Some("player_id"),
    target_column: Some("club_url"),
    identity_scope: Some("club_id"),
};

/// Columns identifying one player in one club
const PLAYER_KEY: [&str; 3] = ["club_id", "player_id", "player_name"];

/// Squad table cell text with thin and non-breaking spaces flattened
fn cell_text(el: ElementRef) -> Option<String> {
    clean_cell(&element_text(el).replace(['\u{2009}', '\u{a0}'], " "))
}

/// Club rows of a competition overview page
pub fn parse_competition(league: &str, page_url: &str, body: &str) -> Vec<RawRecord> {
    let doc = Html::parse_document(body);
    let row_sel = selector("table.items > tbody > tr");
    let link_sel = selector("td.hauptlink a");
    let value_sel = selector("td.rechts");

    let mut records = Vec::new();
    for row in doc.select(&row_sel) {
        let Some((link, href)) = row
            .select(&link_sel)
            .filter_map(|a| a.value().attr("href").map(|h| (a, h)))
            .find(|(_, h)| h.contains("/verein/"))
        else {
            continue;
        };
        let Some(club_url) = absolutize(BASE_URL, href) else {
            continue;
        };
        let values: Vec<ElementRef> = row.select(&value_sel).collect();
        if values.len() < 2 {
            continue;
        }
        let average = cell_text(values[values.len() - 2]);
        let total = cell_text(values[values.len() - 1]);
        if average.is_none() && total.is_none() {
            continue;
        }

        let club_id = id_from_url(&club_url, "verein");
        records.push(
            RawRecord::new(club_url.clone(), club_id.clone())
                .with("league_name", league)
                .with("club", element_text(link))
                .with("club_id", club_id)
                .with("club_url", club_url)
                .with("average_market_value_eur", average.as_deref().and_then(parse_money))
                .with("total_market_value_eur", total.as_deref().and_then(parse_money))
                .with("average_market_value", average)
                .with("total_market_value", total)
                .with("source_url", page_url),
        );
    }
    records
}

/// The club a squad page belongs to
#[derive(Debug, Clone)]
pub struct ClubRef {
    pub league_name: String,
    pub club: String,
    pub club_id: Option<String>,
    pub club_url: String,
}

fn bracketed_age() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d{1,2})\)\s*$").unwrap_or_else(|e| panic!("{}", e)))
}

/// Age from the centered cells of a squad row.
///
/// A birth date ending in "(NN)" wins over a bare number, which may be the
/// shirt number. Ages outside 14-48 are ignored.
fn parse_age(cells: &[String]) -> Option<u32> {
    let plausible = |n: u32| (14..=48).contains(&n).then_some(n);
    let from_birth_date = cells.iter().find_map(|t| {
        let caps = bracketed_age().captures(t.trim())?;
        caps[1].parse().ok().and_then(plausible)
    });
    from_birth_date.or_else(|| {
        cells
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()))
            .find_map(|t| t.parse().ok().and_then(plausible))
    })
}

/// Player rows of a squad page
pub fn parse_squad(club: &ClubRef, squad_url: &str, body: &str) -> Vec<RawRecord> {
    let doc = Html::parse_document(body);
    let row_sel = selector("table.items > tbody > tr");
    let link_sel = selector("td.hauptlink a");
    let position_sel = selector("table.inline-table tr:last-child td");
    let centered_sel = selector("td.zentriert");
    let flag_sel = selector("td.zentriert img[title]");
    let value_sel = selector("td.rechts");

    let mut records = Vec::new();
    for row in doc.select(&row_sel) {
        let Some((link, href)) = row
            .select(&link_sel)
            .filter_map(|a| a.value().attr("href").map(|h| (a, h)))
            .find(|(_, h)| h.contains("/spieler/"))
        else {
            continue;
        };
        let Some(player_url) = absolutize(BASE_URL, href) else {
            continue;
        };
        let player_id = id_from_url(&player_url, "spieler");

        let position = row.select(&position_sel).last().and_then(cell_text);
        let centered: Vec<String> = row.select(&centered_sel).map(element_text).collect();
        let age = parse_age(&centered);
        let nations: BTreeSet<String> = row
            .select(&flag_sel)
            .filter_map(|img| img.value().attr("title"))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let nationality =
            (!nations.is_empty()).then(|| nations.into_iter().collect::<Vec<_>>().join("|"));
        let market_value = row.select(&value_sel).last().and_then(cell_text);

        records.push(
            RawRecord::new(player_url.clone(), player_id.clone())
                .with("league_name", club.league_name.as_str())
                .with("club", club.club.as_str())
                .with("club_id", club.club_id.clone())
                .with("club_url", club.club_url.as_str())
                .with("player_name", element_text(link))
                .with("player_id", player_id)
                .with("player_url", player_url)
                .with("position", position)
                .with("age", age)
                .with("nationality", nationality)
                .with("market_value_eur", market_value.as_deref().and_then(parse_money))
                .with("market_value", market_value)
                .with("squad_url", squad_url),
        );
    }
    records
}

/// Squad page candidates for a club, most specific first
pub fn squad_urls(club_url: &str, club_id: Option<&str>) -> Vec<String> {
    let mut urls = Vec::new();
    if club_url.contains("/startseite/verein/") {
        let squad = club_url.replacen("/startseite/", "/kader/", 1);
        urls.push(format!("{}/plus/1", squad.trim_end_matches('/')));
    }
    if let Some(id) = club_id {
        urls.push(format!("{}/kader/verein/{}/plus/1", BASE_URL, id));
        urls.push(format!("{}/kader/verein/{}/saison_id/2025/plus/1", BASE_URL, id));
        urls.push(format!("{}/kader/verein/{}/saison_id/2024/plus/1", BASE_URL, id));
    }
    urls.push(club_url.to_string());

    let mut seen = HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
    urls
}

/// First occurrence of each (club_id, player_id, player_name)
pub fn dedup_players(records: &[RawRecord]) -> Vec<RawRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| {
            let key: Vec<String> = PLAYER_KEY.iter().map(|c| r.get(c).to_cell()).collect();
            seen.insert(key)
        })
        .cloned()
        .collect()
}

pub struct StageOutcome {
    pub report: CrawlReport,
    pub raw_path: PathBuf,
    pub filtered_path: PathBuf,
    pub filtered: usize,
}

/// Crawl every competition the SoFIFA clubs play in, then keep the clubs
/// that also exist on the SoFIFA side
pub fn run_clubs(rt: &Runtime, options: CrawlOptions) -> Result<StageOutcome> {
    let paths = rt.paths();
    let sofifa = read_table(&paths.sofifa_clubs(), &["name", "league"], "url")?;
    let has_country = sofifa.headers.iter().any(|h| h == "country");

    let mut sofifa_keys = HashSet::new();
    let mut leagues = BTreeSet::new();
    for record in &sofifa.records {
        let Some(label) = record.text("league") else {
            continue;
        };
        let country = if has_country { record.text("country") } else { None };
        if country.is_none() && rt.leagues.is_ambiguous(label) {
            warn!(
                "League '{}' of {} needs a country to be told apart",
                label,
                record.text("name").unwrap_or("?")
            );
        }
        let canonical = rt.leagues.canonicalize(label, country);
        sofifa_keys.insert((fold(&canonical), normalize(record.text("name").unwrap_or_default())));
        leagues.insert(canonical);
    }
    info!("{} leagues in the SoFIFA club file", leagues.len());

    let mut targets = Vec::new();
    for league in &leagues {
        let urls = rt.leagues.listing_urls(league);
        if urls.is_empty() {
            warn!("No Transfermarkt page known for league '{}'", league);
            continue;
        }
        targets.push(Target {
            key: league.clone(),
            id: None,
            urls: urls.to_vec(),
        });
    }

    let raw_path = paths.tm_clubs();
    info!("Transfermarkt clubs -> {}", raw_path.display());
    let report = crawl_targets(
        rt.fetcher(),
        &raw_path,
        CLUBS,
        &options,
        &targets,
        |target, url, body| parse_competition(&target.key, url, body),
        &rt.stop,
    )?;

    let kept: Vec<RawRecord> = report
        .state
        .items()
        .iter()
        .filter(|r| {
            let key = (
                fold(r.text("league_name").unwrap_or_default()),
                normalize(r.text("club").unwrap_or_default()),
            );
            sofifa_keys.contains(&key)
        })
        .cloned()
        .collect();
    let filtered_path = paths.tm_clubs_sofifa_only();
    let filtered = write_records(&filtered_path, &CLUBS, &kept)?;

    Ok(StageOutcome {
        report,
        raw_path,
        filtered_path,
        filtered,
    })
}

/// Crawl the squad of every club kept by `run_clubs`, then write a
/// de-duplicated copy
pub fn run_players(rt: &Runtime, options: CrawlOptions) -> Result<StageOutcome> {
    let paths = rt.paths();
    let clubs = read_table(
        &paths.tm_clubs_sofifa_only(),
        &["league_name", "club", "club_url", "club_id"],
        "club_url",
    )?;

    let mut by_url: HashMap<String, ClubRef> = HashMap::new();
    let mut targets = Vec::new();
    for record in &clubs.records {
        let Some(club_url) = record.text("club_url") else {
            warn!(
                "Skipping club without URL: {}",
                record.text("club").unwrap_or("?")
            );
            continue;
        };
        let club_id = record
            .text("club_id")
            .map(str::to_string)
            .or_else(|| id_from_url(club_url, "verein"));
        let club = ClubRef {
            league_name: record.text("league_name").unwrap_or_default().to_string(),
            club: record.text("club").unwrap_or_default().to_string(),
            club_id: club_id.clone(),
            club_url: club_url.to_string(),
        };
        if by_url.insert(club_url.to_string(), club).is_none() {
            targets.push(Target {
                key: club_url.to_string(),
                id: None,
                urls: squad_urls(club_url, club_id.as_deref()),
            });
        }
    }

    let raw_path = paths.tm_players_raw();
    info!("Transfermarkt players -> {}", raw_path.display());
    let report = crawl_targets(
        rt.fetcher(),
        &raw_path,
        PLAYERS,
        &options,
        &targets,
        |target, url, body| match by_url.get(&target.key) {
            Some(club) => parse_squad(club, url, body),
            None => Vec::new(),
        },
        &rt.stop,
    )?;

    let unique = dedup_players(report.state.items());
    let filtered_path = paths.tm_players();
    let filtered = write_records(&filtered_path, &PLAYERS, &unique)?;

    Ok(StageOutcome {
        report,
        raw_path,
        filtered_path,
        filtered,
    })
}
