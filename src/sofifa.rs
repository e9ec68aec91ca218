//! SoFIFA: club and player listings, club detail pages

use anyhow::Result;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::checkpoint::{read_table, Schema};
use crate::config::Runtime;
use crate::crawl::{
    crawl_listing, crawl_targets, CrawlOptions, CrawlReport, ListingConfig, Page, Pagination,
    Target,
};
use crate::extract::{absolutize, clean_cell, element_text, id_from_url, name_from_slug, parse_money, selector};
use crate::fetch::UrlTemplate;
use crate::types::RawRecord;

pub const CLUBS_URL: &str = "https://sofifa.com/teams?type=club&col=rating&sort=desc";
pub const PLAYERS_URL: &str = "https://sofifa.com/players?col=oa&sort=desc";
pub const PAGE_SIZE: u64 = 60;
/// Last club listing page (11 * 60)
pub const CLUBS_MAX_OFFSET: u64 = 660;

pub const CLUB_URLS: Schema = Schema {
    columns: &["url", "club_id"],
    url_column: "url",
    id_column: Some("club_id"),
    target_column: None,
    identity_scope: None,
};

pub const PLAYER_URLS: Schema = Schema {
    columns: &["url", "player_id"],
    url_column: "url",
    id_column: Some("player_id"),
    target_column: None,
    identity_scope: None,
};

pub const CLUBS: Schema = Schema {
    columns: &[
        "club_id",
        "name",
        "league",
        "league_id",
        "country",
        "rating",
        "attack_rating",
        "midfield_rating",
        "defense_rating",
        "stadium",
        "manager",
        "manager_id",
        "manager_url",
        "club_worth",
        "club_worth_eur",
        "starting_xi_avg_age",
        "whole_team_avg_age",
        "rival_team",
        "players_count",
        "top_players",
        "club_logo",
        "country_flag",
        "url",
    ],
    url_column: "url",
    id_column: Some("club_id"),
    target_column: Some("url"),
    identity_scope: None,
};

fn has_next_button(doc: &Html) -> bool {
    doc.select(&selector("a.button"))
        .any(|a| element_text(a).contains("Next"))
}

/// Team links of a club listing page, one per table row
pub fn parse_club_listing(page_url: &str, body: &str) -> Page {
    let doc = Html::parse_document(body);
    let row_sel = selector("table tbody tr");
    let link_sel = selector(r#"a[href^="/team/"]"#);

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for row in doc.select(&row_sel) {
        let Some(href) = row
            .select(&link_sel)
            .filter_map(|a| a.value().attr("href"))
            .find(|h| !h.contains("random"))
        else {
            continue;
        };
        let Some(url) = absolutize(page_url, href) else {
            continue;
        };
        if seen.insert(url.clone()) {
            let id = id_from_url(&url, "team");
            items.push(RawRecord::new(url, id));
        }
    }

    Page {
        items,
        has_next: has_next_button(&doc),
    }
}

/// Every player profile link on a listing page, plus the "Next" button
pub fn parse_player_listing(page_url: &str, body: &str) -> Page {
    let doc = Html::parse_document(body);
    let link_sel = selector(r#"a[href*="/player/"]"#);

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for href in doc.select(&link_sel).filter_map(|a| a.value().attr("href")) {
        if href.contains("random") {
            continue;
        }
        let Some(url) = absolutize(page_url, href) else {
            continue;
        };
        if seen.insert(url.clone()) {
            let id = id_from_url(&url, "player");
            items.push(RawRecord::new(url, id));
        }
    }

    Page {
        items,
        has_next: has_next_button(&doc),
    }
}

fn image_src(el: ElementRef) -> Option<String> {
    el.value()
        .attr("data-src")
        .or_else(|| el.value().attr("src"))
        .and_then(clean_cell)
}

/// Text of the `<li>` whose label matches, without the label itself
fn labelled_value(doc: &Html, label: &str) -> Option<String> {
    let label_sel = selector("div.col-2 li label");
    let label_el = doc
        .select(&label_sel)
        .find(|l| element_text(*l).to_lowercase().contains(&label.to_lowercase()))?;
    let li = label_el.parent().and_then(ElementRef::wrap)?;
    let full = element_text(li);
    let label_text = element_text(label_el);
    clean_cell(full.replacen(&label_text, "", 1).trim())
}

/// Overall/attack/midfield/defence ratings from the header grid
fn ratings(doc: &Html) -> [Option<String>; 4] {
    let col_sel = selector("div.grid div.col");
    let sub_sel = selector(".sub");
    let em_sel = selector("em");

    let mut out: [Option<String>; 4] = Default::default();
    for col in doc.select(&col_sel) {
        let sub = col
            .select(&sub_sel)
            .next()
            .map(element_text)
            .unwrap_or_default()
            .to_lowercase();
        let value = col.select(&em_sel).next().map(element_text).and_then(|v| clean_cell(&v));
        let slot = if sub.contains("overall") {
            0
        } else if sub.contains("attack") {
            1
        } else if sub.contains("midfield") {
            2
        } else if sub.contains("defence") || sub.contains("defense") {
            3
        } else {
            continue;
        };
        out[slot] = value;
    }
    out
}

/// Name as shown on the page, or recovered from the URL slug when the page
/// heading is empty or only digits
fn club_name(heading: Option<String>, url: &str) -> Option<String> {
    match heading {
        Some(h) if !h.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()) => Some(h),
        _ => name_from_slug(url, "team"),
    }
}

/// One club record from a SoFIFA team page
pub fn parse_club_page(url: &str, body: &str) -> RawRecord {
    let doc = Html::parse_document(body);
    let first_text = |css: &str| {
        doc.select(&selector(css))
            .next()
            .map(element_text)
            .and_then(|t| clean_cell(&t))
    };

    let club_id = id_from_url(url, "team");
    let name = club_name(first_text("div.profile h1"), url);

    let league_el = doc.select(&selector("div.profile p a[href*='/league/']")).next();
    let league = league_el.map(element_text).and_then(|t| clean_cell(&t));
    let league_id = league_el
        .and_then(|a| a.value().attr("href"))
        .and_then(|h| id_from_url(h, "league"));

    let country = doc
        .select(&selector("div.profile p a[title]"))
        .next()
        .and_then(|a| a.value().attr("title"))
        .and_then(clean_cell);
    let flag = doc
        .select(&selector("div.profile p img.flag"))
        .next()
        .and_then(image_src);
    let logo = doc.select(&selector("img.crest")).next().and_then(image_src);

    let (manager, manager_id, manager_url) = match doc
        .select(&selector(r#"nav.nav-tabs a[href*="/coach/"]"#))
        .next()
        .and_then(|a| a.value().attr("href"))
    {
        Some(href) => (
            name_from_slug(&absolutize(url, href).unwrap_or_default(), "coach"),
            id_from_url(href, "coach"),
            absolutize(url, href),
        ),
        None => (None, None, None),
    };

    let club_worth = labelled_value(&doc, "Club worth");
    let club_worth_eur = club_worth.as_deref().and_then(parse_money);

    let players: Vec<String> = doc
        .select(&selector("div.field-basket ul a[href*='/player/']"))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    let top_players = (!players.is_empty()).then(|| {
        players
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    });

    let [rating, attack, midfield, defense] = ratings(&doc);

    RawRecord::new(url, club_id.clone())
        .with("url", url)
        .with("club_id", club_id)
        .with("name", name)
        .with("league", league)
        .with("league_id", league_id)
        .with("country", country)
        .with("rating", rating)
        .with("attack_rating", attack)
        .with("midfield_rating", midfield)
        .with("defense_rating", defense)
        .with("stadium", labelled_value(&doc, "Home stadium"))
        .with("manager", manager)
        .with("manager_id", manager_id)
        .with("manager_url", manager_url)
        .with("club_worth", club_worth)
        .with("club_worth_eur", club_worth_eur)
        .with("starting_xi_avg_age", labelled_value(&doc, "Starting XI average age"))
        .with("whole_team_avg_age", labelled_value(&doc, "Whole team average age"))
        .with("rival_team", labelled_value(&doc, "Rival team"))
        .with("players_count", players.len())
        .with("top_players", top_players)
        .with("club_logo", logo)
        .with("country_flag", flag)
}

/// Collect club URLs from the rating-sorted team listing
pub fn run_club_urls(rt: &Runtime, options: CrawlOptions, base_url: Option<&str>) -> Result<CrawlReport> {
    let config = ListingConfig {
        template: UrlTemplate::parse(base_url.unwrap_or(CLUBS_URL))?,
        offset_step: PAGE_SIZE,
        pagination: Pagination::MaxOffset(CLUBS_MAX_OFFSET),
        options,
    };
    let path = rt.paths().sofifa_club_urls();
    info!("SoFIFA club URLs -> {}", path.display());
    crawl_listing(rt.fetcher(), &path, CLUB_URLS, &config, parse_club_listing, &rt.stop)
}

/// Collect player URLs, following the "Next" button
pub fn run_player_urls(rt: &Runtime, options: CrawlOptions, base_url: Option<&str>) -> Result<CrawlReport> {
    let config = ListingConfig {
        template: UrlTemplate::parse(base_url.unwrap_or(PLAYERS_URL))?,
        offset_step: PAGE_SIZE,
        pagination: Pagination::HasNext,
        options,
    };
    let path = rt.paths().sofifa_player_urls();
    info!("SoFIFA player URLs -> {}", path.display());
    crawl_listing(rt.fetcher(), &path, PLAYER_URLS, &config, parse_player_listing, &rt.stop)
}

/// Detail stage: one record per club URL collected by `run_club_urls`
pub fn run_clubs(rt: &Runtime, options: CrawlOptions) -> Result<CrawlReport> {
    let urls_path = rt.paths().sofifa_club_urls();
    let table = read_table(&urls_path, &["url"], "url")?;
    let targets: Vec<Target> = table
        .records
        .iter()
        .filter(|r| !r.source_url.is_empty())
        .map(|r| Target {
            key: r.source_url.clone(),
            id: id_from_url(&r.source_url, "team"),
            urls: vec![r.source_url.clone()],
        })
        .collect();
    debug!("{} club URLs loaded from {}", targets.len(), urls_path.display());

    let path = rt.paths().sofifa_clubs();
    info!("SoFIFA clubs -> {}", path.display());
    crawl_targets(
        rt.fetcher(),
        &path,
        CLUBS,
        &options,
        &targets,
        |_, url, body| {
            let record = parse_club_page(url, body);
            info!(
                "  {} ({})",
                record.text("name").unwrap_or("Unknown club"),
                record.text("league").unwrap_or("Unknown league")
            );
            vec![record]
        },
        &rt.stop,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUB_LISTING: &str = r#"
<html><body>
<table><tbody>
  <tr><td><a href="/team/1/arsenal/">Arsenal</a></td><td><a href="/league/13">Premier League</a></td></tr>
  <tr><td><a href="/team/random">Random</a><a href="/team/243/real-madrid/">Real Madrid</a></td></tr>
  <tr><td><a href="/team/1/arsenal/">Arsenal again</a></td></tr>
  <tr><td>no link</td></tr>
</tbody></table>
<a class="button" href="/teams?offset=60">Next</a>
</body></html>"#;

    const PLAYER_LISTING: &str = r#"
<html><body>
<a href="/player/231747/kylian-mbappe/250001/">K. Mbappé</a>
<a href="/player/231747/kylian-mbappe/250001/">K. Mbappé</a>
<a href="/player/random">Random player</a>
<a href="/player/239085/erling-haaland/250001/">E. Haaland</a>
<a class="button" href="/players?offset=0">Previous</a>
</body></html>"#;

    const CLUB_PAGE: &str = r#"
<html><body>
<div class="profile">
  <img class="crest" data-src="https://cdn.sofifa.net/meta/team/1/120.png">
  <h1>Arsenal</h1>
  <p><a title="England" href="/teams?na=14"><img class="flag" src="https://cdn.sofifa.net/flags/gb-eng.png"></a>
     <a href="/league/13">Premier League</a></p>
</div>
<div class="grid">
  <div class="col"><em>85</em><span class="sub">Overall</span></div>
  <div class="col"><em>86</em><span class="sub">Attack</span></div>
  <div class="col"><em>84</em><span class="sub">Midfield</span></div>
  <div class="col"><em>-</em><span class="sub">Defence</span></div>
</div>
<nav class="nav-tabs"><a href="/coach/1234/mikel-arteta/">Manager</a></nav>
<div class="col-2"><ul>
  <li><label>Home stadium</label>Emirates Stadium</li>
  <li><label>Rival team</label><a href="/team/18/tottenham/">Tottenham Hotspur</a></li>
  <li><label>Club worth</label>€1.2B</li>
  <li><label>Starting XI average age</label>25.7</li>
  <li><label>Whole team average age</label>24.4</li>
</ul></div>
<div class="field-basket"><ul>
  <li><a href="/player/1/">B. Saka</a></li>
  <li><a href="/player/2/">M. Ødegaard</a></li>
  <li><a href="/player/3/">D. Rice</a></li>
  <li><a href="/player/4/">W. Saliba</a></li>
  <li><a href="/player/5/">G. Magalhães</a></li>
  <li><a href="/player/6/">K. Havertz</a></li>
</ul></div>
</body></html>"#;

    #[test]
    fn test_club_listing_rows() {
        let page = parse_club_listing("https://sofifa.com/teams?type=club", CLUB_LISTING);
        let urls: Vec<&str> = page.items.iter().map(|r| r.source_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://sofifa.com/team/1/arsenal/",
                "https://sofifa.com/team/243/real-madrid/"
            ]
        );
        assert_eq!(page.items[1].source_id.as_deref(), Some("243"));
        assert!(page.has_next);
    }

    #[test]
    fn test_player_listing_without_next() {
        let page = parse_player_listing("https://sofifa.com/players?offset=60", PLAYER_LISTING);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].source_id.as_deref(), Some("231747"));
        assert!(!page.has_next);
    }

    #[test]
    fn test_club_page_fields() {
        let r = parse_club_page("https://sofifa.com/team/1/arsenal/", CLUB_PAGE);
        assert_eq!(r.text("club_id"), Some("1"));
        assert_eq!(r.text("name"), Some("Arsenal"));
        assert_eq!(r.text("league"), Some("Premier League"));
        assert_eq!(r.text("league_id"), Some("13"));
        assert_eq!(r.text("country"), Some("England"));
        assert_eq!(r.text("rating"), Some("85"));
        assert_eq!(r.text("midfield_rating"), Some("84"));
        assert!(r.get("defense_rating").is_null());
        assert_eq!(r.text("stadium"), Some("Emirates Stadium"));
        assert_eq!(r.text("rival_team"), Some("Tottenham Hotspur"));
        assert_eq!(r.text("manager"), Some("Mikel Arteta"));
        assert_eq!(r.text("manager_id"), Some("1234"));
        assert_eq!(r.number("club_worth_eur"), Some(1_200_000_000.0));
        assert_eq!(r.text("whole_team_avg_age"), Some("24.4"));
        assert_eq!(r.number("players_count"), Some(6.0));
        assert_eq!(
            r.text("top_players"),
            Some("B. Saka, M. Ødegaard, D. Rice, W. Saliba, G. Magalhães")
        );
        assert_eq!(
            r.text("club_logo"),
            Some("https://cdn.sofifa.net/meta/team/1/120.png")
        );
    }

    #[test]
    fn test_club_page_missing_fields_are_null() {
        let r = parse_club_page(
            "https://sofifa.com/team/112606/deportivo-pasto/",
            "<html><div class=\"profile\"><h1>112606</h1></div></html>",
        );
        assert_eq!(r.text("name"), Some("Deportivo Pasto"));
        assert_eq!(r.source_id.as_deref(), Some("112606"));
        assert!(r.get("league").is_null());
        assert!(r.get("club_worth_eur").is_null());
        assert!(r.get("top_players").is_null());
    }

    struct PageMap(std::collections::HashMap<String, String>);

    impl crate::fetch::Fetcher for PageMap {
        fn fetch(&self, url: &str) -> Result<String> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("HTTP 404 for {}", url))
        }
    }

    #[test]
    fn test_club_urls_then_club_pages() {
        let dir = tempfile::tempdir().unwrap();
        let settings = crate::config::Settings {
            data_dir: dir.path().to_path_buf(),
            retry_delay_secs: 0,
            page_delay_secs: 0,
            max_retries: 0,
            ..Default::default()
        };
        let pages = PageMap(
            [
                ("https://sofifa.com/teams?type=club", CLUB_LISTING),
                ("https://sofifa.com/team/1/arsenal/", CLUB_PAGE),
            ]
            .into_iter()
            .map(|(u, b)| (u.to_string(), b.to_string()))
            .collect(),
        );
        let rt = Runtime::with_fetcher(
            settings.clone(),
            crate::league::LeagueTable::default(),
            Box::new(pages),
        );

        let urls = run_club_urls(
            &rt,
            settings.crawl_options(),
            Some("https://sofifa.com/teams?type=club"),
        )
        .unwrap();
        assert_eq!(urls.new_items, 2);
        // later listing pages are missing; each is skipped up to the last offset
        assert_eq!(urls.pages_skipped, 11);
        assert_eq!(urls.state.cursor, CLUBS_MAX_OFFSET + PAGE_SIZE);

        // real madrid's page is missing and gets skipped
        let clubs = run_clubs(&rt, settings.crawl_options()).unwrap();
        assert_eq!(clubs.new_items, 1);
        let written = std::fs::read_to_string(rt.paths().sofifa_clubs()).unwrap();
        assert!(written.starts_with("club_id,name,league"));
        assert!(written.contains("Emirates Stadium"));
    }
}
