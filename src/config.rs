use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::crawl::{CrawlOptions, RetryPolicy, StopSignal};
use crate::fetch::{Fetcher, HttpFetcher, DEFAULT_USER_AGENT};
use crate::league::LeagueTable;
use crate::similarity::ScorerKind;

pub const DEFAULT_CONFIG_FILE: &str = "club-linker.conl";

/// Run settings, read from a CONL file (all keys optional)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub page_delay_secs: u64,
    pub max_consecutive_skips: usize,
    pub threshold: f64,
    pub scorer: ScorerKind,
    /// Replaces the built-in league table
    pub league_table: Option<PathBuf>,
    /// Keep fetched pages here and serve repeats from disk
    pub cache_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Data"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60,
            max_retries: 3,
            retry_delay_secs: 10,
            page_delay_secs: 2,
            max_consecutive_skips: 3,
            threshold: 80.0,
            scorer: ScorerKind::default(),
            league_table: None,
            cache_dir: None,
        }
    }
}

impl Settings {
    /// Settings from `path`, or from `club-linker.conl` when present.
    ///
    /// An explicitly named file must exist. `TFMKT_USER_AGENT` or `USER_AGENT`
    /// replace the configured user agent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        if let Some(ua) = env::var("TFMKT_USER_AGENT")
            .ok()
            .or_else(|| env::var("USER_AGENT").ok())
            .filter(|ua| !ua.trim().is_empty())
        {
            debug!("User agent taken from the environment");
            settings.user_agent = ua;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let settings: Settings = serde_conl::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.threshold) {
            bail!("threshold must be between 0 and 100, got {}", self.threshold);
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                delay: Duration::from_secs(self.retry_delay_secs),
            },
            page_delay: Duration::from_secs(self.page_delay_secs),
            max_consecutive_skips: self.max_consecutive_skips.max(1),
            ..CrawlOptions::default()
        }
    }
}

/// Where each stage reads and writes, under `data_dir`
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sofifa_club_urls(&self) -> PathBuf {
        self.root.join("soFIFA/Clubs/club_urls.csv")
    }

    pub fn sofifa_clubs(&self) -> PathBuf {
        self.root.join("soFIFA/Clubs/club_stats_raw.csv")
    }

    pub fn sofifa_player_urls(&self) -> PathBuf {
        self.root.join("soFIFA/Players/player_urls.csv")
    }

    /// Cleaned SoFIFA player table, produced outside this tool
    pub fn sofifa_players(&self) -> PathBuf {
        self.root.join("soFIFA/Players/player_stats_cleaned_light.csv")
    }

    pub fn tm_clubs(&self) -> PathBuf {
        self.root.join("Transfermarkt/Clubs/transfermarkt_clubs.csv")
    }

    pub fn tm_clubs_sofifa_only(&self) -> PathBuf {
        self.root.join("Transfermarkt/Clubs/transfermarkt_clubs_sofifa_only.csv")
    }

    pub fn tm_players_raw(&self) -> PathBuf {
        self.root.join("Transfermarkt/Players/transfermarkt_players_raw.csv")
    }

    pub fn tm_players(&self) -> PathBuf {
        self.root.join("Transfermarkt/Players/transfermarkt_players.csv")
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.root.join("Merged")
    }
}

/// Everything a pipeline stage needs for one run
pub struct Runtime {
    pub settings: Settings,
    pub leagues: LeagueTable,
    pub stop: StopSignal,
    fetcher: Box<dyn Fetcher>,
}

impl Runtime {
    pub fn new(settings: Settings) -> Result<Self> {
        let leagues = match &settings.league_table {
            Some(path) => LeagueTable::load(path)?,
            None => LeagueTable::builtin()?,
        };
        let fetcher = HttpFetcher::new(
            &settings.user_agent,
            Duration::from_secs(settings.timeout_secs),
            settings.cache_dir.clone(),
        )?;
        Ok(Self::with_fetcher(settings, leagues, Box::new(fetcher)))
    }

    pub fn with_fetcher(settings: Settings, leagues: LeagueTable, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            settings,
            leagues,
            stop: StopSignal::new(),
            fetcher,
        }
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.settings.data_dir)
    }
}
