use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod checkpoint;
mod config;
mod crawl;
mod extract;
mod fetch;
mod league;
mod link;
mod normalize;
mod resolve;
mod similarity;
mod sofifa;
mod transfermarkt;
mod types;
mod utils;

use config::{Runtime, Settings};
use crawl::{CrawlOptions, CrawlReport};
use link::{Entity, LinkJob};
use resolve::ResolverConfig;
use similarity::ScorerKind;
use utils::osc8_file_link;

#[derive(Parser)]
#[command(name = "club-linker")]
#[command(about = "Crawl SoFIFA and Transfermarkt and link their clubs and players")]
struct Cli {
    /// Settings file (defaults to club-linker.conl when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Quiet mode - only warnings and errors are logged
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl sofifa.com
    Sofifa {
        #[command(subcommand)]
        action: SofifaAction,
    },
    /// Crawl transfermarkt.com
    Tm {
        #[command(subcommand)]
        action: TmAction,
    },
    /// Link SoFIFA records to Transfermarkt records
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
}

#[derive(Subcommand)]
enum SofifaAction {
    /// Collect club page URLs from the club listing
    ClubUrls {
        #[command(flatten)]
        crawl: CrawlArgs,
        /// Listing URL; `{offset}` is substituted when present
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Collect player page URLs from the player listing
    PlayerUrls {
        #[command(flatten)]
        crawl: CrawlArgs,
        /// Listing URL; `{offset}` is substituted when present
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Scrape every collected club page
    Clubs {
        #[command(flatten)]
        crawl: CrawlArgs,
    },
}

#[derive(Subcommand)]
enum TmAction {
    /// Scrape the competitions the SoFIFA clubs play in
    Clubs {
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Scrape squads of the Transfermarkt clubs found on SoFIFA
    Players {
        #[command(flatten)]
        crawl: CrawlArgs,
    },
}

#[derive(Subcommand)]
enum LinkAction {
    /// SoFIFA clubs against Transfermarkt clubs, scoped by canonical league
    Clubs {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// SoFIFA players against Transfermarkt players by name
    Players {
        #[command(flatten)]
        link: LinkArgs,
    },
}

#[derive(Args)]
struct CrawlArgs {
    /// Stop after this many records in total
    #[arg(short, long)]
    limit: Option<usize>,
    /// Delete the existing checkpoint and start over
    #[arg(long, conflicts_with = "no_resume")]
    fresh: bool,
    /// Refuse to continue from an existing checkpoint
    #[arg(long)]
    no_resume: bool,
    /// Visit at most this many new pages in a detail crawl
    #[arg(long)]
    target_limit: Option<usize>,
}

impl CrawlArgs {
    fn options(&self, settings: &Settings) -> CrawlOptions {
        CrawlOptions {
            item_cap: self.limit,
            resume: !self.no_resume,
            fresh: self.fresh,
            target_limit: self.target_limit,
            ..settings.crawl_options()
        }
    }
}

#[derive(Args)]
struct LinkArgs {
    /// SoFIFA table (left side)
    #[arg(long)]
    left: Option<PathBuf>,
    /// Transfermarkt table (right side)
    #[arg(long)]
    right: Option<PathBuf>,
    /// Output directory (defaults to <data_dir>/Merged)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Minimum fuzzy score, 0-100
    #[arg(long)]
    threshold: Option<f64>,
    /// Only fuzzy-match within the same canonical league
    #[arg(long)]
    scope_league: bool,
    #[arg(long, value_enum)]
    scorer: Option<ScorerKind>,
    /// Name column of the left table
    #[arg(long)]
    left_name: Option<String>,
    /// Name column of the right table
    #[arg(long)]
    right_name: Option<String>,
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_crawl(name: &str, report: &CrawlReport, path: &Path) {
    let path = path.to_string_lossy();
    println!("\n{} complete!", name);
    println!("  Stopped: {:?}", report.stop_reason);
    println!(
        "  Pages: {} fetched, {} skipped",
        report.pages_fetched, report.pages_skipped
    );
    println!(
        "  Records: {} new, {} total",
        report.new_items,
        report.state.items().len()
    );
    println!("  Output: {}", osc8_file_link(&path, &path));
}

fn run_link(rt: &Runtime, entity: Entity, args: LinkArgs) -> Result<()> {
    let paths = rt.paths();
    let (default_left, default_right) = entity.default_inputs(&paths);
    let (mut left_fields, mut right_fields) = entity.default_fields();
    if let Some(name) = args.left_name {
        left_fields.name = name;
    }
    if let Some(name) = args.right_name {
        right_fields.name = name;
    }

    let mut config = ResolverConfig::new(left_fields, right_fields);
    config.threshold = args.threshold.unwrap_or(rt.settings.threshold);
    config.scope_by_league = args.scope_league;
    config.scorer = args.scorer.unwrap_or(rt.settings.scorer);
    if !(0.0..=100.0).contains(&config.threshold) {
        anyhow::bail!("--threshold must be between 0 and 100");
    }

    let job = LinkJob {
        entity,
        left: args.left.unwrap_or(default_left),
        right: args.right.unwrap_or(default_right),
        out_dir: args.output.unwrap_or_else(|| paths.merged_dir()),
        config,
    };
    let summary = link::run(&job, &rt.leagues)?;

    println!("\nLinking complete!");
    println!("  Exact matches: {}", summary.exact);
    println!("  Fuzzy matches: {}", summary.fuzzy);
    println!("  Unresolved: {}", summary.unresolved);
    println!("  Unmatched Transfermarkt records: {}", summary.unmatched_right);
    for file in [
        &summary.merged_file,
        &summary.unresolved_file,
        &summary.unmatched_file,
        &summary.summary_file,
    ] {
        let file = file.to_string_lossy();
        println!("  {}", osc8_file_link(&file, &file));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let settings = Settings::load(cli.config.as_deref())?;
    let rt = Runtime::new(settings)?;
    rt.stop.stop_on_interrupt()?;
    let paths = rt.paths();

    match cli.command {
        Commands::Sofifa { action } => match action {
            SofifaAction::ClubUrls { crawl, base_url } => {
                let report =
                    sofifa::run_club_urls(&rt, crawl.options(&rt.settings), base_url.as_deref())?;
                print_crawl("Club URL crawl", &report, &paths.sofifa_club_urls());
            }
            SofifaAction::PlayerUrls { crawl, base_url } => {
                let report =
                    sofifa::run_player_urls(&rt, crawl.options(&rt.settings), base_url.as_deref())?;
                print_crawl("Player URL crawl", &report, &paths.sofifa_player_urls());
            }
            SofifaAction::Clubs { crawl } => {
                let report = sofifa::run_clubs(&rt, crawl.options(&rt.settings))?;
                print_crawl("Club crawl", &report, &paths.sofifa_clubs());
            }
        },
        Commands::Tm { action } => {
            let (name, outcome) = match action {
                TmAction::Clubs { crawl } => (
                    "Transfermarkt club crawl",
                    transfermarkt::run_clubs(&rt, crawl.options(&rt.settings))?,
                ),
                TmAction::Players { crawl } => (
                    "Transfermarkt player crawl",
                    transfermarkt::run_players(&rt, crawl.options(&rt.settings))?,
                ),
            };
            print_crawl(name, &outcome.report, &outcome.raw_path);
            let filtered = outcome.filtered_path.to_string_lossy();
            println!(
                "  Filtered: {} rows in {}",
                outcome.filtered,
                osc8_file_link(&filtered, &filtered)
            );
        }
        Commands::Link { action } => match action {
            LinkAction::Clubs { link } => run_link(&rt, Entity::Clubs, link)?,
            LinkAction::Players { link } => run_link(&rt, Entity::Players, link)?,
        },
    }

    Ok(())
}
