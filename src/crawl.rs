//! Resumable crawling of paginated listings and per-target detail pages
//!
//! One crawl owns one checkpoint file for its whole run. The loop is strictly
//! sequential: fetch, extract, persist, advance. Cancellation (cap reached,
//! pagination exhausted, stop signal) is only looked at between pages.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, Schema};
use crate::fetch::{is_challenge_page, Fetcher, UrlTemplate};
use crate::types::RawRecord;

/// How a listing signals its last page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Stop once the offset passes this value
    MaxOffset(u64),
    /// Keep going while each page reports a next page
    HasNext,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub delay: Duration,
}

/// Settings shared by listing and target crawls
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub item_cap: Option<usize>,
    /// Continue from an existing checkpoint
    pub resume: bool,
    /// Discard any existing checkpoint before starting
    pub fresh: bool,
    pub retry: RetryPolicy,
    /// Pause between page fetches
    pub page_delay: Duration,
    /// In has-next mode, give up after this many unreadable pages in a row
    pub max_consecutive_skips: usize,
    /// Target crawls only: visit at most this many new targets
    pub target_limit: Option<usize>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            item_cap: None,
            resume: true,
            fresh: false,
            retry: RetryPolicy {
                max_retries: 3,
                delay: Duration::from_secs(10),
            },
            page_delay: Duration::from_secs(2),
            max_consecutive_skips: 3,
            target_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingConfig {
    pub template: UrlTemplate,
    pub offset_step: u64,
    pub pagination: Pagination,
    pub options: CrawlOptions,
}

/// One parsed listing page
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RawRecord>,
    pub has_next: bool,
}

/// A detail-stage unit of work: one entity, one or more candidate URLs
#[derive(Debug, Clone)]
pub struct Target {
    pub key: String,
    /// Source id of the entity, when the target URL carries one
    pub id: Option<String>,
    pub urls: Vec<String>,
}

/// Cooperative cancellation flag, checked between pages
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Trip the flag on Ctrl-C so the running crawl ends after the page in
    /// flight. A second Ctrl-C exits immediately.
    pub fn stop_on_interrupt(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start signal runtime")?;
        let signal = self.clone();
        thread::Builder::new()
            .name("interrupt".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                    warn!("Interrupted, stopping after the current page (Ctrl-C again to quit now)");
                    signal.stop();
                    if tokio::signal::ctrl_c().await.is_ok() {
                        std::process::exit(130);
                    }
                })
            })
            .context("Failed to spawn signal thread")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    CapReached,
    Stopped,
    TooManySkips,
    TargetLimit,
}

/// Progress of a crawl, rebuilt from the checkpoint on resume
#[derive(Debug, Clone, Default)]
pub struct CrawlState {
    /// Listing offset or number of targets walked; only increases
    pub cursor: u64,
    cap: Option<usize>,
    /// Column that scopes identities, see `Schema::identity_scope`
    scope: Option<&'static str>,
    seen: HashSet<String>,
    items: Vec<RawRecord>,
}

impl CrawlState {
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            ..Default::default()
        }
    }

    /// State holding everything a checkpoint already contains.
    ///
    /// The last target in the file may have been cut short by an item cap,
    /// so it stays open and is visited again.
    pub fn rehydrate(cap: Option<usize>, schema: &Schema, records: Vec<RawRecord>) -> Self {
        let mut state = Self::new(cap);
        state.scope = schema.identity_scope;
        let last_target = records.last().and_then(|r| schema.target_of(r));
        for record in records {
            if let Some(target) = schema.target_of(&record) {
                if Some(&target) != last_target.as_ref() {
                    state.seen.insert(target_identity(&target));
                }
            }
            let keep = !state.is_full() && !state.is_known(&record);
            let ids = state.identities(&record);
            state.seen.extend(ids);
            if keep {
                state.items.push(record);
            }
        }
        state
    }

    /// Dedup identities of a record, prefixed by its scope cell when the
    /// checkpoint has one
    fn identities(&self, record: &RawRecord) -> Vec<String> {
        let ids = record.identities();
        match self.scope {
            Some(column) => {
                let scope = record.get(column).to_cell();
                ids.into_iter()
                    .map(|id| format!("{}={}|{}", column, scope, id))
                    .collect()
            }
            None => ids,
        }
    }

    pub fn is_known(&self, record: &RawRecord) -> bool {
        self.identities(record).iter().any(|id| self.seen.contains(id))
    }

    pub fn has_target(&self, key: &str) -> bool {
        self.seen.contains(&target_identity(key))
    }

    /// A target is done when its key or its entity id is already stored
    fn is_done(&self, target: &Target) -> bool {
        self.has_target(&target.key)
            || target
                .id
                .as_ref()
                .map_or(false, |id| self.seen.contains(&format!("id:{}", id)))
    }

    pub fn is_full(&self) -> bool {
        self.cap.map_or(false, |cap| self.items.len() >= cap)
    }

    /// Take a record unless it is a duplicate or the cap is reached
    fn accept(&mut self, record: RawRecord) -> bool {
        if self.is_full() || self.is_known(&record) {
            return false;
        }
        let ids = self.identities(&record);
        self.seen.extend(ids);
        self.items.push(record);
        true
    }

    fn mark_target(&mut self, key: &str) {
        self.seen.insert(target_identity(key));
    }

    pub fn items(&self) -> &[RawRecord] {
        &self.items
    }
}

fn target_identity(key: &str) -> String {
    format!("target:{}", key)
}

#[derive(Debug)]
pub struct CrawlReport {
    pub state: CrawlState,
    pub stop_reason: StopReason,
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    pub new_items: usize,
}

/// Fetch a page, retrying failures and challenge pages.
/// `None` once every attempt failed.
pub fn fetch_with_retry(fetcher: &dyn Fetcher, url: &str, retry: &RetryPolicy) -> Option<String> {
    let attempts = retry.max_retries + 1;
    for attempt in 1..=attempts {
        match fetcher.fetch(url) {
            Ok(body) if is_challenge_page(&body) => {
                warn!("Challenge page at {} (attempt {}/{})", url, attempt, attempts);
            }
            Ok(body) => return Some(body),
            Err(e) => {
                warn!("Fetch failed (attempt {}/{}): {:#}", attempt, attempts, e);
            }
        }
        if attempt < attempts && !retry.delay.is_zero() {
            thread::sleep(retry.delay);
        }
    }
    None
}

fn open_checkpoint(
    path: &Path,
    schema: Schema,
    options: &CrawlOptions,
) -> Result<(CheckpointStore, CrawlState)> {
    let (store, existing) = CheckpointStore::open(path, schema, options.fresh)?;
    if !existing.is_empty() && !options.resume {
        bail!(
            "Checkpoint {} already has {} rows; resume it or start fresh",
            path.display(),
            existing.len()
        );
    }
    if store.rows() > 0 {
        info!("Resuming from {} ({} rows)", store.path().display(), store.rows());
    }
    let state = CrawlState::rehydrate(options.item_cap, &schema, existing);
    Ok((store, state))
}

/// Walk a paginated listing into a checkpoint.
///
/// `parse` receives the page URL and body. Every page's new items are on
/// disk before the next page is requested. With an item cap the crawl stops
/// at exactly the cap, truncating the last page.
pub fn crawl_listing<F>(
    fetcher: &dyn Fetcher,
    checkpoint: &Path,
    schema: Schema,
    config: &ListingConfig,
    parse: F,
    stop: &StopSignal,
) -> Result<CrawlReport>
where
    F: Fn(&str, &str) -> Page,
{
    if config.offset_step == 0 {
        bail!("Offset step must be positive");
    }
    let options = &config.options;
    let (mut store, mut state) = open_checkpoint(checkpoint, schema, options)?;
    debug!("Listing {} in steps of {}", config.template.as_str(), config.offset_step);

    let mut pages_fetched = 0;
    let mut pages_skipped = 0;
    let mut new_items = 0;
    let mut consecutive_skips = 0;
    let mut visited = 0;

    let stop_reason = loop {
        if stop.is_stopped() {
            break StopReason::Stopped;
        }
        if state.is_full() {
            break StopReason::CapReached;
        }
        if let Pagination::MaxOffset(max) = config.pagination {
            if state.cursor > max {
                break StopReason::Exhausted;
            }
        }

        if visited > 0 && !options.page_delay.is_zero() {
            thread::sleep(options.page_delay);
        }
        visited += 1;

        let url = config.template.page_url(state.cursor);
        let Some(body) = fetch_with_retry(fetcher, &url, &options.retry) else {
            pages_skipped += 1;
            consecutive_skips += 1;
            warn!("Skipping {} after {} attempts", url, options.retry.max_retries + 1);
            state.cursor += config.offset_step;
            if config.pagination == Pagination::HasNext
                && consecutive_skips >= options.max_consecutive_skips
            {
                break StopReason::TooManySkips;
            }
            continue;
        };
        consecutive_skips = 0;
        pages_fetched += 1;

        let page = parse(&url, &body);
        let found = page.items.len();
        let mut accepted = Vec::new();
        for item in page.items {
            if state.is_full() {
                break;
            }
            if state.accept(item.clone()) {
                accepted.push(item);
            }
        }
        store.append(&accepted)?;
        new_items += accepted.len();
        info!(
            "Offset {}: {} items, {} new (total {})",
            state.cursor,
            found,
            accepted.len(),
            state.items().len()
        );

        state.cursor += config.offset_step;

        if config.pagination == Pagination::HasNext && !page.has_next {
            break StopReason::Exhausted;
        }
    };

    info!(
        "Crawl finished ({:?}): {} pages, {} skipped, {} new items",
        stop_reason, pages_fetched, pages_skipped, new_items
    );
    Ok(CrawlReport {
        state,
        stop_reason,
        pages_fetched,
        pages_skipped,
        new_items,
    })
}

/// Visit each target's candidate URLs in order until one yields records.
///
/// Targets whose key is already in the checkpoint are skipped, which makes
/// the stage resumable. `parse` gets the target, the URL and the body.
pub fn crawl_targets<F>(
    fetcher: &dyn Fetcher,
    checkpoint: &Path,
    schema: Schema,
    options: &CrawlOptions,
    targets: &[Target],
    parse: F,
    stop: &StopSignal,
) -> Result<CrawlReport>
where
    F: Fn(&Target, &str, &str) -> Vec<RawRecord>,
{
    if schema.target_column.is_none() {
        bail!("Target crawl needs a target column in its checkpoint schema");
    }
    let (mut store, mut state) = open_checkpoint(checkpoint, schema, options)?;

    let mut pages_fetched = 0;
    let mut pages_skipped = 0;
    let mut new_items = 0;
    let mut visited = 0;
    let mut targets_visited = 0;
    let mut stop_reason = StopReason::Exhausted;

    for (i, target) in targets.iter().enumerate() {
        if stop.is_stopped() {
            stop_reason = StopReason::Stopped;
            break;
        }
        if state.is_full() {
            stop_reason = StopReason::CapReached;
            break;
        }
        if state.is_done(target) {
            debug!("Already have {}", target.key);
            state.cursor = i as u64 + 1;
            continue;
        }
        if options.target_limit.map_or(false, |limit| targets_visited >= limit) {
            stop_reason = StopReason::TargetLimit;
            break;
        }
        targets_visited += 1;

        let mut accepted = Vec::new();
        let mut found_any = false;
        let mut truncated = false;
        for url in &target.urls {
            if visited > 0 && !options.page_delay.is_zero() {
                thread::sleep(options.page_delay);
            }
            visited += 1;

            let Some(body) = fetch_with_retry(fetcher, url, &options.retry) else {
                pages_skipped += 1;
                continue;
            };
            pages_fetched += 1;

            let records = parse(target, url, &body);
            if records.is_empty() {
                warn!("No records at {}", url);
                continue;
            }
            found_any = true;
            for record in records {
                if state.is_full() {
                    truncated = true;
                    break;
                }
                if state.accept(record.clone()) {
                    accepted.push(record);
                }
            }
            break;
        }

        if truncated {
            debug!("{} cut short by the item cap", target.key);
        } else if found_any {
            state.mark_target(&target.key);
        } else {
            warn!("Nothing found for {}", target.key);
        }
        store.append(&accepted)?;
        new_items += accepted.len();
        state.cursor = i as u64 + 1;
        info!(
            "[{}/{}] {}: {} new (total {})",
            i + 1,
            targets.len(),
            target.key,
            accepted.len(),
            state.items().len()
        );
    }

    info!(
        "Crawl finished ({:?}): {} pages, {} skipped, {} new items",
        stop_reason, pages_fetched, pages_skipped, new_items
    );
    Ok(CrawlReport {
        state,
        stop_reason,
        pages_fetched,
        pages_skipped,
        new_items,
    })
}
