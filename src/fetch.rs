//! Page fetching: the `Fetcher` seam, the HTTP client with its page cache,
//! and listing URL templates

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Url;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Markers of anti-bot interstitials served with a 200 status
const CHALLENGE_MARKERS: &[&str] = &[
    "Checking your browser",
    "Just a moment",
    "cf-browser-verification",
    "cf-challenge",
];

/// Turns a URL into page content
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<String>;
}

pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| body.contains(m))
}

/// Blocking HTTP client with an optional on-disk page cache
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    cache_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration, cache_dir: Option<PathBuf>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, cache_dir })
    }

    /// Cache file for a URL: host and path as directories, the query folded
    /// into the file name. Query bytes other than ASCII letters and digits
    /// are written as `_xx` hex, so distinct queries never share a file.
    fn url_to_cache_path(&self, url: &str) -> Option<PathBuf> {
        let cache_dir = self.cache_dir.as_ref()?;
        let (without_query, query) = match url.split_once('?') {
            Some((base, q)) => (base, Some(q)),
            None => (url, None),
        };
        let stripped = without_query
            .strip_prefix("https://")
            .or_else(|| without_query.strip_prefix("http://"))
            .unwrap_or(without_query)
            .trim_end_matches('/');

        let mut path = cache_dir.join(stripped);
        let mut file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());
        if let Some(q) = query {
            let q: String = q
                .bytes()
                .map(|b| {
                    if b.is_ascii_alphanumeric() {
                        (b as char).to_string()
                    } else {
                        format!("_{:02x}", b)
                    }
                })
                .collect();
            file_name = format!("{}__{}", file_name, q);
        }
        path.set_file_name(format!("{}.html", file_name));
        Some(path)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let cache_path = self.url_to_cache_path(url);

        if let Some(path) = cache_path.as_ref().filter(|p| p.exists()) {
            debug!("Cache hit: {}", path.display());
            return fs::read_to_string(path)
                .with_context(|| format!("Failed to read cache: {:?}", path));
        }

        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status.as_u16(), url);
        }

        let text = response
            .text()
            .with_context(|| format!("Failed to read response: {}", url))?;

        if let Some(path) = cache_path {
            if !is_challenge_page(&text) {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, &text)
                    .with_context(|| format!("Failed to write cache: {:?}", path))?;
            }
        }

        Ok(text)
    }
}

/// Base URL of a paginated listing with offset substitution
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    raw: String,
}

impl UrlTemplate {
    /// Accepts an absolute http(s) URL, optionally containing `{offset}`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let probe = raw.replace("{offset}", "0");
        let url = Url::parse(&probe).with_context(|| format!("Invalid URL template: '{}'", raw))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("URL template must be http or https: '{}'", raw);
        }
        if url.host_str().is_none() {
            bail!("URL template has no host: '{}'", raw);
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn page_url(&self, offset: u64) -> String {
        if self.raw.contains("{offset}") {
            return self.raw.replace("{offset}", &offset.to_string());
        }
        if offset == 0 {
            return self.raw.clone();
        }
        let sep = if self.raw.contains('?') { '&' } else { '?' };
        format!("{}{}offset={}", self.raw, sep, offset)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_template_offsets() {
        let t = UrlTemplate::parse("https://sofifa.com/teams?type=all").unwrap();
        assert_eq!(t.page_url(0), "https://sofifa.com/teams?type=all");
        assert_eq!(t.page_url(60), "https://sofifa.com/teams?type=all&offset=60");

        let t = UrlTemplate::parse("https://sofifa.com/players").unwrap();
        assert_eq!(t.page_url(120), "https://sofifa.com/players?offset=120");

        let t = UrlTemplate::parse("https://example.com/list/{offset}/").unwrap();
        assert_eq!(t.page_url(0), "https://example.com/list/0/");
        assert_eq!(t.page_url(30), "https://example.com/list/30/");
    }

    #[test]
    fn test_template_rejects_unusable_urls() {
        assert!(UrlTemplate::parse("").is_err());
        assert!(UrlTemplate::parse("sofifa.com/teams").is_err());
        assert!(UrlTemplate::parse("ftp://sofifa.com/teams").is_err());
        assert!(UrlTemplate::parse("not a url").is_err());
    }

    #[test]
    fn test_challenge_detection() {
        assert!(is_challenge_page("<title>Just a moment...</title>"));
        assert!(is_challenge_page("<div id=\"cf-browser-verification\">"));
        assert!(!is_challenge_page("<table><tr><td>Arsenal</td></tr></table>"));
    }

    #[test]
    fn test_fetch_success_and_error_status() {
        let server = MockServer::start();
        let ok = server.mock(|when, then| {
            when.method(GET).path("/teams");
            then.status(200).body("<html>teams</html>");
        });
        let missing = server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(404);
        });

        let fetcher = HttpFetcher::new("test-agent", Duration::from_secs(5), None).unwrap();
        assert_eq!(fetcher.fetch(&server.url("/teams")).unwrap(), "<html>teams</html>");
        assert!(fetcher.fetch(&server.url("/gone")).is_err());
        ok.assert();
        missing.assert();
    }

    #[test]
    fn test_cache_serves_repeat_requests_but_skips_challenges() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start();
        let page = server.mock(|when, then| {
            when.method(GET).path("/teams").query_param("offset", "60");
            then.status(200).body("<html>page 2</html>");
        });
        let challenge = server.mock(|when, then| {
            when.method(GET).path("/blocked");
            then.status(200).body("<title>Just a moment...</title>");
        });

        let fetcher = HttpFetcher::new(
            "test-agent",
            Duration::from_secs(5),
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        let url = server.url("/teams?offset=60");
        assert_eq!(fetcher.fetch(&url).unwrap(), "<html>page 2</html>");
        assert_eq!(fetcher.fetch(&url).unwrap(), "<html>page 2</html>");
        page.assert_hits(1);

        let blocked = server.url("/blocked");
        fetcher.fetch(&blocked).unwrap();
        fetcher.fetch(&blocked).unwrap();
        challenge.assert_hits(2);
    }

    #[test]
    fn test_cache_path_keeps_query_apart() {
        let fetcher = HttpFetcher::new(
            "test-agent",
            Duration::from_secs(5),
            Some(PathBuf::from("cache")),
        )
        .unwrap();
        let a = fetcher.url_to_cache_path("https://sofifa.com/teams?offset=0");
        let b = fetcher.url_to_cache_path("https://sofifa.com/teams?offset=60");
        assert_ne!(a, b);
        assert_ne!(
            fetcher.url_to_cache_path("https://sofifa.com/teams?a=b_c"),
            fetcher.url_to_cache_path("https://sofifa.com/teams?a_b=c")
        );
        assert_eq!(
            b,
            Some(PathBuf::from("cache/sofifa.com/teams__offset_3d60.html"))
        );
        assert_eq!(
            fetcher.url_to_cache_path("https://sofifa.com/team/1/arsenal/"),
            Some(PathBuf::from("cache/sofifa.com/team/1/arsenal.html"))
        );
    }
}
