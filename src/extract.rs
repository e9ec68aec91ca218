//! Helpers shared by the per-source page extractors

use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Selector};
use std::sync::OnceLock;

/// Compile a CSS selector literal
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("Invalid selector '{}': {:?}", css, e))
}

/// Whitespace-collapsed text content of an element
pub fn element_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Placeholder-aware cell: "-", "—", "N/A" and empty cells mean unknown
pub fn clean_cell(text: &str) -> Option<String> {
    let t = text.trim();
    match t {
        "" | "-" | "--" | "—" | "–" | "?" => None,
        _ if t.eq_ignore_ascii_case("n/a") => None,
        _ => Some(t.to_string()),
    }
}

/// Numeric identifier from a fixed path segment, e.g. `/team/<id>/`
pub fn id_from_url(url: &str, segment: &str) -> Option<String> {
    let pattern = format!(r"/{}/(\d+)", regex::escape(segment));
    let re = Regex::new(&pattern).ok()?;
    re.captures(url).map(|c| c[1].to_string())
}

/// Resolve a possibly relative href against the page it was found on
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*(bn|b|m|mio\.?|k|th\.?)?$").unwrap_or_else(|e| panic!("{}", e))
    })
}

/// Value in euros of a money string like "€52.30m", "€1.2bn" or "€500k".
///
/// Currency symbols and thousands separators are ignored. Anything that is
/// not a recognizable amount is `None`.
pub fn parse_money(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '€' | '$' | '£' | ',' | ' ' | '\u{a0}'))
        .collect();
    let caps = money_re().captures(&cleaned)?;
    let amount: f64 = caps[1].parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(s) if s == "bn" || s == "b" => 1e9,
        Some(s) if s.starts_with('m') => 1e6,
        Some(_) => 1e3,
    };
    Some((amount * multiplier).round())
}

/// Title-cased name from a URL slug such as `/team/1/manchester-united/`
pub fn name_from_slug(url: &str, segment: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let parts: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let idx = parts.iter().position(|p| *p == segment)?;
    // skip the numeric id after the marker segment
    let slug = parts
        .iter()
        .skip(idx + 1)
        .find(|p| !p.chars().all(|c| c.is_ascii_digit()))?;
    let words: Vec<String> = slug
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}
