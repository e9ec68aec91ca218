//! Token-order-insensitive string similarity on a 0-100 scale

use serde::{Deserialize, Serialize};

/// Scores two already-normalized names. Implementations must be pure so the
/// resolver can score candidates on several threads.
pub trait Scorer: Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Which scorer a resolver run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScorerKind {
    /// InDel ratio over alphabetically sorted tokens
    #[default]
    TokenSort,
    /// Jaro-Winkler over alphabetically sorted tokens
    TokenSortJaro,
}

impl ScorerKind {
    pub fn scorer(self) -> Box<dyn Scorer> {
        match self {
            ScorerKind::TokenSort => Box::new(TokenSortRatio),
            ScorerKind::TokenSortJaro => Box::new(TokenSortJaroWinkler),
        }
    }
}

/// `100 * (1 - indel / (len(a) + len(b)))` over the sorted token strings,
/// where `indel` counts the insertions and deletions turning one into the
/// other. "John Smith" and "Smith John" score 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSortRatio;

impl Scorer for TokenSortRatio {
    fn score(&self, a: &str, b: &str) -> f64 {
        indel_ratio(&sort_tokens(a), &sort_tokens(b))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSortJaroWinkler;

impl Scorer for TokenSortJaroWinkler {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(&sort_tokens(a), &sort_tokens(b)) * 100.0
    }
}

pub fn sort_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Normalized InDel similarity of two strings, by characters
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = lcs_len(&a, &b);
    // indel = total - 2 * lcs
    200.0 * lcs as f64 / total as f64
}

/// Longest common subsequence length, one rolling row
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut row = vec![0usize; short.len() + 1];
    for lc in long {
        let mut diag = 0;
        for (j, sc) in short.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if lc == sc {
                diag + 1
            } else {
                above.max(row[j])
            };
            diag = above;
        }
    }
    row[short.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_token_order_does_not_matter() {
        assert!(approx(TokenSortRatio.score("john smith", "smith john"), 100.0));
        assert!(approx(
            TokenSortJaroWinkler.score("john smith", "smith john"),
            100.0
        ));
    }

    #[test]
    fn test_indel_ratio_values() {
        assert!(approx(indel_ratio("", ""), 100.0));
        assert!(approx(indel_ratio("abc", ""), 0.0));
        assert!(approx(indel_ratio("abcd", "abcd"), 100.0));
        // lcs("kitten", "sitting") = 4 -> 200 * 4 / 13
        assert!(approx(indel_ratio("kitten", "sitting"), 800.0 / 13.0));
        // one extra letter in ten: 2 * 9 / 19
        assert!(approx(indel_ratio("abcdefghi", "abcdefghij"), 1800.0 / 19.0));
    }

    #[test]
    fn test_close_names_score_high_and_distant_low() {
        let s = TokenSortRatio;
        assert!(s.score("cristiano ronaldo", "cristiano ronaldo dos santos aveiro") < 80.0);
        assert!(s.score("heung min son", "son heung min") > 99.0);
        assert!(s.score("vinicius junior", "vinicius jr") >= 80.0);
        assert!(s.score("lionel messi", "harry kane") < 40.0);
    }

    #[test]
    fn test_scorer_kind_builds_matching_scorer() {
        let s = ScorerKind::default().scorer();
        assert!(approx(s.score("a b", "b a"), 100.0));
    }
}
