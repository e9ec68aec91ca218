//! Text canonicalization for names and labels

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Latin letters that carry no combining mark under NFKD and would otherwise
/// be dropped or kept verbatim
fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'ø' | 'Ø' => "o",
        'ß' => "ss",
        'ł' | 'Ł' => "l",
        'đ' | 'Đ' => "d",
        'ð' | 'Ð' => "d",
        'þ' | 'Þ' => "th",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        'ı' => "i",
        _ => return None,
    })
}

/// Decompose, drop combining marks and transliterate the few letters NFKD
/// leaves alone
fn strip_marks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.nfkd() {
        if is_combining_mark(c) {
            continue;
        }
        match transliterate(c) {
            Some(s) => out.push_str(s),
            None => out.push(c),
        }
    }
    out
}

/// Canonical form of a person or club name.
///
/// Lower-cases, strips diacritics, turns anything that is not a letter into a
/// space, collapses whitespace and trims. Idempotent.
///
/// ```ignore
/// assert_eq!(normalize("José  Núñez"), "jose nunez");
/// ```
pub fn normalize(text: &str) -> String {
    let stripped: String = strip_marks(text)
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `normalize` over an optional value; `None` becomes the empty string
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Lookup key for labels such as league and country names.
///
/// Softer than `normalize`: digits and punctuation survive so that
/// "2. Bundesliga" and "Bundesliga" stay distinct. En and em dashes become
/// hyphens.
pub fn fold(text: &str) -> String {
    let stripped: String = strip_marks(text)
        .chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' => '-',
            c => c,
        })
        .flat_map(char::to_lowercase)
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_diacritics_and_spaces() {
        assert_eq!(normalize("José  Núñez"), "jose nunez");
        assert_eq!(normalize("  Thomas Müller "), "thomas muller");
        assert_eq!(normalize("Martin Ødegaard"), "martin odegaard");
        assert_eq!(normalize("Robert Lewandowski\t"), "robert lewandowski");
    }

    #[test]
    fn test_normalize_replaces_symbols_with_spaces() {
        assert_eq!(normalize("Jean-Philippe Mateta"), "jean philippe mateta");
        assert_eq!(normalize("N'Golo Kanté"), "n golo kante");
        assert_eq!(normalize("Brighton & Hove Albion 1901"), "brighton hove albion");
    }

    #[test]
    fn test_normalize_total_and_idempotent() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize("!!! 123"), "");
        for s in ["José  Núñez", "Ça Ira — FC", "Łukasz Fabiański", "ß", "Ørjan"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_fold_keeps_digits_and_hyphens() {
        assert_eq!(fold("2. Bundesliga"), "2. bundesliga");
        assert_eq!(fold("Turkish Süper Lig"), "turkish super lig");
        assert_eq!(fold("A\u{2013}League  Men"), "a-league men");
        assert_ne!(fold("2. Bundesliga"), fold("Bundesliga"));
    }
}
