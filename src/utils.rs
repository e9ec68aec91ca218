use std::fs;

/// Create an OSC8 file:// hyperlink for terminal output
pub fn osc8_file_link(path: &str, text: &str) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());
    format!("\x1b]8;;file://{}\x1b\\{}\x1b]8;;\x1b\\", abs_path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_falls_back_to_given_path() {
        let link = osc8_file_link("no/such/merged_clubs.csv", "merged");
        assert_eq!(
            link,
            "\x1b]8;;file://no/such/merged_clubs.csv\x1b\\merged\x1b]8;;\x1b\\"
        );
    }
}
