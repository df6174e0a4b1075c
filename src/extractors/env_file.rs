//! .env file parsing utilities

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Parse `KEY=VALUE` pairs from dotenv text. Supports `export` prefixes,
/// single/double quoted values and trailing comments on unquoted values.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    let line_re = Regex::new(r"^(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*)$")
        .expect("valid regex");
    let mut vars = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(cap) = line_re.captures(line) {
            let key = cap[1].to_string();
            vars.insert(key, unquote(cap[2].trim()));
        }
    }

    vars
}

fn unquote(raw: &str) -> String {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    match raw.find(" #") {
        Some(pos) => raw[..pos].trim_end().to_string(),
        None => raw.to_string(),
    }
}

pub fn parse_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read env file {}", path.display()))?;
    Ok(parse(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let vars = parse(
            r#"
# Telegram
TELEGRAM_BOT_TOKEN=123:abc
export TELEGRAM_CHAT_ID="-100200300"
OPENAI_API_KEY='sk-test'
PORT=8080 # web server
EMPTY=
not a pair
"#,
        );

        assert_eq!(vars.get("TELEGRAM_BOT_TOKEN").map(String::as_str), Some("123:abc"));
        assert_eq!(vars.get("TELEGRAM_CHAT_ID").map(String::as_str), Some("-100200300"));
        assert_eq!(vars.get("OPENAI_API_KEY").map(String::as_str), Some("sk-test"));
        assert_eq!(vars.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(vars.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(vars.len(), 5);
    }

    #[test]
    fn test_quoted_hash_is_kept() {
        let vars = parse("PASSWORD=\"a #b\"\n");
        assert_eq!(vars.get("PASSWORD").map(String::as_str), Some("a #b"));
    }

    #[test]
    fn test_parse_file_missing() {
        assert!(parse_file(Path::new("/nonexistent/.env")).is_err());
    }
}
