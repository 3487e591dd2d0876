//! Minimal INI parsing for the daemon's single `[main]` section (§6).

use anyhow::{Context as _, Result, bail};
use std::collections::HashMap;
use std::path::Path;

/// Parse the `[main]` section of an INI file at `path` into a flat
/// key-value map. Returns an empty map if `path` does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or contains a
/// malformed line (an entry outside any section, or a line inside
/// `[main]` that is not `key = value`).
pub fn parse_main_section(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_main_section_from_str(&content)
}

/// As [`parse_main_section`], but takes the file content directly.
///
/// # Errors
///
/// Returns an error if the content contains a malformed line.
pub fn parse_main_section_from_str(content: &str) -> Result<HashMap<String, String>> {
    let mut entries = HashMap::new();
    let mut in_main = false;

    for (line_num, line) in content.lines().enumerate() {
        let trimmed = strip_inline_comment(line.trim());
        if trimmed.is_empty() {
            continue;
        }

        if let Some(header) = parse_header(trimmed) {
            in_main = header.eq_ignore_ascii_case("main");
            continue;
        }

        if !in_main {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            bail!("invalid key-value pair at line {}: {}", line_num + 1, trimmed);
        };
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(entries)
}

fn parse_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find('#') {
        Some(0) => "",
        Some(idx) => value.get(..idx).unwrap_or("").trim_end(),
        None => value,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_main_section() {
        let content = "[main]\nninstances = 4\nnjobs = 2\n";
        let entries = parse_main_section_from_str(content).unwrap();
        assert_eq!(entries.get("ninstances"), Some(&"4".to_string()));
        assert_eq!(entries.get("njobs"), Some(&"2".to_string()));
    }

    #[test]
    fn ignores_other_sections() {
        let content = "[other]\nkey = value\n[main]\nninstances = 1\n";
        let entries = parse_main_section_from_str(content).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("ninstances"), Some(&"1".to_string()));
    }

    #[test]
    fn strips_comment_lines_and_inline_comments() {
        let content = "[main]\n# a comment\nnice = 0 # niceness\n";
        let entries = parse_main_section_from_str(content).unwrap();
        assert_eq!(entries.get("nice"), Some(&"0".to_string()));
    }

    #[test]
    fn entries_before_any_header_are_ignored() {
        let content = "orphan = 1\n[main]\nninstances = 2\n";
        let entries = parse_main_section_from_str(content).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn malformed_line_inside_main_is_an_error() {
        let content = "[main]\nnotakeyvalue\n";
        assert!(parse_main_section_from_str(content).is_err());
    }

    #[test]
    fn missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let entries = parse_main_section(&dir.path().join("nope.conf")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn reads_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autobuild.conf");
        std::fs::write(&path, "[main]\nsubmitter = rig-7\n").unwrap();
        let entries = parse_main_section(&path).unwrap();
        assert_eq!(entries.get("submitter"), Some(&"rig-7".to_string()));
    }
}
