pub mod installer;

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use which::which;

/// Resolves the full path to a tool binary.
/// Search order: $HARRIER_TOOLS_DIR → ./tools/{name} → ./{name} → System PATH
pub fn resolve_tool(tool_name: &str) -> Option<String> {
    let binary_name = if cfg!(target_os = "windows") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    };

    // 1. Explicit override directory
    if let Ok(dir) = std::env::var("HARRIER_TOOLS_DIR") {
        let override_path = PathBuf::from(dir).join(&binary_name);
        if override_path.exists() {
            return Some(override_path.to_string_lossy().to_string());
        }
    }

    // 2. Check ./tools/ directory (where the installer downloads to)
    let tools_path = PathBuf::from("./tools").join(&binary_name);
    if tools_path.exists() {
        return Some(tools_path.to_string_lossy().to_string());
    }

    // 3. Check current directory
    let local_path = PathBuf::from("./").join(&binary_name);
    if local_path.exists() {
        return Some(local_path.to_string_lossy().to_string());
    }

    // 4. Check system PATH
    if let Ok(path) = which(&binary_name) {
        return Some(path.to_string_lossy().to_string());
    }

    None
}

/// Reads a target list file: one target per line, blank lines and
/// `#` comments skipped, surrounding whitespace trimmed.
pub fn load_targets(path: &str) -> io::Result<Vec<String>> {
    let file = File::open(Path::new(path))?;
    let reader = io::BufReader::new(file);
    let targets = reader
        .lines()
        .filter_map(|line| {
            let line = line.ok()?;
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                None
            } else {
                Some(trimmed)
            }
        })
        .collect();
    Ok(targets)
}

/// Single-quotes a value for inclusion in a shell command line.
pub fn shell_escape(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_targets_skips_blanks_and_comments() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "example.com").unwrap();
        writeln!(file, "  ").unwrap();
        writeln!(file, "# staging hosts").unwrap();
        writeln!(file, "  app.example.com  ").unwrap();

        let targets = load_targets(file.path().to_str().unwrap()).unwrap();
        assert_eq!(targets, vec!["example.com", "app.example.com"]);
    }

    #[test]
    fn test_load_targets_missing_file_errors() {
        assert!(load_targets("/nonexistent/targets.txt").is_err());
    }

    #[test]
    fn test_shell_escape_passthrough_for_plain_values() {
        assert_eq!(shell_escape("example.com"), "example.com");
        assert_eq!(shell_escape("10.0.0.1:8080"), "10.0.0.1:8080");
    }

    #[test]
    fn test_shell_escape_quotes_metacharacters() {
        assert_eq!(shell_escape("a;rm -rf"), "'a;rm -rf'");
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_resolve_tool_honors_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("sometool");
        std::fs::write(&tool, "").unwrap();

        std::env::set_var("HARRIER_TOOLS_DIR", dir.path());
        let resolved = resolve_tool("sometool");
        std::env::remove_var("HARRIER_TOOLS_DIR");

        assert_eq!(resolved, Some(tool.to_string_lossy().to_string()));
    }
}
