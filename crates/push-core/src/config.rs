//! API credential resolution for Push.
//!
//! The daemon authenticates against the task API with a bearer key resolved
//! in priority order:
//! 1. `PUSH_API_KEY` environment variable
//! 2. `export PUSH_API_KEY=...` line in the user config file
//!    (`~/.config/push/config`, honoring `XDG_CONFIG_HOME`)
//!
//! A missing key is an operator configuration problem, not a crash: callers
//! surface it as a fatal startup error with remediation instructions.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

/// Get the user config file path (`~/.config/push/config`).
pub fn config_file_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .map(|p| p.join("push").join("config"))
}

/// Resolve the API key from the environment or the user config file.
pub fn resolve_api_key() -> Option<String> {
    if let Ok(key) = std::env::var("PUSH_API_KEY")
        && !key.is_empty()
    {
        return Some(key);
    }

    config_file_path().and_then(|path| api_key_from_file(&path))
}

/// Resolve the API key, or fail with the operator-facing remediation hint.
pub fn require_api_key() -> Result<String> {
    resolve_api_key().ok_or_else(|| {
        Error::Config(
            "No API key configured; set PUSH_API_KEY or add it to ~/.config/push/config".into(),
        )
    })
}

/// Scrape the API key from a shell-style config file.
///
/// The connect flow writes the key as an `export PUSH_API_KEY=...` line so
/// the same file can be sourced from a shell profile. Surrounding single or
/// double quotes are stripped.
pub fn api_key_from_file(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }

    let content = match read_config_file(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read config file");
            return None;
        }
    };

    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("export PUSH_API_KEY=") {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

fn read_config_file(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn reads_export_line() {
        let (_tmp, path) = write_config("export PUSH_API_KEY=pk-abc123\n");
        assert_eq!(api_key_from_file(&path).as_deref(), Some("pk-abc123"));
    }

    #[test]
    fn strips_double_quotes() {
        let (_tmp, path) = write_config("export PUSH_API_KEY=\"pk-quoted\"\n");
        assert_eq!(api_key_from_file(&path).as_deref(), Some("pk-quoted"));
    }

    #[test]
    fn strips_single_quotes() {
        let (_tmp, path) = write_config("export PUSH_API_KEY='pk-single'\n");
        assert_eq!(api_key_from_file(&path).as_deref(), Some("pk-single"));
    }

    #[test]
    fn ignores_unrelated_lines() {
        let (_tmp, path) = write_config("# push config\nexport OTHER=1\nexport PUSH_API_KEY=pk-x\n");
        assert_eq!(api_key_from_file(&path).as_deref(), Some("pk-x"));
    }

    #[test]
    fn empty_value_is_none() {
        let (_tmp, path) = write_config("export PUSH_API_KEY=\n");
        assert!(api_key_from_file(&path).is_none());
    }

    #[test]
    fn missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(api_key_from_file(&tmp.path().join("nope")).is_none());
    }
}
