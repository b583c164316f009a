//! Shared `KEY=VALUE` environment file.

use crate::errors::ConfigError;
use std::collections::BTreeMap;
use std::path::Path;

/// Parses a shell-style env file.
///
/// Blank lines and `#` comments are ignored, an `export ` prefix is
/// accepted, and one layer of matching single or double quotes around a
/// value is removed. Later assignments win.
#[must_use]
pub fn parse_env_file(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").map_or(line, str::trim_start);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Reads `key` from the env file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read and
/// [`ConfigError::MissingHost`] if the key is absent or empty.
pub fn read_host(path: &Path, key: &str) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_env_file(&contents)
        .remove(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingHost {
            key: key.to_string(),
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_env_file_variants() {
        let parsed = parse_env_file(
            "# workspace\n\
             DATABRICKS_HOST=https://adb-1.azuredatabricks.net\n\
             export CATALOG=\"transit\"\n\
             SCHEMA='gtfs_rt'\n\
             \n\
             BROKEN LINE\n\
             =nokey\n",
        );

        assert_eq!(parsed.get("DATABRICKS_HOST").unwrap(), "https://adb-1.azuredatabricks.net");
        assert_eq!(parsed.get("CATALOG").unwrap(), "transit");
        assert_eq!(parsed.get("SCHEMA").unwrap(), "gtfs_rt");
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_later_assignment_wins() {
        let parsed = parse_env_file("A=1\nA=2\n");
        assert_eq!(parsed.get("A").unwrap(), "2");
    }

    #[test]
    fn test_read_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.env");
        std::fs::write(&path, "export DATABRICKS_HOST='https://adb.example'\n").unwrap();

        assert_eq!(read_host(&path, "DATABRICKS_HOST").unwrap(), "https://adb.example");
        assert!(matches!(
            read_host(&path, "OTHER_HOST"),
            Err(ConfigError::MissingHost { .. })
        ));
    }

    #[test]
    fn test_empty_host_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.env");
        std::fs::write(&path, "DATABRICKS_HOST=\"\"\n").unwrap();
        assert!(matches!(
            read_host(&path, "DATABRICKS_HOST"),
            Err(ConfigError::MissingHost { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_host(&dir.path().join("nope.env"), "DATABRICKS_HOST").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
