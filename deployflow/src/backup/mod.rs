//! Configuration backup before the first mutation.
//!
//! Each configured file is copied once to `<file><suffix>`. An existing copy
//! is never overwritten, so the oldest snapshot survives repeated runs and
//! stays usable as a rollback source. Failures are warnings, never fatal.

use crate::events::{names, EventSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default suffix appended to backed-up files.
pub const DEFAULT_SUFFIX: &str = ".backup";

/// A backup copy written during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// The original file.
    pub source: PathBuf,
    /// The copy.
    pub backup: PathBuf,
    /// Hex SHA-256 of the copied contents.
    pub sha256: String,
}

/// A file that could not be backed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFailure {
    /// The original file.
    pub source: PathBuf,
    /// What went wrong.
    pub error: String,
}

/// What a snapshot did for each configured file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Copies written now.
    pub created: Vec<BackupEntry>,
    /// Copies that already existed and were left untouched.
    pub preserved: Vec<PathBuf>,
    /// Configured files that do not exist.
    pub missing: Vec<PathBuf>,
    /// Files whose copy could not be written.
    pub failed: Vec<BackupFailure>,
}

impl BackupSummary {
    /// Returns true if nothing went wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Snapshots configuration files before they are mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBackup {
    paths: Vec<PathBuf>,
    suffix: String,
}

impl ConfigBackup {
    /// Creates a backup over a set of files.
    #[must_use]
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }

    /// Sets the suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Returns the configured files.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Returns where the copy of `path` goes.
    #[must_use]
    pub fn backup_path(&self, path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    /// Copies every configured file that has no backup yet.
    pub async fn snapshot(&self, events: &dyn EventSink) -> BackupSummary {
        let mut summary = BackupSummary::default();

        for source in &self.paths {
            let backup = self.backup_path(source);
            match self.copy_once(source, &backup).await {
                Ok(Some(sha256)) => {
                    info!(source = %source.display(), backup = %backup.display(), %sha256, "Configuration backed up");
                    events.try_emit(
                        names::BACKUP_CREATED,
                        Some(json!({ "source": source, "backup": backup, "sha256": sha256 })),
                    );
                    summary.created.push(BackupEntry {
                        source: source.clone(),
                        backup,
                        sha256,
                    });
                }
                Ok(None) => {
                    debug!(backup = %backup.display(), "Backup already present, leaving it untouched");
                    summary.preserved.push(backup);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(source = %source.display(), "Configuration file not found, nothing to back up");
                    summary.missing.push(source.clone());
                }
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "Configuration backup failed");
                    events.try_emit(
                        names::BACKUP_FAILED,
                        Some(json!({ "source": source, "error": e.to_string() })),
                    );
                    summary.failed.push(BackupFailure {
                        source: source.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary
    }

    /// Returns the digest of a new copy, or `None` when a copy already exists.
    async fn copy_once(&self, source: &Path, backup: &Path) -> std::io::Result<Option<String>> {
        let contents = tokio::fs::read(source).await?;
        if tokio::fs::try_exists(backup).await? {
            return Ok(None);
        }

        let sha256 = hex::encode(Sha256::digest(&contents));
        let target = backup.to_path_buf();
        let written = tokio::task::spawn_blocking(move || {
            write_new(&target, |file| file.write_all(&contents))
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(written.then_some(sha256))
    }
}

/// Writes `path` through a temporary sibling and links it into place.
///
/// A failed write removes the temporary file, so `path` is either complete
/// or absent. Returns `false` if `path` appeared in the meantime.
fn write_new<F>(path: &Path, fill: F) -> std::io::Result<bool>
where
    F: FnOnce(&mut NamedTempFile) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    fill(&mut file)?;
    file.as_file().sync_all()?;

    match file.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}
