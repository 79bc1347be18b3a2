//! Monitor target resolution.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::MonitorConfig;
use crate::{AppError, Result};

/// What the monitor follows.
#[derive(Debug, Clone)]
pub enum MonitorTarget {
    /// A single fixed file.
    File(PathBuf),
    /// The most recently modified file in `dir` whose name matches `pattern`.
    LatestIn {
        /// Directory to scan.
        dir: PathBuf,
        /// File-name glob.
        pattern: glob::Pattern,
    },
}

impl MonitorTarget {
    /// Build the target described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file pattern is not a valid glob.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let path = config.resolved_path();
        if !config.watch_latest {
            return Ok(Self::File(path));
        }
        let pattern = glob::Pattern::new(&config.file_pattern).map_err(|err| {
            AppError::Config(format!("invalid file_pattern {}: {err}", config.file_pattern))
        })?;
        Ok(Self::LatestIn { dir: path, pattern })
    }

    /// Whether the target tracks the newest file of a directory.
    #[must_use]
    pub fn is_directory_mode(&self) -> bool {
        matches!(self, Self::LatestIn { .. })
    }
}

/// Resolve the file to follow right now. `Ok(None)` means it does not
/// exist yet.
///
/// In directory mode a `dir` that is itself a regular file is followed
/// directly.
///
/// # Errors
///
/// Returns `AppError::Monitor` if the directory cannot be read.
pub fn resolve_target(target: &MonitorTarget) -> Result<Option<PathBuf>> {
    match target {
        MonitorTarget::File(path) => Ok(path.is_file().then(|| path.clone())),
        MonitorTarget::LatestIn { dir, pattern } => {
            if dir.is_file() {
                return Ok(Some(dir.clone()));
            }
            if !dir.is_dir() {
                return Ok(None);
            }
            Ok(newest_matching(dir, pattern)?.map(|(path, _)| path))
        }
    }
}

/// Most recently modified regular file in `dir` matching `pattern`.
///
/// # Errors
///
/// Returns `AppError::Monitor` if the directory cannot be read.
pub fn newest_matching(dir: &Path, pattern: &glob::Pattern) -> Result<Option<(PathBuf, SystemTime)>> {
    let entries = fs::read_dir(dir)
        .map_err(|err| AppError::Monitor(format!("cannot read {}: {err}", dir.display())))?;

    let mut newest: Option<(PathBuf, SystemTime)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !pattern.matches(&name.to_string_lossy()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let is_newer = match &newest {
            Some((_, best)) => modified > *best,
            None => true,
        };
        if is_newer {
            newest = Some((entry.path(), modified));
        }
    }
    Ok(newest)
}
