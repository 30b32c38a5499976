//! Environment-specific config overlays copied into the package before building.
//!
//! Overlay directories are applied in order, so a product-specific directory
//! listed after a shared one wins on name clashes. Files are only ever
//! added or overwritten.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What an overlay pass did. Missing directories are reported, not fatal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OverlayReport {
    /// Package-target-relative paths written, in application order
    pub copied: Vec<PathBuf>,
    /// Overlay directories that did not exist
    pub missing_dirs: Vec<PathBuf>,
    /// Set when the package has no target directory; nothing was copied
    pub missing_target: Option<PathBuf>,
}

impl OverlayReport {
    pub fn is_degraded(&self) -> bool {
        self.missing_target.is_some() || !self.missing_dirs.is_empty()
    }
}

/// Copy every file matching `patterns` from each of `dirs` into
/// `package_root/target`, preserving paths relative to the overlay directory.
pub fn apply_overlays(
    dirs: &[PathBuf],
    patterns: &[String],
    package_root: &Path,
    target: &Path,
) -> Result<OverlayReport, OverlayError> {
    let mut report = OverlayReport::default();
    let target_dir = package_root.join(target);

    if !target_dir.is_dir() {
        tracing::warn!(
            path = %target_dir.display(),
            "package config directory not found; skipping overlays"
        );
        report.missing_target = Some(target_dir);
        return Ok(report);
    }

    for dir in dirs {
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "config overrides directory not found");
            report.missing_dirs.push(dir.clone());
            continue;
        }

        let matched = matching_files(dir, patterns)?;
        if matched.is_empty() {
            tracing::info!(path = %dir.display(), "no config override files found");
        }

        for relative in matched {
            let src = dir.join(&relative);
            let dst = target_dir.join(&relative);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|e| OverlayError::Create {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            std::fs::copy(&src, &dst).map_err(|e| OverlayError::CopyFile {
                path: src.clone(),
                source: e,
            })?;
            tracing::debug!(file = %relative.display(), "config override copied");
            report.copied.push(relative);
        }
    }

    Ok(report)
}

/// Regular files under `dir` matching any pattern, relative to `dir`, sorted.
fn matching_files(dir: &Path, patterns: &[String]) -> Result<BTreeSet<PathBuf>, OverlayError> {
    let dir_str = dir
        .to_str()
        .ok_or_else(|| OverlayError::InvalidPath(dir.to_path_buf()))?;
    let escaped = glob::Pattern::escape(dir_str);

    let mut found = BTreeSet::new();
    for pattern in patterns {
        let full = format!("{escaped}/{pattern}");
        let paths = glob::glob(&full).map_err(|e| OverlayError::InvalidPattern {
            pattern: pattern.clone(),
            source: e,
        })?;
        for path in paths {
            let path = path.map_err(|e| OverlayError::Read {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(dir) {
                found.insert(relative.to_path_buf());
            }
        }
    }
    Ok(found)
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),
    #[error("invalid overlay pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("failed to read overlay entry {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy overlay file {path}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}
