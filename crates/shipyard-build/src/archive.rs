//! Source snapshotting.
//!
//! Strategies are tried in order. The first one that applies to the source
//! tree and succeeds wins; a failing strategy hands over to the next one
//! instead of aborting the run.

use glob::Pattern;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Paths never shipped by the filtered walk: VCS metadata, dependency
/// directories, logs, caches, lockfiles, editor and OS metadata.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".github",
    ".gitignore",
    ".dockerignore",
    ".env",
    ".env.*",
    "vendor",
    "node_modules",
    "tmp",
    "logs",
    "cache",
    ".idea",
    ".vscode",
    ".vs",
    ".settings",
    "*.log",
    "*.cache",
    ".ddev",
    ".devcontainer",
    "composer.lock",
    "package-lock.json",
    ".phpunit.result.cache",
    "__pycache__",
    "*.pyc",
    ".DS_Store",
    "Thumbs.db",
];

/// Exact names plus glob patterns, matched against every path segment.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    names: HashSet<String>,
    patterns: Vec<Pattern>,
}

impl ExclusionSet {
    /// Entries containing glob metacharacters become patterns; the rest match exactly.
    pub fn new<I, S>(entries: I) -> Result<Self, ArchiveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = HashSet::new();
        let mut patterns = Vec::new();
        for entry in entries {
            let entry = entry.as_ref();
            if entry.contains(['*', '?', '[']) {
                let pattern = Pattern::new(entry).map_err(|e| ArchiveError::InvalidPattern {
                    pattern: entry.to_owned(),
                    source: e,
                })?;
                patterns.push(pattern);
            } else {
                names.insert(entry.to_owned());
            }
        }
        Ok(Self { names, patterns })
    }

    pub fn standard() -> Result<Self, ArchiveError> {
        Self::new(DEFAULT_EXCLUDES)
    }

    pub fn matches_segment(&self, segment: &str) -> bool {
        self.names.contains(segment) || self.patterns.iter().any(|p| p.matches(segment))
    }

    /// True if any segment of `relative` is excluded, so an excluded
    /// directory takes its whole subtree with it.
    pub fn excludes(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(segment) => self.matches_segment(&segment.to_string_lossy()),
            _ => false,
        })
    }
}

/// One way of turning a source tree into a tar file.
pub trait ArchiveStrategy {
    fn name(&self) -> &'static str;

    /// Whether this strategy can be attempted on `source` at all.
    fn applies(&self, source: &Path) -> bool;

    fn write(&self, source: &Path, dest: &Path) -> Result<(), ArchiveError>;
}

/// Exports committed content with `git archive HEAD`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitExport;

impl ArchiveStrategy for GitExport {
    fn name(&self) -> &'static str {
        "git-archive"
    }

    fn applies(&self, source: &Path) -> bool {
        source.join(".git").exists()
    }

    fn write(&self, source: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(source)
            .args(["archive", "--format=tar", "HEAD", "-o"])
            .arg(dest)
            .output()
            .map_err(|e| ArchiveError::GitCommand {
                detail: "failed to execute git archive".to_owned(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArchiveError::GitFailed {
                detail: format!(
                    "git archive exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }
        Ok(())
    }
}

/// Walks the tree and tars everything the [`ExclusionSet`] lets through.
#[derive(Debug, Clone)]
pub struct FilteredWalk {
    exclusions: ExclusionSet,
}

impl FilteredWalk {
    pub fn new(exclusions: ExclusionSet) -> Self {
        Self { exclusions }
    }

    fn walk(
        &self,
        builder: &mut tar::Builder<File>,
        root: &Path,
        dir: &Path,
        dest: &Path,
    ) -> Result<(), ArchiveError> {
        let mut entries = std::fs::read_dir(dir)
            .and_then(|rd| rd.collect::<Result<Vec<_>, _>>())
            .map_err(|e| ArchiveError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if path == dest {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if self.exclusions.excludes(relative) {
                tracing::debug!(path = %relative.display(), "excluded from archive");
                continue;
            }

            let io_err = |e| ArchiveError::Io {
                path: path.clone(),
                source: e,
            };
            if entry.file_type().map_err(io_err)?.is_dir() {
                builder.append_dir(relative, &path).map_err(io_err)?;
                self.walk(builder, root, &path, dest)?;
            } else {
                builder
                    .append_path_with_name(&path, relative)
                    .map_err(io_err)?;
            }
        }
        Ok(())
    }
}

impl ArchiveStrategy for FilteredWalk {
    fn name(&self) -> &'static str {
        "filtered-walk"
    }

    fn applies(&self, _source: &Path) -> bool {
        true
    }

    fn write(&self, source: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let file = File::create(dest).map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);

        self.walk(&mut builder, source, source, dest)?;

        builder.finish().map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: e,
        })
    }
}

/// Which strategy produced an archive, and where it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub strategy: &'static str,
}

/// Ordered list of [`ArchiveStrategy`]s.
pub struct Archiver {
    strategies: Vec<Box<dyn ArchiveStrategy>>,
}

impl Archiver {
    /// `git archive` first, then the filtered walk over [`DEFAULT_EXCLUDES`].
    pub fn standard() -> Result<Self, ArchiveError> {
        Ok(Self::with_strategies(vec![
            Box::new(GitExport),
            Box::new(FilteredWalk::new(ExclusionSet::standard()?)),
        ]))
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ArchiveStrategy>>) -> Self {
        Self { strategies }
    }

    /// Snapshot `source` into the tar file at `dest`.
    ///
    /// The caller owns `dest` afterwards and is expected to delete it once
    /// unpacked.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::SourceNotFound`] before anything is written if `source` is missing
    /// - the last strategy's error if every applicable strategy failed
    pub fn archive(&self, source: &Path, dest: &Path) -> Result<ArchiveReport, ArchiveError> {
        if !source.is_dir() {
            return Err(ArchiveError::SourceNotFound(source.to_path_buf()));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut last_error = None;
        for strategy in self.strategies.iter().filter(|s| s.applies(source)) {
            tracing::info!(
                strategy = strategy.name(),
                source = %source.display(),
                "archiving source"
            );
            match strategy.write(source, dest) {
                Ok(()) => {
                    return Ok(ArchiveReport {
                        path: dest.to_path_buf(),
                        strategy: strategy.name(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "archive strategy failed; trying next"
                    );
                    remove_partial(dest);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ArchiveError::NoStrategy(source.to_path_buf())))
    }
}

fn remove_partial(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %dest.display(), error = %e, "failed to remove partial archive");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("invalid exclusion pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
    #[error("failed to archive {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no archive strategy applies to {0}")]
    NoStrategy(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn standard() -> ExclusionSet {
        ExclusionSet::standard().unwrap()
    }

    #[test]
    fn exact_names_match() {
        let set = standard();
        assert!(set.matches_segment("vendor"));
        assert!(set.matches_segment(".git"));
        assert!(set.matches_segment("composer.lock"));
        assert!(!set.matches_segment("src"));
    }

    #[test]
    fn glob_patterns_match() {
        let set = standard();
        assert!(set.matches_segment("error.log"));
        assert!(set.matches_segment(".env.production"));
        assert!(set.matches_segment("module.pyc"));
        assert!(!set.matches_segment("logger.php"));
    }

    #[test]
    fn any_segment_excludes_subtree() {
        let set = standard();
        assert!(set.excludes(Path::new("vendor/foo.php")));
        assert!(set.excludes(Path::new("plugins/Foo/node_modules/x/index.js")));
        assert!(set.excludes(Path::new("webroot/debug.log")));
        assert!(!set.excludes(Path::new("src/bar.php")));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let err = ExclusionSet::new(["[unclosed"]).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidPattern { .. }));
    }

    proptest! {
        #[test]
        fn excluded_directory_prunes_any_descendant(
            prefix in proptest::collection::vec("[a-z]{1,8}", 0..3),
            excluded in proptest::sample::select(vec!["vendor", "node_modules", ".git", "cache", "tmp"]),
            suffix in proptest::collection::vec("[a-z]{1,8}", 0..3),
        ) {
            let set = standard();
            let mut path = PathBuf::new();
            for p in &prefix { path.push(p); }
            path.push(excluded);
            for s in &suffix { path.push(s); }
            prop_assert!(set.excludes(&path));
        }

        #[test]
        fn plain_source_paths_survive(
            segments in proptest::collection::vec("[a-z]{1,8}\\.php|[a-z]{1,8}", 1..5),
        ) {
            let set = standard();
            let path: PathBuf = segments.iter().collect();
            let blocked = ["vendor", "tmp", "logs", "cache"];
            prop_assume!(!segments.iter().any(|s| blocked.contains(&s.as_str())));
            prop_assert!(!set.excludes(&path));
        }
    }
}
