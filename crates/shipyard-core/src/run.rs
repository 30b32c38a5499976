//! The immutable description of one pipeline invocation.
//!
//! A [`PipelineRun`] is resolved once from `shipyard.toml` and the command
//! line, then handed by reference to every stage. No stage computes paths
//! on its own, so a later stage can never observe a directory an earlier
//! stage forgot to set.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ShipyardConfig;

/// Upper bound on the poll interval as a fraction of the health timeout.
const MAX_TICKS_PER_TIMEOUT: u32 = 20;

/// Timestamp-derived identifier, e.g. `20261016-093012`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(String);

impl RunId {
    pub fn from_time(started: DateTime<Utc>) -> Self {
        Self(started.format("%Y%m%d-%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which stages to skip, and the clean/rebuild toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageFlags {
    /// Reuse the existing package directory instead of archiving the source
    pub skip_archive: bool,
    /// Do not check for or build the base image
    pub skip_base: bool,
    /// Remove the base image before checking for it
    pub rebuild_base: bool,
    /// Stop after staging bundles
    pub skip_deploy: bool,
    /// Wipe the package directory before anything else
    pub clean: bool,
    /// Leave the package directory in place after the build
    pub keep_package: bool,
}

/// Deployment overrides layered over the process environment during rollout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub app_port: Option<u16>,
    pub app_bind_ip: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_username: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
}

impl EnvOverrides {
    /// Variables to export, keyed by the names the deployment compose file reads.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                env.insert(key.to_owned(), v);
            }
        };
        put("APP_PORT", self.app_port.map(|p| p.to_string()));
        put("APP_BIND_IP", self.app_bind_ip.clone());
        put("DB_HOST", self.db_host.clone());
        put("DB_PORT", self.db_port.map(|p| p.to_string()));
        put("DB_USERNAME", self.db_username.clone());
        put("DB_PASSWORD", self.db_password.clone());
        put("DB_NAME", self.db_name.clone());
        env
    }

    pub fn is_empty(&self) -> bool {
        self.to_env().is_empty()
    }
}

/// Every filesystem location a run touches, absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub project_dir: PathBuf,
    pub source: PathBuf,
    pub package: PathBuf,
    pub archive: PathBuf,
    pub builder_compose: PathBuf,
    pub overlay_dirs: Vec<PathBuf>,
    /// `<dist_dir>/<run-id>`
    pub dist_root: PathBuf,
    /// `<dist_root>/<binary_name>`
    pub artifact: PathBuf,
}

impl RunPaths {
    /// Output directory of one deployment flavor.
    pub fn flavor_output(&self, flavor: &str) -> PathBuf {
        self.dist_root.join(flavor)
    }

    /// Resolve a config-relative path against the project directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.project_dir.join(path)
    }
}

/// Caller-supplied options, usually straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub stages: StageFlags,
    pub overrides: EnvOverrides,
    pub env_file: Option<PathBuf>,
    pub health_timeout: Option<Duration>,
}

/// Top-level unit of work. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: RunId,
    /// Unix seconds, exported as `BUILD_DATE`
    pub build_date: i64,
    pub stages: StageFlags,
    pub overrides: EnvOverrides,
    /// Explicit env file for the rollout, already made absolute
    pub env_file: Option<PathBuf>,
    pub paths: RunPaths,
    pub health_timeout: Duration,
    pub poll_interval: Duration,
}

impl PipelineRun {
    /// Resolve a run starting now.
    pub fn new(
        config: &ShipyardConfig,
        project_dir: &Path,
        options: RunOptions,
    ) -> crate::Result<Self> {
        Self::at(config, project_dir, options, Utc::now())
    }

    /// Resolve a run with an explicit start time.
    pub fn at(
        config: &ShipyardConfig,
        project_dir: &Path,
        options: RunOptions,
        started: DateTime<Utc>,
    ) -> crate::Result<Self> {
        let project_dir =
            std::path::absolute(project_dir).map_err(|e| crate::Error::ProjectDirResolve {
                path: project_dir.to_path_buf(),
                source: e,
            })?;

        let id = RunId::from_time(started);
        let dist_root = project_dir
            .join(&config.project.dist_dir)
            .join(id.as_str());
        let artifact = dist_root.join(&config.builder.binary_name);

        let paths = RunPaths {
            source: project_dir.join(&config.project.source_dir),
            package: project_dir.join(&config.project.package_dir),
            archive: project_dir.join(&config.project.archive_path),
            builder_compose: project_dir.join(&config.builder.compose_file),
            overlay_dirs: config
                .overlay
                .dirs
                .iter()
                .map(|d| project_dir.join(d))
                .collect(),
            dist_root,
            artifact,
            project_dir,
        };

        let env_file = options
            .env_file
            .map(|p| {
                std::path::absolute(&p).map_err(|e| crate::Error::ProjectDirResolve {
                    path: p.clone(),
                    source: e,
                })
            })
            .transpose()?;

        let health_timeout = options
            .health_timeout
            .unwrap_or(Duration::from_secs(config.deploy.health_timeout_secs));
        if health_timeout.is_zero() {
            return Err(crate::Error::ZeroHealthTimeout);
        }
        let poll_interval = Duration::from_secs(config.deploy.poll_interval_secs)
            .min(health_timeout / MAX_TICKS_PER_TIMEOUT);

        tracing::debug!(
            run_id = %id,
            source = %paths.source.display(),
            dist_root = %paths.dist_root.display(),
            timeout_secs = health_timeout.as_secs(),
            "pipeline run resolved"
        );

        Ok(Self {
            id,
            build_date: started.timestamp(),
            stages: options.stages,
            overrides: options.overrides,
            env_file,
            paths,
            health_timeout,
            poll_interval,
        })
    }
}
