//! Deployment staging: one bundle per flavor under the run's distribution root.
//!
//! Each flavor is a [`FlavorBuilder`]. The stager only knows the shared
//! contract (output directory, artifact, environment), so new flavors are
//! added through configuration without touching the pipeline.

use shipyard_core::{BuildArtifact, DeploymentBundle, FlavorConfig, PipelineRun};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Inputs shared by every flavor of one run.
#[derive(Debug, Clone)]
pub struct FlavorContext<'a> {
    pub run: &'a PipelineRun,
    pub artifact: &'a BuildArtifact,
    /// Where this flavor must write its bundle
    pub output_dir: PathBuf,
}

impl FlavorContext<'_> {
    /// Variables exported to the flavor's build step.
    pub fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "SHIPYARD_DIST_ROOT".to_owned(),
                self.run.paths.dist_root.display().to_string(),
            ),
            (
                "SHIPYARD_OUTPUT_DIR".to_owned(),
                self.output_dir.display().to_string(),
            ),
            (
                "SHIPYARD_BINARY".to_owned(),
                self.artifact.path.display().to_string(),
            ),
            ("SHIPYARD_RUN_ID".to_owned(), self.run.id.to_string()),
            ("BUILD_DATE".to_owned(), self.run.build_date.to_string()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlavorOutcome {
    Built(DeploymentBundle),
    Skipped { reason: String },
}

/// A deployment packaging style producing a bundle from the shared artifact.
pub trait FlavorBuilder {
    fn name(&self) -> &str;

    fn build(&self, ctx: &FlavorContext<'_>) -> Result<FlavorOutcome, StageError>;
}

/// A flavor whose bundle is produced by a shell script in its own directory.
#[derive(Debug, Clone)]
pub struct ScriptFlavor {
    name: String,
    dir: PathBuf,
    script: String,
}

impl ScriptFlavor {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            script: script.into(),
        }
    }

    /// Build from config, resolving the flavor directory against `project_dir`.
    pub fn from_config(config: &FlavorConfig, project_dir: &Path) -> Self {
        Self::new(&config.name, project_dir.join(&config.dir), &config.script)
    }

    pub fn script_path(&self) -> PathBuf {
        self.dir.join(&self.script)
    }
}

impl FlavorBuilder for ScriptFlavor {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, ctx: &FlavorContext<'_>) -> Result<FlavorOutcome, StageError> {
        let script = self.script_path();
        if !script.is_file() {
            return Ok(FlavorOutcome::Skipped {
                reason: format!("build script not found: {}", script.display()),
            });
        }

        std::fs::create_dir_all(&ctx.output_dir).map_err(|e| StageError::Create {
            path: ctx.output_dir.clone(),
            source: e,
        })?;

        tracing::info!(
            flavor = %self.name,
            script = %script.display(),
            output = %ctx.output_dir.display(),
            "building flavor"
        );
        let status = Command::new("bash")
            .arg(&script)
            .current_dir(&self.dir)
            .envs(ctx.env())
            .status()
            .map_err(|e| StageError::ScriptSpawn {
                flavor: self.name.clone(),
                source: e,
            })?;

        if !status.success() {
            return Err(StageError::ScriptFailed {
                flavor: self.name.clone(),
                detail: format!("{} exited with {status}", script.display()),
            });
        }

        Ok(FlavorOutcome::Built(DeploymentBundle {
            flavor: self.name.clone(),
            dir: ctx.output_dir.clone(),
            artifact: ctx.artifact.path.clone(),
        }))
    }
}

/// Result of staging every flavor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub bundles: Vec<DeploymentBundle>,
    /// `(flavor, reason)` for each flavor that produced nothing
    pub skipped: Vec<(String, String)>,
}

impl StageReport {
    pub fn bundle(&self, flavor: &str) -> Option<&DeploymentBundle> {
        self.bundles.iter().find(|b| b.flavor == flavor)
    }
}

pub struct DeploymentStager {
    flavors: Vec<Box<dyn FlavorBuilder>>,
}

impl DeploymentStager {
    pub fn new(flavors: Vec<Box<dyn FlavorBuilder>>) -> Self {
        Self { flavors }
    }

    /// One [`ScriptFlavor`] per configured flavor.
    pub fn from_config(flavors: &[FlavorConfig], project_dir: &Path) -> Self {
        Self::new(
            flavors
                .iter()
                .map(|f| Box::new(ScriptFlavor::from_config(f, project_dir)) as Box<dyn FlavorBuilder>)
                .collect(),
        )
    }

    /// Build every flavor in order.
    ///
    /// A skipped flavor does not stop the others. A flavor whose build step
    /// runs and fails aborts staging.
    ///
    /// # Errors
    ///
    /// - [`StageError::ArtifactNotExecutable`] if the artifact is missing or not executable
    /// - any error returned by a flavor's build step
    pub fn stage(
        &self,
        run: &PipelineRun,
        artifact: &BuildArtifact,
    ) -> Result<StageReport, StageError> {
        ensure_executable(&artifact.path)?;

        let dist_root = &run.paths.dist_root;
        std::fs::create_dir_all(dist_root).map_err(|e| StageError::Create {
            path: dist_root.clone(),
            source: e,
        })?;

        let mut report = StageReport::default();
        for flavor in &self.flavors {
            let ctx = FlavorContext {
                run,
                artifact,
                output_dir: run.paths.flavor_output(flavor.name()),
            };
            match flavor.build(&ctx)? {
                FlavorOutcome::Built(bundle) => {
                    tracing::info!(flavor = flavor.name(), dir = %bundle.dir.display(), "bundle staged");
                    report.bundles.push(bundle);
                }
                FlavorOutcome::Skipped { reason } => {
                    tracing::warn!(flavor = flavor.name(), %reason, "flavor skipped");
                    report.skipped.push((flavor.name().to_owned(), reason));
                }
            }
        }
        Ok(report)
    }
}

fn ensure_executable(path: &Path) -> Result<(), StageError> {
    let metadata = std::fs::metadata(path).map_err(|e| StageError::ArtifactNotExecutable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(StageError::ArtifactNotExecutable {
            path: path.to_path_buf(),
            detail: format!("mode {:o}", metadata.permissions().mode() & 0o7777),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("artifact {path} is not an executable file ({detail})")]
    ArtifactNotExecutable { path: PathBuf, detail: String },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to run build script for flavor '{flavor}'")]
    ScriptSpawn {
        flavor: String,
        source: std::io::Error,
    },
    #[error("flavor '{flavor}' build failed: {detail}")]
    ScriptFailed { flavor: String, detail: String },
}
