use anyhow::Context;
use shipyard_build::{
    Archiver, DeploymentStager, OverlayReport, StageReport, apply_overlays, package,
};
use shipyard_core::{BuildArtifact, PipelineRun, ShipyardConfig};
use shipyard_docker::{
    BuilderCleanup, CleanupOutcome, DockerClient, DockerExecutor, ExtractRequest, ImageStatus,
    PreflightTargets, RolloutController, RolloutOutcome, build_app_image, ensure_base_image,
    extract_artifact, preflight, start_builder,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything a finished run produced, for the summary.
#[derive(Debug)]
pub(crate) struct PipelineReport {
    pub artifact: BuildArtifact,
    pub staged: StageReport,
    pub overlay: Option<OverlayReport>,
    pub base_image: Option<ImageStatus>,
    pub cleanup: CleanupOutcome,
    pub rollout: Option<RolloutSummary>,
}

#[derive(Debug)]
pub(crate) struct RolloutSummary {
    pub outcome: RolloutOutcome,
    pub env_file: Option<PathBuf>,
    pub url: String,
}

/// Output of the stages that run while the builder stack may be up.
struct BuildOutput {
    artifact: BuildArtifact,
    staged: StageReport,
    overlay: Option<OverlayReport>,
    base_image: Option<ImageStatus>,
}

/// Run the pipeline: pre-flight → package → image → build → extract → stage
/// → cleanup → rollout.
///
/// Builder cleanup runs exactly once after the build stages, whether they
/// succeeded or not. Rollout only starts from a successful build.
pub(crate) async fn run<E: DockerExecutor>(
    client: &DockerClient<E>,
    config: &ShipyardConfig,
    run: &PipelineRun,
) -> anyhow::Result<PipelineReport> {
    check_prerequisites(client, config, run).await?;

    let cleanup = BuilderCleanup::new(run.paths.builder_compose.clone());
    let built = build_stages(client, config, run).await;
    let cleanup = cleanup.run(client).await;

    if run.stages.keep_package {
        println!("Keeping package directory: {}", run.paths.package.display());
    } else if let Err(e) = package::remove_dir(&run.paths.package) {
        tracing::warn!(error = %e, "failed to remove package directory");
    }

    let built = built?;

    let rollout = if run.stages.skip_deploy {
        None
    } else {
        Some(roll_out(client, config, run, &built.staged).await?)
    };

    Ok(PipelineReport {
        artifact: built.artifact,
        staged: built.staged,
        overlay: built.overlay,
        base_image: built.base_image,
        cleanup,
        rollout,
    })
}

async fn check_prerequisites<E: DockerExecutor>(
    client: &DockerClient<E>,
    config: &ShipyardConfig,
    run: &PipelineRun,
) -> anyhow::Result<()> {
    println!("Running pre-flight checks...");
    let report = preflight(
        client,
        &PreflightTargets::from_config(config, &run.paths.project_dir),
    )
    .await;

    let mut failures = report.failures();
    // A reused package does not need the source tree
    if run.stages.skip_archive {
        failures.retain(|f| *f != "source");
    }
    if !failures.is_empty() {
        println!("{report}");
        anyhow::bail!("pre-flight check failed: {}", failures.join(", "));
    }
    Ok(())
}

async fn build_stages<E: DockerExecutor>(
    client: &DockerClient<E>,
    config: &ShipyardConfig,
    run: &PipelineRun,
) -> anyhow::Result<BuildOutput> {
    let paths = &run.paths;

    if run.stages.clean {
        println!("Cleaning package directory...");
        package::clean_dir(&paths.package)?;
    }

    let overlay = if run.stages.skip_archive {
        if !paths.package.is_dir() {
            anyhow::bail!(
                "package directory {} does not exist; run without --skip-archive",
                paths.package.display()
            );
        }
        println!("Reusing package directory: {}", paths.package.display());
        None
    } else {
        Some(prepare_package(config, run)?)
    };

    let base_image = if run.stages.skip_base {
        println!("Skipping base image check");
        None
    } else {
        println!("Checking base image {}...", config.builder.base_image);
        Some(
            ensure_base_image(
                client,
                &paths.builder_compose,
                &config.builder,
                run.stages.rebuild_base,
            )
            .await?,
        )
    };

    println!("Building application binary...");
    build_app_image(client, &paths.builder_compose, &config.builder, run.build_date).await?;
    start_builder(client, &paths.builder_compose, &config.builder).await?;

    println!("Extracting binary...");
    let artifact = extract_artifact(
        client,
        &ExtractRequest {
            compose_file: &paths.builder_compose,
            service: &config.builder.app_service,
            container_path: &config.builder.artifact_path,
            dest: &paths.artifact,
        },
    )
    .await?;
    println!(
        "Binary: {} ({:.1} MB)",
        artifact.path.display(),
        artifact.size_mib()
    );

    println!("Staging deployment bundles...");
    let staged =
        DeploymentStager::from_config(&config.flavors, &paths.project_dir).stage(run, &artifact)?;
    for (flavor, reason) in &staged.skipped {
        println!("Warning: skipped flavor '{flavor}': {reason}");
    }

    Ok(BuildOutput {
        artifact,
        staged,
        overlay,
        base_image,
    })
}

/// Archive the source, unpack it into a fresh package directory, then overlay configs.
fn prepare_package(config: &ShipyardConfig, run: &PipelineRun) -> anyhow::Result<OverlayReport> {
    let paths = &run.paths;

    println!("Archiving {}...", paths.source.display());
    let archive = Archiver::standard()?.archive(&paths.source, &paths.archive)?;
    println!("Archive created with {}", archive.strategy);

    package::clean_dir(&paths.package)?;
    package::unpack_archive(&archive.path, &paths.package)?;
    std::fs::remove_file(&archive.path)
        .with_context(|| format!("failed to remove archive {}", archive.path.display()))?;

    println!("Applying config overlays...");
    let overlay = apply_overlays(
        &paths.overlay_dirs,
        &config.overlay.patterns,
        &paths.package,
        &config.overlay.target,
    )?;
    for dir in &overlay.missing_dirs {
        println!("Warning: config overrides directory not found: {}", dir.display());
    }
    if let Some(target) = &overlay.missing_target {
        println!("Warning: package config directory not found: {}", target.display());
    }
    println!("Copied {} config override file(s)", overlay.copied.len());
    Ok(overlay)
}

async fn roll_out<E: DockerExecutor>(
    client: &DockerClient<E>,
    config: &ShipyardConfig,
    run: &PipelineRun,
    staged: &StageReport,
) -> anyhow::Result<RolloutSummary> {
    let flavor = &config.deploy.flavor;
    let bundle = staged.bundle(flavor).ok_or_else(|| {
        anyhow::anyhow!("no '{flavor}' bundle was staged; cannot deploy (use --skip-deploy)")
    })?;

    let compose_file = bundle.dir.join(&config.deploy.compose_file);
    if !compose_file.is_file() {
        anyhow::bail!(
            "bundle for '{flavor}' has no compose file at {}",
            compose_file.display()
        );
    }

    let env_file = resolve_env_file(run.env_file.as_deref(), &bundle.dir)?;
    let mut env = run.overrides.to_env();
    env.insert("BUILD_DATE".to_owned(), run.build_date.to_string());

    let port = effective_port(&env, env_file.as_deref(), config.deploy.default_port);

    println!("Deploying '{flavor}' bundle from {}...", bundle.dir.display());
    let controller = RolloutController {
        compose_file,
        service: config.deploy.service.clone(),
        env_file: env_file.clone(),
        timeout: run.health_timeout,
        interval: run.poll_interval,
        log_tail: config.deploy.log_tail,
    };
    let outcome = controller.roll_out(client, &env).await?;

    Ok(RolloutSummary {
        outcome,
        env_file,
        url: format!("http://localhost:{port}"),
    })
}

/// `--env-file`, else `<bundle>/.env`, else `.env` created from `<bundle>/.env.example`.
pub(crate) fn resolve_env_file(
    explicit: Option<&Path>,
    bundle_dir: &Path,
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            anyhow::bail!("env file not found: {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let env = bundle_dir.join(".env");
    if env.is_file() {
        return Ok(Some(env));
    }

    let example = bundle_dir.join(".env.example");
    if example.is_file() {
        std::fs::copy(&example, &env).with_context(|| {
            format!("failed to create {} from {}", env.display(), example.display())
        })?;
        println!(
            "Warning: created {} from .env.example; edit it with real credentials",
            env.display()
        );
        return Ok(Some(env));
    }

    tracing::warn!(dir = %bundle_dir.display(), "no env file found; compose defaults apply");
    Ok(None)
}

/// `APP_PORT` from the overrides, else from the env file, else the configured default.
pub(crate) fn effective_port(
    overrides: &BTreeMap<String, String>,
    env_file: Option<&Path>,
    default_port: u16,
) -> u16 {
    if let Some(value) = overrides.get("APP_PORT") {
        match value.parse() {
            Ok(port) => return port,
            Err(e) => tracing::warn!(%value, error = %e, "APP_PORT override is not a port"),
        }
    }
    let Some(path) = env_file else {
        return default_port;
    };

    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read env file");
            return default_port;
        }
    };
    for entry in entries {
        match entry {
            Ok((key, value)) if key == "APP_PORT" => match value.trim().parse() {
                Ok(port) => return port,
                Err(e) => {
                    tracing::warn!(%value, error = %e, "APP_PORT in env file is not a port");
                    return default_port;
                }
            },
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparsable env line");
            }
        }
    }
    default_port
}
