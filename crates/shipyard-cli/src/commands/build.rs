use super::build_pipeline::{self, PipelineReport};
use shipyard_core::{EnvOverrides, PipelineRun, RunOptions, ShipyardConfig, StageFlags};
use shipyard_docker::{CleanupOutcome, DockerClient, ImageStatus, RolloutOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, clap::Args)]
pub struct BuildArgs {
    /// Reuse the existing package directory instead of archiving the source
    #[arg(long)]
    skip_archive: bool,
    /// Do not check for or build the base image
    #[arg(long)]
    skip_base: bool,
    /// Remove and rebuild the base image
    #[arg(long, conflicts_with = "skip_base")]
    rebuild_base: bool,
    /// Stop after staging deployment bundles
    #[arg(long)]
    skip_deploy: bool,
    /// Wipe the package directory before building
    #[arg(long)]
    clean: bool,
    /// Keep the package directory after building
    #[arg(long)]
    keep_package: bool,
    /// Env file passed to docker compose during rollout
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
    /// Override APP_PORT
    #[arg(long, value_name = "N")]
    app_port: Option<u16>,
    /// Override APP_BIND_IP
    #[arg(long, value_name = "IP")]
    app_bind_ip: Option<String>,
    /// Override DB_HOST
    #[arg(long)]
    db_host: Option<String>,
    /// Override DB_PORT
    #[arg(long)]
    db_port: Option<u16>,
    /// Override DB_USERNAME
    #[arg(long)]
    db_username: Option<String>,
    /// Override DB_PASSWORD
    #[arg(long)]
    db_password: Option<String>,
    /// Override DB_NAME
    #[arg(long)]
    db_name: Option<String>,
    /// Seconds to wait for the deployed service to report healthy
    #[arg(long, value_name = "SECS")]
    health_timeout: Option<u64>,
}

impl BuildArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            stages: StageFlags {
                skip_archive: self.skip_archive,
                skip_base: self.skip_base,
                rebuild_base: self.rebuild_base,
                skip_deploy: self.skip_deploy,
                clean: self.clean,
                keep_package: self.keep_package,
            },
            overrides: EnvOverrides {
                app_port: self.app_port,
                app_bind_ip: self.app_bind_ip,
                db_host: self.db_host,
                db_port: self.db_port,
                db_username: self.db_username,
                db_password: self.db_password,
                db_name: self.db_name,
            },
            env_file: self.env_file,
            health_timeout: self.health_timeout.map(Duration::from_secs),
        }
    }
}

/// Build the binary, stage bundles, and optionally roll out.
pub async fn build(project_dir: &Path, args: BuildArgs) -> anyhow::Result<()> {
    let config = ShipyardConfig::load(project_dir)?;
    let run = PipelineRun::new(&config, project_dir, args.into_options())?;
    println!("Build {} → {}", run.id, run.paths.dist_root.display());

    let client = DockerClient::new();
    let report = build_pipeline::run(&client, &config, &run).await?;

    println!();
    print_summary(&report, &run);
    Ok(())
}

fn print_summary(report: &PipelineReport, run: &PipelineRun) {
    println!("Build complete");
    println!(
        "  Binary:  {} ({:.1} MB)",
        report.artifact.path.display(),
        report.artifact.size_mib()
    );
    match report.base_image {
        Some(ImageStatus::Built) => println!("  Base:    built"),
        Some(ImageStatus::Present) => println!("  Base:    reused"),
        None => {}
    }
    if let Some(overlay) = &report.overlay
        && overlay.is_degraded()
    {
        println!("  Overlay: incomplete (see warnings above)");
    }
    for bundle in &report.staged.bundles {
        println!("  Bundle:  {} → {}", bundle.flavor, bundle.dir.display());
    }
    for (flavor, reason) in &report.staged.skipped {
        println!("  Skipped: {flavor} ({reason})");
    }
    if let CleanupOutcome::Failed { detail } = &report.cleanup {
        println!("  Cleanup: failed ({detail}); run `docker compose down` manually");
    }

    let Some(rollout) = &report.rollout else {
        println!();
        println!("Deploy skipped. Next steps:");
        for bundle in &report.staged.bundles {
            println!("  cd {} && docker compose up -d --build", bundle.dir.display());
        }
        if report.staged.bundles.is_empty() {
            println!("  run a flavor's build script against {}", run.paths.dist_root.display());
        }
        return;
    };

    if let Some(env_file) = &rollout.env_file {
        println!("  Env:     {}", env_file.display());
    }
    match &rollout.outcome {
        RolloutOutcome::Healthy { elapsed, .. } => {
            println!("  Deploy:  healthy after {}s", elapsed.as_secs());
            println!();
            println!("Access: {}", rollout.url);
        }
        RolloutOutcome::TimedOut { elapsed, .. } => {
            println!(
                "  Deploy:  not healthy after {}s; it may still be starting",
                elapsed.as_secs()
            );
            println!("  Check:   docker compose logs -f");
            println!();
            println!("Access (once healthy): {}", rollout.url);
        }
    }
}
