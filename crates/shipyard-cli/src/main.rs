mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shipyard",
    about = "Build and deploy self-contained FrankenPHP binaries"
)]
#[command(version)]
struct Cli {
    /// Project directory containing shipyard.toml
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check docker, the source tree, and the build recipes
    Check,
    /// Package the source, build the binary, stage bundles, and roll out
    Build(commands::BuildArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check => commands::check(&cli.project_dir).await?,
        Commands::Build(args) => commands::build(&cli.project_dir, args).await?,
    }

    Ok(())
}
