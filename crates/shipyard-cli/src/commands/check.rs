use shipyard_core::ShipyardConfig;
use shipyard_docker::{DockerClient, PreflightTargets, preflight};
use std::path::Path;

pub async fn check(project_dir: &Path) -> anyhow::Result<()> {
    let config = ShipyardConfig::load(project_dir)?;
    let project_dir = std::path::absolute(project_dir)?;

    let client = DockerClient::new();
    let report = preflight(&client, &PreflightTargets::from_config(&config, &project_dir)).await;

    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("pre-flight check failed: {}", report.failures().join(", "));
    }

    println!("All required checks passed");
    Ok(())
}
