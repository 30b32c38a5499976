//! Checks run before any stage touches the filesystem or the daemon.

use crate::client::DockerClient;
use crate::executor::DockerExecutor;
use shipyard_core::ShipyardConfig;
use std::fmt;
use std::path::{Path, PathBuf};

/// Locations the pre-flight check inspects, absolute.
#[derive(Debug, Clone)]
pub struct PreflightTargets {
    pub source: PathBuf,
    pub builder_compose: PathBuf,
    pub flavors: Vec<(String, PathBuf)>,
}

impl PreflightTargets {
    pub fn from_config(config: &ShipyardConfig, project_dir: &Path) -> Self {
        Self {
            source: project_dir.join(&config.project.source_dir),
            builder_compose: project_dir.join(&config.builder.compose_file),
            flavors: config
                .flavors
                .iter()
                .map(|f| (f.name.clone(), project_dir.join(&f.dir)))
                .collect(),
        }
    }
}

/// Probe the daemon and the required inputs. Never fails; inspect the report.
pub async fn preflight<E: DockerExecutor>(
    client: &DockerClient<E>,
    targets: &PreflightTargets,
) -> PreflightReport {
    let docker = match client.server_version().await {
        Ok(v) if !v.is_empty() => CheckResult::ok(&format!("server {v}")),
        Ok(_) => CheckResult::fail("daemon reported no server version"),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    let source = if targets.source.is_dir() {
        CheckResult::ok(&targets.source.display().to_string())
    } else {
        CheckResult::fail(&format!("{} not found", targets.source.display()))
    };

    let builder_compose = if targets.builder_compose.is_file() {
        CheckResult::ok(&targets.builder_compose.display().to_string())
    } else {
        CheckResult::fail(&format!("{} not found", targets.builder_compose.display()))
    };

    let flavors = targets
        .flavors
        .iter()
        .map(|(name, dir)| FlavorCheck {
            name: name.clone(),
            result: if dir.is_dir() {
                CheckResult::ok(&dir.display().to_string())
            } else {
                CheckResult::fail(&format!("{} not found; flavor will be skipped", dir.display()))
            },
        })
        .collect();

    PreflightReport {
        docker,
        source,
        builder_compose,
        flavors,
    }
}

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub docker: CheckResult,
    pub source: CheckResult,
    pub builder_compose: CheckResult,
    /// Missing flavor directories are warnings, not failures
    pub flavors: Vec<FlavorCheck>,
}

impl PreflightReport {
    /// True when every required check passed.
    pub fn all_passed(&self) -> bool {
        self.docker.passed && self.source.passed && self.builder_compose.passed
    }

    /// Names of required checks that failed.
    pub fn failures(&self) -> Vec<&'static str> {
        [
            ("docker", &self.docker),
            ("source", &self.source),
            ("builder compose", &self.builder_compose),
        ]
        .into_iter()
        .filter(|(_, r)| !r.passed)
        .map(|(name, _)| name)
        .collect()
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pre-flight check")?;
        writeln!(f, "----------------")?;
        for (label, result) in [
            ("Docker", &self.docker),
            ("Source tree", &self.source),
            ("Builder compose", &self.builder_compose),
        ] {
            writeln!(f, "{label:<18}{:<4}{}", result.icon(), result.detail)?;
        }
        for flavor in &self.flavors {
            let icon = if flavor.result.passed { "OK" } else { "WARN" };
            writeln!(
                f,
                "{:<18}{icon:<4}{}",
                format!("Flavor {}", flavor.name),
                flavor.result.detail
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

#[derive(Debug, Clone)]
pub struct FlavorCheck {
    pub name: String,
    pub result: CheckResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavor_warnings_do_not_fail_report() {
        let report = PreflightReport {
            docker: CheckResult::ok("server 27.0.1"),
            source: CheckResult::ok("/src"),
            builder_compose: CheckResult::ok("/builder/docker-compose.yaml"),
            flavors: vec![FlavorCheck {
                name: "native".to_owned(),
                result: CheckResult::fail("missing"),
            }],
        };
        assert!(report.all_passed());
        assert!(report.failures().is_empty());
        assert!(report.to_string().contains("WARN"));
    }

    #[test]
    fn failures_name_required_checks() {
        let report = PreflightReport {
            docker: CheckResult::fail("daemon down"),
            source: CheckResult::ok("/src"),
            builder_compose: CheckResult::fail("missing"),
            flavors: Vec::new(),
        };
        assert!(!report.all_passed());
        assert_eq!(report.failures(), vec!["docker", "builder compose"]);
        assert!(report.to_string().contains("NG"));
    }
}
