use crate::error::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Docker and Compose operations, parameterized over the executor for testability.
pub struct DockerClient<E: DockerExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DockerExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Daemon ──

    /// Server version; fails if the daemon is unreachable.
    pub async fn server_version(&self) -> Result<String, DockerError> {
        let out = self
            .executor
            .exec(&args(["version", "--format", "{{.Server.Version}}"]))
            .await?;
        Ok(out.trim().to_owned())
    }

    // ── Images ──

    pub async fn image_exists(&self, image: &str) -> Result<bool, DockerError> {
        match self
            .executor
            .exec(&args(["image", "inspect", "--format", "{{.Id}}", image]))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_command_failure() => {
                tracing::debug!(%image, error = %e, "image not present");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Force-remove an image. Returns `false` if there was nothing to remove.
    pub async fn remove_image(&self, image: &str) -> Result<bool, DockerError> {
        match self
            .executor
            .exec(&args(["image", "rm", "--force", image]))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.stderr_contains("No such image") => {
                tracing::debug!(%image, "nothing to remove");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ── Compose ──

    pub async fn compose_build(
        &self,
        compose_file: &Path,
        profile: Option<&str>,
        service: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), DockerError> {
        let mut cmd = compose_args(compose_file);
        if let Some(profile) = profile {
            cmd.extend(args(["--profile", profile]));
        }
        cmd.extend(args(["build", service]));
        self.executor.exec_streaming(&cmd, env).await
    }

    /// `docker compose up -d`, optionally with an env file, `--build`, and a single service.
    pub async fn compose_up(
        &self,
        compose_file: &Path,
        up: &ComposeUp<'_>,
        env: &BTreeMap<String, String>,
    ) -> Result<(), DockerError> {
        let mut cmd = compose_args(compose_file);
        if let Some(env_file) = up.env_file {
            cmd.push("--env-file".to_owned());
            cmd.push(env_file.display().to_string());
        }
        cmd.extend(args(["up", "-d"]));
        if up.build {
            cmd.push("--build".to_owned());
        }
        if let Some(service) = up.service {
            cmd.push(service.to_owned());
        }
        self.executor.exec_streaming(&cmd, env).await
    }

    pub async fn compose_down(&self, compose_file: &Path) -> Result<(), DockerError> {
        let mut cmd = compose_args(compose_file);
        cmd.extend(args(["down", "--remove-orphans"]));
        self.executor.exec_streaming(&cmd, &BTreeMap::new()).await
    }

    /// Id of the container backing a compose service, `None` if there is none.
    ///
    /// Stopped containers count too: the builder's binary is read from the
    /// filesystem whether or not its process is still running.
    pub async fn compose_container_id(
        &self,
        compose_file: &Path,
        service: &str,
    ) -> Result<Option<String>, DockerError> {
        let mut cmd = compose_args(compose_file);
        cmd.extend(args(["ps", "--all", "-q", service]));
        let out = self.executor.exec(&cmd).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_owned))
    }

    // ── Containers ──

    /// A path inside a container as a tar stream (`docker cp <id>:<path> -`).
    pub async fn copy_from_container(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Vec<u8>, DockerError> {
        self.executor
            .exec_bytes(&args(["cp", &format!("{container_id}:{path}"), "-"]))
            .await
    }

    pub async fn container_state(&self, container_id: &str) -> Result<ContainerState, DockerError> {
        let out = self
            .executor
            .exec(&args(["inspect", "--format", "{{json .State}}", container_id]))
            .await?;
        serde_json::from_str(out.trim()).map_err(|e| DockerError::Parse {
            what: "container state",
            detail: e.to_string(),
        })
    }

    /// Last `tail` lines of a container's stdout and stderr.
    pub async fn container_logs(&self, container_id: &str, tail: u32) -> Result<String, DockerError> {
        self.executor
            .exec_merged(&args(["logs", "--tail", &tail.to_string(), container_id]))
            .await
    }
}

/// Options for [`DockerClient::compose_up`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ComposeUp<'a> {
    pub env_file: Option<&'a Path>,
    pub build: bool,
    pub service: Option<&'a str>,
}

/// The `.State` object of `docker inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Health", default)]
    pub health: Option<HealthState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthState {
    #[serde(rename = "Status")]
    pub status: String,
}

impl ContainerState {
    /// Health status when the container defines a healthcheck, else the run status.
    pub fn effective_status(&self) -> &str {
        self.health
            .as_ref()
            .map(|h| h.status.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(self.status.as_str())
    }
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

fn compose_args(compose_file: &Path) -> Vec<String> {
    vec![
        "compose".to_owned(),
        "-f".to_owned(),
        compose_file.display().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_wins_over_run_status() {
        let state: ContainerState =
            serde_json::from_str(r#"{"Status":"running","Health":{"Status":"starting"}}"#)
                .unwrap();
        assert_eq!(state.effective_status(), "starting");
    }

    #[test]
    fn run_status_without_healthcheck() {
        let state: ContainerState =
            serde_json::from_str(r#"{"Status":"exited","Running":false,"ExitCode":1}"#).unwrap();
        assert!(state.health.is_none());
        assert_eq!(state.effective_status(), "exited");
    }

    #[test]
    fn compose_args_prefix() {
        assert_eq!(
            compose_args(Path::new("/srv/builder/docker-compose.yaml")),
            vec!["compose", "-f", "/srv/builder/docker-compose.yaml"]
        );
    }
}
