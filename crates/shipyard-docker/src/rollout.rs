//! Health-gated rollout of a deployment bundle.
//!
//! ```text
//!            ┌──── no container / transient error ────┐
//!            ▼                                        │
//!        Pending ──(poll)──────────────────────────────┘
//!         │  │  └──(elapsed ≥ timeout)──▶ TimedOut            (Ok, unresolved)
//!         │  └──(status exited|dead)───▶ UnhealthyTerminal   (Err, with log tail)
//!         └──(health = healthy)────────▶ Healthy             (Ok)
//! ```
//!
//! The run status is checked before the health status: a stopped container
//! keeps reporting whatever its healthcheck last said.
//!
//! Waiting uses `tokio::time`, so tests drive the loop with a paused clock.

use crate::client::{ComposeUp, DockerClient};
use crate::error::DockerError;
use crate::executor::DockerExecutor;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

const TERMINAL_STATUSES: &[&str] = &["exited", "dead"];

/// Result of a single health poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbeState {
    Pending,
    Healthy,
    UnhealthyTerminal { container: String, status: String },
    TimedOut,
}

/// How a rollout ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    Healthy { polls: u32, elapsed: Duration },
    /// The service never reported healthy; it may still be starting.
    TimedOut { polls: u32, elapsed: Duration },
}

impl RolloutOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Brings one compose service up and waits on its health signal.
#[derive(Debug, Clone)]
pub struct RolloutController {
    pub compose_file: PathBuf,
    pub service: String,
    pub env_file: Option<PathBuf>,
    pub timeout: Duration,
    pub interval: Duration,
    pub log_tail: u32,
}

impl RolloutController {
    /// `compose up -d --build` the bundle, then block until healthy, terminal, or timed out.
    pub async fn roll_out<E: DockerExecutor>(
        &self,
        client: &DockerClient<E>,
        env: &BTreeMap<String, String>,
    ) -> Result<RolloutOutcome, RolloutError> {
        let up = ComposeUp {
            env_file: self.env_file.as_deref(),
            build: true,
            service: None,
        };
        client
            .compose_up(&self.compose_file, &up, env)
            .await
            .map_err(|e| RolloutError::Up {
                compose_file: self.compose_file.clone(),
                source: e,
            })?;

        println!(
            "Waiting for '{}' to become healthy (timeout {}s)...",
            self.service,
            self.timeout.as_secs()
        );
        self.wait_until_healthy(client).await
    }

    /// Poll until the service is healthy, reaches a terminal state, or the timeout elapses.
    pub async fn wait_until_healthy<E: DockerExecutor>(
        &self,
        client: &DockerClient<E>,
    ) -> Result<RolloutOutcome, RolloutError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self.poll_once(client).await {
                HealthProbeState::Healthy => {
                    let elapsed = started.elapsed();
                    tracing::info!(service = %self.service, polls, ?elapsed, "service healthy");
                    return Ok(RolloutOutcome::Healthy { polls, elapsed });
                }
                HealthProbeState::UnhealthyTerminal { container, status } => {
                    let logs = self.log_tail(client, &container).await;
                    return Err(RolloutError::Terminal {
                        service: self.service.clone(),
                        status,
                        logs,
                    });
                }
                HealthProbeState::Pending | HealthProbeState::TimedOut => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                tracing::warn!(service = %self.service, polls, ?elapsed, "health check timed out");
                return Ok(RolloutOutcome::TimedOut { polls, elapsed });
            }
            tokio::time::sleep(self.interval.min(self.timeout - elapsed)).await;
        }
    }

    /// One poll. Lookup and inspect failures count as pending.
    pub async fn poll_once<E: DockerExecutor>(&self, client: &DockerClient<E>) -> HealthProbeState {
        let container = match client
            .compose_container_id(&self.compose_file, &self.service)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::debug!(service = %self.service, "no container yet");
                return HealthProbeState::Pending;
            }
            Err(e) => {
                tracing::debug!(service = %self.service, error = %e, "container lookup failed; retrying");
                return HealthProbeState::Pending;
            }
        };

        let state = match client.container_state(&container).await {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(%container, error = %e, "inspect failed; retrying");
                return HealthProbeState::Pending;
            }
        };

        if TERMINAL_STATUSES.contains(&state.status.as_str()) {
            tracing::debug!(%container, status = %state.status, "container stopped");
            return HealthProbeState::UnhealthyTerminal {
                status: state.status,
                container,
            };
        }

        let status = state.effective_status();
        tracing::debug!(%container, %status, "health poll");
        if status == "healthy" {
            HealthProbeState::Healthy
        } else {
            HealthProbeState::Pending
        }
    }

    async fn log_tail<E: DockerExecutor>(&self, client: &DockerClient<E>, container: &str) -> String {
        match client.container_logs(container, self.log_tail).await {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(%container, error = %e, "failed to read container logs");
                format!("<logs unavailable: {e}>")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error("failed to bring up {compose_file}")]
    Up {
        compose_file: PathBuf,
        source: DockerError,
    },

    #[error("service '{service}' is {status}; last log lines:\n{logs}")]
    Terminal {
        service: String,
        status: String,
        logs: String,
    },
}
