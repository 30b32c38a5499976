//! Teardown of the builder stack.

use crate::client::DockerClient;
use crate::executor::DockerExecutor;
use std::path::PathBuf;

/// Pending teardown of the builder compose stack.
///
/// Created before the first docker stage of a run and consumed by
/// [`BuilderCleanup::run`], so a run can tear down at most once.
#[derive(Debug)]
#[must_use = "builder cleanup must be run on every exit path"]
pub struct BuilderCleanup {
    compose_file: PathBuf,
}

/// What teardown managed to do. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    Failed { detail: String },
}

impl BuilderCleanup {
    pub fn new(compose_file: PathBuf) -> Self {
        Self { compose_file }
    }

    /// `docker compose down --remove-orphans`, best-effort.
    pub async fn run<E: DockerExecutor>(self, client: &DockerClient<E>) -> CleanupOutcome {
        println!("Cleaning up builder containers...");
        match client.compose_down(&self.compose_file).await {
            Ok(()) => CleanupOutcome::Removed,
            Err(e) => {
                tracing::warn!(
                    compose_file = %self.compose_file.display(),
                    error = %e,
                    "builder cleanup failed"
                );
                CleanupOutcome::Failed {
                    detail: e.to_string(),
                }
            }
        }
    }
}
