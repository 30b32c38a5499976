//! Container runtime boundary for shipyard.
//!
//! Everything here goes through the docker CLI via [`DockerExecutor`], so
//! each stage can be exercised against a mock executor.

pub mod cleanup;
pub mod client;
pub mod error;
pub mod executor;
pub mod extract;
pub mod image;
pub mod preflight;
pub mod rollout;

pub use cleanup::{BuilderCleanup, CleanupOutcome};
pub use client::{ComposeUp, ContainerState, DockerClient, HealthState};
pub use error::DockerError;
pub use executor::{DockerExecutor, RealExecutor};
pub use extract::{ExtractError, ExtractRequest, extract_artifact};
pub use image::{ImageStatus, ProvisionError, build_app_image, ensure_base_image, start_builder};
pub use preflight::{CheckResult, FlavorCheck, PreflightReport, PreflightTargets, preflight};
pub use rollout::{HealthProbeState, RolloutController, RolloutError, RolloutOutcome};
