//! Core types and configuration for shipyard.
//!
//! This crate defines the `shipyard.toml` schema ([`ShipyardConfig`]),
//! the per-invocation [`PipelineRun`], the artifact/bundle data model,
//! and shared error types.

pub mod artifact;
pub mod config;
pub mod error;
pub mod run;

pub use artifact::{BuildArtifact, DeploymentBundle, EXECUTABLE_MODE};
pub use config::{
    BuilderConfig, DeployConfig, FlavorConfig, OverlayConfig, ProjectConfig, ShipyardConfig,
};
pub use error::{Error, Result};
pub use run::{EnvOverrides, PipelineRun, RunId, RunOptions, RunPaths, StageFlags};
