//! Base build image provisioning and the app build that embeds the package.

use crate::client::{ComposeUp, DockerClient};
use crate::error::DockerError;
use crate::executor::DockerExecutor;
use shipyard_core::{BuilderConfig, config::BASE_IMAGE_ENV};
use std::collections::BTreeMap;
use std::path::Path;

/// What [`ensure_base_image`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Already present locally; nothing built
    Present,
    /// Built by the base-image compose service
    Built,
}

/// Guarantee the base build image exists before the app build.
///
/// With `rebuild`, any existing image is removed first; a missing image is
/// not an error. A present image is never rebuilt otherwise.
pub async fn ensure_base_image<E: DockerExecutor>(
    client: &DockerClient<E>,
    compose_file: &Path,
    builder: &BuilderConfig,
    rebuild: bool,
) -> Result<ImageStatus, ProvisionError> {
    let image = builder.base_image.as_str();

    if rebuild {
        let removed = client
            .remove_image(image)
            .await
            .map_err(|e| ProvisionError::Remove {
                image: image.to_owned(),
                source: e,
            })?;
        if removed {
            tracing::info!(%image, "removed existing base image");
        }
    }

    let present = client
        .image_exists(image)
        .await
        .map_err(|e| ProvisionError::Inspect {
            image: image.to_owned(),
            source: e,
        })?;
    if present {
        tracing::info!(%image, "base image found; skipping base build");
        return Ok(ImageStatus::Present);
    }

    tracing::info!(%image, service = %builder.base_service, "base image not found; building");
    let env = BTreeMap::from([(BASE_IMAGE_ENV.to_owned(), image.to_owned())]);
    client
        .compose_build(
            compose_file,
            Some(builder.base_profile.as_str()),
            &builder.base_service,
            &env,
        )
        .await
        .map_err(|e| ProvisionError::Build {
            image: image.to_owned(),
            source: e,
        })?;
    Ok(ImageStatus::Built)
}

/// Build the app-builder image: compiles the binary with the package embedded.
///
/// This only builds the image layer; no container is started.
pub async fn build_app_image<E: DockerExecutor>(
    client: &DockerClient<E>,
    compose_file: &Path,
    builder: &BuilderConfig,
    build_date: i64,
) -> Result<(), ProvisionError> {
    let env = BTreeMap::from([
        ("BUILD_DATE".to_owned(), build_date.to_string()),
        (BASE_IMAGE_ENV.to_owned(), builder.base_image.clone()),
    ]);
    client
        .compose_build(compose_file, None, &builder.app_service, &env)
        .await
        .map_err(|e| ProvisionError::AppBuild {
            service: builder.app_service.clone(),
            source: e,
        })
}

/// Start the app-builder container so its filesystem can be read.
pub async fn start_builder<E: DockerExecutor>(
    client: &DockerClient<E>,
    compose_file: &Path,
    builder: &BuilderConfig,
) -> Result<(), ProvisionError> {
    let up = ComposeUp {
        service: Some(builder.app_service.as_str()),
        ..Default::default()
    };
    client
        .compose_up(compose_file, &up, &BTreeMap::new())
        .await
        .map_err(|e| ProvisionError::Start {
            service: builder.app_service.clone(),
            source: e,
        })
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to remove base image {image}")]
    Remove { image: String, source: DockerError },

    #[error("failed to inspect base image {image}")]
    Inspect { image: String, source: DockerError },

    #[error("failed to build base image {image}")]
    Build { image: String, source: DockerError },

    #[error("failed to build app image via service '{service}'")]
    AppBuild { service: String, source: DockerError },

    #[error("failed to start builder container '{service}'")]
    Start { service: String, source: DockerError },
}
