//! Pulling the compiled binary out of the builder container.
//!
//! ```text
//! lookup container ──(none)──▶ ContainerNotFound
//!        │
//!   docker cp <id>:<path> -      (single-entry tar stream)
//!        │
//!   unpack entry ▶ <dest>.partial ▶ rename ▶ chmod 0755
//! ```

use crate::client::DockerClient;
use crate::error::DockerError;
use crate::executor::DockerExecutor;
use shipyard_core::{BuildArtifact, EXECUTABLE_MODE};
use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Where to find the binary and where to put it.
#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    pub compose_file: &'a Path,
    pub service: &'a str,
    pub container_path: &'a str,
    pub dest: &'a Path,
}

/// Copy the binary at `container_path` out of the container backing
/// `service` and install it at `dest`, mode 0755.
///
/// Nothing is written on the host unless the container is found.
pub async fn extract_artifact<E: DockerExecutor>(
    client: &DockerClient<E>,
    req: &ExtractRequest<'_>,
) -> Result<BuildArtifact, ExtractError> {
    let container_id = client
        .compose_container_id(req.compose_file, req.service)
        .await
        .map_err(|e| ExtractError::Lookup {
            service: req.service.to_owned(),
            source: e,
        })?
        .ok_or_else(|| ExtractError::ContainerNotFound {
            service: req.service.to_owned(),
        })?;
    tracing::debug!(%container_id, service = req.service, "builder container found");

    let stream = client
        .copy_from_container(&container_id, req.container_path)
        .await
        .map_err(|e| ExtractError::Copy {
            path: req.container_path.to_owned(),
            source: e,
        })?;

    let artifact = install_from_tar(&stream, req.container_path, req.dest)?;
    tracing::info!(
        path = %artifact.path.display(),
        size_mib = format!("{:.1}", artifact.size_mib()),
        "artifact extracted"
    );
    Ok(artifact)
}

/// Unpack the first regular file of a tar stream to `dest`, renaming it,
/// and force its mode to 0755 whatever the archive recorded.
pub fn install_from_tar(
    stream: &[u8],
    container_path: &str,
    dest: &Path,
) -> Result<BuildArtifact, ExtractError> {
    let parent = dest
        .parent()
        .ok_or_else(|| ExtractError::InvalidDest(dest.to_path_buf()))?;
    let file_name = dest
        .file_name()
        .ok_or_else(|| ExtractError::InvalidDest(dest.to_path_buf()))?;
    std::fs::create_dir_all(parent).map_err(|e| ExtractError::Io {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let partial = parent.join(format!(".{}.partial", file_name.to_string_lossy()));
    let unpack_err = |e| ExtractError::Unpack {
        path: container_path.to_owned(),
        source: e,
    };

    let mut archive = tar::Archive::new(Cursor::new(stream));
    let mut unpacked = false;
    for entry in archive.entries().map_err(unpack_err)? {
        let mut entry = entry.map_err(unpack_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if let Err(e) = entry.unpack(&partial) {
            discard(&partial);
            return Err(unpack_err(e));
        }
        unpacked = true;
        break;
    }
    if !unpacked {
        return Err(ExtractError::EmptyArchive {
            path: container_path.to_owned(),
        });
    }

    std::fs::rename(&partial, dest).map_err(|e| {
        discard(&partial);
        ExtractError::Io {
            path: dest.to_path_buf(),
            source: e,
        }
    })?;
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(EXECUTABLE_MODE)).map_err(
        |e| ExtractError::Io {
            path: dest.to_path_buf(),
            source: e,
        },
    )?;

    let metadata = std::fs::metadata(dest).map_err(|e| ExtractError::Io {
        path: dest.to_path_buf(),
        source: e,
    })?;
    Ok(BuildArtifact {
        container_path: container_path.to_owned(),
        path: dest.to_path_buf(),
        size: metadata.len(),
        mode: metadata.permissions().mode() & 0o7777,
    })
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial artifact");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(
        "could not find builder container for service '{service}' (docker compose ps -q returned empty)"
    )]
    ContainerNotFound { service: String },

    #[error("failed to look up container for service '{service}'")]
    Lookup { service: String, source: DockerError },

    #[error("failed to copy {path} from builder container")]
    Copy { path: String, source: DockerError },

    #[error("failed to unpack {path} from container archive")]
    Unpack {
        path: String,
        source: std::io::Error,
    },

    #[error("container archive for {path} holds no regular file")]
    EmptyArchive { path: String },

    #[error("invalid artifact destination {0}")]
    InvalidDest(PathBuf),

    #[error("failed to install artifact at {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn single_file_tar(name: &str, body: &[u8], mode: u32) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn installs_renamed_and_executable() {
        let tmp = TempDir::new().unwrap();
        let stream = single_file_tar("frankenphp-linux-x86_64", b"binary", 0o600);
        let dest = tmp.path().join("dist/osv4-prod");

        let artifact = install_from_tar(&stream, "/go/src/app/dist/frankenphp-linux-x86_64", &dest)
            .unwrap();

        assert_eq!(artifact.path, dest);
        assert_eq!(artifact.size, 6);
        assert_eq!(artifact.mode, 0o755);
        assert!(artifact.is_executable());
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary");
        assert!(!tmp.path().join("dist/frankenphp-linux-x86_64").exists());
        assert!(!tmp.path().join("dist/.osv4-prod.partial").exists());
    }

    #[test]
    fn replaces_existing_artifact() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("osv4-prod");
        std::fs::write(&dest, b"old").unwrap();

        install_from_tar(&single_file_tar("app", b"new", 0o644), "/app", &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn empty_archive_rejected() {
        let tmp = TempDir::new().unwrap();
        let stream = tar::Builder::new(Vec::new()).into_inner().unwrap();
        let dest = tmp.path().join("osv4-prod");

        let err = install_from_tar(&stream, "/app", &dest).unwrap_err();

        assert!(matches!(err, ExtractError::EmptyArchive { .. }));
        assert!(!dest.exists());
    }
}
