//! The package staging directory the builder recipe copies into its image.

use std::fs::File;
use std::path::{Path, PathBuf};

/// Remove `path` if present and recreate it empty.
pub fn clean_dir(path: &Path) -> Result<(), PackageError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| PackageError::Cleanup {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(path).map_err(|e| PackageError::Create {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Delete the package directory; a missing directory is not an error.
pub fn remove_dir(path: &Path) -> Result<(), PackageError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PackageError::Cleanup {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Unpack a tar archive into `dest`, returning the number of regular files written.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<usize, PackageError> {
    let file = File::open(archive).map_err(|e| PackageError::OpenArchive {
        path: archive.to_path_buf(),
        source: e,
    })?;
    let mut tar = tar::Archive::new(file);
    tar.set_preserve_permissions(true);

    let unpack_err = |e| PackageError::Unpack {
        archive: archive.to_path_buf(),
        source: e,
    };
    let mut files = 0;
    for entry in tar.entries().map_err(unpack_err)? {
        let mut entry = entry.map_err(unpack_err)?;
        let is_file = entry.header().entry_type().is_file();
        // unpack_in refuses entries escaping `dest` and reports them as `false`
        if entry.unpack_in(dest).map_err(unpack_err)? && is_file {
            files += 1;
        }
    }

    tracing::info!(
        archive = %archive.display(),
        dest = %dest.display(),
        files,
        "archive unpacked"
    );
    Ok(files)
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("failed to clean up package directory {path}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open archive {path}")]
    OpenArchive {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to unpack archive {archive}")]
    Unpack {
        archive: PathBuf,
        source: std::io::Error,
    },
}
