use std::path::PathBuf;

/// Permission bits forced onto every extracted binary.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// The compiled binary, installed on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Path inside the builder container it was copied from
    pub container_path: String,
    /// Where it now lives on the host
    pub path: PathBuf,
    pub size: u64,
    pub mode: u32,
}

impl BuildArtifact {
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }

    pub fn size_mib(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

/// One self-sufficient deployable directory produced by a flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentBundle {
    pub flavor: String,
    pub dir: PathBuf,
    /// The artifact the flavor was built from
    pub artifact: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(mode: u32) -> BuildArtifact {
        BuildArtifact {
            container_path: "/go/src/app/dist/frankenphp-linux-x86_64".to_owned(),
            path: PathBuf::from("/tmp/osv4-prod"),
            size: 3 * 1024 * 1024,
            mode,
        }
    }

    #[test]
    fn executable_when_any_execute_bit_set() {
        assert!(artifact(0o755).is_executable());
        assert!(artifact(0o100).is_executable());
        assert!(!artifact(0o644).is_executable());
    }

    #[test]
    fn size_in_mebibytes() {
        assert!((artifact(0o755).size_mib() - 3.0).abs() < f64::EPSILON);
    }
}
