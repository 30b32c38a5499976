#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("docker CLI not found; install it from https://docs.docker.com/get-docker/")]
    NotFound { source: std::io::Error },

    #[error("docker command failed: {args:?}\n{stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },

    #[error("docker output was not valid UTF-8")]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    #[error("unexpected docker output for {what}: {detail}")]
    Parse { what: &'static str, detail: String },
}

impl DockerError {
    /// True when docker ran and reported failure, as opposed to not running at all.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. })
    }

    pub fn stderr_contains(&self, needle: &str) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.contains(needle),
            _ => false,
        }
    }
}
