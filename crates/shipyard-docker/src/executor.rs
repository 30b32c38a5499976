use crate::error::DockerError;
use std::collections::BTreeMap;
use std::process::Stdio;

/// Abstraction over docker CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait DockerExecutor: Send + Sync {
    /// Execute a docker command and capture stdout.
    async fn exec(&self, args: &[String]) -> Result<String, DockerError>;

    /// Execute a docker command and capture stdout followed by stderr.
    async fn exec_merged(&self, args: &[String]) -> Result<String, DockerError>;

    /// Execute a docker command and capture raw stdout bytes.
    async fn exec_bytes(&self, args: &[String]) -> Result<Vec<u8>, DockerError>;

    /// Execute a docker command with extra environment, streaming output to the terminal.
    async fn exec_streaming(
        &self,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(), DockerError>;
}

/// Real docker CLI executor.
pub struct RealExecutor;

impl RealExecutor {
    async fn output(args: &[String]) -> Result<std::process::Output, DockerError> {
        tracing::debug!(cmd = %format!("docker {}", args.join(" ")), "running");
        let output = tokio::process::Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

impl DockerExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, DockerError> {
        let output = Self::output(args).await?;
        String::from_utf8(output.stdout).map_err(|e| DockerError::InvalidUtf8 { source: e })
    }

    async fn exec_merged(&self, args: &[String]) -> Result<String, DockerError> {
        let output = Self::output(args).await?;
        let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
        merged.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(merged)
    }

    async fn exec_bytes(&self, args: &[String]) -> Result<Vec<u8>, DockerError> {
        Ok(Self::output(args).await?.stdout)
    }

    async fn exec_streaming(
        &self,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(), DockerError> {
        println!("Running: docker {}", args.join(" "));
        let status = tokio::process::Command::new("docker")
            .args(args)
            .envs(env)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        if status.success() {
            Ok(())
        } else {
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                stderr: format!("exit code: {status}"),
            })
        }
    }
}
