use mockall::{Sequence, mock};
use shipyard_core::BuilderConfig;
use shipyard_docker::{
    BuilderCleanup, CleanupOutcome, DockerClient, DockerError, DockerExecutor, ExtractError,
    ExtractRequest, ImageStatus, PreflightTargets, RolloutController, RolloutError,
    RolloutOutcome, ensure_base_image, extract_artifact, preflight,
};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mock! {
    Executor {}

    impl DockerExecutor for Executor {
        async fn exec(&self, args: &[String]) -> Result<String, DockerError>;
        async fn exec_merged(&self, args: &[String]) -> Result<String, DockerError>;
        async fn exec_bytes(&self, args: &[String]) -> Result<Vec<u8>, DockerError>;
        async fn exec_streaming(
            &self,
            args: &[String],
            env: &BTreeMap<String, String>,
        ) -> Result<(), DockerError>;
    }
}

fn has(args: &[String], word: &str) -> bool {
    args.iter().any(|a| a == word)
}

fn command_failed(stderr: &str) -> DockerError {
    DockerError::CommandFailed {
        args: Vec::new(),
        stderr: stderr.to_owned(),
    }
}

fn compose_file() -> PathBuf {
    PathBuf::from("/srv/builder/docker-compose.yaml")
}

// ── Image Provisioner ──

#[tokio::test]
async fn provisioner_never_builds_present_image() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "inspect") && has(args, "orangescrum-cloud-base:latest"))
        .times(1)
        .returning(|_| Ok("sha256:abc\n".to_owned()));
    mock.expect_exec_streaming().never();

    let client = DockerClient::with_executor(mock);
    let status = ensure_base_image(&client, &compose_file(), &BuilderConfig::default(), false)
        .await
        .unwrap();

    assert_eq!(status, ImageStatus::Present);
}

#[tokio::test]
async fn provisioner_builds_missing_image_with_profile() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Err(command_failed("Error: No such image")));
    mock.expect_exec_streaming()
        .withf(|args, env| {
            args.windows(2).any(|w| w[0] == "--profile" && w[1] == "base-build")
                && args.ends_with(&["build".to_owned(), "frankenphp-base-builder".to_owned()])
                && env.get("FRANKENPHP_BASE_IMAGE").map(String::as_str)
                    == Some("orangescrum-cloud-base:latest")
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let client = DockerClient::with_executor(mock);
    let status = ensure_base_image(&client, &compose_file(), &BuilderConfig::default(), false)
        .await
        .unwrap();

    assert_eq!(status, ImageStatus::Built);
}

#[tokio::test]
async fn provisioner_rebuild_removes_then_builds() {
    let mut seq = Sequence::new();
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "rm") && has(args, "--force"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok("Untagged: orangescrum-cloud-base:latest\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(command_failed("Error: No such image")));
    mock.expect_exec_streaming()
        .withf(|args, _| has(args, "frankenphp-base-builder"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let client = DockerClient::with_executor(mock);
    let status = ensure_base_image(&client, &compose_file(), &BuilderConfig::default(), true)
        .await
        .unwrap();

    assert_eq!(status, ImageStatus::Built);
}

#[tokio::test]
async fn provisioner_rebuild_tolerates_absent_image() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "rm"))
        .returning(|_| Err(command_failed("Error: No such image: orangescrum-cloud-base")));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Err(command_failed("Error: No such image")));
    mock.expect_exec_streaming()
        .times(1)
        .returning(|_, _| Ok(()));

    let client = DockerClient::with_executor(mock);
    let status = ensure_base_image(&client, &compose_file(), &BuilderConfig::default(), true)
        .await
        .unwrap();

    assert_eq!(status, ImageStatus::Built);
}

#[tokio::test]
async fn provisioner_surfaces_build_failure() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_| Err(command_failed("Error: No such image")));
    mock.expect_exec_streaming()
        .returning(|_, _| Err(command_failed("exit code: exit status: 1")));

    let client = DockerClient::with_executor(mock);
    let err = ensure_base_image(&client, &compose_file(), &BuilderConfig::default(), false)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("failed to build base image"));
}

// ── Artifact Extractor ──

fn single_file_tar(name: &str, body: &[u8], mode: u32) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append_data(&mut header, name, body).unwrap();
    builder.into_inner().unwrap()
}

#[tokio::test]
async fn extractor_forces_executable_mode_and_renames() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dest = tmp.path().join("20261016-093012/osv4-prod");

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps") && has(args, "orangescrum-app-builder"))
        .returning(|_| Ok("4f2a9c\n".to_owned()));
    mock.expect_exec_bytes()
        .withf(|args| has(args, "cp") && has(args, "4f2a9c:/go/src/app/dist/frankenphp-linux-x86_64"))
        .times(1)
        .returning(|_| Ok(single_file_tar("frankenphp-linux-x86_64", b"\x7fELF payload", 0o600)));

    let client = DockerClient::with_executor(mock);
    let req = ExtractRequest {
        compose_file: &compose_file(),
        service: "orangescrum-app-builder",
        container_path: "/go/src/app/dist/frankenphp-linux-x86_64",
        dest: &dest,
    };
    let artifact = extract_artifact(&client, &req).await.unwrap();

    assert_eq!(artifact.path, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), b"\x7fELF payload");
    let mode = std::fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
    assert!(artifact.is_executable());
    assert!(!dest.with_file_name("frankenphp-linux-x86_64").exists());
}

#[tokio::test]
async fn extractor_reads_from_stopped_builder_container() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dest = tmp.path().join("dist/osv4-prod");

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps") && has(args, "--all") && has(args, "orangescrum-app-builder"))
        .times(1)
        .returning(|_| Ok("9b1d3e\n".to_owned()));
    mock.expect_exec_bytes()
        .withf(|args| has(args, "cp") && has(args, "9b1d3e:/go/src/app/dist/frankenphp-linux-x86_64"))
        .times(1)
        .returning(|_| Ok(single_file_tar("frankenphp-linux-x86_64", b"\x7fELF", 0o644)));

    let client = DockerClient::with_executor(mock);
    let req = ExtractRequest {
        compose_file: &compose_file(),
        service: "orangescrum-app-builder",
        container_path: "/go/src/app/dist/frankenphp-linux-x86_64",
        dest: &dest,
    };
    let artifact = extract_artifact(&client, &req).await.unwrap();

    assert_eq!(artifact.path, dest);
    assert!(artifact.is_executable());
}

#[tokio::test]
async fn extractor_fails_fast_without_container() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dest = tmp.path().join("dist/osv4-prod");

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(|_| Ok("\n".to_owned()));
    mock.expect_exec_bytes().never();

    let client = DockerClient::with_executor(mock);
    let req = ExtractRequest {
        compose_file: &compose_file(),
        service: "orangescrum-app-builder",
        container_path: "/go/src/app/dist/frankenphp-linux-x86_64",
        dest: &dest,
    };
    let err = extract_artifact(&client, &req).await.unwrap_err();

    assert!(matches!(err, ExtractError::ContainerNotFound { .. }));
    assert!(!dest.exists());
    assert!(!tmp.path().join("dist").exists());
}

// ── Rollout Controller ──

fn controller(timeout: Duration) -> RolloutController {
    RolloutController {
        compose_file: PathBuf::from("/srv/dist/20261016-093012/docker/docker-compose.yaml"),
        service: "orangescrum-app".to_owned(),
        env_file: None,
        timeout,
        interval: Duration::from_secs(2),
        log_tail: 50,
    }
}

fn state_json(status: &str, health: Option<&str>) -> String {
    match health {
        Some(h) => format!(r#"{{"Status":"{status}","Health":{{"Status":"{h}"}}}}"#),
        None => format!(r#"{{"Status":"{status}"}}"#),
    }
}

#[tokio::test(start_paused = true)]
async fn rollout_healthy_after_pending_polls() {
    let inspections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&inspections);

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(|_| Ok("c0ffee\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 5 {
                Ok(state_json("running", Some("starting")))
            } else {
                Ok(state_json("running", Some("healthy")))
            }
        });

    let client = DockerClient::with_executor(mock);
    let timeout = Duration::from_secs(180);
    let outcome = controller(timeout).wait_until_healthy(&client).await.unwrap();

    match outcome {
        RolloutOutcome::Healthy { polls, elapsed } => {
            assert!(polls >= 5, "polls = {polls}");
            assert!(elapsed <= timeout);
        }
        other => panic!("expected healthy, got {other:?}"),
    }
    assert_eq!(inspections.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn rollout_exited_fails_with_log_tail() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(|_| Ok("c0ffee\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Ok(state_json("exited", None)));
    mock.expect_exec_merged()
        .withf(|args| has(args, "logs") && has(args, "50") && has(args, "c0ffee"))
        .times(1)
        .returning(|_| Ok("SQLSTATE[HY000] [2002] Connection refused\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let err = controller(Duration::from_secs(180))
        .wait_until_healthy(&client)
        .await
        .unwrap_err();

    match &err {
        RolloutError::Terminal { status, logs, .. } => {
            assert_eq!(status, "exited");
            assert!(logs.contains("Connection refused"));
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert!(err.to_string().contains("Connection refused"));
}

#[tokio::test(start_paused = true)]
async fn rollout_exited_with_stale_unhealthy_health_is_terminal() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps") && has(args, "--all"))
        .returning(|_| Ok("c0ffee\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .times(1)
        .returning(|_| Ok(r#"{"Status":"exited","Health":{"Status":"unhealthy"}}"#.to_owned()));
    mock.expect_exec_merged()
        .withf(|args| has(args, "logs") && has(args, "c0ffee"))
        .times(1)
        .returning(|_| Ok("PHP Fatal error: Uncaught PDOException\n".to_owned()));

    let client = DockerClient::with_executor(mock);
    let err = controller(Duration::from_secs(180))
        .wait_until_healthy(&client)
        .await
        .unwrap_err();

    match &err {
        RolloutError::Terminal { status, logs, .. } => {
            assert_eq!(status, "exited");
            assert!(logs.contains("PDOException"));
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rollout_dead_container_is_terminal_even_if_last_healthy() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(|_| Ok("c0ffee\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Ok(state_json("dead", Some("healthy"))));
    mock.expect_exec_merged()
        .withf(|args| has(args, "logs"))
        .returning(|_| Ok(String::new()));

    let client = DockerClient::with_executor(mock);
    let err = controller(Duration::from_secs(180))
        .wait_until_healthy(&client)
        .await
        .unwrap_err();

    assert!(matches!(&err, RolloutError::Terminal { status, .. } if status == "dead"));
}

#[tokio::test(start_paused = true)]
async fn rollout_times_out_without_raising() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(|_| Ok("c0ffee\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Ok(state_json("running", Some("starting"))));

    let client = DockerClient::with_executor(mock);
    let timeout = Duration::from_secs(30);
    let outcome = controller(timeout).wait_until_healthy(&client).await.unwrap();

    match outcome {
        RolloutOutcome::TimedOut { polls, elapsed } => {
            assert!(elapsed >= timeout);
            assert!(elapsed < timeout + Duration::from_secs(2));
            assert!(polls > 1);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rollout_retries_transient_errors() {
    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lookups);

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(command_failed("Cannot connect to the Docker daemon")),
            1 => Ok(String::new()),
            _ => Ok("c0ffee\n".to_owned()),
        });
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Ok(state_json("running", Some("healthy"))));
    mock.expect_exec_merged().never();

    let client = DockerClient::with_executor(mock);
    let outcome = controller(Duration::from_secs(180))
        .wait_until_healthy(&client)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RolloutOutcome::Healthy {
            polls: 3,
            elapsed: Duration::from_secs(4),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn rollout_brings_bundle_up_with_env() {
    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming()
        .withf(|args, env| {
            has(args, "up")
                && has(args, "--build")
                && args.windows(2).any(|w| w[0] == "--env-file" && w[1] == "/srv/app/.env")
                && env.get("APP_PORT").map(String::as_str) == Some("9000")
        })
        .times(1)
        .returning(|_, _| Ok(()));
    mock.expect_exec()
        .withf(|args| has(args, "ps"))
        .returning(|_| Ok("c0ffee\n".to_owned()));
    mock.expect_exec()
        .withf(|args| has(args, "inspect"))
        .returning(|_| Ok(state_json("running", Some("healthy"))));

    let client = DockerClient::with_executor(mock);
    let mut rollout = controller(Duration::from_secs(180));
    rollout.env_file = Some(PathBuf::from("/srv/app/.env"));
    let env = BTreeMap::from([("APP_PORT".to_owned(), "9000".to_owned())]);

    let outcome = rollout.roll_out(&client, &env).await.unwrap();
    assert!(outcome.is_healthy());
}

// ── Cleanup Handler ──

#[tokio::test]
async fn cleanup_failure_is_reported_not_raised() {
    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming()
        .withf(|args, _| has(args, "down") && has(args, "--remove-orphans"))
        .times(1)
        .returning(|_, _| Err(command_failed("exit code: exit status: 1")));

    let client = DockerClient::with_executor(mock);
    let outcome = BuilderCleanup::new(compose_file()).run(&client).await;

    assert!(matches!(outcome, CleanupOutcome::Failed { .. }));
}

// ── Pre-flight ──

#[tokio::test]
async fn preflight_reports_unreachable_daemon_and_missing_inputs() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("src")).unwrap();

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "version"))
        .returning(|_| {
            Err(command_failed(
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
            ))
        });

    let targets = PreflightTargets {
        source: tmp.path().join("src"),
        builder_compose: tmp.path().join("builder/docker-compose.yaml"),
        flavors: vec![("docker".to_owned(), tmp.path().join("missing"))],
    };
    let client = DockerClient::with_executor(mock);
    let report = preflight(&client, &targets).await;

    assert!(!report.docker.passed);
    assert!(report.source.passed);
    assert!(!report.builder_compose.passed);
    assert!(!report.flavors[0].result.passed);
    assert_eq!(report.failures(), vec!["docker", "builder compose"]);
}

#[tokio::test]
async fn preflight_passes_with_daemon_and_inputs() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("src")).unwrap();
    std::fs::create_dir_all(tmp.path().join("builder")).unwrap();
    std::fs::write(tmp.path().join("builder/docker-compose.yaml"), "services: {}\n").unwrap();

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|args| has(args, "version"))
        .returning(|_| Ok("27.3.1\n".to_owned()));

    let targets = PreflightTargets {
        source: tmp.path().join("src"),
        builder_compose: tmp.path().join("builder/docker-compose.yaml"),
        flavors: Vec::new(),
    };
    let client = DockerClient::with_executor(mock);
    let report = preflight(&client, &targets).await;

    assert!(report.all_passed());
    assert_eq!(report.docker.detail, "server 27.3.1");
}
