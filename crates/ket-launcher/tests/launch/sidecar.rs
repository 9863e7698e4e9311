// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ket_k8s::{MockCall, MockK8sClient};
use ket_launcher::gateway::ClusterGateway;
use ket_launcher::{
	LaunchError, RunConfig, SidecarCommand, SidecarError, SidecarSession, SidecarState, SourceMode,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::support::{config, labelled_pod, launcher, succeeded};

const AGENT_POD: &str = "mirrord-agent-4fj2k";

fn executable(dir: &Path, name: &str, script: &str) -> PathBuf {
	let path = dir.join(name);
	std::fs::write(&path, script).unwrap();
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
	path
}

/// A stand-in interception binary that ignores its arguments and stays up.
fn idle_sidecar(dir: &Path) -> PathBuf {
	executable(dir, "fake-mirrord", "#!/bin/sh\nexec sleep 30\n")
}

/// Intercepting run over a project tree at `project_root`.
fn intercepting_config(project_root: &Path) -> RunConfig {
	std::fs::create_dir_all(project_root).unwrap();
	std::fs::write(project_root.join("server.js"), "require('http')").unwrap();
	RunConfig {
		project_root: project_root.to_path_buf(),
		source_mode: SourceMode::ConfigMap,
		target_pod: Some("api-0".to_string()),
		target_namespace: Some("staging".to_string()),
		process_to_test: Some("node server.js".to_string()),
		..config()
	}
}

fn ready_agent(mock: &MockK8sClient) {
	mock.add_pod(
		"staging",
		labelled_pod(AGENT_POD, &[("app", "mirrord")], "Running", true),
	);
	mock.set_pod_logs(AGENT_POD, "starting agent\nagent ready\n");
}

#[tokio::test]
async fn test_run_with_ready_agent_keeps_sidecar_logs() {
	let dir = TempDir::new().unwrap();
	let program = idle_sidecar(dir.path());
	let mock = MockK8sClient::new();
	ready_agent(&mock);
	mock.script_job_statuses([succeeded()]);

	let report = launcher(&mock, intercepting_config(&dir.path().join("api")))
		.with_sidecar_program(program.to_string_lossy())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(report.result.success);
	let logs = report.sidecar_logs.expect("sidecar log paths");
	assert!(logs.stdout.exists());
	assert!(logs.stderr.exists());
	assert_eq!(mock.call_count(MockCall::CreateJob), 1);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);

	let _ = std::fs::remove_file(&logs.stdout);
	let _ = std::fs::remove_file(&logs.stderr);
}

#[tokio::test]
async fn test_sidecar_runs_in_project_root() {
	let dir = TempDir::new().unwrap();
	let recorded = dir.path().join("sidecar-cwd");
	let program = executable(
		dir.path(),
		"fake-mirrord",
		&format!("#!/bin/sh\npwd > '{}'\nexec sleep 30\n", recorded.display()),
	);
	let project_root = dir.path().join("backend-api");
	let mock = MockK8sClient::new();
	ready_agent(&mock);
	mock.script_job_statuses([succeeded()]);

	let report = launcher(&mock, intercepting_config(&project_root))
		.with_sidecar_program(program.to_string_lossy())
		.run(CancellationToken::new())
		.await
		.unwrap();

	let cwd = std::fs::read_to_string(&recorded).unwrap();
	assert_eq!(
		std::fs::canonicalize(cwd.trim()).unwrap(),
		std::fs::canonicalize(&project_root).unwrap()
	);

	let logs = report.sidecar_logs.expect("sidecar log paths");
	let _ = std::fs::remove_file(&logs.stdout);
	let _ = std::fs::remove_file(&logs.stderr);
}

#[tokio::test]
async fn test_agent_found_by_name_without_label() {
	let dir = TempDir::new().unwrap();
	let program = idle_sidecar(dir.path());
	let mock = MockK8sClient::new();
	mock.add_pod(
		"staging",
		labelled_pod(AGENT_POD, &[("app.kubernetes.io/name", "agent")], "Running", true),
	);
	mock.set_pod_logs(AGENT_POD, "agent ready\n");
	mock.script_job_statuses([succeeded()]);

	let report = launcher(&mock, intercepting_config(&dir.path().join("api")))
		.with_sidecar_program(program.to_string_lossy())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(report.result.success);
	assert!(mock.call_targets(MockCall::ListPods).contains(&String::new()));
}

#[tokio::test]
async fn test_sidecar_exit_aborts_before_job() {
	let dir = TempDir::new().unwrap();
	let mock = MockK8sClient::new();

	// `sh exec ...` exits immediately: there is no script named `exec`.
	let err = launcher(&mock, intercepting_config(&dir.path().join("api")))
		.with_sidecar_program("sh")
		.run(CancellationToken::new())
		.await
		.unwrap_err();

	assert!(matches!(err, LaunchError::Sidecar(SidecarError::Exited { .. })));
	assert_eq!(mock.call_count(MockCall::CreateJob), 0);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
}

#[tokio::test]
async fn test_degraded_interception_continues_without_sidecar() {
	let dir = TempDir::new().unwrap();
	let mock = MockK8sClient::new();
	mock.script_job_statuses([succeeded()]);
	let cfg = RunConfig {
		allow_degraded_interception: true,
		..intercepting_config(&dir.path().join("api"))
	};

	let report = launcher(&mock, cfg)
		.with_sidecar_program("sh")
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(report.result.success);
	assert_eq!(mock.call_count(MockCall::CreateJob), 1);
}

#[tokio::test]
async fn test_failed_agent_pod_is_fatal() {
	let dir = TempDir::new().unwrap();
	let program = idle_sidecar(dir.path());
	let mock = MockK8sClient::new();
	mock.add_pod(
		"staging",
		labelled_pod(AGENT_POD, &[("app", "mirrord")], "Failed", false),
	);

	let err = launcher(&mock, intercepting_config(&dir.path().join("api")))
		.with_sidecar_program(program.to_string_lossy())
		.run(CancellationToken::new())
		.await
		.unwrap_err();

	match err {
		LaunchError::Sidecar(SidecarError::AgentFailed { pod, .. }) => assert_eq!(pod, AGENT_POD),
		other => panic!("expected agent failure, got {other:?}"),
	}
	assert_eq!(mock.call_count(MockCall::CreateJob), 0);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
}

#[tokio::test]
async fn test_session_state_transitions() {
	let mock = MockK8sClient::new();
	ready_agent(&mock);
	let gateway = ClusterGateway::new(Arc::new(mock.clone()));

	let command = SidecarCommand {
		program: "sleep".to_string(),
		args: vec!["30".to_string()],
		working_dir: None,
	};
	let mut session = SidecarSession::start(&command, "staging", &CancellationToken::new()).unwrap();
	assert_eq!(session.state(), SidecarState::Starting);
	session.check_alive().unwrap();

	session
		.wait_until_ready(&gateway, Duration::from_millis(5), Duration::from_millis(500))
		.await
		.unwrap();
	assert_eq!(session.state(), SidecarState::Streaming);

	session.stop(Duration::from_secs(2)).await;
	assert_eq!(session.state(), SidecarState::Stopped);
	assert!(session.check_alive().is_err());

	let _ = std::fs::remove_file(&session.log_paths().stdout);
	let _ = std::fs::remove_file(&session.log_paths().stderr);
}

#[tokio::test]
async fn test_agent_never_ready_times_out() {
	let mock = MockK8sClient::new();
	mock.add_pod(
		"staging",
		labelled_pod(AGENT_POD, &[("app", "mirrord")], "Pending", false),
	);
	let gateway = ClusterGateway::new(Arc::new(mock.clone()));

	let command = SidecarCommand {
		program: "sleep".to_string(),
		args: vec!["30".to_string()],
		working_dir: None,
	};
	let mut session = SidecarSession::start(&command, "staging", &CancellationToken::new()).unwrap();
	let err = session
		.wait_until_ready(&gateway, Duration::from_millis(5), Duration::from_millis(50))
		.await
		.unwrap_err();
	assert!(matches!(err, SidecarError::ReadyTimeout { .. }));

	session.stop(Duration::from_secs(2)).await;
	let _ = std::fs::remove_file(&session.log_paths().stdout);
	let _ = std::fs::remove_file(&session.log_paths().stderr);
}

#[tokio::test]
async fn test_stop_kills_sidecar_that_ignores_terminate() {
	let dir = TempDir::new().unwrap();
	let trapped = dir.path().join("trapped");
	let command = SidecarCommand {
		program: "sh".to_string(),
		args: vec![
			"-c".to_string(),
			format!(
				"trap '' TERM; touch '{}'; while true; do sleep 0.1; done",
				trapped.display()
			),
		],
		working_dir: None,
	};
	let mut session = SidecarSession::start(&command, "staging", &CancellationToken::new()).unwrap();

	let deadline = Instant::now() + Duration::from_secs(5);
	while !trapped.exists() {
		assert!(Instant::now() < deadline, "sidecar never installed its trap");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	let grace = Duration::from_millis(300);
	let started = Instant::now();
	session.stop(grace).await;
	let elapsed = started.elapsed();

	assert!(elapsed >= grace, "stopped after {elapsed:?}");
	assert!(elapsed < Duration::from_secs(3), "stopped after {elapsed:?}");
	assert_eq!(session.state(), SidecarState::Stopped);
	assert!(session.check_alive().is_err());

	let _ = std::fs::remove_file(&session.log_paths().stdout);
	let _ = std::fs::remove_file(&session.log_paths().stderr);
}
