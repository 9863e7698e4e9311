// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use ket_k8s::{MockCall, MockK8sClient};
use ket_launcher::{
	run_launch, LaunchError, ProvisionStep, RunConfig, SourceMode, TOOLING_FAILURE_EXIT_CODE,
};
use tokio_util::sync::CancellationToken;

use super::support::{
	active, capturing_launcher, config, failed, launcher, read_all, succeeded, terminated_pod,
	JOB_NAME,
};

#[tokio::test]
async fn test_successful_run_relays_output_and_deletes_namespace() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([active(), succeeded()]);
	mock.set_job_pod_status(terminated_pod(0));
	mock.set_default_logs("PASS  src/app.test.js\n");

	let (launcher, reader) = capturing_launcher(&mock, config());
	let report = launcher.run(CancellationToken::new()).await.unwrap();

	assert!(report.result.success);
	assert_eq!(report.result.exit_code, 0);
	assert_eq!(report.job_name, JOB_NAME);
	assert!(report.namespace.starts_with("kubernetes-embedded-test-"));
	assert!(!report.namespace_kept);

	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
	assert_eq!(mock.call_targets(MockCall::DeleteNamespace), vec![report.namespace.clone()]);
	assert!(mock.namespaces().is_empty());

	assert_eq!(read_all(reader).await, "PASS  src/app.test.js\n");
}

#[tokio::test]
async fn test_provisioning_happens_in_order() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([succeeded()]);

	launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap();

	let order: Vec<MockCall> = mock
		.calls()
		.into_iter()
		.map(|(call, _)| call)
		.filter(|call| {
			matches!(
				call,
				MockCall::CreateNamespace
					| MockCall::CreateServiceAccount
					| MockCall::CreateRole
					| MockCall::CreateRoleBinding
					| MockCall::CreateJob
					| MockCall::DeleteNamespace
			)
		})
		.collect();
	assert_eq!(
		order,
		vec![
			MockCall::CreateNamespace,
			MockCall::CreateServiceAccount,
			MockCall::CreateRole,
			MockCall::CreateRoleBinding,
			MockCall::CreateJob,
			MockCall::DeleteNamespace,
		]
	);
}

#[tokio::test]
async fn test_failed_job_reports_pod_exit_code() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([active(), failed()]);
	mock.set_job_pod_status(terminated_pod(3));

	let report = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(!report.result.success);
	assert_eq!(report.result.exit_code, 3);
	assert_eq!(report.result.error.as_deref(), Some("BackoffLimitExceeded"));
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
}

#[tokio::test]
async fn test_run_launch_maps_failure_to_test_execution_error() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([failed()]);
	mock.set_job_pod_status(terminated_pod(42));

	let err = run_launch(Arc::new(mock.clone()), config(), CancellationToken::new())
		.await
		.unwrap_err();

	assert!(err.is_test_failure());
	assert_eq!(err.exit_code(), 42);
	match err {
		LaunchError::TestFailed(e) => assert_eq!(e.exit_code, 42),
		other => panic!("expected test failure, got {other:?}"),
	}
}

#[tokio::test]
async fn test_success_without_pod_defaults_to_zero() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([active(), succeeded()]);

	let report = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(report.result.success);
	assert_eq!(report.result.exit_code, 0);
}

#[tokio::test]
async fn test_failure_without_pod_defaults_to_one() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([active(), failed()]);

	let report = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(!report.result.success);
	assert_eq!(report.result.exit_code, 1);
}

#[tokio::test]
async fn test_transient_status_errors_do_not_abort() {
	let mock = MockK8sClient::new();
	mock.fail_times(MockCall::GetJob, 2, "etcdserver: request timed out");
	mock.script_job_statuses([succeeded()]);

	let report = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(report.result.success);
	assert!(mock.call_count(MockCall::GetJob) >= 3);
}

#[tokio::test]
async fn test_rbac_failure_still_deletes_namespace() {
	let mock = MockK8sClient::new();
	mock.fail(MockCall::CreateRole, "roles.rbac.authorization.k8s.io is forbidden");

	let err = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap_err();

	assert!(matches!(
		err,
		LaunchError::Provisioning {
			step: ProvisionStep::Rbac,
			..
		}
	));
	assert_eq!(err.exit_code(), TOOLING_FAILURE_EXIT_CODE);
	assert_eq!(mock.call_count(MockCall::CreateJob), 0);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
}

#[tokio::test]
async fn test_job_failure_still_deletes_namespace() {
	let mock = MockK8sClient::new();
	mock.fail(MockCall::CreateJob, "admission webhook denied the request");

	let err = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap_err();

	assert!(matches!(
		err,
		LaunchError::Provisioning {
			step: ProvisionStep::Job,
			..
		}
	));
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
}

#[tokio::test]
async fn test_namespace_failure_skips_cleanup() {
	let mock = MockK8sClient::new();
	mock.fail(MockCall::CreateNamespace, "connection refused");

	let err = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap_err();

	assert!(matches!(
		err,
		LaunchError::Provisioning {
			step: ProvisionStep::Namespace,
			..
		}
	));
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 0);
}

#[tokio::test]
async fn test_invalid_config_touches_nothing() {
	let mock = MockK8sClient::new();
	let cfg = RunConfig {
		test_command: String::new(),
		..config()
	};

	let err = launcher(&mock, cfg)
		.run(CancellationToken::new())
		.await
		.unwrap_err();

	assert!(matches!(err, LaunchError::InvalidConfig(_)));
	assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_keep_namespace_skips_delete() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([succeeded()]);
	let cfg = RunConfig {
		keep_namespace: true,
		..config()
	};

	let report = launcher(&mock, cfg)
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(report.namespace_kept);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 0);
	assert_eq!(mock.namespaces(), vec![report.namespace]);
}

#[tokio::test]
async fn test_delete_failure_does_not_mask_result() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([failed()]);
	mock.set_job_pod_status(terminated_pod(2));
	mock.fail(MockCall::DeleteNamespace, "the server is currently unable to handle the request");

	let report = launcher(&mock, config())
		.run(CancellationToken::new())
		.await
		.unwrap();

	assert!(!report.result.success);
	assert_eq!(report.result.exit_code, 2);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
}

#[tokio::test]
async fn test_hanging_log_stream_does_not_block_result() {
	let mock = MockK8sClient::new();
	mock.hang_log_streams();
	mock.script_job_statuses([active(), active(), succeeded()]);
	mock.set_job_pod_status(terminated_pod(0));

	let (launcher, _reader) = capturing_launcher(&mock, config());
	let report = tokio::time::timeout(Duration::from_secs(5), launcher.run(CancellationToken::new()))
		.await
		.expect("run should not hang on the log stream")
		.unwrap();

	assert!(report.result.success);
	assert_eq!(mock.call_count(MockCall::StreamLogs), 1);
}

#[tokio::test]
async fn test_config_map_source_is_created_before_job() {
	let dir = tempfile::TempDir::new().unwrap();
	std::fs::write(dir.path().join("package.json"), "{}").unwrap();
	std::fs::create_dir_all(dir.path().join("src")).unwrap();
	std::fs::write(dir.path().join("src/index.js"), "module.exports = 1").unwrap();

	let mock = MockK8sClient::new();
	mock.script_job_statuses([succeeded()]);
	let cfg = RunConfig {
		project_root: dir.path().to_path_buf(),
		source_mode: SourceMode::ConfigMap,
		..config()
	};

	let report = launcher(&mock, cfg)
		.run(CancellationToken::new())
		.await
		.unwrap();
	assert!(report.result.success);

	let calls: Vec<MockCall> = mock.calls().into_iter().map(|(c, _)| c).collect();
	let cm = calls
		.iter()
		.position(|c| *c == MockCall::CreateConfigMap)
		.unwrap();
	let job = calls.iter().position(|c| *c == MockCall::CreateJob).unwrap();
	assert!(cm < job);

	let cm_name = &mock.call_targets(MockCall::CreateConfigMap)[0];
	let created = mock.config_map(&report.namespace, cm_name).unwrap();
	let data = created.data.unwrap();
	assert_eq!(data.get("package.json").map(String::as_str), Some("{}"));
	assert!(data.contains_key("src__index.js"));
}
