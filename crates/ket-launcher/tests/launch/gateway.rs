// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::{Duration, Instant};

use ket_k8s::{K8sError, MockCall, MockK8sClient};
use ket_launcher::gateway::ClusterGateway;
use ket_launcher::observe::stream_test_output;
use ket_launcher::{build_manifests, ObserveError, OutputSink};
use tokio_util::sync::CancellationToken;

use super::support::{config, running_pod, JOB_NAME};

fn gateway(mock: &MockK8sClient) -> ClusterGateway {
	ClusterGateway::new(Arc::new(mock.clone()))
}

#[tokio::test]
async fn test_apply_rbac_twice_is_ok() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ket-test-a1b2c3d4", None).unwrap();

	assert!(gw.create_namespace(&manifests.namespace).await.unwrap());
	gw.apply_rbac(&manifests).await.unwrap();
	gw.apply_rbac(&manifests).await.unwrap();

	assert_eq!(mock.call_count(MockCall::CreateRole), 2);
	assert!(mock.has_object("Role", "ket-test-a1b2c3d4", "ket-test-runner"));
}

#[tokio::test]
async fn test_existing_namespace_reports_false() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ket-test-a1b2c3d4", None).unwrap();

	assert!(gw.create_namespace(&manifests.namespace).await.unwrap());
	assert!(!gw.create_namespace(&manifests.namespace).await.unwrap());
	assert_eq!(mock.call_count(MockCall::GetNamespace), 1);
}

#[tokio::test]
async fn test_graceful_delete_tolerates_missing_namespace() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ket-test-a1b2c3d4", None).unwrap();
	gw.create_namespace(&manifests.namespace).await.unwrap();

	gw.delete_namespace("ket-test-a1b2c3d4").await.unwrap();
	gw.delete_namespace("ket-test-a1b2c3d4").await.unwrap();

	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 2);
	assert_eq!(mock.call_count(MockCall::ClearNamespaceFinalizers), 0);
}

const FINALIZE_GRACE: Duration = Duration::from_millis(50);

fn call_sequence(mock: &MockK8sClient) -> Vec<MockCall> {
	mock.calls().into_iter().map(|(call, _)| call).collect()
}

#[tokio::test]
async fn test_force_delete_missing_namespace_is_ok() {
	let mock = MockK8sClient::new();
	gateway(&mock)
		.force_delete_namespace("ket-test-gone", FINALIZE_GRACE)
		.await
		.unwrap();
	assert_eq!(call_sequence(&mock), vec![MockCall::DeleteNamespace]);
}

#[tokio::test]
async fn test_force_delete_leaves_finalizers_when_namespace_terminates() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ket-test-a1b2c3d4", None).unwrap();
	gw.create_namespace(&manifests.namespace).await.unwrap();

	gw.force_delete_namespace("ket-test-a1b2c3d4", FINALIZE_GRACE)
		.await
		.unwrap();

	assert_eq!(
		call_sequence(&mock),
		vec![
			MockCall::CreateNamespace,
			MockCall::DeleteNamespace,
			MockCall::GetNamespace,
		]
	);
	assert!(mock.namespaces().is_empty());
}

#[tokio::test]
async fn test_force_delete_clears_finalizers_after_delete_stalls() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ket-test-a1b2c3d4", None).unwrap();
	gw.create_namespace(&manifests.namespace).await.unwrap();
	mock.stall_namespace_termination();

	let started = Instant::now();
	gw.force_delete_namespace("ket-test-a1b2c3d4", FINALIZE_GRACE)
		.await
		.unwrap();

	assert!(started.elapsed() >= FINALIZE_GRACE);
	let calls = call_sequence(&mock);
	let delete = calls
		.iter()
		.position(|c| *c == MockCall::DeleteNamespace)
		.unwrap();
	let clear = calls
		.iter()
		.position(|c| *c == MockCall::ClearNamespaceFinalizers)
		.unwrap();
	assert!(delete < clear);
	assert_eq!(mock.call_count(MockCall::ClearNamespaceFinalizers), 1);
	assert!(mock.namespaces().is_empty());
}

#[tokio::test]
async fn test_force_delete_survives_finalizer_failure() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ket-test-a1b2c3d4", None).unwrap();
	gw.create_namespace(&manifests.namespace).await.unwrap();
	mock.stall_namespace_termination();
	mock.fail(MockCall::ClearNamespaceFinalizers, "conflict");

	gw.force_delete_namespace("ket-test-a1b2c3d4", FINALIZE_GRACE)
		.await
		.unwrap();

	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
	assert_eq!(mock.call_count(MockCall::ClearNamespaceFinalizers), 1);
	assert_eq!(mock.namespaces(), vec!["ket-test-a1b2c3d4".to_string()]);
}

#[tokio::test]
async fn test_exit_code_errors() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ns", None).unwrap();

	let err = gw.get_pod_exit_code(JOB_NAME, "ns").await.unwrap_err();
	assert!(err.is_not_found());

	mock.set_job_pod_status(running_pod());
	gw.create_job("ns", &manifests.job).await.unwrap();
	let err = gw.get_pod_exit_code(JOB_NAME, "ns").await.unwrap_err();
	assert!(matches!(err, K8sError::NotTerminated { .. }));
}

#[tokio::test]
async fn test_stream_without_pod_times_out() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let mut sink: OutputSink = Box::new(tokio::io::sink());

	let err = stream_test_output(
		&gw,
		JOB_NAME,
		"ns",
		Duration::from_millis(5),
		Duration::from_millis(50),
		&mut sink,
		&CancellationToken::new(),
	)
	.await
	.unwrap_err();

	assert!(matches!(err, ObserveError::PodTimeout { .. }));
	assert_eq!(mock.call_count(MockCall::StreamLogs), 0);
}

#[tokio::test]
async fn test_stream_follows_ready_pod() {
	let mock = MockK8sClient::new();
	let gw = gateway(&mock);
	let manifests = build_manifests(&config(), "ns", None).unwrap();
	mock.set_job_pod_status(running_pod());
	mock.set_default_logs("> jest\nTests: 4 passed\n");
	gw.create_job("ns", &manifests.job).await.unwrap();

	let mut sink: OutputSink = Box::new(tokio::io::sink());
	let relayed = stream_test_output(
		&gw,
		JOB_NAME,
		"ns",
		Duration::from_millis(5),
		Duration::from_millis(500),
		&mut sink,
		&CancellationToken::new(),
	)
	.await
	.unwrap();

	assert_eq!(relayed, "> jest\nTests: 4 passed\n".len() as u64);
}
