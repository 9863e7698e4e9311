// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use ket_k8s::{MockCall, MockK8sClient};
use ket_launcher::{LaunchError, CANCELLED_EXIT_CODE};
use tokio_util::sync::CancellationToken;

use super::support::{active, config, fast_timings, launcher};

#[tokio::test]
async fn test_cancel_during_polling_still_deletes_namespace() {
	let mock = MockK8sClient::new();
	mock.script_job_statuses([active()]);

	let timings = ket_launcher::LaunchTimings {
		completion_interval: Duration::from_secs(10),
		..fast_timings()
	};
	let launcher = launcher(&mock, config()).with_timings(timings);

	let cancel = CancellationToken::new();
	let trigger = cancel.clone();
	let watcher = mock.clone();
	tokio::spawn(async move {
		while watcher.call_count(MockCall::GetJob) == 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		trigger.cancel();
	});

	let err = tokio::time::timeout(Duration::from_secs(2), launcher.run(cancel))
		.await
		.expect("cancellation should interrupt the poll interval")
		.unwrap_err();

	assert!(matches!(err, LaunchError::Cancelled));
	assert_eq!(err.exit_code(), CANCELLED_EXIT_CODE);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 1);
	assert!(mock.namespaces().is_empty());
}

#[tokio::test]
async fn test_cancel_before_start_creates_nothing() {
	let mock = MockK8sClient::new();
	let cancel = CancellationToken::new();
	cancel.cancel();

	let err = launcher(&mock, config()).run(cancel).await.unwrap_err();

	assert!(matches!(err, LaunchError::Cancelled));
	assert_eq!(mock.call_count(MockCall::CreateNamespace), 0);
	assert_eq!(mock.call_count(MockCall::DeleteNamespace), 0);
}
