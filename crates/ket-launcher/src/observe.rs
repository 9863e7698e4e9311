// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Watching a running test Job: log relay and completion polling.

use std::time::Duration;

use futures::StreamExt;
use ket_k8s::{JobStatus, Pod};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LaunchError, ObserveError};
use crate::gateway::{latest_pod, ClusterGateway};
use crate::types::TestResult;

/// Destination for relayed test output.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

const STREAM_OPEN_ATTEMPTS: u32 = 3;
const EMPTY_POLL_LOG_EVERY: u32 = 5;

/// Terminal state of a Job as reported by its status.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
	pub succeeded: bool,
	pub status: JobStatus,
}

impl JobOutcome {
	/// Classify a status, returning `None` while the Job is still running.
	pub fn from_status(status: JobStatus) -> Option<Self> {
		if status.succeeded.unwrap_or(0) > 0 {
			return Some(Self {
				succeeded: true,
				status,
			});
		}
		if status.failed.unwrap_or(0) > 0 {
			return Some(Self {
				succeeded: false,
				status,
			});
		}
		None
	}

	/// Reason and message of the Job's `Failed` condition, if present.
	pub fn failure_reason(&self) -> Option<String> {
		let condition = self
			.status
			.conditions
			.as_ref()?
			.iter()
			.find(|c| c.type_ == "Failed" && c.status == "True")?;
		match (&condition.reason, &condition.message) {
			(Some(reason), Some(message)) => Some(format!("{reason}: {message}")),
			(Some(reason), None) => Some(reason.clone()),
			(None, Some(message)) => Some(message.clone()),
			(None, None) => None,
		}
	}
}

/// Poll the Job until it succeeds or fails.
///
/// Status read errors are logged and polling continues. Cancellation returns
/// [`LaunchError::Cancelled`] without waiting out the current interval.
#[tracing::instrument(skip(gateway, cancel))]
pub async fn wait_for_completion(
	gateway: &ClusterGateway,
	job_name: &str,
	namespace: &str,
	interval: Duration,
	cancel: &CancellationToken,
) -> Result<JobOutcome, LaunchError> {
	loop {
		let status = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(LaunchError::Cancelled),
			status = gateway.get_job_status(job_name, namespace) => status,
		};

		match status {
			Ok(status) => {
				tracing::debug!(
					active = status.active.unwrap_or(0),
					succeeded = status.succeeded.unwrap_or(0),
					failed = status.failed.unwrap_or(0),
					"Job status"
				);
				if let Some(outcome) = JobOutcome::from_status(status) {
					tracing::info!(job = %job_name, succeeded = outcome.succeeded, "Job finished");
					return Ok(outcome);
				}
			}
			Err(e) => {
				tracing::warn!(job = %job_name, error = %e, "Failed to read job status, retrying");
			}
		}

		tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(LaunchError::Cancelled),
			_ = tokio::time::sleep(interval) => {}
		}
	}
}

/// Turn a terminal Job into a [`TestResult`].
///
/// The exit code comes from the pod's terminated container. When it cannot
/// be read the Job status decides: 0 on success, 1 on failure.
pub async fn classify_result(
	gateway: &ClusterGateway,
	job_name: &str,
	namespace: &str,
	outcome: &JobOutcome,
) -> TestResult {
	let exit_code = match gateway.get_pod_exit_code(job_name, namespace).await {
		Ok(code) => code,
		Err(e) => {
			let fallback = if outcome.succeeded { 0 } else { 1 };
			tracing::warn!(job = %job_name, error = %e, fallback, "Could not read test exit code");
			fallback
		}
	};

	if outcome.succeeded {
		return TestResult {
			exit_code,
			success: true,
			error: None,
		};
	}

	let reason = outcome
		.failure_reason()
		.unwrap_or_else(|| format!("job {job_name} failed"));
	TestResult {
		exit_code: if exit_code == 0 { 1 } else { exit_code },
		success: false,
		error: Some(reason),
	}
}

/// One-line description of where a pod is in its lifecycle.
pub fn describe_pod(pod: &Pod) -> String {
	let Some(status) = pod.status.as_ref() else {
		return "Pending".to_string();
	};
	let container = status.container_statuses.as_ref().and_then(|c| c.first());
	let Some(state) = container.and_then(|c| c.state.as_ref()) else {
		return match status.phase.as_deref() {
			Some("Pending") | None => "ContainerCreating".to_string(),
			Some(phase) => phase.to_string(),
		};
	};

	if let Some(terminated) = &state.terminated {
		return format!(
			"Terminated: {}",
			terminated.reason.as_deref().unwrap_or("Unknown")
		);
	}
	if state.running.is_some() {
		return "Running".to_string();
	}
	if let Some(waiting) = &state.waiting {
		return match waiting.reason.as_deref() {
			Some("ContainerCreating") | None => "ContainerCreating".to_string(),
			Some(reason) => format!("Waiting: {reason}"),
		};
	}
	"Pending".to_string()
}

/// Running with every container ready.
pub fn pod_is_ready(pod: &Pod) -> bool {
	let Some(status) = pod.status.as_ref() else {
		return false;
	};
	if status.phase.as_deref() != Some("Running") {
		return false;
	}
	status
		.container_statuses
		.as_ref()
		.is_some_and(|c| !c.is_empty() && c.iter().all(|s| s.ready))
}

/// Reached a terminal phase or has a terminated container.
pub fn pod_is_finished(pod: &Pod) -> bool {
	let Some(status) = pod.status.as_ref() else {
		return false;
	};
	if matches!(status.phase.as_deref(), Some("Succeeded") | Some("Failed")) {
		return true;
	}
	status.container_statuses.as_ref().is_some_and(|c| {
		c.iter()
			.any(|s| s.state.as_ref().is_some_and(|st| st.terminated.is_some()))
	})
}

/// Wait for a Job pod whose logs can be followed.
///
/// Returns `Ok(None)` on cancellation.
async fn wait_for_log_pod(
	gateway: &ClusterGateway,
	job_name: &str,
	namespace: &str,
	interval: Duration,
	timeout: Duration,
	cancel: &CancellationToken,
) -> Result<Option<String>, ObserveError> {
	let deadline = Instant::now() + timeout;
	let mut last_state: Option<String> = None;
	let mut empty_polls = 0u32;

	loop {
		let pods = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Ok(None),
			pods = gateway.list_pods_for_job(job_name, namespace) => pods,
		};

		match pods {
			Ok(pods) => match latest_pod(&pods) {
				Some(pod) => {
					let state = describe_pod(pod);
					if last_state.as_deref() != Some(state.as_str()) {
						tracing::info!(job = %job_name, state = %state, "Test pod status");
						last_state = Some(state);
					}
					if pod_is_ready(pod) || pod_is_finished(pod) {
						return Ok(pod.metadata.name.clone());
					}
				}
				None => {
					empty_polls += 1;
					if empty_polls % EMPTY_POLL_LOG_EVERY == 0 {
						tracing::info!(job = %job_name, "Waiting for pod to be created");
					}
				}
			},
			Err(e) => tracing::warn!(job = %job_name, error = %e, "Failed to list job pods"),
		}

		if Instant::now() >= deadline {
			return Err(ObserveError::PodTimeout {
				job: job_name.to_string(),
				timeout,
			});
		}

		tokio::select! {
			biased;
			_ = cancel.cancelled() => return Ok(None),
			_ = tokio::time::sleep(interval) => {}
		}
	}
}

/// Relay the test pod's log into `sink` until it ends or `cancel` fires.
///
/// Returns the number of bytes relayed.
pub async fn stream_test_output(
	gateway: &ClusterGateway,
	job_name: &str,
	namespace: &str,
	poll_interval: Duration,
	ready_timeout: Duration,
	sink: &mut OutputSink,
	cancel: &CancellationToken,
) -> Result<u64, ObserveError> {
	let Some(pod_name) = wait_for_log_pod(
		gateway,
		job_name,
		namespace,
		poll_interval,
		ready_timeout,
		cancel,
	)
	.await?
	else {
		return Ok(0);
	};

	let mut attempt = 0;
	let mut stream = loop {
		attempt += 1;
		match gateway.stream_pod_logs(&pod_name, namespace).await {
			Ok(stream) => break stream,
			Err(e) if attempt < STREAM_OPEN_ATTEMPTS => {
				tracing::debug!(pod = %pod_name, attempt, error = %e, "Retrying log stream");
				tokio::select! {
					biased;
					_ = cancel.cancelled() => return Ok(0),
					_ = tokio::time::sleep(poll_interval) => {}
				}
			}
			Err(e) => return Err(e.into()),
		}
	};

	tracing::debug!(pod = %pod_name, "Streaming test output");
	let mut relayed = 0u64;
	loop {
		let chunk = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			chunk = stream.next() => chunk,
		};
		let Some(chunk) = chunk else {
			break;
		};
		let bytes = chunk.map_err(ObserveError::Stream)?;
		sink.write_all(&bytes).await.map_err(ObserveError::Output)?;
		relayed += bytes.len() as u64;
	}
	sink.flush().await.map_err(ObserveError::Output)?;
	Ok(relayed)
}
