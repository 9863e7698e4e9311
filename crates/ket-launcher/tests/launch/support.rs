// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared fixtures for launch tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::JobCondition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ket_k8s::{
	ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus, JobStatus,
	MockK8sClient, Pod, PodStatus,
};
use ket_launcher::{LaunchTimings, Launcher, RunConfig};
use tokio::io::{AsyncReadExt, DuplexStream};

pub const JOB_NAME: &str = "ket-my-app";

pub fn fast_timings() -> LaunchTimings {
	LaunchTimings {
		pod_ready_interval: Duration::from_millis(5),
		pod_ready_timeout: Duration::from_millis(500),
		completion_interval: Duration::from_millis(10),
		agent_ready_interval: Duration::from_millis(5),
		agent_ready_timeout: Duration::from_millis(500),
		sidecar_stop_grace: Duration::from_millis(500),
		log_drain_timeout: Duration::from_millis(200),
		namespace_finalize_grace: Duration::from_millis(50),
		cleanup_timeout: Duration::from_secs(1),
	}
}

pub fn config() -> RunConfig {
	RunConfig {
		project_root: PathBuf::from("my-app"),
		image: "node:18-alpine".to_string(),
		test_command: "npm test".to_string(),
		..Default::default()
	}
}

pub fn active() -> JobStatus {
	JobStatus {
		active: Some(1),
		..Default::default()
	}
}

pub fn succeeded() -> JobStatus {
	JobStatus {
		succeeded: Some(1),
		..Default::default()
	}
}

pub fn failed() -> JobStatus {
	JobStatus {
		failed: Some(1),
		conditions: Some(vec![JobCondition {
			type_: "Failed".to_string(),
			status: "True".to_string(),
			reason: Some("BackoffLimitExceeded".to_string()),
			..Default::default()
		}]),
		..Default::default()
	}
}

/// Status of a pod whose only container exited with `exit_code`.
pub fn terminated_pod(exit_code: i32) -> PodStatus {
	PodStatus {
		phase: Some(if exit_code == 0 { "Succeeded" } else { "Failed" }.to_string()),
		container_statuses: Some(vec![ContainerStatus {
			name: "test-runner".to_string(),
			state: Some(ContainerState {
				terminated: Some(ContainerStateTerminated {
					exit_code,
					reason: Some(if exit_code == 0 { "Completed" } else { "Error" }.to_string()),
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		}]),
		..Default::default()
	}
}

pub fn running_pod() -> PodStatus {
	PodStatus {
		phase: Some("Running".to_string()),
		container_statuses: Some(vec![ContainerStatus {
			name: "test-runner".to_string(),
			ready: true,
			state: Some(ContainerState {
				running: Some(ContainerStateRunning::default()),
				..Default::default()
			}),
			..Default::default()
		}]),
		..Default::default()
	}
}

/// A pod in `phase` carrying `labels`, with one container of the given readiness.
pub fn labelled_pod(name: &str, labels: &[(&str, &str)], phase: &str, ready: bool) -> Pod {
	Pod {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			labels: Some(
				labels
					.iter()
					.map(|(k, v)| (k.to_string(), v.to_string()))
					.collect::<BTreeMap<_, _>>(),
			),
			..Default::default()
		},
		spec: None,
		status: Some(PodStatus {
			phase: Some(phase.to_string()),
			container_statuses: Some(vec![ContainerStatus {
				name: "mirrord-agent".to_string(),
				ready,
				..Default::default()
			}]),
			..Default::default()
		}),
	}
}

pub fn launcher(mock: &MockK8sClient, config: RunConfig) -> Launcher {
	Launcher::new(Arc::new(mock.clone()), config)
		.with_timings(fast_timings())
		.without_output()
}

/// A launcher whose relayed output can be read back once the run is over.
pub fn capturing_launcher(mock: &MockK8sClient, config: RunConfig) -> (Launcher, DuplexStream) {
	let (writer, reader) = tokio::io::duplex(64 * 1024);
	let launcher = Launcher::new(Arc::new(mock.clone()), config)
		.with_timings(fast_timings())
		.with_output(Box::new(writer));
	(launcher, reader)
}

pub async fn read_all(mut reader: DuplexStream) -> String {
	let mut out = String::new();
	reader.read_to_string(&mut out).await.unwrap();
	out
}
