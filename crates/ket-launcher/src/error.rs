// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Launcher error types.

use std::path::PathBuf;
use std::time::Duration;

use ket_k8s::K8sError;

/// Exit code reported for any failure of the harness itself.
pub const TOOLING_FAILURE_EXIT_CODE: i32 = 125;

/// Exit code reported when the run was interrupted.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Provisioning phase that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
	Namespace,
	Rbac,
	SourceConfigMap,
	Job,
}

impl std::fmt::Display for ProvisionStep {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ProvisionStep::Namespace => write!(f, "namespace"),
			ProvisionStep::Rbac => write!(f, "rbac"),
			ProvisionStep::SourceConfigMap => write!(f, "source configmap"),
			ProvisionStep::Job => write!(f, "job"),
		}
	}
}

/// The test ran and exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("test failed with exit code {exit_code}: {message}")]
pub struct TestExecutionError {
	pub exit_code: i32,
	pub message: String,
}

/// Errors from building resource manifests.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
	/// Project root escapes the workspace
	#[error("project root must lie inside the workspace: {path}")]
	ProjectRootOutsideWorkspace { path: PathBuf },

	/// ConfigMap mode without collected source
	#[error("config-map source mode requires the collected project source")]
	MissingSource,
}

/// Errors from collecting the project tree for the ConfigMap source mode.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
	#[error("failed to walk project tree at {path}: {source}")]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},

	/// ConfigMaps are capped by the API server
	#[error("project source is {size} bytes, over the {limit} byte ConfigMap limit")]
	TooLarge { size: usize, limit: usize },
}

/// Errors while relaying test output. Logged, never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
	#[error("no ready pod for job {job} after {timeout:?}")]
	PodTimeout { job: String, timeout: Duration },

	#[error(transparent)]
	Cluster(#[from] K8sError),

	#[error("log stream failed: {0}")]
	Stream(#[source] std::io::Error),

	#[error("failed to write test output: {0}")]
	Output(#[source] std::io::Error),
}

/// Errors from the traffic interception sidecar.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
	#[error("failed to start {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("sidecar process exited before the agent was ready: {status}")]
	Exited { status: String },

	#[error("sidecar process is not responding")]
	Unresponsive,

	#[error("interception agent pod {pod} failed: {reason}")]
	AgentFailed { pod: String, reason: String },

	#[error("interception agent was not ready after {timeout:?}")]
	ReadyTimeout { timeout: Duration },

	#[error("sidecar log file error: {0}")]
	LogFile(#[source] std::io::Error),

	#[error("sidecar readiness wait was cancelled")]
	Cancelled,
}

/// Errors from a launch.
///
/// [`LaunchError::TestFailed`] is the only variant describing the test itself;
/// every other variant is a fault of the harness.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error(transparent)]
	Manifest(#[from] ManifestError),

	#[error(transparent)]
	Source(#[from] SourceError),

	#[error("failed to provision {step}: {source}")]
	Provisioning {
		step: ProvisionStep,
		#[source]
		source: K8sError,
	},

	#[error(transparent)]
	Sidecar(#[from] SidecarError),

	#[error("launch cancelled")]
	Cancelled,

	#[error(transparent)]
	TestFailed(#[from] TestExecutionError),
}

impl LaunchError {
	pub fn provisioning(step: ProvisionStep, source: K8sError) -> Self {
		LaunchError::Provisioning { step, source }
	}

	/// True when the test ran and failed, as opposed to the harness failing.
	pub fn is_test_failure(&self) -> bool {
		matches!(self, LaunchError::TestFailed(_))
	}

	/// Process exit code for this outcome.
	///
	/// Test failures keep the test's own code, clamped to `1..=255`.
	pub fn exit_code(&self) -> i32 {
		match self {
			LaunchError::TestFailed(e) => e.exit_code.clamp(1, 255),
			LaunchError::Cancelled => CANCELLED_EXIT_CODE,
			_ => TOOLING_FAILURE_EXIT_CODE,
		}
	}
}
