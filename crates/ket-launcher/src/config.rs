// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Run configuration for a single test launch.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

pub const DEFAULT_IMAGE: &str = "atidyshirt/kubernetes-embedded-test-runner-base:latest";
pub const DEFAULT_WORKSPACE_PATH: &str = "/workspace";
pub const DEFAULT_NAMESPACE_PREFIX: &str = "kubernetes-embedded-test";
pub const DEFAULT_TARGET_NAMESPACE: &str = "default";
pub const DEFAULT_BACKOFF_LIMIT: i32 = 1;
pub const DEFAULT_ACTIVE_DEADLINE_SECONDS: i64 = 1800;

/// Where the test container gets the project source from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
	/// Mount the node's workspace directory with a hostPath volume.
	#[default]
	HostPath,
	/// Ship the project tree in a ConfigMap and unpack it with an init container.
	ConfigMap,
}

impl std::fmt::Display for SourceMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SourceMode::HostPath => write!(f, "host-path"),
			SourceMode::ConfigMap => write!(f, "config-map"),
		}
	}
}

/// Configuration for one launch. Built once and never mutated during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
	/// Project directory relative to the workspace root
	pub project_root: PathBuf,
	/// Container image the test runs in
	pub image: String,
	/// Shell command run with `/bin/sh -c`
	pub test_command: String,
	/// Where the workspace is mounted inside the container
	pub workspace_path: String,
	/// Prefix for the generated namespace name
	pub namespace_prefix: String,
	pub backoff_limit: i32,
	pub active_deadline_seconds: i64,
	/// Leave the namespace in place after the run
	pub keep_namespace: bool,
	pub source_mode: SourceMode,
	/// Pod whose traffic the sidecar intercepts
	pub target_pod: Option<String>,
	pub target_namespace: Option<String>,
	/// Command wrapped by the interception sidecar
	pub process_to_test: Option<String>,
	/// Steal traffic instead of mirroring it
	pub steal: bool,
	/// Continue without interception when the sidecar never becomes ready
	pub allow_degraded_interception: bool,
	pub debug: bool,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self {
			project_root: PathBuf::from("."),
			image: DEFAULT_IMAGE.to_string(),
			test_command: String::new(),
			workspace_path: DEFAULT_WORKSPACE_PATH.to_string(),
			namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
			backoff_limit: DEFAULT_BACKOFF_LIMIT,
			active_deadline_seconds: DEFAULT_ACTIVE_DEADLINE_SECONDS,
			keep_namespace: false,
			source_mode: SourceMode::HostPath,
			target_pod: None,
			target_namespace: None,
			process_to_test: None,
			steal: false,
			allow_degraded_interception: false,
			debug: false,
		}
	}
}

/// Resolved traffic interception settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interception {
	pub target_pod: String,
	pub target_namespace: String,
	pub process_to_test: String,
	pub steal: bool,
}

impl RunConfig {
	/// Check the invariants that must hold before any cluster mutation.
	pub fn validate(&self) -> Result<(), LaunchError> {
		if self.test_command.trim().is_empty() {
			return Err(LaunchError::InvalidConfig(
				"test command must not be empty".to_string(),
			));
		}

		let has_pod = self.target_pod.as_deref().is_some_and(|s| !s.is_empty());
		let has_process = self
			.process_to_test
			.as_deref()
			.is_some_and(|s| !s.trim().is_empty());
		if has_pod != has_process {
			return Err(LaunchError::InvalidConfig(
				"target pod and process to test must be set together".to_string(),
			));
		}

		if !self.workspace_path.starts_with('/') {
			return Err(LaunchError::InvalidConfig(format!(
				"workspace path must be absolute: {}",
				self.workspace_path
			)));
		}
		if self.backoff_limit < 0 {
			return Err(LaunchError::InvalidConfig(format!(
				"backoff limit must not be negative: {}",
				self.backoff_limit
			)));
		}
		if self.active_deadline_seconds <= 0 {
			return Err(LaunchError::InvalidConfig(format!(
				"active deadline must be positive: {}",
				self.active_deadline_seconds
			)));
		}
		Ok(())
	}

	/// Interception settings, or `None` when no sidecar should run.
	pub fn interception(&self) -> Option<Interception> {
		let target_pod = self.target_pod.clone().filter(|s| !s.is_empty())?;
		let process_to_test = self.process_to_test.clone().filter(|s| !s.trim().is_empty())?;
		let target_namespace = self
			.target_namespace
			.clone()
			.filter(|s| !s.is_empty())
			.unwrap_or_else(|| DEFAULT_TARGET_NAMESPACE.to_string());
		Some(Interception {
			target_pod,
			target_namespace,
			process_to_test,
			steal: self.steal,
		})
	}
}

/// Poll intervals and timeouts used by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchTimings {
	pub pod_ready_interval: Duration,
	pub pod_ready_timeout: Duration,
	pub completion_interval: Duration,
	pub agent_ready_interval: Duration,
	pub agent_ready_timeout: Duration,
	pub sidecar_stop_grace: Duration,
	/// How long trailing test output may keep flowing after the Job finished
	pub log_drain_timeout: Duration,
	/// How long a deleted namespace may stay terminating before its
	/// finalizers are cleared
	pub namespace_finalize_grace: Duration,
	pub cleanup_timeout: Duration,
}

impl LaunchTimings {
	pub const POD_READY_INTERVAL: Duration = Duration::from_secs(2);
	pub const POD_READY_TIMEOUT: Duration = Duration::from_secs(120);
	pub const COMPLETION_INTERVAL: Duration = Duration::from_secs(5);
	pub const AGENT_READY_INTERVAL: Duration = Duration::from_secs(2);
	pub const AGENT_READY_TIMEOUT: Duration = Duration::from_secs(60);
	pub const SIDECAR_STOP_GRACE: Duration = Duration::from_secs(5);
	pub const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
	pub const NAMESPACE_FINALIZE_GRACE: Duration = Duration::from_secs(20);
	pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for LaunchTimings {
	fn default() -> Self {
		Self {
			pod_ready_interval: Self::POD_READY_INTERVAL,
			pod_ready_timeout: Self::POD_READY_TIMEOUT,
			completion_interval: Self::COMPLETION_INTERVAL,
			agent_ready_interval: Self::AGENT_READY_INTERVAL,
			agent_ready_timeout: Self::AGENT_READY_TIMEOUT,
			sidecar_stop_grace: Self::SIDECAR_STOP_GRACE,
			log_drain_timeout: Self::LOG_DRAIN_TIMEOUT,
			namespace_finalize_grace: Self::NAMESPACE_FINALIZE_GRACE,
			cleanup_timeout: Self::CLEANUP_TIMEOUT,
		}
	}
}
