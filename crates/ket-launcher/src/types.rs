// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use serde::Serialize;

use crate::error::TestExecutionError;

/// Outcome of the test Job once it reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
	pub exit_code: i32,
	pub success: bool,
	pub error: Option<String>,
}

impl TestResult {
	/// Convert a failed result into the error the caller maps to its exit status.
	pub fn into_error(self) -> Option<TestExecutionError> {
		if self.success {
			return None;
		}
		Some(TestExecutionError {
			exit_code: self.exit_code,
			message: self
				.error
				.unwrap_or_else(|| "test job failed".to_string()),
		})
	}
}

/// Where the interception sidecar's output was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidecarLogPaths {
	pub stdout: PathBuf,
	pub stderr: PathBuf,
}

/// Summary of a completed launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchReport {
	pub namespace: String,
	pub job_name: String,
	pub result: TestResult,
	pub namespace_kept: bool,
	pub sidecar_logs: Option<SidecarLogPaths>,
}
