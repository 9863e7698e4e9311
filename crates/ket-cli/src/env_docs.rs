// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `ket env`: what a test can rely on inside its container.

use ket_launcher::config::DEFAULT_WORKSPACE_PATH;
use ket_launcher::manifest::{
	ENV_PROJECT_ROOT, ENV_TARGET_NAMESPACE, ENV_TARGET_POD, ENV_TEST_NAMESPACE, ENV_WORKSPACE_PATH,
	REPORTS_PATH,
};

pub fn render() -> String {
	let rows = [
		(ENV_TEST_NAMESPACE, "Namespace the test Job runs in; the test may create resources here"),
		(ENV_PROJECT_ROOT, "Project directory relative to the workspace root"),
		(ENV_WORKSPACE_PATH, "Where the workspace is mounted in the container"),
		(ENV_TARGET_POD, "Pod whose traffic is intercepted (interception runs only)"),
		(ENV_TARGET_NAMESPACE, "Namespace of the intercepted pod (interception runs only)"),
	];
	let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

	let mut out = String::from("Environment variables set in the test container:\n\n");
	for (name, description) in rows {
		out.push_str(&format!("  {name:<width$}  {description}\n"));
	}
	out.push_str("\nPaths:\n\n");
	out.push_str(&format!(
		"  {DEFAULT_WORKSPACE_PATH:<width$}  Project workspace (default; see --cluster-workspace-path)\n"
	));
	out.push_str(&format!(
		"  {REPORTS_PATH:<width$}  Scratch directory for test reports, discarded with the namespace\n"
	));
	out.push_str(
		"\nThe test's service account may manage pods, services, deployments, jobs and\n\
		 ingresses inside its own namespace only.\n",
	);
	out
}
