// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Namespace teardown for a run.

use std::time::Duration;

use crate::gateway::ClusterGateway;

/// Deletes the run namespace exactly once.
///
/// Armed as soon as the namespace exists. [`NamespaceCleanup::run`] performs
/// the delete without consulting the run's cancellation token, so a cancelled
/// run still tears down. If the guard is dropped without `run` (a panic
/// unwinding through the launcher) the delete is spawned onto the runtime.
pub struct NamespaceCleanup {
	gateway: ClusterGateway,
	namespace: String,
	keep: bool,
	finalize_grace: Duration,
	timeout: Duration,
	done: bool,
}

impl NamespaceCleanup {
	pub fn arm(
		gateway: ClusterGateway,
		namespace: &str,
		keep: bool,
		finalize_grace: Duration,
		timeout: Duration,
	) -> Self {
		Self {
			gateway,
			namespace: namespace.to_string(),
			keep,
			finalize_grace,
			timeout,
			done: false,
		}
	}

	/// Delete the namespace unless it is being kept. Errors are logged only.
	///
	/// Returns true when the namespace was kept.
	pub async fn run(mut self) -> bool {
		self.done = true;
		if self.keep {
			tracing::info!(namespace = %self.namespace, "Keeping namespace");
			return true;
		}

		tracing::info!(namespace = %self.namespace, "Deleting namespace");
		match tokio::time::timeout(
			self.timeout,
			self
				.gateway
				.force_delete_namespace(&self.namespace, self.finalize_grace),
		)
		.await
		{
			Ok(Ok(())) => tracing::debug!(namespace = %self.namespace, "Namespace deleted"),
			Ok(Err(e)) => {
				tracing::error!(namespace = %self.namespace, error = %e, "Failed to delete namespace")
			}
			Err(_) => tracing::error!(
				namespace = %self.namespace,
				timeout = ?self.timeout,
				"Timed out deleting namespace"
			),
		}
		false
	}
}

impl Drop for NamespaceCleanup {
	fn drop(&mut self) {
		if self.done || self.keep {
			return;
		}
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			tracing::error!(namespace = %self.namespace, "No runtime to delete namespace on");
			return;
		};
		let gateway = self.gateway.clone();
		let namespace = std::mem::take(&mut self.namespace);
		let finalize_grace = self.finalize_grace;
		handle.spawn(async move {
			if let Err(e) = gateway
				.force_delete_namespace(&namespace, finalize_grace)
				.await
			{
				tracing::error!(namespace = %namespace, error = %e, "Failed to delete namespace");
			}
		});
	}
}
