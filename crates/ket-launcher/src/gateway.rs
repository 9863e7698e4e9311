// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster operations the launcher depends on.
//!
//! Each method issues the API calls implied by its name and nothing more.
//! "Already exists" on create and "not found" on delete are folded into
//! success where a run can safely continue; everything else is returned.

use std::sync::Arc;
use std::time::Duration;

use ket_k8s::{
	ConfigMap, DeleteOptions, Job, JobStatus, K8sClient, K8sError, LogOptions, LogStream, Namespace,
	Pod,
};

use crate::manifest::TestManifests;

const NAMESPACE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Label selecting the pods a Job created.
pub fn job_selector(job_name: &str) -> String {
	format!("job-name={job_name}")
}

/// Cheap, cloneable handle over a [`K8sClient`].
#[derive(Clone)]
pub struct ClusterGateway {
	client: Arc<dyn K8sClient>,
}

impl ClusterGateway {
	pub fn new(client: Arc<dyn K8sClient>) -> Self {
		Self { client }
	}

	/// Create the run namespace.
	///
	/// Returns `Ok(false)` when a namespace with that name already existed.
	pub async fn create_namespace(&self, namespace: &Namespace) -> Result<bool, K8sError> {
		match self.client.create_namespace(namespace.clone()).await {
			Ok(_) => Ok(true),
			Err(e) if e.is_already_exists() => {
				let name = namespace.metadata.name.as_deref().unwrap_or_default();
				let existing = self.client.get_namespace(name).await?;
				let phase = existing.status.and_then(|s| s.phase).unwrap_or_default();
				if phase == "Terminating" {
					tracing::warn!(namespace = %name, "Existing namespace is terminating");
				}
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Delete a namespace with the server's default grace period.
	pub async fn delete_namespace(&self, name: &str) -> Result<(), K8sError> {
		ignore_not_found(
			self
				.client
				.delete_namespace(name, DeleteOptions::graceful())
				.await,
		)
	}

	/// Delete immediately with background propagation, then wait up to
	/// `finalize_grace` for the namespace controller to purge the contents.
	///
	/// Finalizers are cleared only when the namespace is still terminating
	/// once the grace has passed.
	pub async fn force_delete_namespace(
		&self,
		name: &str,
		finalize_grace: Duration,
	) -> Result<(), K8sError> {
		match self
			.client
			.delete_namespace(name, DeleteOptions::immediate())
			.await
		{
			Ok(()) => {}
			Err(e) if e.is_not_found() => return Ok(()),
			Err(e) => return Err(e),
		}

		let deadline = tokio::time::Instant::now() + finalize_grace;
		let interval = NAMESPACE_POLL_INTERVAL.min(finalize_grace);
		let phase = loop {
			let phase = match self.client.get_namespace(name).await {
				Ok(ns) => ns.status.and_then(|s| s.phase).unwrap_or_default(),
				Err(e) if e.is_not_found() => return Ok(()),
				Err(e) => {
					tracing::warn!(namespace = %name, error = %e, "Failed to check namespace after delete");
					return Ok(());
				}
			};
			if tokio::time::Instant::now() >= deadline {
				break phase;
			}
			tokio::time::sleep(interval).await;
		};

		if phase != "Terminating" {
			return Ok(());
		}
		tracing::warn!(
			namespace = %name,
			grace = ?finalize_grace,
			"Namespace still terminating, clearing finalizers"
		);
		match self.client.clear_namespace_finalizers(name).await {
			Ok(()) => Ok(()),
			Err(e) if e.is_not_found() => Ok(()),
			Err(e) => {
				tracing::warn!(namespace = %name, error = %e, "Failed to clear namespace finalizers");
				Ok(())
			}
		}
	}

	/// Create the ServiceAccount, Role and RoleBinding, tolerating ones that exist.
	pub async fn apply_rbac(&self, manifests: &TestManifests) -> Result<(), K8sError> {
		let namespace = manifests.namespace_name();
		ignore_already_exists(
			self
				.client
				.create_service_account(namespace, manifests.service_account.clone())
				.await,
		)?;
		ignore_already_exists(
			self
				.client
				.create_role(namespace, manifests.role.clone())
				.await,
		)?;
		ignore_already_exists(
			self
				.client
				.create_role_binding(namespace, manifests.role_binding.clone())
				.await,
		)?;
		tracing::debug!(namespace = %namespace, "Applied RBAC");
		Ok(())
	}

	/// Create the source ConfigMap, tolerating one that exists.
	pub async fn apply_config_map(
		&self,
		namespace: &str,
		config_map: &ConfigMap,
	) -> Result<(), K8sError> {
		ignore_already_exists(
			self
				.client
				.create_config_map(namespace, config_map.clone())
				.await,
		)
	}

	pub async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, K8sError> {
		self.client.create_job(namespace, job.clone()).await
	}

	/// Current Job status; a Job without status reports all-zero counts.
	pub async fn get_job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, K8sError> {
		let job = self.client.get_job(name, namespace).await?;
		Ok(job.status.unwrap_or_default())
	}

	pub async fn list_pods_for_job(&self, job_name: &str, namespace: &str) -> Result<Vec<Pod>, K8sError> {
		self
			.client
			.list_pods(namespace, &job_selector(job_name))
			.await
	}

	pub async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		self.client.list_pods(namespace, label_selector).await
	}

	/// Exit code of the first container of the Job's most recent pod.
	///
	/// Fails with [`K8sError::NotFound`] when no pod exists and
	/// [`K8sError::NotTerminated`] when its container has not exited.
	pub async fn get_pod_exit_code(&self, job_name: &str, namespace: &str) -> Result<i32, K8sError> {
		let pods = self.list_pods_for_job(job_name, namespace).await?;
		let pod = latest_pod(&pods).ok_or_else(|| K8sError::NotFound {
			kind: "Pod",
			name: job_selector(job_name),
		})?;
		terminated_exit_code(pod).ok_or_else(|| K8sError::NotTerminated {
			pod: pod.metadata.name.clone().unwrap_or_default(),
		})
	}

	/// Follow a pod's log from the start.
	pub async fn stream_pod_logs(&self, pod_name: &str, namespace: &str) -> Result<LogStream, K8sError> {
		self
			.client
			.stream_logs(pod_name, namespace, LogOptions::follow())
			.await
	}

	/// Last `lines` lines of one container's log.
	pub async fn tail_container_logs(
		&self,
		pod_name: &str,
		namespace: &str,
		container: &str,
		lines: i64,
	) -> Result<String, K8sError> {
		self
			.client
			.read_logs(pod_name, namespace, LogOptions::tail(container, lines))
			.await
	}
}

fn ignore_already_exists<T>(result: Result<T, K8sError>) -> Result<(), K8sError> {
	match result {
		Ok(_) => Ok(()),
		Err(e) if e.is_already_exists() => Ok(()),
		Err(e) => Err(e),
	}
}

fn ignore_not_found(result: Result<(), K8sError>) -> Result<(), K8sError> {
	match result {
		Err(e) if e.is_not_found() => Ok(()),
		other => other,
	}
}

/// The pod created last, by creation timestamp then name.
pub fn latest_pod(pods: &[Pod]) -> Option<&Pod> {
	pods.iter().max_by(|a, b| {
		let created = |p: &Pod| p.metadata.creation_timestamp.as_ref().map(|t| t.0);
		created(a)
			.cmp(&created(b))
			.then_with(|| a.metadata.name.cmp(&b.metadata.name))
	})
}

/// Exit code of the pod's first terminated container, if any.
pub fn terminated_exit_code(pod: &Pod) -> Option<i32> {
	pod
		.status
		.as_ref()?
		.container_statuses
		.as_ref()?
		.first()?
		.state
		.as_ref()?
		.terminated
		.as_ref()
		.map(|t| t.exit_code)
}
