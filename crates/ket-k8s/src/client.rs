// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::error::K8sError;
use crate::types::{
	ConfigMap, DeleteOptions, Job, LogOptions, LogStream, Namespace, Pod, Role, RoleBinding,
	ServiceAccount,
};

/// Trait for K8s client operations.
///
/// This abstraction allows for easy mocking in tests while providing
/// a clean interface for the K8s operations needed by the test launcher.
/// Implementations perform exactly one API call per method and never retry;
/// retry and backoff policy belongs to the caller.
#[async_trait]
pub trait K8sClient: Send + Sync {
	/// Create a cluster-scoped namespace.
	async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace, K8sError>;

	/// Get a namespace by name.
	async fn get_namespace(&self, name: &str) -> Result<Namespace, K8sError>;

	/// Delete a namespace by name.
	async fn delete_namespace(&self, name: &str, opts: DeleteOptions) -> Result<(), K8sError>;

	/// Clear `spec.finalizers` on a namespace through its `finalize` subresource.
	async fn clear_namespace_finalizers(&self, name: &str) -> Result<(), K8sError>;

	/// Create a service account in the specified namespace.
	async fn create_service_account(
		&self,
		namespace: &str,
		service_account: ServiceAccount,
	) -> Result<ServiceAccount, K8sError>;

	/// Create a role in the specified namespace.
	async fn create_role(&self, namespace: &str, role: Role) -> Result<Role, K8sError>;

	/// Create a role binding in the specified namespace.
	async fn create_role_binding(
		&self,
		namespace: &str,
		role_binding: RoleBinding,
	) -> Result<RoleBinding, K8sError>;

	/// Create a config map in the specified namespace.
	async fn create_config_map(
		&self,
		namespace: &str,
		config_map: ConfigMap,
	) -> Result<ConfigMap, K8sError>;

	/// Create a batch job in the specified namespace.
	async fn create_job(&self, namespace: &str, job: Job) -> Result<Job, K8sError>;

	/// Get a specific job by name from the specified namespace.
	async fn get_job(&self, name: &str, namespace: &str) -> Result<Job, K8sError>;

	/// List pods in a namespace matching the given label selector.
	///
	/// An empty selector lists every pod in the namespace.
	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError>;

	/// Open a log stream for a pod.
	async fn stream_logs(
		&self,
		name: &str,
		namespace: &str,
		opts: LogOptions,
	) -> Result<LogStream, K8sError>;

	/// Read a pod's logs to completion and return them as text.
	async fn read_logs(
		&self,
		name: &str,
		namespace: &str,
		opts: LogOptions,
	) -> Result<String, K8sError>;
}
