// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! In-memory [`K8sClient`] for tests that exercise launcher behaviour without
//! a cluster.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{
	ConfigMap, DeleteOptions, Job, JobStatus, LogOptions, LogStream, Namespace, NamespaceStatus,
	Pod, PodStatus, Role, RoleBinding, ServiceAccount,
};

/// Operations recorded by [`MockK8sClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
	CreateNamespace,
	GetNamespace,
	DeleteNamespace,
	ClearNamespaceFinalizers,
	CreateServiceAccount,
	CreateRole,
	CreateRoleBinding,
	CreateConfigMap,
	CreateJob,
	GetJob,
	ListPods,
	StreamLogs,
	ReadLogs,
}

struct FailureRule {
	message: String,
	remaining: Option<usize>,
}

#[derive(Default)]
struct MockState {
	namespaces: BTreeMap<String, Namespace>,
	objects: BTreeSet<(&'static str, String, String)>,
	config_maps: BTreeMap<(String, String), ConfigMap>,
	jobs: BTreeMap<(String, String), Job>,
	job_statuses: VecDeque<JobStatus>,
	last_job_status: Option<JobStatus>,
	job_pod_status: Option<PodStatus>,
	pods: Vec<Pod>,
	default_logs: Vec<u8>,
	pod_logs: HashMap<String, String>,
	hang_log_streams: bool,
	stall_namespace_termination: bool,
	failures: HashMap<MockCall, FailureRule>,
	calls: Vec<(MockCall, String)>,
}

impl MockState {
	fn purge_namespace(&mut self, name: &str) {
		self.namespaces.remove(name);
		self.objects.retain(|(_, ns, _)| ns != name);
		self.pods.retain(|p| p.metadata.namespace.as_deref() != Some(name));
	}
}

/// A mock K8s client backed by in-memory maps.
///
/// Creates reject duplicates with [`K8sError::AlreadyExists`], deletes of
/// missing namespaces return [`K8sError::NotFound`], and every call is
/// recorded so tests can assert on the exact sequence issued.
#[derive(Clone, Default)]
pub struct MockK8sClient {
	state: Arc<Mutex<MockState>>,
}

impl MockK8sClient {
	/// Create an empty mock cluster.
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, MockState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Fail every call of `call` with an API error carrying `message`.
	pub fn fail(&self, call: MockCall, message: impl Into<String>) {
		self.lock().failures.insert(
			call,
			FailureRule {
				message: message.into(),
				remaining: None,
			},
		);
	}

	/// Fail the next `times` calls of `call`, then succeed again.
	pub fn fail_times(&self, call: MockCall, times: usize, message: impl Into<String>) {
		self.lock().failures.insert(
			call,
			FailureRule {
				message: message.into(),
				remaining: Some(times),
			},
		);
	}

	/// Queue job statuses returned by successive `get_job` calls.
	///
	/// Once the queue drains the last status keeps being returned.
	pub fn script_job_statuses(&self, statuses: impl IntoIterator<Item = JobStatus>) {
		self.lock().job_statuses.extend(statuses);
	}

	/// Give every job created from now on a pod with this status.
	pub fn set_job_pod_status(&self, status: PodStatus) {
		self.lock().job_pod_status = Some(status);
	}

	/// Insert a pod directly.
	pub fn add_pod(&self, namespace: &str, mut pod: Pod) {
		pod.metadata.namespace = Some(namespace.to_string());
		self.lock().pods.push(pod);
	}

	/// Bytes returned by `stream_logs` for pods without specific logs.
	pub fn set_default_logs(&self, logs: impl Into<Vec<u8>>) {
		self.lock().default_logs = logs.into();
	}

	/// Logs returned for a specific pod name.
	pub fn set_pod_logs(&self, pod: &str, logs: impl Into<String>) {
		self.lock().pod_logs.insert(pod.to_string(), logs.into());
	}

	/// Make `stream_logs` return a stream that never yields.
	pub fn hang_log_streams(&self) {
		self.lock().hang_log_streams = true;
	}

	/// Leave deleted namespaces `Terminating` until their finalizers are cleared.
	pub fn stall_namespace_termination(&self) {
		self.lock().stall_namespace_termination = true;
	}

	/// Every recorded call, in order, with the object name it targeted.
	pub fn calls(&self) -> Vec<(MockCall, String)> {
		self.lock().calls.clone()
	}

	/// Number of times `call` was issued.
	pub fn call_count(&self, call: MockCall) -> usize {
		self.lock().calls.iter().filter(|(c, _)| *c == call).count()
	}

	/// Names targeted by `call`, in order.
	pub fn call_targets(&self, call: MockCall) -> Vec<String> {
		self
			.lock()
			.calls
			.iter()
			.filter(|(c, _)| *c == call)
			.map(|(_, name)| name.clone())
			.collect()
	}

	/// Names of namespaces that currently exist.
	pub fn namespaces(&self) -> Vec<String> {
		self.lock().namespaces.keys().cloned().collect()
	}

	/// The last job created, if any.
	pub fn created_job(&self) -> Option<Job> {
		self.lock().jobs.values().next_back().cloned()
	}

	/// The config map created under `name`, if any.
	pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
		self
			.lock()
			.config_maps
			.get(&(namespace.to_string(), name.to_string()))
			.cloned()
	}

	/// Whether an RBAC object of `kind` exists.
	pub fn has_object(&self, kind: &str, namespace: &str, name: &str) -> bool {
		self
			.lock()
			.objects
			.iter()
			.any(|(k, ns, n)| *k == kind && ns == namespace && n == name)
	}

	fn record(&self, call: MockCall, name: &str) -> Result<(), K8sError> {
		let mut state = self.lock();
		state.calls.push((call, name.to_string()));

		let (message, exhausted) = match state.failures.get_mut(&call) {
			None => return Ok(()),
			Some(rule) => match rule.remaining {
				None => (Some(rule.message.clone()), false),
				Some(0) => (None, true),
				Some(n) => {
					rule.remaining = Some(n - 1);
					(Some(rule.message.clone()), n == 1)
				}
			},
		};
		if exhausted {
			state.failures.remove(&call);
		}
		let Some(message) = message else {
			return Ok(());
		};
		Err(K8sError::ApiError { message })
	}

	fn create_object(
		&self,
		call: MockCall,
		kind: &'static str,
		namespace: &str,
		name: &str,
	) -> Result<(), K8sError> {
		self.record(call, name)?;
		let inserted = self
			.lock()
			.objects
			.insert((kind, namespace.to_string(), name.to_string()));
		if inserted {
			Ok(())
		} else {
			Err(K8sError::AlreadyExists {
				kind,
				name: name.to_string(),
			})
		}
	}
}

fn selector_matches(pod: &Pod, selector: &str) -> bool {
	let labels = pod.metadata.labels.clone().unwrap_or_default();
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.all(|term| match term.split_once('=') {
			Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
			None => labels.contains_key(term),
		})
}

#[async_trait]
impl K8sClient for MockK8sClient {
	async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace, K8sError> {
		let name = namespace.metadata.name.clone().unwrap_or_default();
		self.record(MockCall::CreateNamespace, &name)?;
		let mut state = self.lock();
		if state.namespaces.contains_key(&name) {
			return Err(K8sError::AlreadyExists {
				kind: "Namespace",
				name,
			});
		}
		state.namespaces.insert(name, namespace.clone());
		Ok(namespace)
	}

	async fn get_namespace(&self, name: &str) -> Result<Namespace, K8sError> {
		self.record(MockCall::GetNamespace, name)?;
		self
			.lock()
			.namespaces
			.get(name)
			.cloned()
			.ok_or_else(|| K8sError::NotFound {
				kind: "Namespace",
				name: name.to_string(),
			})
	}

	async fn delete_namespace(&self, name: &str, _opts: DeleteOptions) -> Result<(), K8sError> {
		self.record(MockCall::DeleteNamespace, name)?;
		let mut state = self.lock();
		let stall = state.stall_namespace_termination;
		let Some(ns) = state.namespaces.get_mut(name) else {
			return Err(K8sError::NotFound {
				kind: "Namespace",
				name: name.to_string(),
			});
		};
		if stall {
			ns.status = Some(NamespaceStatus {
				phase: Some("Terminating".to_string()),
				..Default::default()
			});
			return Ok(());
		}
		state.purge_namespace(name);
		Ok(())
	}

	async fn clear_namespace_finalizers(&self, name: &str) -> Result<(), K8sError> {
		self.record(MockCall::ClearNamespaceFinalizers, name)?;
		let mut state = self.lock();
		let Some(ns) = state.namespaces.get_mut(name) else {
			return Err(K8sError::NotFound {
				kind: "Namespace",
				name: name.to_string(),
			});
		};
		let terminating = ns
			.status
			.as_ref()
			.and_then(|s| s.phase.as_deref())
			== Some("Terminating");
		if terminating {
			state.purge_namespace(name);
		} else if let Some(spec) = ns.spec.as_mut() {
			spec.finalizers = Some(Vec::new());
		}
		Ok(())
	}

	async fn create_service_account(
		&self,
		namespace: &str,
		service_account: ServiceAccount,
	) -> Result<ServiceAccount, K8sError> {
		let name = service_account.metadata.name.clone().unwrap_or_default();
		self.create_object(
			MockCall::CreateServiceAccount,
			"ServiceAccount",
			namespace,
			&name,
		)?;
		Ok(service_account)
	}

	async fn create_role(&self, namespace: &str, role: Role) -> Result<Role, K8sError> {
		let name = role.metadata.name.clone().unwrap_or_default();
		self.create_object(MockCall::CreateRole, "Role", namespace, &name)?;
		Ok(role)
	}

	async fn create_role_binding(
		&self,
		namespace: &str,
		role_binding: RoleBinding,
	) -> Result<RoleBinding, K8sError> {
		let name = role_binding.metadata.name.clone().unwrap_or_default();
		self.create_object(MockCall::CreateRoleBinding, "RoleBinding", namespace, &name)?;
		Ok(role_binding)
	}

	async fn create_config_map(
		&self,
		namespace: &str,
		config_map: ConfigMap,
	) -> Result<ConfigMap, K8sError> {
		let name = config_map.metadata.name.clone().unwrap_or_default();
		self.create_object(MockCall::CreateConfigMap, "ConfigMap", namespace, &name)?;
		self
			.lock()
			.config_maps
			.insert((namespace.to_string(), name), config_map.clone());
		Ok(config_map)
	}

	async fn create_job(&self, namespace: &str, job: Job) -> Result<Job, K8sError> {
		let name = job.metadata.name.clone().unwrap_or_default();
		self.record(MockCall::CreateJob, &name)?;
		let mut state = self.lock();
		let key = (namespace.to_string(), name.clone());
		if state.jobs.contains_key(&key) {
			return Err(K8sError::AlreadyExists { kind: "Job", name });
		}
		state.jobs.insert(key, job.clone());

		if let Some(status) = state.job_pod_status.clone() {
			let pod = Pod {
				metadata: ObjectMeta {
					name: Some(format!("{name}-x7k2p")),
					namespace: Some(namespace.to_string()),
					labels: Some(BTreeMap::from([("job-name".to_string(), name.clone())])),
					..Default::default()
				},
				spec: None,
				status: Some(status),
			};
			state.pods.push(pod);
		}
		Ok(job)
	}

	async fn get_job(&self, name: &str, namespace: &str) -> Result<Job, K8sError> {
		self.record(MockCall::GetJob, name)?;
		let mut state = self.lock();
		let mut job = state
			.jobs
			.get(&(namespace.to_string(), name.to_string()))
			.cloned()
			.ok_or_else(|| K8sError::NotFound {
				kind: "Job",
				name: name.to_string(),
			})?;
		if let Some(next) = state.job_statuses.pop_front() {
			state.last_job_status = Some(next);
		}
		job.status = state.last_job_status.clone();
		Ok(job)
	}

	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		self.record(MockCall::ListPods, label_selector)?;
		Ok(
			self
				.lock()
				.pods
				.iter()
				.filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
				.filter(|p| selector_matches(p, label_selector))
				.cloned()
				.collect(),
		)
	}

	async fn stream_logs(
		&self,
		name: &str,
		_namespace: &str,
		_opts: LogOptions,
	) -> Result<LogStream, K8sError> {
		self.record(MockCall::StreamLogs, name)?;
		let state = self.lock();
		if state.hang_log_streams {
			return Ok(Box::pin(futures::stream::pending::<
				Result<Bytes, std::io::Error>,
			>()));
		}
		let body = match state.pod_logs.get(name) {
			Some(logs) => logs.clone().into_bytes(),
			None => state.default_logs.clone(),
		};
		let chunk: Result<Bytes, std::io::Error> = Ok(Bytes::from(body));
		Ok(Box::pin(futures::stream::iter(vec![chunk])))
	}

	async fn read_logs(
		&self,
		name: &str,
		_namespace: &str,
		_opts: LogOptions,
	) -> Result<String, K8sError> {
		self.record(MockCall::ReadLogs, name)?;
		Ok(self.lock().pod_logs.get(name).cloned().unwrap_or_default())
	}
}
