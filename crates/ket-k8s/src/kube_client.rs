// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
	api::{Api, DeleteParams, ListParams, LogParams, PostParams, PropagationPolicy},
	Client,
};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, instrument};

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{
	ConfigMap, DeleteOptions, Job, LogOptions, LogStream, Namespace, Pod, Role, RoleBinding,
	ServiceAccount,
};

/// Production K8s client implementation using the kube crate.
pub struct KubeClient {
	client: Client,
}

impl KubeClient {
	/// Create a new KubeClient that auto-discovers cluster configuration.
	///
	/// This will attempt to load config from:
	/// 1. In-cluster service account (when running in K8s)
	/// 2. KUBECONFIG environment variable
	/// 3. ~/.kube/config
	pub async fn new() -> Result<Self, K8sError> {
		let client = Client::try_default()
			.await
			.map_err(|e| K8sError::ConfigError {
				message: e.to_string(),
			})?;
		debug!("K8s client initialized");
		Ok(Self { client })
	}
}

fn log_params(opts: &LogOptions) -> LogParams {
	LogParams {
		container: opts.container.clone(),
		follow: opts.follow,
		tail_lines: opts.tail_lines,
		..Default::default()
	}
}

#[async_trait]
impl K8sClient for KubeClient {
	#[instrument(skip(self, namespace))]
	async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace, K8sError> {
		let name = namespace.metadata.name.clone().unwrap_or_default();
		let namespaces: Api<Namespace> = Api::all(self.client.clone());
		namespaces
			.create(&PostParams::default(), &namespace)
			.await
			.map_err(|e| K8sError::from_kube(e, "Namespace", &name))
	}

	async fn get_namespace(&self, name: &str) -> Result<Namespace, K8sError> {
		let namespaces: Api<Namespace> = Api::all(self.client.clone());
		namespaces
			.get(name)
			.await
			.map_err(|e| K8sError::from_kube(e, "Namespace", name))
	}

	#[instrument(skip(self))]
	async fn delete_namespace(&self, name: &str, opts: DeleteOptions) -> Result<(), K8sError> {
		let namespaces: Api<Namespace> = Api::all(self.client.clone());
		let dp = DeleteParams {
			grace_period_seconds: opts.grace_period_seconds,
			propagation_policy: opts
				.background_propagation
				.then_some(PropagationPolicy::Background),
			..Default::default()
		};
		namespaces
			.delete(name, &dp)
			.await
			.map(|_| ())
			.map_err(|e| K8sError::from_kube(e, "Namespace", name))
	}

	async fn clear_namespace_finalizers(&self, name: &str) -> Result<(), K8sError> {
		let namespaces: Api<Namespace> = Api::all(self.client.clone());
		let mut namespace = namespaces
			.get(name)
			.await
			.map_err(|e| K8sError::from_kube(e, "Namespace", name))?;

		let has_finalizers = namespace
			.spec
			.as_ref()
			.and_then(|s| s.finalizers.as_ref())
			.is_some_and(|f| !f.is_empty());
		if !has_finalizers {
			return Ok(());
		}

		if let Some(spec) = namespace.spec.as_mut() {
			spec.finalizers = Some(Vec::new());
		}
		let body = serde_json::to_vec(&namespace).map_err(|e| K8sError::ApiError {
			message: format!("failed to encode namespace {name}: {e}"),
		})?;
		namespaces
			.replace_subresource("finalize", name, &PostParams::default(), body)
			.await
			.map_err(|e| K8sError::from_kube(e, "Namespace", name))?;
		debug!(namespace = %name, "Cleared namespace finalizers");
		Ok(())
	}

	async fn create_service_account(
		&self,
		namespace: &str,
		service_account: ServiceAccount,
	) -> Result<ServiceAccount, K8sError> {
		let name = service_account.metadata.name.clone().unwrap_or_default();
		let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
		api
			.create(&PostParams::default(), &service_account)
			.await
			.map_err(|e| K8sError::from_kube(e, "ServiceAccount", &name))
	}

	async fn create_role(&self, namespace: &str, role: Role) -> Result<Role, K8sError> {
		let name = role.metadata.name.clone().unwrap_or_default();
		let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
		api
			.create(&PostParams::default(), &role)
			.await
			.map_err(|e| K8sError::from_kube(e, "Role", &name))
	}

	async fn create_role_binding(
		&self,
		namespace: &str,
		role_binding: RoleBinding,
	) -> Result<RoleBinding, K8sError> {
		let name = role_binding.metadata.name.clone().unwrap_or_default();
		let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
		api
			.create(&PostParams::default(), &role_binding)
			.await
			.map_err(|e| K8sError::from_kube(e, "RoleBinding", &name))
	}

	async fn create_config_map(
		&self,
		namespace: &str,
		config_map: ConfigMap,
	) -> Result<ConfigMap, K8sError> {
		let name = config_map.metadata.name.clone().unwrap_or_default();
		let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
		api
			.create(&PostParams::default(), &config_map)
			.await
			.map_err(|e| K8sError::from_kube(e, "ConfigMap", &name))
	}

	#[instrument(skip(self, job))]
	async fn create_job(&self, namespace: &str, job: Job) -> Result<Job, K8sError> {
		let name = job.metadata.name.clone().unwrap_or_default();
		let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
		jobs
			.create(&PostParams::default(), &job)
			.await
			.map_err(|e| K8sError::from_kube(e, "Job", &name))
	}

	async fn get_job(&self, name: &str, namespace: &str) -> Result<Job, K8sError> {
		let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
		jobs
			.get(name)
			.await
			.map_err(|e| K8sError::from_kube(e, "Job", name))
	}

	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
		let lp = if label_selector.is_empty() {
			ListParams::default()
		} else {
			ListParams::default().labels(label_selector)
		};
		let pod_list = pods.list(&lp).await?;
		Ok(pod_list.items)
	}

	async fn stream_logs(
		&self,
		name: &str,
		namespace: &str,
		opts: LogOptions,
	) -> Result<LogStream, K8sError> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
		let lp = log_params(&opts);

		let stream = pods.log_stream(name, &lp).await.map_err(|e| match e {
			kube::Error::Api(ref err) if err.code == 404 => K8sError::NotFound {
				kind: "Pod",
				name: name.into(),
			},
			_ => K8sError::StreamError {
				message: e.to_string(),
			},
		})?;

		let compat_stream = stream.compat();
		let bytes_stream = tokio_util::io::ReaderStream::new(compat_stream);
		let mapped = bytes_stream.map(|result| result.map_err(std::io::Error::other));
		Ok(Box::pin(mapped))
	}

	async fn read_logs(
		&self,
		name: &str,
		namespace: &str,
		opts: LogOptions,
	) -> Result<String, K8sError> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
		let lp = LogParams {
			follow: false,
			..log_params(&opts)
		};
		pods
			.logs(name, &lp)
			.await
			.map_err(|e| K8sError::from_kube(e, "Pod", name))
	}
}
