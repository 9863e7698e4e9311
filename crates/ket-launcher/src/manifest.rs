// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource model: the namespace, RBAC, source ConfigMap and Job for a run.
//!
//! Everything here is pure data construction. Identical inputs always yield
//! identical objects so previews and tests can assert exact structure.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use ket_k8s::{
	ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, HostPathVolumeSource,
	Job, JobSpec, Namespace, PodSpec, PodTemplateSpec, PolicyRule, Role, RoleBinding, RoleRef,
	ServiceAccount, Subject, Volume, VolumeMount,
};

use crate::config::{RunConfig, SourceMode};
use crate::error::ManifestError;
use crate::namer::{job_name, project_label, project_name};
use crate::source::{extract_script, ProjectSource};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "ket";
pub const PROJECT_LABEL: &str = "ket.dev/project";
pub const SERVICE_ACCOUNT_NAME: &str = "default";
pub const ROLE_NAME: &str = "ket-test-runner";
pub const CONTAINER_NAME: &str = "test-runner";
pub const INIT_CONTAINER_NAME: &str = "extract-source";
pub const REPORTS_PATH: &str = "/reports";
pub const SOURCE_MOUNT_PATH: &str = "/source";

pub const ENV_TEST_NAMESPACE: &str = "KET_TEST_NAMESPACE";
pub const ENV_PROJECT_ROOT: &str = "KET_PROJECT_ROOT";
pub const ENV_WORKSPACE_PATH: &str = "KET_WORKSPACE_PATH";
pub const ENV_TARGET_POD: &str = "KET_TARGET_POD";
pub const ENV_TARGET_NAMESPACE: &str = "KET_TARGET_NAMESPACE";

const VOLUME_SOURCE: &str = "source-code";
const VOLUME_WORKSPACE: &str = "workspace";
const VOLUME_REPORTS: &str = "reports";
const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const RBAC_VERBS: &[&str] = &[
	"get", "list", "watch", "create", "update", "patch", "delete",
];

/// Every object a run creates, in creation order.
#[derive(Debug, Clone, PartialEq)]
pub struct TestManifests {
	pub namespace: Namespace,
	pub service_account: ServiceAccount,
	pub role: Role,
	pub role_binding: RoleBinding,
	/// Present only in the ConfigMap source mode
	pub source_config_map: Option<ConfigMap>,
	pub job: Job,
}

impl TestManifests {
	pub fn namespace_name(&self) -> &str {
		self.namespace.metadata.name.as_deref().unwrap_or_default()
	}

	pub fn job_name(&self) -> &str {
		self.job.metadata.name.as_deref().unwrap_or_default()
	}
}

/// Working directory inside the container.
///
/// `.` maps to the workspace itself; any other relative root is joined onto
/// it. An absolute root is accepted when it already lies under the workspace
/// path, which the host and the container share. Roots containing `..` and
/// absolute roots elsewhere are rejected.
pub fn working_directory(project_root: &Path, workspace_path: &str) -> Result<String, ManifestError> {
	let relative = if project_root.is_absolute() {
		project_root
			.strip_prefix(workspace_path)
			.map_err(|_| ManifestError::ProjectRootOutsideWorkspace {
				path: project_root.to_path_buf(),
			})?
	} else {
		project_root
	};

	let mut parts = Vec::new();
	for component in relative.components() {
		match component {
			Component::CurDir => {}
			Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(ManifestError::ProjectRootOutsideWorkspace {
					path: project_root.to_path_buf(),
				});
			}
		}
	}

	let base = workspace_path.trim_end_matches('/');
	if parts.is_empty() {
		return Ok(if base.is_empty() {
			"/".to_string()
		} else {
			base.to_string()
		});
	}
	Ok(format!("{base}/{}", parts.join("/")))
}

fn labels(project: &str) -> BTreeMap<String, String> {
	BTreeMap::from([
		(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
		(PROJECT_LABEL.to_string(), project.to_string()),
	])
}

fn metadata(name: &str, namespace: Option<&str>, project: &str) -> ObjectMeta {
	ObjectMeta {
		name: Some(name.to_string()),
		namespace: namespace.map(str::to_string),
		labels: Some(labels(project)),
		..Default::default()
	}
}

fn rule(api_group: &str, resources: &[&str]) -> PolicyRule {
	PolicyRule {
		api_groups: Some(vec![api_group.to_string()]),
		resources: Some(resources.iter().map(|r| r.to_string()).collect()),
		verbs: RBAC_VERBS.iter().map(|v| v.to_string()).collect(),
		..Default::default()
	}
}

fn env_var(name: &str, value: &str) -> EnvVar {
	EnvVar {
		name: name.to_string(),
		value: Some(value.to_string()),
		..Default::default()
	}
}

fn mount(name: &str, path: &str) -> VolumeMount {
	VolumeMount {
		name: name.to_string(),
		mount_path: path.to_string(),
		..Default::default()
	}
}

fn empty_dir(name: &str) -> Volume {
	Volume {
		name: name.to_string(),
		empty_dir: Some(EmptyDirVolumeSource::default()),
		..Default::default()
	}
}

/// Name of the ConfigMap that carries the project tree.
pub fn source_config_map_name(project: &str) -> String {
	format!("ket-source-{project}")
}

pub fn build_namespace(name: &str, project: &str) -> Namespace {
	Namespace {
		metadata: metadata(name, None, project),
		..Default::default()
	}
}

pub fn build_service_account(namespace: &str, project: &str) -> ServiceAccount {
	ServiceAccount {
		metadata: metadata(SERVICE_ACCOUNT_NAME, Some(namespace), project),
		..Default::default()
	}
}

/// Role granting the test pod the workload kinds it usually needs to drive.
pub fn build_role(namespace: &str, project: &str) -> Role {
	Role {
		metadata: metadata(ROLE_NAME, Some(namespace), project),
		rules: Some(vec![
			rule(
				"",
				&[
					"pods",
					"services",
					"configmaps",
					"secrets",
					"persistentvolumeclaims",
					"endpoints",
				],
			),
			rule("", &["pods/log", "pods/exec", "pods/portforward"]),
			rule("apps", &["deployments", "statefulsets", "daemonsets"]),
			rule("batch", &["jobs", "cronjobs"]),
			rule("networking.k8s.io", &["ingresses", "networkpolicies"]),
		]),
	}
}

pub fn build_role_binding(namespace: &str, project: &str) -> RoleBinding {
	RoleBinding {
		metadata: metadata(ROLE_NAME, Some(namespace), project),
		subjects: Some(vec![Subject {
			kind: "ServiceAccount".to_string(),
			name: SERVICE_ACCOUNT_NAME.to_string(),
			namespace: Some(namespace.to_string()),
			..Default::default()
		}]),
		role_ref: RoleRef {
			api_group: RBAC_API_GROUP.to_string(),
			kind: "Role".to_string(),
			name: ROLE_NAME.to_string(),
		},
	}
}

pub fn build_source_config_map(namespace: &str, project: &str, source: &ProjectSource) -> ConfigMap {
	let binary_data: BTreeMap<String, ByteString> = source
		.binary_data
		.iter()
		.map(|(k, v)| (k.clone(), ByteString(v.clone())))
		.collect();

	ConfigMap {
		metadata: metadata(&source_config_map_name(project), Some(namespace), project),
		data: Some(source.data.clone()),
		binary_data: (!binary_data.is_empty()).then_some(binary_data),
		..Default::default()
	}
}

/// Build the test Job.
pub fn build_job(config: &RunConfig, namespace: &str) -> Result<Job, ManifestError> {
	let project_name = project_name(&config.project_root);
	let project = project_label(&project_name);
	let working_dir = match config.source_mode {
		SourceMode::HostPath => working_directory(&config.project_root, &config.workspace_path)?,
		// The shipped tree is the project itself, unpacked at the workspace root.
		SourceMode::ConfigMap => working_directory(Path::new("."), &config.workspace_path)?,
	};

	let mut env = vec![
		env_var(ENV_TEST_NAMESPACE, namespace),
		env_var(
			ENV_PROJECT_ROOT,
			&config.project_root.to_string_lossy(),
		),
		env_var(ENV_WORKSPACE_PATH, &config.workspace_path),
	];
	if let Some(interception) = config.interception() {
		env.push(env_var(ENV_TARGET_POD, &interception.target_pod));
		env.push(env_var(ENV_TARGET_NAMESPACE, &interception.target_namespace));
	}

	let (volumes, workspace_volume, init_containers) = match config.source_mode {
		SourceMode::HostPath => (
			vec![
				Volume {
					name: VOLUME_SOURCE.to_string(),
					host_path: Some(HostPathVolumeSource {
						path: config.workspace_path.clone(),
						type_: Some("Directory".to_string()),
					}),
					..Default::default()
				},
				empty_dir(VOLUME_REPORTS),
			],
			VOLUME_SOURCE,
			None,
		),
		SourceMode::ConfigMap => {
			let init = Container {
				name: INIT_CONTAINER_NAME.to_string(),
				image: Some(config.image.clone()),
				image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
				command: Some(vec![
					"/bin/sh".to_string(),
					"-c".to_string(),
					extract_script(SOURCE_MOUNT_PATH, &working_dir),
				]),
				volume_mounts: Some(vec![
					VolumeMount {
						read_only: Some(true),
						..mount(VOLUME_SOURCE, SOURCE_MOUNT_PATH)
					},
					mount(VOLUME_WORKSPACE, &config.workspace_path),
				]),
				..Default::default()
			};
			(
				vec![
					Volume {
						name: VOLUME_SOURCE.to_string(),
						config_map: Some(ConfigMapVolumeSource {
							name: source_config_map_name(&project),
							..Default::default()
						}),
						..Default::default()
					},
					empty_dir(VOLUME_WORKSPACE),
					empty_dir(VOLUME_REPORTS),
				],
				VOLUME_WORKSPACE,
				Some(vec![init]),
			)
		}
	};

	let container = Container {
		name: CONTAINER_NAME.to_string(),
		image: Some(config.image.clone()),
		image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
		command: Some(vec![
			"/bin/sh".to_string(),
			"-c".to_string(),
			config.test_command.clone(),
		]),
		working_dir: Some(working_dir),
		env: Some(env),
		volume_mounts: Some(vec![
			mount(workspace_volume, &config.workspace_path),
			mount(VOLUME_REPORTS, REPORTS_PATH),
		]),
		..Default::default()
	};

	Ok(Job {
		metadata: metadata(&job_name(&project_name), Some(namespace), &project),
		spec: Some(JobSpec {
			backoff_limit: Some(config.backoff_limit),
			active_deadline_seconds: Some(config.active_deadline_seconds),
			template: PodTemplateSpec {
				metadata: Some(ObjectMeta {
					labels: Some(labels(&project)),
					..Default::default()
				}),
				spec: Some(PodSpec {
					restart_policy: Some("Never".to_string()),
					service_account_name: Some(SERVICE_ACCOUNT_NAME.to_string()),
					init_containers,
					containers: vec![container],
					volumes: Some(volumes),
					..Default::default()
				}),
			},
			..Default::default()
		}),
		status: None,
	})
}

/// Build every object for a run in `namespace`.
///
/// `source` must be supplied in the ConfigMap source mode and is ignored
/// otherwise.
pub fn build_manifests(
	config: &RunConfig,
	namespace: &str,
	source: Option<&ProjectSource>,
) -> Result<TestManifests, ManifestError> {
	let project = project_label(&project_name(&config.project_root));

	let source_config_map = match config.source_mode {
		SourceMode::HostPath => None,
		SourceMode::ConfigMap => {
			let source = source.ok_or(ManifestError::MissingSource)?;
			Some(build_source_config_map(namespace, &project, source))
		}
	};

	Ok(TestManifests {
		namespace: build_namespace(namespace, &project),
		service_account: build_service_account(namespace, &project),
		role: build_role(namespace, &project),
		role_binding: build_role_binding(namespace, &project),
		source_config_map,
		job: build_job(config, namespace)?,
	})
}
