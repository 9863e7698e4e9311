// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
pub use k8s_openapi::api::core::v1::{
	ConfigMap, ConfigMapVolumeSource, Container, ContainerState, ContainerStateRunning,
	ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, EmptyDirVolumeSource, EnvVar,
	HostPathVolumeSource, Namespace, NamespaceSpec, NamespaceStatus, Pod, PodSpec, PodStatus,
	PodTemplateSpec, ServiceAccount, Volume, VolumeMount,
};
pub use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};

/// Options for reading or following container logs.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
	/// Container to read from; `None` lets the API pick the only container.
	pub container: Option<String>,
	pub follow: bool,
	pub tail_lines: Option<i64>,
}

impl LogOptions {
	/// Follow the full log of the default container.
	pub fn follow() -> Self {
		Self {
			follow: true,
			..Default::default()
		}
	}

	/// Read the last `lines` lines of `container` without following.
	pub fn tail(container: impl Into<String>, lines: i64) -> Self {
		Self {
			container: Some(container.into()),
			tail_lines: Some(lines),
			..Default::default()
		}
	}
}

/// How a delete request should be issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
	pub grace_period_seconds: Option<u32>,
	pub background_propagation: bool,
}

impl DeleteOptions {
	/// Server-default grace period and propagation.
	pub fn graceful() -> Self {
		Self::default()
	}

	/// Zero grace period with background propagation.
	pub fn immediate() -> Self {
		Self {
			grace_period_seconds: Some(0),
			background_propagation: true,
		}
	}
}

/// A pinned stream of raw log bytes from a container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;
