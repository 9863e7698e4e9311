// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! K8s client abstraction for ket test-job orchestration.
//!
//! This crate provides:
//! - A trait-based K8s client abstraction for testability
//! - Production implementation using the kube crate
//! - An in-memory mock cluster for launcher tests
//! - Common types for job, pod and log-stream handling

mod client;
mod error;
mod kube_client;
mod mock;
mod types;

pub use client::K8sClient;
pub use error::K8sError;
pub use kube_client::KubeClient;
pub use mock::{MockCall, MockK8sClient};
pub use types::{
	ConfigMap, ConfigMapVolumeSource, Container, ContainerState, ContainerStateRunning,
	ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, DeleteOptions,
	EmptyDirVolumeSource, EnvVar, HostPathVolumeSource, Job, JobSpec, JobStatus, LogOptions,
	LogStream, Namespace, NamespaceSpec, PolicyRule, Pod, PodSpec, PodStatus, PodTemplateSpec, Role,
	RoleBinding, RoleRef, ServiceAccount, Subject, Volume, VolumeMount,
};
