// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ephemeral-namespace test launches for ket.
//!
//! This crate provides:
//! - The resource model for a run (namespace, RBAC, source ConfigMap, Job)
//! - Namespace naming
//! - A cluster gateway with idempotent create and tolerant delete semantics
//! - The launch state machine with log relay, completion polling and cleanup
//! - Traffic interception sidecar lifecycle management

pub mod cleanup;
pub mod config;
pub mod error;
pub mod gateway;
pub mod launcher;
pub mod manifest;
pub mod namer;
pub mod observe;
pub mod sidecar;
pub mod source;
pub mod types;

pub use config::{Interception, LaunchTimings, RunConfig, SourceMode};
pub use error::{
	LaunchError, ManifestError, ObserveError, ProvisionStep, SidecarError, SourceError,
	TestExecutionError, CANCELLED_EXIT_CODE, TOOLING_FAILURE_EXIT_CODE,
};
pub use gateway::ClusterGateway;
pub use launcher::{run_launch, Launcher};
pub use manifest::{build_manifests, TestManifests};
pub use observe::OutputSink;
pub use sidecar::{SidecarCommand, SidecarSession, SidecarState};
pub use source::{collect_project_source, ProjectSource};
pub use types::{LaunchReport, SidecarLogPaths, TestResult};
