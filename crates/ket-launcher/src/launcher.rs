// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The launch state machine.
//!
//! A run is one forward pass: provision the namespace, RBAC and Job, relay
//! output while polling for completion, classify the result, then stop the
//! sidecar and delete the namespace. The delete is attempted exactly once
//! for every namespace this run created, whatever happened in between.

use std::sync::Arc;
use std::time::Duration;

use ket_k8s::K8sClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cleanup::NamespaceCleanup;
use crate::config::{LaunchTimings, RunConfig, SourceMode};
use crate::error::{LaunchError, ProvisionStep, SidecarError};
use crate::gateway::ClusterGateway;
use crate::manifest::{build_manifests, TestManifests};
use crate::namer::{namespace_name, project_name};
use crate::observe::{classify_result, stream_test_output, wait_for_completion, OutputSink};
use crate::sidecar::{SidecarCommand, SidecarSession, SIDECAR_PROGRAM};
use crate::source::collect_project_source;
use crate::types::{LaunchReport, TestResult};

/// Runs one test session against a cluster.
pub struct Launcher {
	gateway: ClusterGateway,
	config: RunConfig,
	timings: LaunchTimings,
	output: Option<OutputSink>,
	sidecar_program: String,
}

impl Launcher {
	/// Create a launcher that relays test output to stdout.
	pub fn new(client: Arc<dyn K8sClient>, config: RunConfig) -> Self {
		Self {
			gateway: ClusterGateway::new(client),
			config,
			timings: LaunchTimings::default(),
			output: Some(Box::new(tokio::io::stdout())),
			sidecar_program: SIDECAR_PROGRAM.to_string(),
		}
	}

	pub fn with_timings(mut self, timings: LaunchTimings) -> Self {
		self.timings = timings;
		self
	}

	/// Relay test output somewhere other than stdout.
	pub fn with_output(mut self, sink: OutputSink) -> Self {
		self.output = Some(sink);
		self
	}

	/// Skip output relay entirely.
	pub fn without_output(mut self) -> Self {
		self.output = None;
		self
	}

	/// Use a different interception binary than `mirrord`.
	pub fn with_sidecar_program(mut self, program: impl Into<String>) -> Self {
		self.sidecar_program = program.into();
		self
	}

	/// Run the test session.
	///
	/// A test that ran and failed is reported through
	/// [`LaunchReport::result`], not as an error; errors are harness faults
	/// and cancellation.
	#[tracing::instrument(skip_all, fields(project_root = %self.config.project_root.display()))]
	pub async fn run(self, cancel: CancellationToken) -> Result<LaunchReport, LaunchError> {
		let Launcher {
			gateway,
			config,
			timings,
			output,
			sidecar_program,
		} = self;

		config.validate()?;

		let project = project_name(&config.project_root);
		let source = match config.source_mode {
			SourceMode::HostPath => None,
			SourceMode::ConfigMap => Some(collect_project_source(&config.project_root)?),
		};
		let namespace = namespace_name(&config.namespace_prefix, &project);
		let manifests = build_manifests(&config, &namespace, source.as_ref())?;

		if cancel.is_cancelled() {
			return Err(LaunchError::Cancelled);
		}

		tracing::info!(namespace = %namespace, "Creating test namespace");
		let created = gateway
			.create_namespace(&manifests.namespace)
			.await
			.map_err(|e| LaunchError::provisioning(ProvisionStep::Namespace, e))?;
		if !created {
			tracing::warn!(namespace = %namespace, "Namespace already existed, reusing it");
		}

		let cleanup = NamespaceCleanup::arm(
			gateway.clone(),
			&namespace,
			config.keep_namespace,
			timings.namespace_finalize_grace,
			timings.cleanup_timeout,
		);

		let mut sidecar = None;
		let run = Run {
			gateway: &gateway,
			config: &config,
			timings: &timings,
			manifests: &manifests,
			cancel: &cancel,
		};
		let result = run.execute(output, &sidecar_program, &mut sidecar).await;

		let mut sidecar_logs = None;
		if let Some(mut session) = sidecar {
			session.stop(timings.sidecar_stop_grace).await;
			sidecar_logs = Some(session.log_paths().clone());
		}
		let namespace_kept = cleanup.run().await;

		let result = result?;
		if result.success {
			tracing::info!(exit_code = result.exit_code, "Test passed");
		} else {
			tracing::warn!(
				exit_code = result.exit_code,
				error = result.error.as_deref().unwrap_or_default(),
				"Test failed"
			);
		}

		Ok(LaunchReport {
			namespace,
			job_name: manifests.job_name().to_string(),
			result,
			namespace_kept,
			sidecar_logs,
		})
	}
}

/// Borrowed state for the steps between namespace creation and cleanup.
struct Run<'a> {
	gateway: &'a ClusterGateway,
	config: &'a RunConfig,
	timings: &'a LaunchTimings,
	manifests: &'a TestManifests,
	cancel: &'a CancellationToken,
}

impl Run<'_> {
	async fn execute(
		&self,
		output: Option<OutputSink>,
		sidecar_program: &str,
		sidecar: &mut Option<SidecarSession>,
	) -> Result<TestResult, LaunchError> {
		let namespace = self.manifests.namespace_name();
		let job_name = self.manifests.job_name();

		self
			.gateway
			.apply_rbac(self.manifests)
			.await
			.map_err(|e| LaunchError::provisioning(ProvisionStep::Rbac, e))?;

		if let Some(config_map) = &self.manifests.source_config_map {
			self
				.gateway
				.apply_config_map(namespace, config_map)
				.await
				.map_err(|e| LaunchError::provisioning(ProvisionStep::SourceConfigMap, e))?;
		}

		self.start_sidecar(sidecar_program, sidecar).await?;

		if self.cancel.is_cancelled() {
			return Err(LaunchError::Cancelled);
		}

		self
			.gateway
			.create_job(namespace, &self.manifests.job)
			.await
			.map_err(|e| LaunchError::provisioning(ProvisionStep::Job, e))?;
		tracing::info!(job = %job_name, namespace = %namespace, "Created test job");

		let stream_cancel = self.cancel.child_token();
		let streamer = output.map(|sink| self.spawn_streamer(sink, stream_cancel.clone()));

		let outcome = wait_for_completion(
			self.gateway,
			job_name,
			namespace,
			self.timings.completion_interval,
			self.cancel,
		)
		.await;

		if let Some(handle) = streamer {
			finish_streamer(
				handle,
				&stream_cancel,
				self.timings.log_drain_timeout,
				outcome.is_ok(),
			)
			.await;
		}

		let outcome = outcome?;
		Ok(classify_result(self.gateway, job_name, namespace, &outcome).await)
	}

	/// Start the sidecar and wait for its agent, when interception is configured.
	async fn start_sidecar(
		&self,
		program: &str,
		slot: &mut Option<SidecarSession>,
	) -> Result<(), LaunchError> {
		let Some(interception) = self.config.interception() else {
			return Ok(());
		};

		let command = SidecarCommand::for_interception(program, &interception)
			.with_working_dir(&self.config.project_root);
		let outcome = match SidecarSession::start(
			&command,
			&interception.target_namespace,
			self.cancel,
		) {
			Ok(session) => {
				let session = slot.insert(session);
				session
					.wait_until_ready(
						self.gateway,
						self.timings.agent_ready_interval,
						self.timings.agent_ready_timeout,
					)
					.await
			}
			Err(e) => Err(e),
		};

		match outcome {
			Ok(()) => Ok(()),
			Err(SidecarError::Cancelled) => Err(LaunchError::Cancelled),
			Err(e) if self.config.allow_degraded_interception => {
				tracing::warn!(error = %e, "Traffic interception unavailable, continuing without it");
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	fn spawn_streamer(&self, mut sink: OutputSink, cancel: CancellationToken) -> JoinHandle<()> {
		let gateway = self.gateway.clone();
		let job_name = self.manifests.job_name().to_string();
		let namespace = self.manifests.namespace_name().to_string();
		let interval = self.timings.pod_ready_interval;
		let timeout = self.timings.pod_ready_timeout;

		tokio::spawn(async move {
			match stream_test_output(
				&gateway, &job_name, &namespace, interval, timeout, &mut sink, &cancel,
			)
			.await
			{
				Ok(bytes) => tracing::debug!(bytes, "Test output stream ended"),
				Err(e) => tracing::warn!(job = %job_name, error = %e, "Test output streaming failed"),
			}
		})
	}
}

/// Let the streamer flush trailing output, then stop it.
///
/// A stream that hangs never delays the caller past two `drain` windows.
async fn finish_streamer(
	mut handle: JoinHandle<()>,
	cancel: &CancellationToken,
	drain: Duration,
	drain_first: bool,
) {
	if drain_first && tokio::time::timeout(drain, &mut handle).await.is_ok() {
		return;
	}
	cancel.cancel();
	if tokio::time::timeout(drain, &mut handle).await.is_err() {
		handle.abort();
	}
}

/// Run a test session and fold a failed test into [`LaunchError::TestFailed`].
pub async fn run_launch(
	client: Arc<dyn K8sClient>,
	config: RunConfig,
	cancel: CancellationToken,
) -> Result<LaunchReport, LaunchError> {
	let report = Launcher::new(client, config).run(cancel).await?;
	match report.result.clone().into_error() {
		Some(e) => Err(e.into()),
		None => Ok(report),
	}
}
