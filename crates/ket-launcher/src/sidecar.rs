// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Traffic interception sidecar process management.
//!
//! The sidecar is a local `mirrord exec` process that wraps the process under
//! test. It is ready once its in-cluster agent pod is running, all of the
//! pod's containers are ready, and the agent log contains the readiness
//! marker. The process is always stopped with SIGTERM first and killed if it
//! outlives the grace period.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use ket_k8s::Pod;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Interception;
use crate::error::SidecarError;
use crate::gateway::{latest_pod, ClusterGateway};
use crate::observe::pod_is_ready;
use crate::types::SidecarLogPaths;

pub const SIDECAR_PROGRAM: &str = "mirrord";
pub const AGENT_LABEL_SELECTOR: &str = "app=mirrord";
pub const AGENT_NAME_MARKER: &str = "mirrord";
pub const AGENT_CONTAINER: &str = "mirrord-agent";
pub const AGENT_READY_MARKER: &str = "agent ready";
const AGENT_LOG_TAIL_LINES: i64 = 50;

/// Lifecycle of a sidecar session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarState {
	Idle,
	Starting,
	WaitingForAgentReady,
	Streaming,
	Stopping,
	Stopped,
}

/// Program and arguments used to start the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarCommand {
	pub program: String,
	pub args: Vec<String>,
	pub working_dir: Option<PathBuf>,
}

impl SidecarCommand {
	/// `mirrord exec [--steal] --target <pod> --target-namespace <ns> -- <process...>`
	pub fn for_interception(program: &str, interception: &Interception) -> Self {
		let mut args = vec!["exec".to_string()];
		if interception.steal {
			args.push("--steal".to_string());
		}
		args.extend([
			"--target".to_string(),
			interception.target_pod.clone(),
			"--target-namespace".to_string(),
			interception.target_namespace.clone(),
			"--".to_string(),
		]);
		args.extend(
			interception
				.process_to_test
				.split_whitespace()
				.map(str::to_string),
		);
		Self {
			program: program.to_string(),
			args,
			working_dir: None,
		}
	}

	pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.working_dir = Some(dir.into());
		self
	}
}

enum AgentStatus {
	Ready(String),
	Pending(String),
}

/// A running sidecar process.
pub struct SidecarSession {
	state: SidecarState,
	child: Option<Child>,
	cancel: CancellationToken,
	relays: Vec<JoinHandle<()>>,
	log_paths: SidecarLogPaths,
	agent_namespace: String,
}

fn log_file(prefix: &str) -> Result<(tokio::fs::File, PathBuf), SidecarError> {
	let file = tempfile::Builder::new()
		.prefix(prefix)
		.suffix(".log")
		.tempfile()
		.map_err(SidecarError::LogFile)?;
	let (file, path) = file.keep().map_err(|e| SidecarError::LogFile(e.error))?;
	Ok((tokio::fs::File::from_std(file), path))
}

fn spawn_relay<R>(reader: R, mut file: tokio::fs::File, stream: &'static str) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let mut lines = BufReader::new(reader).lines();
		loop {
			match lines.next_line().await {
				Ok(Some(line)) => {
					tracing::debug!(stream, "{line}");
					let mut buf = line.into_bytes();
					buf.push(b'\n');
					if let Err(e) = file.write_all(&buf).await {
						tracing::warn!(stream, error = %e, "Failed to write sidecar log");
						break;
					}
				}
				Ok(None) => break,
				Err(e) => {
					tracing::debug!(stream, error = %e, "Sidecar output closed");
					break;
				}
			}
		}
		let _ = file.flush().await;
	})
}

#[cfg(unix)]
fn probe_pid(pid: Option<u32>) -> Result<(), SidecarError> {
	let pid = pid.ok_or(SidecarError::Unresponsive)?;
	// Signal 0 performs the permission and existence checks only.
	let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
	if rc == 0 {
		Ok(())
	} else {
		Err(SidecarError::Unresponsive)
	}
}

#[cfg(not(unix))]
fn probe_pid(_pid: Option<u32>) -> Result<(), SidecarError> {
	Ok(())
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
	if let Some(pid) = child.id() {
		unsafe {
			libc::kill(pid as libc::pid_t, libc::SIGTERM);
		}
	}
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
	let _ = child.start_kill();
}

impl SidecarSession {
	/// Spawn the sidecar and begin relaying its output to log files.
	///
	/// `parent` is the run's cancellation token; the session cancels only a
	/// child of it.
	pub fn start(
		command: &SidecarCommand,
		agent_namespace: &str,
		parent: &CancellationToken,
	) -> Result<Self, SidecarError> {
		tracing::info!(program = %command.program, args = ?command.args, "Starting interception sidecar");

		let mut cmd = Command::new(&command.program);
		cmd.args(&command.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(dir) = &command.working_dir {
			cmd.current_dir(dir);
		}

		let mut child = cmd.spawn().map_err(|e| SidecarError::Spawn {
			program: command.program.clone(),
			source: e,
		})?;

		let (stdout_file, stdout_path) = log_file("mirrord-stdout-")?;
		let (stderr_file, stderr_path) = log_file("mirrord-stderr-")?;

		let mut relays = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			relays.push(spawn_relay(stdout, stdout_file, "stdout"));
		}
		if let Some(stderr) = child.stderr.take() {
			relays.push(spawn_relay(stderr, stderr_file, "stderr"));
		}

		tracing::info!(
			stdout = %stdout_path.display(),
			stderr = %stderr_path.display(),
			"Sidecar output is being written to log files"
		);

		Ok(Self {
			state: SidecarState::Starting,
			child: Some(child),
			cancel: parent.child_token(),
			relays,
			log_paths: SidecarLogPaths {
				stdout: stdout_path,
				stderr: stderr_path,
			},
			agent_namespace: agent_namespace.to_string(),
		})
	}

	pub fn state(&self) -> SidecarState {
		self.state
	}

	pub fn log_paths(&self) -> &SidecarLogPaths {
		&self.log_paths
	}

	/// Fail if the process has exited or does not answer a liveness probe.
	pub fn check_alive(&mut self) -> Result<(), SidecarError> {
		let Some(child) = self.child.as_mut() else {
			return Err(SidecarError::Exited {
				status: "not running".to_string(),
			});
		};
		match child.try_wait() {
			Ok(Some(status)) => Err(SidecarError::Exited {
				status: status.to_string(),
			}),
			Ok(None) => probe_pid(child.id()),
			Err(_) => Err(SidecarError::Unresponsive),
		}
	}

	async fn find_agent_pod(&self, gateway: &ClusterGateway) -> Option<Pod> {
		let ns = &self.agent_namespace;
		match gateway.list_pods(ns, AGENT_LABEL_SELECTOR).await {
			Ok(pods) if !pods.is_empty() => return latest_pod(&pods).cloned(),
			Ok(_) => {}
			Err(e) => tracing::debug!(namespace = %ns, error = %e, "Agent label lookup failed"),
		}

		match gateway.list_pods(ns, "").await {
			Ok(pods) => pods.into_iter().find(|p| {
				p.metadata
					.name
					.as_deref()
					.is_some_and(|n| n.to_lowercase().contains(AGENT_NAME_MARKER))
			}),
			Err(e) => {
				tracing::debug!(namespace = %ns, error = %e, "Failed to list pods for agent");
				None
			}
		}
	}

	async fn agent_status(&self, gateway: &ClusterGateway) -> Result<AgentStatus, SidecarError> {
		let Some(pod) = self.find_agent_pod(gateway).await else {
			return Ok(AgentStatus::Pending("no agent pod yet".to_string()));
		};
		let name = pod.metadata.name.clone().unwrap_or_default();
		let phase = pod
			.status
			.as_ref()
			.and_then(|s| s.phase.clone())
			.unwrap_or_default();

		if phase == "Failed" {
			let reason = pod
				.status
				.as_ref()
				.and_then(|s| s.reason.clone())
				.unwrap_or_else(|| "pod failed".to_string());
			return Err(SidecarError::AgentFailed { pod: name, reason });
		}
		if !pod_is_ready(&pod) {
			return Ok(AgentStatus::Pending(format!("agent pod {name} is {phase}")));
		}

		match gateway
			.tail_container_logs(
				&name,
				&self.agent_namespace,
				AGENT_CONTAINER,
				AGENT_LOG_TAIL_LINES,
			)
			.await
		{
			Ok(logs) if logs.contains(AGENT_READY_MARKER) => Ok(AgentStatus::Ready(name)),
			Ok(_) => Ok(AgentStatus::Pending(format!(
				"agent pod {name} has not logged readiness"
			))),
			Err(e) => {
				tracing::warn!(pod = %name, error = %e, "Failed to read agent logs");
				Ok(AgentStatus::Pending(format!("agent pod {name} logs unavailable")))
			}
		}
	}

	/// Poll until the interception agent is ready.
	pub async fn wait_until_ready(
		&mut self,
		gateway: &ClusterGateway,
		interval: Duration,
		timeout: Duration,
	) -> Result<(), SidecarError> {
		self.state = SidecarState::WaitingForAgentReady;
		let deadline = Instant::now() + timeout;

		loop {
			self.check_alive()?;

			match self.agent_status(gateway).await? {
				AgentStatus::Ready(pod) => {
					tracing::info!(pod = %pod, "Interception agent is ready");
					self.state = SidecarState::Streaming;
					return Ok(());
				}
				AgentStatus::Pending(detail) => {
					tracing::debug!(detail = %detail, "Interception agent not ready");
				}
			}

			if Instant::now() >= deadline {
				return Err(SidecarError::ReadyTimeout { timeout });
			}

			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return Err(SidecarError::Cancelled),
				_ = tokio::time::sleep(interval) => {}
			}
		}
	}

	/// Terminate the process: SIGTERM, wait up to `grace`, then kill.
	pub async fn stop(&mut self, grace: Duration) {
		if self.state == SidecarState::Stopped {
			return;
		}
		self.state = SidecarState::Stopping;
		self.cancel.cancel();

		if let Some(mut child) = self.child.take() {
			send_terminate(&mut child);
			match tokio::time::timeout(grace, child.wait()).await {
				Ok(Ok(status)) => tracing::debug!(%status, "Sidecar exited"),
				Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for sidecar"),
				Err(_) => {
					tracing::warn!(?grace, "Sidecar did not exit in time, killing it");
					if let Err(e) = child.kill().await {
						tracing::warn!(error = %e, "Failed to kill sidecar");
					}
				}
			}
		}

		for relay in self.relays.drain(..) {
			let abort = relay.abort_handle();
			if tokio::time::timeout(grace, relay).await.is_err() {
				abort.abort();
			}
		}

		self.state = SidecarState::Stopped;
		tracing::info!(
			stdout = %self.log_paths.stdout.display(),
			stderr = %self.log_paths.stderr.display(),
			"Sidecar stopped"
		);
	}
}
