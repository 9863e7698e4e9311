// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ket - run a project's tests inside a Kubernetes cluster.
//!
//! Each launch creates a throwaway namespace with scoped RBAC, runs the test
//! command as a Job, relays its output to stdout, exits with the test's exit
//! code and deletes the namespace.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ket_config::{load_run_config, RunConfigLayer};
use ket_k8s::KubeClient;
use ket_launcher::{run_launch, RunConfig, SourceMode, TOOLING_FAILURE_EXIT_CODE};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod env_docs;
mod logging;
mod manifest;
mod signals;

use logging::{init_tracing, LogFormat, LogLevel};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceModeArg {
	HostPath,
	ConfigMap,
}

impl From<SourceModeArg> for SourceMode {
	fn from(v: SourceModeArg) -> Self {
		match v {
			SourceModeArg::HostPath => SourceMode::HostPath,
			SourceModeArg::ConfigMap => SourceMode::ConfigMap,
		}
	}
}

/// ket - Kubernetes embedded tests
#[derive(Parser, Debug)]
#[command(name = "ket", version, about, long_about = None)]
struct Args {
	/// Path to a TOML configuration file
	#[arg(short, long, env = "KET_CONFIG", global = true)]
	config: Option<PathBuf>,

	/// Project directory relative to the workspace root
	#[arg(short = 'r', long, global = true)]
	project_root: Option<PathBuf>,

	/// Where the workspace lives on the node and in the container
	#[arg(short = 'w', long, global = true)]
	cluster_workspace_path: Option<String>,

	/// Prefix for the generated namespace name
	#[arg(long, global = true)]
	ns_prefix: Option<String>,

	/// Enable debug logging
	#[arg(short = 'v', long, global = true)]
	debug: bool,

	/// Diagnostic log format
	#[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
	log_format: LogFormat,

	#[command(subcommand)]
	command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
	/// Container image the test runs in
	#[arg(short, long)]
	image: Option<String>,

	/// Shell command that runs the tests
	#[arg(short, long)]
	test_command: Option<String>,

	/// Leave the namespace in place after the run
	#[arg(short, long)]
	keep_namespace: bool,

	/// Job retries before it is marked failed
	#[arg(short, long)]
	backoff_limit: Option<i32>,

	/// Hard time limit for the Job, in seconds
	#[arg(short = 'd', long)]
	active_deadline_seconds: Option<i64>,

	/// How the project source reaches the container
	#[arg(long, value_enum)]
	source_mode: Option<SourceModeArg>,

	/// Pod whose traffic should be intercepted
	#[arg(long)]
	target_pod: Option<String>,

	/// Namespace of the target pod
	#[arg(long)]
	target_namespace: Option<String>,

	/// Local command run under the interception sidecar
	#[arg(long)]
	process_to_test: Option<String>,

	/// Steal traffic instead of mirroring it
	#[arg(long)]
	steal: bool,

	/// Continue without interception if the sidecar never becomes ready
	#[arg(long)]
	allow_degraded_interception: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the tests in a throwaway namespace
	Launch(RunArgs),
	/// Print the resources a launch would create, as YAML
	Manifest(RunArgs),
	/// Describe the environment available to tests
	Env,
}

fn flag(set: bool) -> Option<bool> {
	set.then_some(true)
}

/// Command line values as the highest-precedence configuration layer.
fn cli_layer(args: &Args, run: &RunArgs) -> RunConfigLayer {
	RunConfigLayer {
		project_root: args.project_root.clone(),
		image: run.image.clone(),
		test_command: run.test_command.clone(),
		cluster_workspace_path: args.cluster_workspace_path.clone(),
		namespace_prefix: args.ns_prefix.clone(),
		backoff_limit: run.backoff_limit,
		active_deadline_seconds: run.active_deadline_seconds,
		keep_namespace: flag(run.keep_namespace),
		source_mode: run.source_mode.map(SourceMode::from),
		target_pod: run.target_pod.clone(),
		target_namespace: run.target_namespace.clone(),
		process_to_test: run.process_to_test.clone(),
		steal: flag(run.steal),
		allow_degraded_interception: flag(run.allow_degraded_interception),
		debug: flag(args.debug),
	}
}

fn load(args: &Args, run: &RunArgs) -> Result<RunConfig> {
	load_run_config(args.config.as_deref(), cli_layer(args, run))
		.context("failed to load configuration")
}

async fn launch(config: RunConfig) -> Result<ExitCode> {
	let client = KubeClient::new()
		.await
		.context("failed to connect to the cluster")?;

	let cancel = CancellationToken::new();
	let signals = signals::spawn_signal_handler(cancel.clone());

	let outcome = run_launch(Arc::new(client), config, cancel).await;
	signals.abort();

	match outcome {
		Ok(report) => {
			info!(
				namespace = %report.namespace,
				job = %report.job_name,
				"Tests passed"
			);
			Ok(ExitCode::SUCCESS)
		}
		Err(e) => {
			let code = e.exit_code();
			if e.is_test_failure() {
				error!(exit_code = code, "{e}");
			} else {
				error!(exit_code = code, error = %e, "Launch failed");
			}
			Ok(exit_code(code))
		}
	}
}

/// Process status for `code`; anything outside 0..=255 is a tooling failure.
fn exit_status(code: i32) -> u8 {
	u8::try_from(code).unwrap_or(TOOLING_FAILURE_EXIT_CODE as u8)
}

fn exit_code(code: i32) -> ExitCode {
	ExitCode::from(exit_status(code))
}

fn print_stdout(text: &str) -> Result<()> {
	use std::io::Write;
	let mut stdout = std::io::stdout().lock();
	stdout.write_all(text.as_bytes())?;
	stdout.flush()?;
	Ok(())
}

async fn run(args: Args) -> Result<ExitCode> {
	match &args.command {
		Command::Env => {
			print_stdout(&env_docs::render())?;
			Ok(ExitCode::SUCCESS)
		}
		Command::Manifest(run) => {
			init_tracing(args.log_format, LogLevel::Error);
			let config = load(&args, run)?;
			print_stdout(&manifest::generate(&config)?)?;
			Ok(ExitCode::SUCCESS)
		}
		Command::Launch(run) => {
			let config = load(&args, run)?;
			let level = if config.debug {
				LogLevel::Debug
			} else {
				LogLevel::Info
			};
			init_tracing(args.log_format, level);
			info!(
				project_root = %config.project_root.display(),
				image = %config.image,
				source_mode = %config.source_mode,
				"Starting ket"
			);
			launch(config).await
		}
	}
}

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();
	match run(args).await {
		Ok(code) => code,
		Err(e) => {
			eprintln!("error: {e:#}");
			exit_code(TOOLING_FAILURE_EXIT_CODE)
		}
	}
}
