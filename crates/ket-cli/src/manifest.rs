// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `ket manifest`: print the resources a launch would create.

use anyhow::{Context, Result};
use ket_launcher::namer::{namespace_name, project_name};
use ket_launcher::{build_manifests, collect_project_source, RunConfig, SourceMode, TestManifests};
use serde::Serialize;

fn push_document<T: Serialize>(out: &mut String, resource: &T) -> Result<()> {
	let yaml = serde_yaml::to_string(resource).context("failed to serialize manifest")?;
	out.push_str("---\n");
	out.push_str(&yaml);
	Ok(())
}

/// Render every resource as one `---`-separated YAML stream, in creation order.
pub fn render_manifests(manifests: &TestManifests) -> Result<String> {
	let mut out = String::new();
	push_document(&mut out, &manifests.namespace)?;
	push_document(&mut out, &manifests.service_account)?;
	push_document(&mut out, &manifests.role)?;
	push_document(&mut out, &manifests.role_binding)?;
	if let Some(config_map) = &manifests.source_config_map {
		push_document(&mut out, config_map)?;
	}
	push_document(&mut out, &manifests.job)?;
	Ok(out)
}

/// Build the manifests for `config` under a freshly generated namespace name.
pub fn generate(config: &RunConfig) -> Result<String> {
	let source = match config.source_mode {
		SourceMode::HostPath => None,
		SourceMode::ConfigMap => Some(
			collect_project_source(&config.project_root)
				.context("failed to collect project source")?,
		),
	};
	let namespace = namespace_name(&config.namespace_prefix, &project_name(&config.project_root));
	let manifests = build_manifests(config, &namespace, source.as_ref())
		.context("failed to build manifests")?;
	render_manifests(&manifests)
}
