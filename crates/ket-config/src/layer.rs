// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A partial run configuration contributed by one source.

use std::path::PathBuf;

use ket_launcher::{RunConfig, SourceMode};
use serde::Deserialize;

/// Every field is optional; unset fields fall through to lower layers.
///
/// Deserialized from TOML with camelCase keys. Unknown keys are rejected so
/// typos surface instead of silently using a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfigLayer {
	pub project_root: Option<PathBuf>,
	pub image: Option<String>,
	pub test_command: Option<String>,
	pub cluster_workspace_path: Option<String>,
	pub namespace_prefix: Option<String>,
	pub backoff_limit: Option<i32>,
	pub active_deadline_seconds: Option<i64>,
	pub keep_namespace: Option<bool>,
	pub source_mode: Option<SourceMode>,
	pub target_pod: Option<String>,
	pub target_namespace: Option<String>,
	pub process_to_test: Option<String>,
	pub steal: Option<bool>,
	pub allow_degraded_interception: Option<bool>,
	pub debug: Option<bool>,
}

macro_rules! merge_fields {
	($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
		$(
			if $src.$field.is_some() {
				$dst.$field = $src.$field;
			}
		)+
	};
}

macro_rules! apply_fields {
	($cfg:expr, $layer:expr, $($field:ident => $target:ident),+ $(,)?) => {
		$(
			if let Some(value) = $layer.$field {
				$cfg.$target = value;
			}
		)+
	};
}

impl RunConfigLayer {
	/// Overlay `other` on top of `self`; set fields in `other` win.
	pub fn merge(&mut self, other: RunConfigLayer) {
		merge_fields!(
			self,
			other,
			project_root,
			image,
			test_command,
			cluster_workspace_path,
			namespace_prefix,
			backoff_limit,
			active_deadline_seconds,
			keep_namespace,
			source_mode,
			target_pod,
			target_namespace,
			process_to_test,
			steal,
			allow_degraded_interception,
			debug,
		);
	}

	/// Resolve against the built-in defaults.
	pub fn finalize(self) -> RunConfig {
		let mut config = RunConfig::default();
		apply_fields!(
			config,
			self,
			project_root => project_root,
			image => image,
			test_command => test_command,
			cluster_workspace_path => workspace_path,
			namespace_prefix => namespace_prefix,
			backoff_limit => backoff_limit,
			active_deadline_seconds => active_deadline_seconds,
			keep_namespace => keep_namespace,
			source_mode => source_mode,
			steal => steal,
			allow_degraded_interception => allow_degraded_interception,
			debug => debug,
		);
		config.target_pod = self.target_pod;
		config.target_namespace = self.target_namespace;
		config.process_to_test = self.process_to_test;
		config
	}
}
