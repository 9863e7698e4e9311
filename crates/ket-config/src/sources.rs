// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML file, environment and command line.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use ket_launcher::SourceMode;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::RunConfigLayer;

pub const ENV_PROJECT_ROOT: &str = "KET_PROJECT_ROOT";
pub const ENV_IMAGE: &str = "KET_IMAGE";
pub const ENV_TEST_COMMAND: &str = "KET_TEST_COMMAND";
pub const ENV_WORKSPACE_PATH: &str = "KET_CLUSTER_WORKSPACE_PATH";
pub const ENV_NS_PREFIX: &str = "KET_NS_PREFIX";
pub const ENV_BACKOFF_LIMIT: &str = "KET_BACKOFF_LIMIT";
pub const ENV_ACTIVE_DEADLINE_SECONDS: &str = "KET_ACTIVE_DEADLINE_SECONDS";
pub const ENV_KEEP_NAMESPACE: &str = "KET_KEEP_NAMESPACE";
pub const ENV_SOURCE_MODE: &str = "KET_SOURCE_MODE";
pub const ENV_TARGET_POD: &str = "KET_TARGET_POD";
pub const ENV_TARGET_NAMESPACE: &str = "KET_TARGET_NAMESPACE";
pub const ENV_PROCESS_TO_TEST: &str = "KET_PROCESS_TO_TEST";
pub const ENV_STEAL: &str = "KET_STEAL";
pub const ENV_ALLOW_DEGRADED_INTERCEPTION: &str = "KET_ALLOW_DEGRADED_INTERCEPTION";
pub const ENV_DEBUG: &str = "KET_DEBUG";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
	Cli = 100,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<RunConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<RunConfigLayer, ConfigError> {
		Ok(RunConfigLayer::default())
	}
}

/// TOML file source. A source without a path contributes nothing.
pub struct TomlSource {
	path: Option<PathBuf>,
}

impl TomlSource {
	pub fn new(path: Option<PathBuf>) -> Self {
		Self { path }
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<RunConfigLayer, ConfigError> {
		let Some(path) = &self.path else {
			debug!("no config file, skipping");
			return Ok(RunConfigLayer::default());
		};

		debug!(path = %path.display(), "loading config file");
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
			path: path.clone(),
			source: e,
		})?;

		let layer: RunConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: path.clone(),
			source: e,
		})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `KET_<FIELD>`. Empty values count as unset.
pub struct EnvSource {
	vars: Option<HashMap<String, String>>,
}

impl EnvSource {
	/// Read the process environment.
	pub fn process() -> Self {
		Self { vars: None }
	}

	/// Read from a fixed set of variables instead of the process environment.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(
				vars
					.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		let value = match &self.vars {
			Some(vars) => vars.get(name).cloned(),
			None => std::env::var(name).ok(),
		};
		value.filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
		match self.var(name) {
			None => Ok(None),
			Some(v) => match v.to_ascii_lowercase().as_str() {
				"1" | "true" | "yes" | "on" => Ok(Some(true)),
				"0" | "false" | "no" | "off" => Ok(Some(false)),
				_ => Err(ConfigError::invalid_value(
					name,
					format!("invalid boolean value '{v}'"),
				)),
			},
		}
	}

	fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			None => Ok(None),
			Some(v) => v.parse().map(Some).map_err(|_| {
				ConfigError::invalid_value(name, format!("invalid number '{v}'"))
			}),
		}
	}

	fn source_mode(&self) -> Result<Option<SourceMode>, ConfigError> {
		match self.var(ENV_SOURCE_MODE) {
			None => Ok(None),
			Some(v) => parse_source_mode(&v)
				.map(Some)
				.ok_or_else(|| {
					ConfigError::invalid_value(
						ENV_SOURCE_MODE,
						format!("expected host-path or config-map, got '{v}'"),
					)
				}),
		}
	}
}

/// Parse `host-path` / `config-map`.
pub fn parse_source_mode(value: &str) -> Option<SourceMode> {
	match value.trim().to_ascii_lowercase().as_str() {
		"host-path" | "hostpath" => Some(SourceMode::HostPath),
		"config-map" | "configmap" => Some(SourceMode::ConfigMap),
		_ => None,
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<RunConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(RunConfigLayer {
			project_root: self.var(ENV_PROJECT_ROOT).map(PathBuf::from),
			image: self.var(ENV_IMAGE),
			test_command: self.var(ENV_TEST_COMMAND),
			cluster_workspace_path: self.var(ENV_WORKSPACE_PATH),
			namespace_prefix: self.var(ENV_NS_PREFIX),
			backoff_limit: self.parse(ENV_BACKOFF_LIMIT)?,
			active_deadline_seconds: self.parse(ENV_ACTIVE_DEADLINE_SECONDS)?,
			keep_namespace: self.bool(ENV_KEEP_NAMESPACE)?,
			source_mode: self.source_mode()?,
			target_pod: self.var(ENV_TARGET_POD),
			target_namespace: self.var(ENV_TARGET_NAMESPACE),
			process_to_test: self.var(ENV_PROCESS_TO_TEST),
			steal: self.bool(ENV_STEAL)?,
			allow_degraded_interception: self.bool(ENV_ALLOW_DEGRADED_INTERCEPTION)?,
			debug: self.bool(ENV_DEBUG)?,
		})
	}
}

/// Command line flags, already parsed into a layer.
pub struct CliSource {
	layer: RunConfigLayer,
}

impl CliSource {
	pub fn new(layer: RunConfigLayer) -> Self {
		Self { layer }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<RunConfigLayer, ConfigError> {
		Ok(self.layer.clone())
	}
}
