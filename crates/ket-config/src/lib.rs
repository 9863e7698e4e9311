// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Run configuration resolution for ket.
//!
//! This crate provides:
//! - Config file discovery (`--config`, `./ket.toml`, XDG user config)
//! - Layered configuration from defaults, TOML file, `KET_*` environment and CLI flags
//! - Validation of the resolved [`RunConfig`]

pub mod error;
pub mod layer;
pub mod paths;
pub mod sources;

use std::path::Path;

use ket_launcher::RunConfig;
use tracing::{debug, info};

pub use error::ConfigError;
pub use layer::RunConfigLayer;
pub use sources::{
	parse_source_mode, CliSource, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource,
};

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Command line flags
/// 2. Environment variables (`KET_*`)
/// 3. Config file (`explicit`, else `./ket.toml`, else `~/.config/ket/config.toml`)
/// 4. Built-in defaults
pub fn load_run_config(
	explicit: Option<&Path>,
	cli: RunConfigLayer,
) -> Result<RunConfig, ConfigError> {
	let cwd = std::env::current_dir().map_err(|e| ConfigError::FileRead {
		path: ".".into(),
		source: e,
	})?;
	let file = paths::locate_config_file(explicit, &cwd, paths::user_config_file())?;

	load_from_sources(vec![
		Box::new(CliSource::new(cli)),
		Box::new(EnvSource::process()),
		Box::new(TomlSource::new(file)),
		Box::new(DefaultsSource),
	])
}

/// Merge `sources` in precedence order and validate the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<RunConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = RunConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.finalize();
	config
		.validate()
		.map_err(|e| ConfigError::Validation(e.to_string()))?;

	info!(
		project_root = %config.project_root.display(),
		image = %config.image,
		source_mode = %config.source_mode,
		interception = config.interception().is_some(),
		"Run configuration loaded"
	);
	Ok(config)
}
