// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Config file discovery.

use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Name of the per-project config file.
pub const WORKSPACE_CONFIG_FILE: &str = "ket.toml";

/// User config file: `$XDG_CONFIG_HOME/ket/config.toml` or `~/.config/ket/config.toml`.
///
/// `None` when neither variable nor home directory is available.
pub fn user_config_file() -> Option<PathBuf> {
	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.filter(|v| !v.is_empty())
		.map(PathBuf::from)
		.or_else(|| dirs::home_dir().map(|home| home.join(".config")))?;
	Some(config_home.join("ket/config.toml"))
}

/// `ket.toml` in `dir`.
pub fn workspace_config_file(dir: &Path) -> PathBuf {
	dir.join(WORKSPACE_CONFIG_FILE)
}

/// Pick the config file to load.
///
/// An explicit path must exist. Otherwise the first existing file among
/// `./ket.toml` and the user config file is used; having none is fine.
pub fn locate_config_file(
	explicit: Option<&Path>,
	cwd: &Path,
	user_file: Option<PathBuf>,
) -> Result<Option<PathBuf>, ConfigError> {
	if let Some(path) = explicit {
		if !path.is_file() {
			return Err(ConfigError::NotFound(path.to_path_buf()));
		}
		return Ok(Some(path.to_path_buf()));
	}

	let workspace = workspace_config_file(cwd);
	if workspace.is_file() {
		return Ok(Some(workspace));
	}

	let found = user_file.filter(|p| p.is_file());
	tracing::debug!(path = ?found, "resolved config file");
	Ok(found)
}
