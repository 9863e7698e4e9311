// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Names for the ephemeral namespace and the objects inside it.

use std::path::{Component, Path};

use uuid::Uuid;

/// Token used when a name sanitises to nothing.
pub const FALLBACK_NAME: &str = "default";

const SUFFIX_LEN: usize = 8;
const MAX_NAME_LENGTH: usize = 63;
// Leaves room for "-" and the random suffix.
const MAX_PREFIX_LENGTH: usize = MAX_NAME_LENGTH - SUFFIX_LEN - 1;

/// Reduce `value` to a DNS-1123 label body.
///
/// Lowercases, maps every non-alphanumeric character to `-`, collapses runs
/// of `-`, trims leading and trailing `-` and truncates to `max_len`.
/// May return an empty string.
pub fn sanitize_name(value: &str, max_len: usize) -> String {
	let mut out = String::with_capacity(value.len());
	for c in value.chars() {
		if c.is_ascii_alphanumeric() {
			out.push(c.to_ascii_lowercase());
		} else if !out.is_empty() && !out.ends_with('-') {
			out.push('-');
		}
	}

	if out.len() > max_len {
		out.truncate(max_len);
	}
	out.trim_end_matches('-').to_string()
}

/// Eight lowercase hex characters from a fresh v4 UUID.
pub fn random_suffix() -> String {
	let simple = Uuid::new_v4().simple().to_string();
	simple[..SUFFIX_LEN].to_string()
}

/// Generate a namespace name `{prefix}-{8 hex}`.
///
/// When the prefix sanitises to nothing the project name is tried, then
/// [`FALLBACK_NAME`].
pub fn namespace_name(prefix: &str, project_name: &str) -> String {
	let mut base = sanitize_name(prefix, MAX_PREFIX_LENGTH);
	if base.is_empty() {
		base = sanitize_name(project_name, MAX_PREFIX_LENGTH);
	}
	if base.is_empty() {
		base = FALLBACK_NAME.to_string();
	}
	format!("{base}-{}", random_suffix())
}

/// Basename of the project root.
///
/// `.` (or an empty path) resolves against the current directory; anything
/// without a usable final component becomes `project`.
pub fn project_name(project_root: &Path) -> String {
	let is_current_dir = project_root
		.components()
		.all(|c| matches!(c, Component::CurDir));

	let name = if is_current_dir {
		std::env::current_dir()
			.ok()
			.and_then(|cwd| cwd.file_name().map(|n| n.to_string_lossy().into_owned()))
	} else {
		project_root
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
	};

	name
		.filter(|n| !sanitize_name(n, MAX_PREFIX_LENGTH).is_empty())
		.unwrap_or_else(|| "project".to_string())
}

/// Label-safe form of the project name.
pub fn project_label(project_name: &str) -> String {
	let label = sanitize_name(project_name, MAX_PREFIX_LENGTH);
	if label.is_empty() {
		"project".to_string()
	} else {
		label
	}
}

/// Job name `ket-{project}`.
pub fn job_name(project_name: &str) -> String {
	format!("ket-{}", project_label(project_name))
}
