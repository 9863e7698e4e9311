// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Project tree collection for the ConfigMap source mode.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use walkdir::{DirEntry, WalkDir};

use crate::error::SourceError;

/// Separator that stands in for `/` in ConfigMap keys.
pub const KEY_SEPARATOR: &str = "__";

/// ConfigMaps larger than this are rejected by the API server.
pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build"];
const MAX_KEY_LENGTH: usize = 253;

/// The project files destined for the source ConfigMap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSource {
	/// UTF-8 files keyed by encoded relative path
	pub data: BTreeMap<String, String>,
	/// Everything else, keyed the same way
	pub binary_data: BTreeMap<String, Vec<u8>>,
}

impl ProjectSource {
	pub fn file_count(&self) -> usize {
		self.data.len() + self.binary_data.len()
	}

	pub fn total_bytes(&self) -> usize {
		self.data.values().map(String::len).sum::<usize>()
			+ self.binary_data.values().map(Vec::len).sum::<usize>()
	}
}

/// Encode a relative file path as a ConfigMap key.
///
/// Returns `None` for paths that cannot round-trip: absolute paths, `..`,
/// characters outside `[-._a-zA-Z0-9]`, or components containing the
/// separator.
pub fn encode_key(relative: &Path) -> Option<String> {
	let mut parts = Vec::new();
	for component in relative.components() {
		match component {
			Component::Normal(part) => {
				let part = part.to_str()?;
				let valid = part
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
				if !valid || part.contains(KEY_SEPARATOR) || part.ends_with('_') {
					return None;
				}
				parts.push(part);
			}
			Component::CurDir => {}
			_ => return None,
		}
	}
	if parts.is_empty() {
		return None;
	}
	let key = parts.join(KEY_SEPARATOR);
	(key.len() <= MAX_KEY_LENGTH).then_some(key)
}

fn is_skipped(entry: &DirEntry) -> bool {
	if entry.depth() == 0 {
		return false;
	}
	let name = entry.file_name().to_string_lossy();
	name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Walk `root` and collect every regular file for the source ConfigMap.
///
/// Hidden entries and dependency/build directories are skipped. Files whose
/// paths cannot be encoded as keys, or that cannot be read, are skipped with
/// a warning.
pub fn collect_project_source(root: &Path) -> Result<ProjectSource, SourceError> {
	let mut source = ProjectSource::default();

	let walker = WalkDir::new(root)
		.sort_by_file_name()
		.into_iter()
		.filter_entry(|e| !is_skipped(e));

	for entry in walker {
		let entry = entry.map_err(|e| SourceError::Walk {
			path: root.to_path_buf(),
			source: e,
		})?;
		if !entry.file_type().is_file() {
			continue;
		}

		let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
		let Some(key) = encode_key(relative) else {
			tracing::warn!(path = %relative.display(), "Skipping file with a path that cannot be a ConfigMap key");
			continue;
		};

		let bytes = match std::fs::read(entry.path()) {
			Ok(bytes) => bytes,
			Err(e) => {
				tracing::warn!(path = %entry.path().display(), error = %e, "Could not read file");
				continue;
			}
		};

		match String::from_utf8(bytes) {
			Ok(text) => {
				source.data.insert(key, text);
			}
			Err(e) => {
				source.binary_data.insert(key, e.into_bytes());
			}
		}
	}

	let size = source.total_bytes();
	if size > MAX_SOURCE_BYTES {
		return Err(SourceError::TooLarge {
			size,
			limit: MAX_SOURCE_BYTES,
		});
	}

	tracing::debug!(
		root = %root.display(),
		files = source.file_count(),
		bytes = size,
		"Collected project source"
	);
	Ok(source)
}

fn shell_quote(value: &str) -> String {
	format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell script for the init container that unpacks `/source` into `target_dir`.
pub fn extract_script(source_dir: &str, target_dir: &str) -> String {
	format!(
		"set -e\n\
		mkdir -p {target}\n\
		cd {target}\n\
		for key in {source}/*; do\n\
		  [ -f \"$key\" ] || continue\n\
		  path=$(basename \"$key\" | sed 's#{sep}#/#g')\n\
		  mkdir -p \"$(dirname \"$path\")\"\n\
		  cp \"$key\" \"$path\"\n\
		done\n",
		target = shell_quote(target_dir),
		source = source_dir,
		sep = KEY_SEPARATOR,
	)
}
