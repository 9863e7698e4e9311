// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors that can occur during K8s operations.
#[derive(Error, Debug)]
pub enum K8sError {
	#[error("K8s API error: {message}")]
	ApiError { message: String },

	#[error("{kind} already exists: {name}")]
	AlreadyExists { kind: &'static str, name: String },

	#[error("{kind} not found: {name}")]
	NotFound { kind: &'static str, name: String },

	#[error("Container in pod {pod} has not terminated")]
	NotTerminated { pod: String },

	#[error("Log stream error: {message}")]
	StreamError { message: String },

	#[error("Cluster configuration error: {message}")]
	ConfigError { message: String },
}

impl K8sError {
	/// True when the API rejected a create because the object is already there.
	pub fn is_already_exists(&self) -> bool {
		matches!(self, K8sError::AlreadyExists { .. })
	}

	/// True when the referenced object does not exist.
	pub fn is_not_found(&self) -> bool {
		matches!(self, K8sError::NotFound { .. })
	}

	/// Map a kube error for a named object, turning 404 and 409 into typed variants.
	pub(crate) fn from_kube(err: kube::Error, kind: &'static str, name: &str) -> Self {
		match err {
			kube::Error::Api(ref resp) if resp.code == 404 => K8sError::NotFound {
				kind,
				name: name.into(),
			},
			kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
				K8sError::AlreadyExists {
					kind,
					name: name.into(),
				}
			}
			other => other.into(),
		}
	}
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		K8sError::ApiError {
			message: err.to_string(),
		}
	}
}
