// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Diagnostic logging setup. Everything goes to stderr; stdout carries test
//! output or YAML.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
	#[default]
	Pretty,
	Compact,
	Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
	Error,
	Info,
	Debug,
}

impl LogLevel {
	fn as_tracing(self) -> tracing::Level {
		match self {
			LogLevel::Error => tracing::Level::ERROR,
			LogLevel::Info => tracing::Level::INFO,
			LogLevel::Debug => tracing::Level::DEBUG,
		}
	}
}

/// Filter directive used when `RUST_LOG` is unset.
fn default_directive(level: LogLevel) -> String {
	let level = level.as_tracing();
	format!("ket={level},ket_cli={level},ket_config={level},ket_k8s={level},ket_launcher={level}")
}

pub fn init_tracing(format: LogFormat, level: LogLevel) {
	let filter = if level == LogLevel::Error {
		EnvFilter::new(default_directive(level))
	} else {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
	};

	match format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}
